//! What the backend hands back to the generic linker core: generated
//! section bytes, dynamic relocation records and synthetic symbols. Final
//! serialization of these into the output file is the core's job.

use crate::model::ObjectId;
use crate::model::SymbolRef;
use ppclink_utils::elf::DynamicRelocationKind;

/// Where a dynamic relocation lands: a section the backend synthesizes, or
/// one of the input sections it patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocTarget {
    Got,
    Plt,
    LocalPlt,
    Iplt,
    BranchLookup,
    FunctionDescriptors,
    /// Stub table of the group with this index.
    Stubs(usize),
    Input { object: ObjectId, section: usize },
}

/// A dynamic relocation to be appended to the output's dynamic-relocation
/// section. `offset` is relative to the start of `target`, so records stay
/// valid while relaxation moves addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicRelocation {
    pub target: RelocTarget,
    pub offset: u64,
    pub kind: DynamicRelocationKind,
    /// `None` for relative/irelative relocations that need no symbol.
    pub symbol: Option<SymbolRef>,
    pub addend: i64,
}

/// A symbol naming a generated stub, for disassembly and debugging.
#[derive(Debug, Clone)]
pub struct SyntheticSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// Everything the backend produced. Input section bytes are patched in
/// place and are not duplicated here.
#[derive(Debug, Default)]
pub struct BackendArtifacts {
    pub got_bytes: Vec<u8>,
    pub plt_bytes: Vec<u8>,
    pub local_plt_bytes: Vec<u8>,
    pub iplt_bytes: Vec<u8>,
    pub branch_lookup_bytes: Vec<u8>,
    pub function_descriptor_bytes: Vec<u8>,
    pub stub_bytes: Vec<Vec<u8>>,
    pub dynamic_relocations: Vec<DynamicRelocation>,
    pub synthetic_symbols: Vec<SyntheticSymbol>,
}
