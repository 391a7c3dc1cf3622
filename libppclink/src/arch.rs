//! The per-session architecture strategy. Word size, byte order and ABI
//! revision are fixed once when the session is created by choosing one of
//! the zero-sized types here; nothing downstream re-derives them per call.

use crate::error::Result;
use anyhow::anyhow;
use object::Endianness;
use ppclink_utils::elf::DynamicRelocationKind;
use ppclink_utils::elf::RelocationKindInfo;
use ppclink_utils::elf::ppc32_rel_type_to_string;
use ppclink_utils::elf::ppc64_rel_type_to_string;
use ppclink_utils::powerpc32;
use ppclink_utils::powerpc64;
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiVersion {
    /// 64-bit big-endian ABI with function descriptors.
    ElfV1,
    /// 64-bit little-endian ABI with local entry points.
    ElfV2,
    /// The 32-bit SysV ABI.
    Ppc32,
}

pub trait PowerPcArch: Copy + Default + 'static {
    const ELF_MACHINE: u16;
    const WORD_BYTES: u64;
    const ENDIAN: Endianness;
    const ABI: AbiVersion;

    /// Architecture-specific parsing of the relocation types.
    fn relocation_from_raw(r_type: u32) -> Result<RelocationKindInfo> {
        Self::relocation_from_raw_opt(r_type).ok_or_else(|| {
            anyhow!(
                "Unsupported relocation type {}",
                Self::rel_type_to_string(r_type)
            )
        })
    }

    fn relocation_from_raw_opt(r_type: u32) -> Option<RelocationKindInfo>;

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str>;

    /// The architecture's r_type for a dynamic relocation we emit.
    fn dynamic_relocation_type(kind: DynamicRelocationKind) -> u32;

    /// Whether a branch relocation promises the caller does not use the TOC
    /// convention.
    fn is_notoc_branch(_r_type: u32) -> bool {
        false
    }

    /// Offset from a function's global entry to its local entry.
    fn local_entry_offset(_st_other: u8) -> Result<u64> {
        Ok(0)
    }

    #[must_use]
    fn has_function_descriptors() -> bool {
        Self::ABI == AbiVersion::ElfV1
    }

    /// Size of one PLT slot: a plain address, or a descriptor triple
    /// (entry, TOC, environment) on ELFv1.
    #[must_use]
    fn plt_slot_size() -> u64 {
        match Self::ABI {
            AbiVersion::ElfV1 => 24,
            AbiVersion::ElfV2 => 8,
            AbiVersion::Ppc32 => 4,
        }
    }
}

/// 64-bit little-endian, ELFv2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc64;

impl PowerPcArch for Ppc64 {
    const ELF_MACHINE: u16 = object::elf::EM_PPC64;
    const WORD_BYTES: u64 = 8;
    const ENDIAN: Endianness = Endianness::Little;
    const ABI: AbiVersion = AbiVersion::ElfV2;

    fn relocation_from_raw_opt(r_type: u32) -> Option<RelocationKindInfo> {
        powerpc64::relocation_type_from_raw(r_type)
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        ppc64_rel_type_to_string(r_type)
    }

    fn dynamic_relocation_type(kind: DynamicRelocationKind) -> u32 {
        kind.ppc64_r_type()
    }

    fn is_notoc_branch(r_type: u32) -> bool {
        powerpc64::is_notoc_branch(r_type)
    }

    fn local_entry_offset(st_other: u8) -> Result<u64> {
        powerpc64::local_entry_offset(st_other)
    }
}

/// 64-bit big-endian, ELFv1 with function descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc64V1;

impl PowerPcArch for Ppc64V1 {
    const ELF_MACHINE: u16 = object::elf::EM_PPC64;
    const WORD_BYTES: u64 = 8;
    const ENDIAN: Endianness = Endianness::Big;
    const ABI: AbiVersion = AbiVersion::ElfV1;

    fn relocation_from_raw_opt(r_type: u32) -> Option<RelocationKindInfo> {
        powerpc64::relocation_type_from_raw(r_type)
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        ppc64_rel_type_to_string(r_type)
    }

    fn dynamic_relocation_type(kind: DynamicRelocationKind) -> u32 {
        kind.ppc64_r_type()
    }

    fn is_notoc_branch(r_type: u32) -> bool {
        powerpc64::is_notoc_branch(r_type)
    }
}

/// 32-bit big-endian SysV.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc32;

impl PowerPcArch for Ppc32 {
    const ELF_MACHINE: u16 = object::elf::EM_PPC;
    const WORD_BYTES: u64 = 4;
    const ENDIAN: Endianness = Endianness::Big;
    const ABI: AbiVersion = AbiVersion::Ppc32;

    fn relocation_from_raw_opt(r_type: u32) -> Option<RelocationKindInfo> {
        powerpc32::relocation_type_from_raw(r_type)
    }

    fn rel_type_to_string(r_type: u32) -> Cow<'static, str> {
        ppc32_rel_type_to_string(r_type)
    }

    fn dynamic_relocation_type(kind: DynamicRelocationKind) -> u32 {
        kind.ppc32_r_type()
    }
}
