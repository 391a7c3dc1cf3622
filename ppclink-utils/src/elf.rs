use anyhow::Result;
use std::borrow::Cow;
use std::fmt;

macro_rules! const_name_by_value {
    ($needle: expr, $( $const:ident ),*) => {
        match $needle {
            $(object::elf::$const => Some(stringify!($const)),)*
            _ => None
        }
    };
}

macro_rules! local_const_name_by_value {
    ($needle: expr, $( $const:ident ),*) => {
        match $needle {
            $(crate::elf::ppc64x::$const => Some(stringify!($const)),)*
            _ => None
        }
    };
}

/// PowerPC64 relocation types that postdate the glibc-derived constant set in
/// the `object` crate (the POWER10 prefixed pc-relative family and the
/// PLT-sequence markers). Values are from the ELFv2 ABI supplement.
pub mod ppc64x {
    pub const R_PPC64_REL24_NOTOC: u32 = 116;
    pub const R_PPC64_ADDR64_LOCAL: u32 = 117;
    pub const R_PPC64_ENTRY: u32 = 118;
    pub const R_PPC64_PLTSEQ: u32 = 119;
    pub const R_PPC64_PLTCALL: u32 = 120;
    pub const R_PPC64_PLTSEQ_NOTOC: u32 = 121;
    pub const R_PPC64_PLTCALL_NOTOC: u32 = 122;
    pub const R_PPC64_PCREL_OPT: u32 = 123;
    pub const R_PPC64_REL24_P9NOTOC: u32 = 124;
    pub const R_PPC64_D34: u32 = 128;
    pub const R_PPC64_D34_LO: u32 = 129;
    pub const R_PPC64_D34_HI30: u32 = 130;
    pub const R_PPC64_D34_HA30: u32 = 131;
    pub const R_PPC64_PCREL34: u32 = 132;
    pub const R_PPC64_GOT_PCREL34: u32 = 133;
    pub const R_PPC64_PLT_PCREL34: u32 = 134;
    pub const R_PPC64_PLT_PCREL34_NOTOC: u32 = 135;
}

#[must_use]
pub fn ppc64_rel_type_to_string(r_type: u32) -> Cow<'static, str> {
    if let Some(name) = const_name_by_value![
        r_type,
        R_PPC64_NONE,
        R_PPC64_ADDR32,
        R_PPC64_ADDR24,
        R_PPC64_ADDR16,
        R_PPC64_ADDR16_LO,
        R_PPC64_ADDR16_HI,
        R_PPC64_ADDR16_HA,
        R_PPC64_ADDR14,
        R_PPC64_ADDR14_BRTAKEN,
        R_PPC64_ADDR14_BRNTAKEN,
        R_PPC64_REL24,
        R_PPC64_REL14,
        R_PPC64_REL14_BRTAKEN,
        R_PPC64_REL14_BRNTAKEN,
        R_PPC64_GOT16,
        R_PPC64_GOT16_LO,
        R_PPC64_GOT16_HI,
        R_PPC64_GOT16_HA,
        R_PPC64_COPY,
        R_PPC64_GLOB_DAT,
        R_PPC64_JMP_SLOT,
        R_PPC64_RELATIVE,
        R_PPC64_REL32,
        R_PPC64_ADDR64,
        R_PPC64_ADDR16_HIGHER,
        R_PPC64_ADDR16_HIGHERA,
        R_PPC64_ADDR16_HIGHEST,
        R_PPC64_ADDR16_HIGHESTA,
        R_PPC64_REL64,
        R_PPC64_TOC16,
        R_PPC64_TOC16_LO,
        R_PPC64_TOC16_HI,
        R_PPC64_TOC16_HA,
        R_PPC64_TOC,
        R_PPC64_ADDR16_DS,
        R_PPC64_ADDR16_LO_DS,
        R_PPC64_GOT16_DS,
        R_PPC64_GOT16_LO_DS,
        R_PPC64_TOC16_DS,
        R_PPC64_TOC16_LO_DS,
        R_PPC64_TLS,
        R_PPC64_DTPMOD64,
        R_PPC64_TPREL16,
        R_PPC64_TPREL16_LO,
        R_PPC64_TPREL16_HI,
        R_PPC64_TPREL16_HA,
        R_PPC64_TPREL64,
        R_PPC64_DTPREL16,
        R_PPC64_DTPREL16_LO,
        R_PPC64_DTPREL16_HI,
        R_PPC64_DTPREL16_HA,
        R_PPC64_DTPREL64,
        R_PPC64_GOT_TLSGD16,
        R_PPC64_GOT_TLSGD16_LO,
        R_PPC64_GOT_TLSGD16_HI,
        R_PPC64_GOT_TLSGD16_HA,
        R_PPC64_GOT_TLSLD16,
        R_PPC64_GOT_TLSLD16_LO,
        R_PPC64_GOT_TLSLD16_HI,
        R_PPC64_GOT_TLSLD16_HA,
        R_PPC64_GOT_TPREL16_DS,
        R_PPC64_GOT_TPREL16_LO_DS,
        R_PPC64_GOT_TPREL16_HI,
        R_PPC64_GOT_TPREL16_HA,
        R_PPC64_GOT_DTPREL16_DS,
        R_PPC64_GOT_DTPREL16_LO_DS,
        R_PPC64_GOT_DTPREL16_HI,
        R_PPC64_GOT_DTPREL16_HA,
        R_PPC64_TPREL16_DS,
        R_PPC64_TPREL16_LO_DS,
        R_PPC64_TPREL16_HIGHER,
        R_PPC64_TPREL16_HIGHERA,
        R_PPC64_TPREL16_HIGHEST,
        R_PPC64_TPREL16_HIGHESTA,
        R_PPC64_DTPREL16_DS,
        R_PPC64_DTPREL16_LO_DS,
        R_PPC64_DTPREL16_HIGHER,
        R_PPC64_DTPREL16_HIGHERA,
        R_PPC64_DTPREL16_HIGHEST,
        R_PPC64_DTPREL16_HIGHESTA,
        R_PPC64_TLSGD,
        R_PPC64_TLSLD,
        R_PPC64_TOCSAVE,
        R_PPC64_ADDR16_HIGH,
        R_PPC64_ADDR16_HIGHA,
        R_PPC64_TPREL16_HIGH,
        R_PPC64_TPREL16_HIGHA,
        R_PPC64_DTPREL16_HIGH,
        R_PPC64_DTPREL16_HIGHA,
        R_PPC64_JMP_IREL,
        R_PPC64_IRELATIVE,
        R_PPC64_REL16,
        R_PPC64_REL16_LO,
        R_PPC64_REL16_HI,
        R_PPC64_REL16_HA
    ] {
        Cow::Borrowed(name)
    } else if let Some(name) = local_const_name_by_value![
        r_type,
        R_PPC64_REL24_NOTOC,
        R_PPC64_ADDR64_LOCAL,
        R_PPC64_ENTRY,
        R_PPC64_PLTSEQ,
        R_PPC64_PLTCALL,
        R_PPC64_PLTSEQ_NOTOC,
        R_PPC64_PLTCALL_NOTOC,
        R_PPC64_PCREL_OPT,
        R_PPC64_REL24_P9NOTOC,
        R_PPC64_D34,
        R_PPC64_D34_LO,
        R_PPC64_D34_HI30,
        R_PPC64_D34_HA30,
        R_PPC64_PCREL34,
        R_PPC64_GOT_PCREL34,
        R_PPC64_PLT_PCREL34,
        R_PPC64_PLT_PCREL34_NOTOC
    ] {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("Unknown ppc64 relocation type 0x{r_type:x}"))
    }
}

#[must_use]
pub fn ppc32_rel_type_to_string(r_type: u32) -> Cow<'static, str> {
    if let Some(name) = const_name_by_value![
        r_type,
        R_PPC_NONE,
        R_PPC_ADDR32,
        R_PPC_ADDR24,
        R_PPC_ADDR16,
        R_PPC_ADDR16_LO,
        R_PPC_ADDR16_HI,
        R_PPC_ADDR16_HA,
        R_PPC_ADDR14,
        R_PPC_ADDR14_BRTAKEN,
        R_PPC_ADDR14_BRNTAKEN,
        R_PPC_REL24,
        R_PPC_REL14,
        R_PPC_REL14_BRTAKEN,
        R_PPC_REL14_BRNTAKEN,
        R_PPC_GOT16,
        R_PPC_GOT16_LO,
        R_PPC_GOT16_HI,
        R_PPC_GOT16_HA,
        R_PPC_PLTREL24,
        R_PPC_COPY,
        R_PPC_GLOB_DAT,
        R_PPC_JMP_SLOT,
        R_PPC_RELATIVE,
        R_PPC_LOCAL24PC,
        R_PPC_REL32,
        R_PPC_TLS,
        R_PPC_DTPMOD32,
        R_PPC_TPREL16,
        R_PPC_TPREL16_LO,
        R_PPC_TPREL16_HI,
        R_PPC_TPREL16_HA,
        R_PPC_TPREL32,
        R_PPC_DTPREL16,
        R_PPC_DTPREL16_LO,
        R_PPC_DTPREL16_HI,
        R_PPC_DTPREL16_HA,
        R_PPC_DTPREL32,
        R_PPC_GOT_TLSGD16,
        R_PPC_GOT_TLSGD16_LO,
        R_PPC_GOT_TLSGD16_HI,
        R_PPC_GOT_TLSGD16_HA,
        R_PPC_GOT_TLSLD16,
        R_PPC_GOT_TLSLD16_LO,
        R_PPC_GOT_TLSLD16_HI,
        R_PPC_GOT_TLSLD16_HA,
        R_PPC_GOT_TPREL16,
        R_PPC_GOT_TPREL16_LO,
        R_PPC_GOT_TPREL16_HI,
        R_PPC_GOT_TPREL16_HA,
        R_PPC_GOT_DTPREL16,
        R_PPC_GOT_DTPREL16_LO,
        R_PPC_GOT_DTPREL16_HI,
        R_PPC_GOT_DTPREL16_HA,
        R_PPC_IRELATIVE,
        R_PPC_REL16,
        R_PPC_REL16_LO,
        R_PPC_REL16_HI,
        R_PPC_REL16_HA
    ] {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("Unknown ppc32 relocation type 0x{r_type:x}"))
    }
}

/// Section flag bit values.
pub mod shf {
    use super::SectionFlags;

    pub const WRITE: SectionFlags = SectionFlags::from_u32(object::elf::SHF_WRITE);
    pub const ALLOC: SectionFlags = SectionFlags::from_u32(object::elf::SHF_ALLOC);
    pub const EXECINSTR: SectionFlags = SectionFlags::from_u32(object::elf::SHF_EXECINSTR);
    pub const TLS: SectionFlags = SectionFlags::from_u32(object::elf::SHF_TLS);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SectionFlags(u32);

impl SectionFlags {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn contains(self, flag: SectionFlags) -> bool {
        self.0 & flag.0 != 0
    }

    #[must_use]
    pub const fn from_u32(raw: u32) -> SectionFlags {
        SectionFlags(raw)
    }

    /// Returns self with the specified flags set.
    #[must_use]
    pub const fn with(self, flags: SectionFlags) -> SectionFlags {
        SectionFlags(self.0 | flags.0)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, ch) in [
            (shf::WRITE, "W"),
            (shf::ALLOC, "A"),
            (shf::EXECINSTR, "X"),
            (shf::TLS, "T"),
        ] {
            if self.contains(flag) {
                f.write_str(ch)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

/// What a relocation's computed value means. Field placement is described
/// separately by [`RelocationSize`]; the high/low half-word selection by
/// [`ValueSlice`]. For background on the TLS kinds see "ELF Handling For
/// Thread-Local Storage" - <https://www.uclibc.org/docs/tls.pdf>.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocationKind {
    /// The absolute address of a symbol or section.
    Absolute,

    /// The address of the symbol, relative to the place of the relocation.
    Relative,

    /// A relative branch (I-form, 26-bit displacement field). Subject to
    /// stub redirection when the target is out of reach.
    Branch,

    /// A relative conditional branch (B-form, 16-bit displacement field).
    CondBranch,

    /// A branch with an absolute target (AA=1 forms of the above).
    AbsBranch,
    AbsCondBranch,

    /// The address of the symbol, relative to the TOC base pointer.
    TocRelative,

    /// The offset of the symbol's GOT entry, relative to the TOC base.
    Got,

    /// The address of the symbol's GOT entry, relative to the place of the
    /// relocation (POWER10 prefixed pc-relative GOT load).
    GotRelative,

    /// The address of the TOC base pointer itself (`.TOC.` plus addend).
    TocBase,

    /// The address of the symbol's PLT entry, relative to the place of the
    /// relocation (POWER10 prefixed `pld` of the PLT word).
    PltPcRel,

    /// The offset of the symbol's TLSGD GOT pair (module ID + DTPREL),
    /// relative to the TOC base.
    TlsGdGot,

    /// The offset of the module's TLSLD GOT pair, relative to the TOC base.
    TlsLdGot,

    /// The offset of a GOT slot holding the symbol's TPREL value, relative
    /// to the TOC base.
    GotTpRel,

    /// The offset of a GOT slot holding the symbol's DTPREL value, relative
    /// to the TOC base.
    GotDtpRel,

    /// The offset of a thread-local within the executable's TLS block.
    TpRel,

    /// The offset of a thread-local within its module's TLS block.
    DtpRel,

    /// Marker naming the `__tls_get_addr` argument-setup of a
    /// general-dynamic sequence. Applies no bytes itself.
    TlsGdMarker,

    /// As above for a local-dynamic sequence.
    TlsLdMarker,

    /// Marker on an instruction that saves the TOC pointer for an indirect
    /// call; consulted when sizing call stubs. Applies no bytes.
    TocSaveMarker,

    /// Marker placed on the instruction paired with a `bctrl` of an
    /// initial-exec sequence (R_PPC64_TLS). Applies no bytes.
    TlsMarker,

    /// No relocation needs to be applied. Produced when we eliminate a
    /// relocation due to an optimisation.
    None,
}

impl RelocationKind {
    #[must_use]
    pub fn is_tls(self) -> bool {
        matches!(
            self,
            Self::TlsGdGot
                | Self::TlsLdGot
                | Self::GotTpRel
                | Self::GotDtpRel
                | Self::TpRel
                | Self::DtpRel
                | Self::TlsGdMarker
                | Self::TlsLdMarker
                | Self::TlsMarker
        )
    }

    /// Branch-class relocations get catalogued for reachability analysis.
    #[must_use]
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Branch | Self::CondBranch)
    }
}

/// Which slice of the computed value lands in the instruction field.
/// The `*Adjusted` forms round by adding 0x8000 first so that a following
/// low half-word, interpreted signed, reconstitutes the full value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValueSlice {
    #[default]
    Full,
    Lo,
    Hi,
    HiAdjusted,
    High,
    HighAdjusted,
    Higher,
    HigherAdjusted,
    Highest,
    HighestAdjusted,
}

impl ValueSlice {
    #[must_use]
    pub fn apply(self, value: u64) -> u64 {
        match self {
            ValueSlice::Full => value,
            ValueSlice::Lo => value & 0xffff,
            // HI/HA check a 32-bit value; HIGH/HIGHA are the checkless
            // 64-bit variants with identical arithmetic.
            ValueSlice::Hi | ValueSlice::High => (value >> 16) & 0xffff,
            ValueSlice::HiAdjusted | ValueSlice::HighAdjusted => {
                (value.wrapping_add(0x8000) >> 16) & 0xffff
            }
            ValueSlice::Higher => (value >> 32) & 0xffff,
            ValueSlice::HigherAdjusted => (value.wrapping_add(0x8000) >> 32) & 0xffff,
            ValueSlice::Highest => (value >> 48) & 0xffff,
            ValueSlice::HighestAdjusted => (value.wrapping_add(0x8000) >> 48) & 0xffff,
        }
    }
}

/// Instruction-field placements used by PowerPC relocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsnField {
    /// 16-bit immediate of a D-form instruction (addi, lwz, ...).
    D16,

    /// 14-bit immediate of a DS-form instruction (ld, std). The two low
    /// value bits must be zero and are not stored.
    Ds16,

    /// 24-bit branch displacement of an I-form instruction, bits 2..26.
    /// AA and LK are preserved.
    Branch24,

    /// 14-bit branch displacement of a B-form instruction, bits 2..16.
    Branch14,

    /// 34-bit immediate split across a prefixed instruction pair:
    /// high 18 bits in the prefix word, low 16 in the suffix.
    D34,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocationSize {
    ByteSize(usize),
    Insn(InsnField),
}

impl fmt::Display for RelocationSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByteSize(bytes) => f.write_fmt(format_args!("{bytes}B")),
            Self::Insn(field) => f.write_fmt(format_args!("{field:?}")),
        }
    }
}

// Allowed range (half-open) of a computed value of a relocation
#[derive(Clone, Debug, Copy)]
pub struct AllowedRange {
    pub min: i64,
    pub max: i64,
}

impl AllowedRange {
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn no_check() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    /// Signed two's-complement range of a `bits`-wide field.
    #[must_use]
    pub const fn signed(bits: u32) -> Self {
        Self::new(-(1 << (bits - 1)), 1 << (bits - 1))
    }

    /// Either interpretation accepted, as for true bit-fields.
    #[must_use]
    pub const fn bit_field(bits: u32) -> Self {
        Self::new(-(1 << (bits - 1)), 1 << bits)
    }
}

#[derive(Clone, Debug, Copy)]
pub struct RelocationKindInfo {
    pub kind: RelocationKind,
    pub size: RelocationSize,
    pub slice: ValueSlice,
    pub range: AllowedRange,
    pub alignment: usize,
}

impl RelocationKindInfo {
    /// Checks alignment before range: a misaligned value is reported as such
    /// even when it is also out of range.
    #[inline(always)]
    pub fn verify(&self, value: i64) -> Result<()> {
        anyhow::ensure!(
            (value as usize) & (self.alignment - 1) == 0,
            "Relocation value 0x{value:x} not aligned to {} bytes",
            self.alignment
        );
        anyhow::ensure!(
            self.range.min <= value && value < self.range.max,
            format!(
                "Relocation value 0x{value:x} outside of bounds [{}, {})",
                self.range.min, self.range.max
            )
        );
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DynamicRelocationKind {
    Copy,
    Irelative,
    DtpMod,
    DtpOff,
    TpOff,
    Relative,
    Absolute,
    GotEntry,
    JumpSlot,
}

impl DynamicRelocationKind {
    #[must_use]
    pub fn ppc64_r_type(self) -> u32 {
        match self {
            DynamicRelocationKind::Copy => object::elf::R_PPC64_COPY,
            DynamicRelocationKind::Irelative => object::elf::R_PPC64_IRELATIVE,
            DynamicRelocationKind::DtpMod => object::elf::R_PPC64_DTPMOD64,
            DynamicRelocationKind::DtpOff => object::elf::R_PPC64_DTPREL64,
            DynamicRelocationKind::TpOff => object::elf::R_PPC64_TPREL64,
            DynamicRelocationKind::Relative => object::elf::R_PPC64_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_PPC64_ADDR64,
            DynamicRelocationKind::GotEntry => object::elf::R_PPC64_GLOB_DAT,
            DynamicRelocationKind::JumpSlot => object::elf::R_PPC64_JMP_SLOT,
        }
    }

    #[must_use]
    pub fn ppc32_r_type(self) -> u32 {
        match self {
            DynamicRelocationKind::Copy => object::elf::R_PPC_COPY,
            DynamicRelocationKind::Irelative => object::elf::R_PPC_IRELATIVE,
            DynamicRelocationKind::DtpMod => object::elf::R_PPC_DTPMOD32,
            DynamicRelocationKind::DtpOff => object::elf::R_PPC_DTPREL32,
            DynamicRelocationKind::TpOff => object::elf::R_PPC_TPREL32,
            DynamicRelocationKind::Relative => object::elf::R_PPC_RELATIVE,
            DynamicRelocationKind::Absolute => object::elf::R_PPC_ADDR32,
            DynamicRelocationKind::GotEntry => object::elf::R_PPC_GLOB_DAT,
            DynamicRelocationKind::JumpSlot => object::elf::R_PPC_JMP_SLOT,
        }
    }
}

/// Dynamic thread vector pointers point 0x8000 past the start of each TLS
/// block on PowerPC.
pub const PPC_TLS_DTV_OFFSET: u64 = 0x8000;

/// Thread pointer bias: r13 (r2 on ppc32) points 0x7000 past the start of
/// the initial TLS block.
pub const PPC_TP_OFFSET: u64 = 0x7000;

/// The TOC base pointer points 0x8000 past the start of the TOC/GOT so that
/// signed 16-bit displacements cover the first 64 KiB.
pub const TOC_BASE_OFFSET: u64 = 0x8000;

#[cfg(test)]
mod tests {
    use super::*;
    use object::elf::R_PPC64_ADDR16_HA;
    use object::elf::R_PPC64_TOC16_DS;

    #[test]
    fn test_rel_type_to_string() {
        assert_eq!(
            &ppc64_rel_type_to_string(R_PPC64_ADDR16_HA),
            stringify!(R_PPC64_ADDR16_HA)
        );
        assert_eq!(
            &ppc64_rel_type_to_string(R_PPC64_TOC16_DS),
            stringify!(R_PPC64_TOC16_DS)
        );
        assert_eq!(
            &ppc64_rel_type_to_string(ppc64x::R_PPC64_PCREL34),
            stringify!(R_PPC64_PCREL34)
        );
        assert_eq!(
            &ppc64_rel_type_to_string(200),
            "Unknown ppc64 relocation type 0xc8"
        );
    }

    #[test]
    fn test_value_slices() {
        let v = 0x1234_5678_9abc_ffff;
        assert_eq!(ValueSlice::Lo.apply(v), 0xffff);
        assert_eq!(ValueSlice::Hi.apply(v), 0x9abc);
        // The low half is negative when interpreted signed, so the adjusted
        // high half rounds up.
        assert_eq!(ValueSlice::HiAdjusted.apply(v), 0x9abd);
        assert_eq!(ValueSlice::Higher.apply(v), 0x5678);
        assert_eq!(ValueSlice::Highest.apply(v), 0x1234);
        assert_eq!(ValueSlice::HighestAdjusted.apply(v), 0x1234);
    }

    #[test]
    fn test_ha_round_trip() {
        // ha/lo must reconstitute the original 32-bit value: (ha << 16) +
        // sign_extend(lo) == value, for both signs of the low half.
        for value in [0x1234_5678u64, 0x1234_8678, 0x7fff_ffff, 0x8000] {
            let ha = ValueSlice::HiAdjusted.apply(value);
            let lo = ValueSlice::Lo.apply(value);
            let lo_signed = (lo as u32 as i32) << 16 >> 16;
            let rebuilt = ((ha as u32) << 16).wrapping_add(lo_signed as u32);
            assert_eq!(u64::from(rebuilt), value, "value 0x{value:x}");
        }
    }

    #[test]
    fn test_allowed_ranges() {
        let r = AllowedRange::signed(16);
        assert_eq!(r.min, -0x8000);
        assert_eq!(r.max, 0x8000);
        let b = AllowedRange::bit_field(16);
        assert_eq!(b.min, -0x8000);
        assert_eq!(b.max, 0x1_0000);
    }

    #[test]
    fn test_verify_alignment_before_range() {
        let info = RelocationKindInfo {
            kind: RelocationKind::TocRelative,
            size: RelocationSize::Insn(InsnField::Ds16),
            slice: ValueSlice::Full,
            range: AllowedRange::signed(16),
            alignment: 4,
        };
        let err = info.verify(0x1_0002).unwrap_err();
        assert!(err.to_string().contains("aligned"));
        assert!(info.verify(0x7ffc).is_ok());
        assert!(info.verify(0x8000).is_err());
    }
}
