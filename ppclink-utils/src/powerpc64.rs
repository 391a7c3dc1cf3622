use crate::elf::AllowedRange;
use crate::elf::InsnField;
use crate::elf::RelocationKind;
use crate::elf::RelocationKindInfo;
use crate::elf::RelocationSize;
use crate::elf::ValueSlice;
use crate::elf::ppc64x;
use crate::insn;
use anyhow::Result;
use anyhow::bail;
use object::Endianness;

/// Reach of an I-form branch: ±32 MiB.
pub const MAX_BRANCH_OFFSET: i64 = 1 << 25;

/// Reach of a B-form conditional branch: ±32 KiB.
pub const MAX_COND_BRANCH_OFFSET: i64 = 1 << 15;

/// Reach of a prefixed pc-relative instruction: ±8 GiB.
pub const MAX_PCREL34_OFFSET: i64 = 1 << 33;

/// Reach of a single D/DS-form immediate off the TOC pointer.
pub const MAX_TOC_IMMEDIATE: i64 = 1 << 15;

/// Reach of an addis/addi pair off the TOC pointer.
pub const MAX_TOC_PAIR_OFFSET: i64 = 1 << 31;

/// Default span covered by one stub group. Leaves a 2 MiB margin below the
/// 26-bit branch span so that the stubs themselves stay in range of every
/// branch in the group.
pub const DEFAULT_GROUP_SIZE: i64 = 0x1e0_0000;

const D16: RelocationSize = RelocationSize::Insn(InsnField::D16);
const DS16: RelocationSize = RelocationSize::Insn(InsnField::Ds16);
const D34: RelocationSize = RelocationSize::Insn(InsnField::D34);

const fn full(
    kind: RelocationKind,
    size: RelocationSize,
    range: AllowedRange,
) -> (RelocationKind, RelocationSize, ValueSlice, AllowedRange, usize) {
    (kind, size, ValueSlice::Full, range, 1)
}

const fn half(
    kind: RelocationKind,
    slice: ValueSlice,
) -> (RelocationKind, RelocationSize, ValueSlice, AllowedRange, usize) {
    (kind, D16, slice, AllowedRange::no_check(), 1)
}

const fn half_ds(
    kind: RelocationKind,
    slice: ValueSlice,
) -> (RelocationKind, RelocationSize, ValueSlice, AllowedRange, usize) {
    (kind, DS16, slice, AllowedRange::no_check(), 4)
}

const fn marker(
    kind: RelocationKind,
) -> (RelocationKind, RelocationSize, ValueSlice, AllowedRange, usize) {
    (kind, RelocationSize::ByteSize(0), ValueSlice::Full, AllowedRange::no_check(), 1)
}

/// Returns the supplied ppc64 relocation as a [`RelocationKindInfo`].
/// Returns `None` if the r_type isn't recognised, which the caller reports
/// as an unsupported relocation. The table follows the ELFv2 ABI
/// specification's relocation listing.
#[must_use]
pub const fn relocation_type_from_raw(r_type: u32) -> Option<RelocationKindInfo> {
    use RelocationKind as K;
    use ValueSlice as S;

    let (kind, size, slice, range, alignment) = match r_type {
        object::elf::R_PPC64_NONE => marker(K::None),

        // Data relocations.
        object::elf::R_PPC64_ADDR64 => {
            full(K::Absolute, RelocationSize::ByteSize(8), AllowedRange::no_check())
        }
        object::elf::R_PPC64_ADDR32 => {
            full(K::Absolute, RelocationSize::ByteSize(4), AllowedRange::bit_field(32))
        }
        object::elf::R_PPC64_ADDR16 => full(K::Absolute, D16, AllowedRange::bit_field(16)),
        object::elf::R_PPC64_ADDR16_LO => half(K::Absolute, S::Lo),
        object::elf::R_PPC64_ADDR16_HI => half(K::Absolute, S::Hi),
        object::elf::R_PPC64_ADDR16_HA => half(K::Absolute, S::HiAdjusted),
        object::elf::R_PPC64_ADDR16_HIGH => half(K::Absolute, S::High),
        object::elf::R_PPC64_ADDR16_HIGHA => half(K::Absolute, S::HighAdjusted),
        object::elf::R_PPC64_ADDR16_HIGHER => half(K::Absolute, S::Higher),
        object::elf::R_PPC64_ADDR16_HIGHERA => half(K::Absolute, S::HigherAdjusted),
        object::elf::R_PPC64_ADDR16_HIGHEST => half(K::Absolute, S::Highest),
        object::elf::R_PPC64_ADDR16_HIGHESTA => half(K::Absolute, S::HighestAdjusted),
        object::elf::R_PPC64_ADDR16_DS => {
            (K::Absolute, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_ADDR16_LO_DS => half_ds(K::Absolute, S::Lo),

        object::elf::R_PPC64_REL64 => {
            full(K::Relative, RelocationSize::ByteSize(8), AllowedRange::no_check())
        }
        object::elf::R_PPC64_REL32 => {
            full(K::Relative, RelocationSize::ByteSize(4), AllowedRange::signed(32))
        }
        object::elf::R_PPC64_REL16 => full(K::Relative, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_REL16_LO => half(K::Relative, S::Lo),
        object::elf::R_PPC64_REL16_HI => half(K::Relative, S::Hi),
        object::elf::R_PPC64_REL16_HA => half(K::Relative, S::HiAdjusted),

        // Branch relocations. Ranges are over the byte displacement, which
        // also must be word aligned.
        object::elf::R_PPC64_REL24 | ppc64x::R_PPC64_REL24_NOTOC
        | ppc64x::R_PPC64_REL24_P9NOTOC => (
            K::Branch,
            RelocationSize::Insn(InsnField::Branch24),
            S::Full,
            AllowedRange::signed(26),
            4,
        ),
        object::elf::R_PPC64_REL14
        | object::elf::R_PPC64_REL14_BRTAKEN
        | object::elf::R_PPC64_REL14_BRNTAKEN => (
            K::CondBranch,
            RelocationSize::Insn(InsnField::Branch14),
            S::Full,
            AllowedRange::signed(16),
            4,
        ),
        object::elf::R_PPC64_ADDR24 => (
            K::AbsBranch,
            RelocationSize::Insn(InsnField::Branch24),
            S::Full,
            AllowedRange::bit_field(26),
            4,
        ),
        object::elf::R_PPC64_ADDR14
        | object::elf::R_PPC64_ADDR14_BRTAKEN
        | object::elf::R_PPC64_ADDR14_BRNTAKEN => (
            K::AbsCondBranch,
            RelocationSize::Insn(InsnField::Branch14),
            S::Full,
            AllowedRange::bit_field(16),
            4,
        ),

        // TOC-relative data access.
        object::elf::R_PPC64_TOC16 => full(K::TocRelative, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_TOC16_LO => half(K::TocRelative, S::Lo),
        object::elf::R_PPC64_TOC16_HI => half(K::TocRelative, S::Hi),
        object::elf::R_PPC64_TOC16_HA => half(K::TocRelative, S::HiAdjusted),
        object::elf::R_PPC64_TOC16_DS => {
            (K::TocRelative, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_TOC16_LO_DS => half_ds(K::TocRelative, S::Lo),
        object::elf::R_PPC64_TOC => {
            full(K::TocBase, RelocationSize::ByteSize(8), AllowedRange::no_check())
        }

        // GOT entries.
        object::elf::R_PPC64_GOT16 => full(K::Got, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_GOT16_LO => half(K::Got, S::Lo),
        object::elf::R_PPC64_GOT16_HI => half(K::Got, S::Hi),
        object::elf::R_PPC64_GOT16_HA => half(K::Got, S::HiAdjusted),
        object::elf::R_PPC64_GOT16_DS => (K::Got, DS16, S::Full, AllowedRange::signed(16), 4),
        object::elf::R_PPC64_GOT16_LO_DS => half_ds(K::Got, S::Lo),

        // POWER10 prefixed pc-relative forms.
        ppc64x::R_PPC64_PCREL34 => full(K::Relative, D34, AllowedRange::signed(34)),
        ppc64x::R_PPC64_GOT_PCREL34 => full(K::GotRelative, D34, AllowedRange::signed(34)),
        ppc64x::R_PPC64_PLT_PCREL34 | ppc64x::R_PPC64_PLT_PCREL34_NOTOC => {
            full(K::PltPcRel, D34, AllowedRange::signed(34))
        }
        ppc64x::R_PPC64_D34 => full(K::Absolute, D34, AllowedRange::signed(34)),

        // TLS.
        object::elf::R_PPC64_GOT_TLSGD16 => full(K::TlsGdGot, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_GOT_TLSGD16_LO => half(K::TlsGdGot, S::Lo),
        object::elf::R_PPC64_GOT_TLSGD16_HI => half(K::TlsGdGot, S::Hi),
        object::elf::R_PPC64_GOT_TLSGD16_HA => half(K::TlsGdGot, S::HiAdjusted),
        object::elf::R_PPC64_GOT_TLSLD16 => full(K::TlsLdGot, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_GOT_TLSLD16_LO => half(K::TlsLdGot, S::Lo),
        object::elf::R_PPC64_GOT_TLSLD16_HI => half(K::TlsLdGot, S::Hi),
        object::elf::R_PPC64_GOT_TLSLD16_HA => half(K::TlsLdGot, S::HiAdjusted),
        object::elf::R_PPC64_GOT_TPREL16_DS => {
            (K::GotTpRel, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_GOT_TPREL16_LO_DS => half_ds(K::GotTpRel, S::Lo),
        object::elf::R_PPC64_GOT_TPREL16_HI => half(K::GotTpRel, S::Hi),
        object::elf::R_PPC64_GOT_TPREL16_HA => half(K::GotTpRel, S::HiAdjusted),
        object::elf::R_PPC64_GOT_DTPREL16_DS => {
            (K::GotDtpRel, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_GOT_DTPREL16_LO_DS => half_ds(K::GotDtpRel, S::Lo),
        object::elf::R_PPC64_GOT_DTPREL16_HI => half(K::GotDtpRel, S::Hi),
        object::elf::R_PPC64_GOT_DTPREL16_HA => half(K::GotDtpRel, S::HiAdjusted),

        object::elf::R_PPC64_TPREL16 => full(K::TpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_TPREL16_LO => half(K::TpRel, S::Lo),
        object::elf::R_PPC64_TPREL16_HI => half(K::TpRel, S::Hi),
        object::elf::R_PPC64_TPREL16_HA => half(K::TpRel, S::HiAdjusted),
        object::elf::R_PPC64_TPREL16_HIGH => half(K::TpRel, S::High),
        object::elf::R_PPC64_TPREL16_HIGHA => half(K::TpRel, S::HighAdjusted),
        object::elf::R_PPC64_TPREL16_HIGHER => half(K::TpRel, S::Higher),
        object::elf::R_PPC64_TPREL16_HIGHERA => half(K::TpRel, S::HigherAdjusted),
        object::elf::R_PPC64_TPREL16_HIGHEST => half(K::TpRel, S::Highest),
        object::elf::R_PPC64_TPREL16_HIGHESTA => half(K::TpRel, S::HighestAdjusted),
        object::elf::R_PPC64_TPREL16_DS => {
            (K::TpRel, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_TPREL16_LO_DS => half_ds(K::TpRel, S::Lo),
        object::elf::R_PPC64_TPREL64 => {
            full(K::TpRel, RelocationSize::ByteSize(8), AllowedRange::no_check())
        }

        object::elf::R_PPC64_DTPREL16 => full(K::DtpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC64_DTPREL16_LO => half(K::DtpRel, S::Lo),
        object::elf::R_PPC64_DTPREL16_HI => half(K::DtpRel, S::Hi),
        object::elf::R_PPC64_DTPREL16_HA => half(K::DtpRel, S::HiAdjusted),
        object::elf::R_PPC64_DTPREL16_HIGH => half(K::DtpRel, S::High),
        object::elf::R_PPC64_DTPREL16_HIGHA => half(K::DtpRel, S::HighAdjusted),
        object::elf::R_PPC64_DTPREL16_HIGHER => half(K::DtpRel, S::Higher),
        object::elf::R_PPC64_DTPREL16_HIGHERA => half(K::DtpRel, S::HigherAdjusted),
        object::elf::R_PPC64_DTPREL16_HIGHEST => half(K::DtpRel, S::Highest),
        object::elf::R_PPC64_DTPREL16_HIGHESTA => half(K::DtpRel, S::HighestAdjusted),
        object::elf::R_PPC64_DTPREL16_DS => {
            (K::DtpRel, DS16, S::Full, AllowedRange::signed(16), 4)
        }
        object::elf::R_PPC64_DTPREL16_LO_DS => half_ds(K::DtpRel, S::Lo),
        object::elf::R_PPC64_DTPREL64 => {
            full(K::DtpRel, RelocationSize::ByteSize(8), AllowedRange::no_check())
        }

        // Markers. They modify no bytes but steer classification and the
        // treatment of the following relocation.
        object::elf::R_PPC64_TLSGD => marker(K::TlsGdMarker),
        object::elf::R_PPC64_TLSLD => marker(K::TlsLdMarker),
        object::elf::R_PPC64_TLS => marker(K::TlsMarker),
        object::elf::R_PPC64_TOCSAVE => marker(K::TocSaveMarker),
        ppc64x::R_PPC64_ENTRY => marker(K::None),
        // Inline PLT call sequences carry their own REL24; the sequence
        // markers themselves need no processing.
        ppc64x::R_PPC64_PLTSEQ
        | ppc64x::R_PPC64_PLTCALL
        | ppc64x::R_PPC64_PLTSEQ_NOTOC
        | ppc64x::R_PPC64_PLTCALL_NOTOC
        | ppc64x::R_PPC64_PCREL_OPT => marker(K::None),

        _ => return None,
    };

    Some(RelocationKindInfo {
        kind,
        size,
        slice,
        range,
        alignment,
    })
}

/// Returns whether a branch relocation reaches its target without going
/// through the TOC-pointer convention (the caller neither sets up nor
/// expects r2).
#[must_use]
pub fn is_notoc_branch(r_type: u32) -> bool {
    matches!(
        r_type,
        ppc64x::R_PPC64_REL24_NOTOC | ppc64x::R_PPC64_REL24_P9NOTOC
    )
}

/// Decodes the ELFv2 local entry offset from a symbol's `st_other` bits.
/// A function's global entry point sets up the TOC pointer; callers that
/// share the TOC skip that preamble by branching to the local entry.
pub fn local_entry_offset(st_other: u8) -> Result<u64> {
    match (st_other >> 5) & 0x7 {
        0 | 1 => Ok(0),
        2 => Ok(4),
        3 => Ok(8),
        4 => Ok(16),
        5 => Ok(32),
        6 => Ok(64),
        other => bail!("Reserved st_other local entry encoding {other}"),
    }
}

/// Instruction rewrites applied alongside a relocation, either to downgrade
/// a TLS access sequence or to shorten a TOC-relative access. The variants
/// record the rewrite, not the reason for it; the decision belongs to the
/// TLS optimizer and the relocation applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationKind {
    /// Leave the instruction alone. Used when we only want to change the
    /// kind of relocation used.
    NoOp,

    /// Replace with nop.
    ReplaceWithNop,

    /// Rewrite the base register of a D-form instruction to r13, the thread
    /// pointer. Used on the `addis rt,r2,...@got@tlsgd@ha` of a sequence
    /// downgraded to local-exec.
    SetBaseToTp,

    /// Rewrite the base register of a D/DS-form instruction to r2. Used
    /// when a TOC-indirect load collapses to a direct TOC-relative access.
    SetBaseToToc,

    /// Turn `addi rt,ra,imm` into `ld rt,0(ra)`, preserving the operands.
    /// Used on the low half of a sequence downgraded to initial-exec.
    AddiToLd,

    /// Turn a DS-form load into `addis rt,r13,0`, preserving RT. Used on
    /// the `ld rt,...@got@tprel@l(ra)` of an initial-exec sequence
    /// downgraded to local-exec.
    LdToAddisFromTp,

    /// Replace a `bl __tls_get_addr` with `add r3,r3,r13`, completing a
    /// general-dynamic sequence downgraded to initial-exec.
    CallToAddTp,

    /// Replace a `bl __tls_get_addr` of a local-dynamic sequence downgraded
    /// to local-exec with `addi r3,r13,0x1000`, pointing r3 at the DTV bias
    /// inside the static TLS block.
    CallToDtvBase,

    /// Turn the `add rt,ra,rb` carrying an R_PPC64_TLS marker into
    /// `addi rt,ra,imm` so the following relocation can fill in a
    /// thread-pointer-relative offset.
    AddToAddi,
}

impl RelaxationKind {
    pub fn apply(self, e: Endianness, section_bytes: &mut [u8], offset_in_section: u64) {
        let offset = offset_in_section as usize;
        let patch_word = |bytes: &mut [u8], f: &dyn Fn(u32) -> u32| {
            let word = insn::read_u32(e, bytes);
            insn::write_u32(e, bytes, f(word));
        };
        match self {
            RelaxationKind::NoOp => {}
            RelaxationKind::ReplaceWithNop => {
                insn::write_u32(e, &mut section_bytes[offset..], insn::NOP);
            }
            RelaxationKind::SetBaseToTp => {
                patch_word(&mut section_bytes[offset..], &|w| {
                    (w & !0x001f_0000) | 13 << 16
                });
            }
            RelaxationKind::SetBaseToToc => {
                patch_word(&mut section_bytes[offset..], &|w| {
                    (w & !0x001f_0000) | 2 << 16
                });
            }
            RelaxationKind::AddiToLd => {
                patch_word(&mut section_bytes[offset..], &|w| {
                    insn::ld((w >> 21) & 0x1f, (w >> 16) & 0x1f, 0)
                });
            }
            RelaxationKind::LdToAddisFromTp => {
                patch_word(&mut section_bytes[offset..], &|w| {
                    insn::addis((w >> 21) & 0x1f, 13, 0)
                });
            }
            RelaxationKind::CallToAddTp => {
                insn::write_u32(e, &mut section_bytes[offset..], 0x7c6d_1a14);
            }
            RelaxationKind::CallToDtvBase => {
                insn::write_u32(e, &mut section_bytes[offset..], insn::addi(3, 13, 0x1000));
            }
            RelaxationKind::AddToAddi => {
                patch_word(&mut section_bytes[offset..], &|w| {
                    0x3800_0000 | (w & 0x03ff_0000)
                });
            }
        }
    }
}
