use crate::elf::AllowedRange;
use crate::elf::InsnField;
use crate::elf::RelocationKind;
use crate::elf::RelocationKindInfo;
use crate::elf::RelocationSize;
use crate::elf::ValueSlice;

const D16: RelocationSize = RelocationSize::Insn(InsnField::D16);

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

/// Returns the supplied ppc32 relocation as a [`RelocationKindInfo`].
/// Returns `None` for types the backend does not implement. The 32-bit ABI
/// has no DS forms, no TOC and no prefixed instructions; its GOT16 family
/// is relative to the GOT pointer the same way the 64-bit TOC16 family is
/// relative to the TOC base.
#[must_use]
pub const fn relocation_type_from_raw(r_type: u32) -> Option<RelocationKindInfo> {
    use RelocationKind as K;
    use ValueSlice as S;

    let (kind, size, slice, range, alignment) = match r_type {
        object::elf::R_PPC_NONE => {
            (K::None, RelocationSize::ByteSize(0), S::Full, AllowedRange::no_check(), 1)
        }

        object::elf::R_PPC_ADDR32 => {
            full(K::Absolute, RelocationSize::ByteSize(4), AllowedRange::bit_field(32))
        }
        object::elf::R_PPC_ADDR16 => full(K::Absolute, D16, AllowedRange::bit_field(16)),
        object::elf::R_PPC_ADDR16_LO => half(K::Absolute, S::Lo),
        object::elf::R_PPC_ADDR16_HI => half(K::Absolute, S::Hi),
        object::elf::R_PPC_ADDR16_HA => half(K::Absolute, S::HiAdjusted),

        object::elf::R_PPC_REL32 => {
            full(K::Relative, RelocationSize::ByteSize(4), AllowedRange::signed(32))
        }
        object::elf::R_PPC_REL16 => full(K::Relative, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_REL16_LO => half(K::Relative, S::Lo),
        object::elf::R_PPC_REL16_HI => half(K::Relative, S::Hi),
        object::elf::R_PPC_REL16_HA => half(K::Relative, S::HiAdjusted),

        // Branches. PLTREL24 asks for a call via the PLT; LOCAL24PC promises
        // the target is local, letting it share the plain branch path.
        object::elf::R_PPC_REL24
        | object::elf::R_PPC_PLTREL24
        | object::elf::R_PPC_LOCAL24PC => (
            K::Branch,
            RelocationSize::Insn(InsnField::Branch24),
            S::Full,
            AllowedRange::signed(26),
            4,
        ),
        object::elf::R_PPC_REL14
        | object::elf::R_PPC_REL14_BRTAKEN
        | object::elf::R_PPC_REL14_BRNTAKEN => (
            K::CondBranch,
            RelocationSize::Insn(InsnField::Branch14),
            S::Full,
            AllowedRange::signed(16),
            4,
        ),
        object::elf::R_PPC_ADDR24 => (
            K::AbsBranch,
            RelocationSize::Insn(InsnField::Branch24),
            S::Full,
            AllowedRange::bit_field(26),
            4,
        ),
        object::elf::R_PPC_ADDR14
        | object::elf::R_PPC_ADDR14_BRTAKEN
        | object::elf::R_PPC_ADDR14_BRNTAKEN => (
            K::AbsCondBranch,
            RelocationSize::Insn(InsnField::Branch14),
            S::Full,
            AllowedRange::bit_field(16),
            4,
        ),

        object::elf::R_PPC_GOT16 => full(K::Got, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_GOT16_LO => half(K::Got, S::Lo),
        object::elf::R_PPC_GOT16_HI => half(K::Got, S::Hi),
        object::elf::R_PPC_GOT16_HA => half(K::Got, S::HiAdjusted),

        object::elf::R_PPC_GOT_TLSGD16 => full(K::TlsGdGot, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_GOT_TLSGD16_LO => half(K::TlsGdGot, S::Lo),
        object::elf::R_PPC_GOT_TLSGD16_HI => half(K::TlsGdGot, S::Hi),
        object::elf::R_PPC_GOT_TLSGD16_HA => half(K::TlsGdGot, S::HiAdjusted),
        object::elf::R_PPC_GOT_TLSLD16 => full(K::TlsLdGot, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_GOT_TLSLD16_LO => half(K::TlsLdGot, S::Lo),
        object::elf::R_PPC_GOT_TLSLD16_HI => half(K::TlsLdGot, S::Hi),
        object::elf::R_PPC_GOT_TLSLD16_HA => half(K::TlsLdGot, S::HiAdjusted),
        object::elf::R_PPC_GOT_TPREL16 => full(K::GotTpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_GOT_TPREL16_LO => half(K::GotTpRel, S::Lo),
        object::elf::R_PPC_GOT_TPREL16_HI => half(K::GotTpRel, S::Hi),
        object::elf::R_PPC_GOT_TPREL16_HA => half(K::GotTpRel, S::HiAdjusted),
        object::elf::R_PPC_GOT_DTPREL16 => full(K::GotDtpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_GOT_DTPREL16_LO => half(K::GotDtpRel, S::Lo),
        object::elf::R_PPC_GOT_DTPREL16_HI => half(K::GotDtpRel, S::Hi),
        object::elf::R_PPC_GOT_DTPREL16_HA => half(K::GotDtpRel, S::HiAdjusted),

        object::elf::R_PPC_TPREL16 => full(K::TpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_TPREL16_LO => half(K::TpRel, S::Lo),
        object::elf::R_PPC_TPREL16_HI => half(K::TpRel, S::Hi),
        object::elf::R_PPC_TPREL16_HA => half(K::TpRel, S::HiAdjusted),
        object::elf::R_PPC_TPREL32 => {
            full(K::TpRel, RelocationSize::ByteSize(4), AllowedRange::no_check())
        }
        object::elf::R_PPC_DTPREL16 => full(K::DtpRel, D16, AllowedRange::signed(16)),
        object::elf::R_PPC_DTPREL16_LO => half(K::DtpRel, S::Lo),
        object::elf::R_PPC_DTPREL16_HI => half(K::DtpRel, S::Hi),
        object::elf::R_PPC_DTPREL16_HA => half(K::DtpRel, S::HiAdjusted),
        object::elf::R_PPC_DTPREL32 => {
            full(K::DtpRel, RelocationSize::ByteSize(4), AllowedRange::no_check())
        }

        object::elf::R_PPC_TLSGD => {
            (K::TlsGdMarker, RelocationSize::ByteSize(0), S::Full, AllowedRange::no_check(), 1)
        }
        object::elf::R_PPC_TLSLD => {
            (K::TlsLdMarker, RelocationSize::ByteSize(0), S::Full, AllowedRange::no_check(), 1)
        }
        object::elf::R_PPC_TLS => {
            (K::TlsMarker, RelocationSize::ByteSize(0), S::Full, AllowedRange::no_check(), 1)
        }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_spot_checks() {
        let info = relocation_type_from_raw(object::elf::R_PPC_REL24).unwrap();
        assert_eq!(info.kind, RelocationKind::Branch);
        let info = relocation_type_from_raw(object::elf::R_PPC_GOT16).unwrap();
        assert_eq!(info.kind, RelocationKind::Got);
        // The embedded-ABI small-data relocations are not implemented.
        assert!(relocation_type_from_raw(object::elf::R_PPC_EMB_SDA21).is_none());
    }

    #[test]
    fn test_no_ds_forms() {
        // The 32-bit ABI has no DS-form relocations; every table entry is
        // either unaligned or a word-aligned branch.
        for r_type in 0..=255 {
            if let Some(info) = relocation_type_from_raw(r_type) {
                assert!(info.alignment == 1 || info.alignment == 4, "r_type {r_type}");
            }
        }
    }
}
