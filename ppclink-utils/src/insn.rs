//! PowerPC instruction words used by generated stubs, PLT code and the
//! relocation applier's instruction rewrites. All builders return the
//! instruction as a host-order `u32`; byte order is applied only when the
//! word is stored through [`write_u32`].

use crate::bit_misc::BitExtraction;
use crate::bit_misc::patch_bits;
use crate::elf::InsnField;
use object::Endian as _;
use object::Endianness;

pub const NOP: u32 = 0x6000_0000; // ori r0,r0,0
pub const BCTR: u32 = 0x4e80_0420;
pub const BCTRL: u32 = 0x4e80_0421;
pub const BLR: u32 = 0x4e80_0020;

/// bcl 20,31,.+4: the classic "read the program counter" idiom. Always
/// taken, and the link-register hint avoids polluting the return stack.
pub const BCL_20_31: u32 = 0x429f_0005;

/// rldicr r12,r12,32,31: shifts the high half of a 64-bit constant into
/// place during full-range address synthesis.
pub const RLDICR_R12_32: u32 = 0x798c_07c6;

/// std r2,24(r1): saves the TOC pointer to its ELFv2 stack slot before an
/// indirect call that may land in a different TOC domain.
pub const STD_R2_24_R1: u32 = 0xf841_0018;

/// ld r2,24(r1): the matching restore, placed after the call site by the
/// compiler; stubs only ever emit the save.
pub const LD_R2_24_R1: u32 = 0xe841_0018;

#[must_use]
pub const fn addis(rt: u32, ra: u32, si: u32) -> u32 {
    0x3c00_0000 | rt << 21 | ra << 16 | (si & 0xffff)
}

#[must_use]
pub const fn addi(rt: u32, ra: u32, si: u32) -> u32 {
    0x3800_0000 | rt << 21 | ra << 16 | (si & 0xffff)
}

#[must_use]
pub const fn ori(ra: u32, rs: u32, ui: u32) -> u32 {
    0x6000_0000 | rs << 21 | ra << 16 | (ui & 0xffff)
}

#[must_use]
pub const fn oris(ra: u32, rs: u32, ui: u32) -> u32 {
    0x6400_0000 | rs << 21 | ra << 16 | (ui & 0xffff)
}

#[must_use]
pub const fn lis(rt: u32, si: u32) -> u32 {
    addis(rt, 0, si)
}

/// ld rt,ds(ra). DS-form, the two low offset bits must be zero.
#[must_use]
pub const fn ld(rt: u32, ra: u32, ds: u32) -> u32 {
    0xe800_0000 | rt << 21 | ra << 16 | (ds & 0xfffc)
}

#[must_use]
pub const fn std(rs: u32, ra: u32, ds: u32) -> u32 {
    0xf800_0000 | rs << 21 | ra << 16 | (ds & 0xfffc)
}

#[must_use]
pub const fn lwz(rt: u32, ra: u32, d: u32) -> u32 {
    0x8000_0000 | rt << 21 | ra << 16 | (d & 0xffff)
}

#[must_use]
pub const fn mtctr(rs: u32) -> u32 {
    0x7c09_03a6 | rs << 21
}

#[must_use]
pub const fn mflr(rt: u32) -> u32 {
    0x7c08_02a6 | rt << 21
}

#[must_use]
pub const fn mtlr(rs: u32) -> u32 {
    0x7c08_03a6 | rs << 21
}

/// b/bl with a byte displacement; the caller guarantees the displacement is
/// in range and word aligned.
#[must_use]
pub const fn b(disp: i64) -> u32 {
    0x4800_0000 | (disp as u32 & 0x03ff_fffc)
}

#[must_use]
pub const fn bl(disp: i64) -> u32 {
    b(disp) | 1
}

/// cmpdi crf,ra,si
#[must_use]
pub const fn cmpdi(crf: u32, ra: u32, si: u32) -> u32 {
    0x2c20_0000 | crf << 23 | ra << 16 | (si & 0xffff)
}

/// bnectr crf: branch to ctr unless the crf EQ bit is set.
#[must_use]
pub const fn bnectr(crf: u32) -> u32 {
    0x4c80_0420 | (crf * 4 + 2) << 16
}

/// Prefix/suffix pair for `pld rt, d34(pc)` (8LS form, R=1).
#[must_use]
pub const fn pld_pcrel(rt: u32, d34: i64) -> (u32, u32) {
    let imm = d34 as u64;
    let prefix = 0x0410_0000 | (imm >> 16) as u32 & 0x3ffff;
    let suffix = 0xe400_0000 | rt << 21 | imm as u32 & 0xffff;
    (prefix, suffix)
}

/// Prefix/suffix pair for `paddi rt, 0, d34` pc-relative, i.e. `pla`
/// (MLS form, R=1).
#[must_use]
pub const fn paddi_pcrel(rt: u32, d34: i64) -> (u32, u32) {
    let imm = d34 as u64;
    let prefix = 0x0610_0000 | (imm >> 16) as u32 & 0x3ffff;
    let suffix = 0x3800_0000 | rt << 21 | imm as u32 & 0xffff;
    (prefix, suffix)
}

#[must_use]
pub fn read_u32(e: Endianness, bytes: &[u8]) -> u32 {
    e.read_u32_bytes(bytes[..4].try_into().unwrap())
}

pub fn write_u32(e: Endianness, bytes: &mut [u8], word: u32) {
    bytes[..4].copy_from_slice(&e.write_u32_bytes(word));
}

#[must_use]
pub fn read_u16(e: Endianness, bytes: &[u8]) -> u16 {
    e.read_u16_bytes(bytes[..2].try_into().unwrap())
}

pub fn write_u16(e: Endianness, bytes: &mut [u8], value: u16) {
    bytes[..2].copy_from_slice(&e.write_u16_bytes(value));
}

#[must_use]
pub fn read_u64(e: Endianness, bytes: &[u8]) -> u64 {
    e.read_u64_bytes(bytes[..8].try_into().unwrap())
}

pub fn write_u64(e: Endianness, bytes: &mut [u8], value: u64) {
    bytes[..8].copy_from_slice(&e.write_u64_bytes(value));
}

impl InsnField {
    /// The number of bytes the field's instruction(s) occupy.
    #[must_use]
    pub fn byte_len(self) -> usize {
        match self {
            InsnField::D16 | InsnField::Ds16 | InsnField::Branch24 | InsnField::Branch14 => 4,
            InsnField::D34 => 8,
        }
    }

    /// Patches `value` into the instruction field, leaving all opcode and
    /// operand bits outside the field untouched.
    pub fn write(self, e: Endianness, bytes: &mut [u8], value: u64) {
        match self {
            InsnField::D16 => {
                let word = read_u32(e, bytes);
                write_u32(e, bytes, patch_bits(word, value as u32, 0xffff));
            }
            InsnField::Ds16 => {
                let word = read_u32(e, bytes);
                write_u32(e, bytes, patch_bits(word, value as u32, 0xfffc));
            }
            InsnField::Branch24 => {
                let word = read_u32(e, bytes);
                write_u32(e, bytes, patch_bits(word, value as u32, 0x03ff_fffc));
            }
            InsnField::Branch14 => {
                let word = read_u32(e, bytes);
                write_u32(e, bytes, patch_bits(word, value as u32, 0xfffc));
            }
            InsnField::D34 => {
                let prefix = read_u32(e, bytes);
                let suffix = read_u32(e, &bytes[4..]);
                write_u32(
                    e,
                    bytes,
                    patch_bits(prefix, (value >> 16) as u32, 0x3ffff),
                );
                write_u32(
                    e,
                    &mut bytes[4..],
                    patch_bits(suffix, value as u32, 0xffff),
                );
            }
        }
    }

    /// The inverse of `write`: the field's value, sign extended.
    #[must_use]
    pub fn read(self, e: Endianness, bytes: &[u8]) -> i64 {
        match self {
            InsnField::D16 => u64::from(read_u32(e, bytes)).low_bits(16).sign_extend(15) as i64,
            InsnField::Ds16 => {
                (u64::from(read_u32(e, bytes)) & 0xfffc).sign_extend(15) as i64
            }
            InsnField::Branch24 => {
                (u64::from(read_u32(e, bytes)) & 0x03ff_fffc).sign_extend(25) as i64
            }
            InsnField::Branch14 => {
                (u64::from(read_u32(e, bytes)) & 0xfffc).sign_extend(15) as i64
            }
            InsnField::D34 => {
                let prefix = u64::from(read_u32(e, bytes));
                let suffix = u64::from(read_u32(e, &bytes[4..]));
                ((prefix.low_bits(18) << 16) | suffix.low_bits(16)).sign_extend(33) as i64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_builders() {
        // Reference encodings taken from binutils disassembly.
        assert_eq!(addis(12, 2, 0), 0x3d82_0000); // addis r12,r2,0
        assert_eq!(ld(12, 12, 0), 0xe98c_0000); // ld r12,0(r12)
        assert_eq!(mtctr(12), 0x7d89_03a6); // mtctr r12
        assert_eq!(std(2, 1, 24), STD_R2_24_R1);
        assert_eq!(addi(12, 11, 0), 0x398b_0000);
        assert_eq!(mflr(12), 0x7d88_02a6);
        assert_eq!(cmpdi(7, 12, 0), 0x2fac_0000); // cmpdi cr7,r12,0
        assert_eq!(bnectr(7), 0x4c9e_0420);
        assert_eq!(b(-8), 0x4bff_fff8);
        assert_eq!(bl(0x1234), 0x4800_1235);
    }

    #[test]
    fn test_prefixed_builders() {
        let (p, s) = pld_pcrel(12, 0);
        assert_eq!((p, s), (0x0410_0000, 0xe580_0000)); // pld r12,0(pc)
        let (p, s) = paddi_pcrel(12, 0);
        assert_eq!((p, s), (0x0610_0000, 0x3980_0000)); // pla r12,0
        // Negative displacements carry into the prefix's high bits.
        let (p, s) = pld_pcrel(12, -4);
        assert_eq!(p & 0x3ffff, 0x3ffff);
        assert_eq!(s & 0xffff, 0xfffc);
    }

    #[test]
    fn test_branch24_round_trip() {
        let mut buf = [0u8; 4];
        for e in [Endianness::Little, Endianness::Big] {
            write_u32(e, &mut buf, b(0));
            for disp in [0i64, 4, -4, 0x1ff_fffc, -0x200_0000] {
                InsnField::Branch24.write(e, &mut buf, disp as u64);
                assert_eq!(InsnField::Branch24.read(e, &buf), disp, "{e:?} {disp}");
                // The opcode bits survive the patch.
                assert_eq!(read_u32(e, &buf) & 0xfc00_0003, 0x4800_0000);
            }
        }
    }

    #[test]
    fn test_d34_round_trip() {
        let mut buf = [0u8; 8];
        let e = Endianness::Little;
        let (p, s) = pld_pcrel(12, 0);
        write_u32(e, &mut buf, p);
        write_u32(e, &mut buf[4..], s);
        for disp in [0i64, 0x12345, -0x12346, (1 << 33) - 1, -(1 << 33)] {
            InsnField::D34.write(e, &mut buf, disp as u64);
            assert_eq!(InsnField::D34.read(e, &buf), disp, "{disp}");
        }
    }

    #[test]
    fn test_ds_field_preserves_low_bits() {
        let mut buf = [0u8; 4];
        let e = Endianness::Big;
        write_u32(e, &mut buf, ld(2, 11, 0));
        InsnField::Ds16.write(e, &mut buf, 0x7ff8);
        // The DS field excludes the two low bits, which encode the opcode
        // extension for ld/ldu/lwa.
        assert_eq!(read_u32(e, &buf), ld(2, 11, 0x7ff8));
        assert_eq!(InsnField::Ds16.read(e, &buf), 0x7ff8);
    }
}
