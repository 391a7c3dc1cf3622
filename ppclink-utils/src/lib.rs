//! Architecture data shared by the PowerPC link backend: relocation kind
//! tables, instruction field codecs and the bit fiddling underneath them.
//! Nothing in this crate knows about the link session; everything is a pure
//! function over bytes and numbers so that it can be unit tested in
//! isolation.

pub mod bit_misc;
pub mod elf;
pub mod insn;
pub mod powerpc32;
pub mod powerpc64;
