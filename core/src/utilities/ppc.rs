/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Minimal 32-bit big-endian PowerPC encoder, limited to the forms needed
//! to reroute code and build trampolines inside a CB.
//!
//! Every `encode_*` function assembles its whole block first and only writes
//! once all checks passed, so a failed call never leaves a half-written block.
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::be_u32;
use crate::error::{Error, Result};
use crate::utilities::patching::ensure_in_bounds;

/// `ori r0,r0,0`
pub const NOP: u32 = 0x6000_0000;
/// `blr`
pub const BLR: u32 = 0x4E80_0020;

const BRANCH_OPCODE: u32 = 0x4800_0000;
const BRANCH_FORM_MASK: u32 = 0xFC00_0003;
const BRANCH_TARGET_MASK: u32 = 0x03FF_FFFC;
const LINK_BIT: u32 = 1;
const BRANCH_MIN_DISPLACEMENT: i64 = -0x0200_0000;
const BRANCH_MAX_DISPLACEMENT: i64 = 0x01FF_FFFC;

const CONDITIONAL_BRANCH_OPCODE: u32 = 16;
const ADDI_OPCODE: u32 = 0x3800_0000;

/// Registers that can be loaded by [`encode_short_immediate_load`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum Register {
    R3 = 3,
    R4 = 4,
}

fn check_aligned(address: usize) -> Result<()> {
    if address & 3 != 0 {
        return Err(Error::MisalignedAddress(address));
    }
    Ok(())
}

pub fn read_word(data: &[u8], at: usize) -> Result<u32> {
    check_aligned(at)?;
    ensure_in_bounds(data, at, 4)?;
    Ok(be_u32!(data, at))
}

/// Writes `words` back to back starting at `at`, returns the address right after them.
pub fn write_words(data: &mut [u8], at: usize, words: &[u32]) -> Result<usize> {
    check_aligned(at)?;
    let len = words.len() * 4;
    ensure_in_bounds(data, at, len)?;

    for (chunk, word) in data[at..at + len].chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_be_bytes());
    }

    Ok(at + len)
}

/// `b` / `bl` located at `at` and landing on `target`.
pub fn branch_word(at: usize, target: usize, with_link: bool) -> Result<u32> {
    check_aligned(at)?;

    let delta = target as i64 - at as i64;
    if delta & 3 != 0 || !(BRANCH_MIN_DISPLACEMENT..=BRANCH_MAX_DISPLACEMENT).contains(&delta) {
        return Err(Error::DisplacementOutOfRange { from: at, to: target as i64 });
    }

    let mut word = BRANCH_OPCODE | (delta as u32 & BRANCH_TARGET_MASK);
    if with_link {
        word |= LINK_BIT;
    }

    Ok(word)
}

/// `li reg,value`, only 8-bit immediates are accepted.
pub fn load_immediate_word(reg: Register, value: u32) -> Result<u32> {
    if value > 0xFF {
        return Err(Error::ImmediateOutOfRange(value));
    }

    Ok(ADDI_OPCODE | (u32::from(u8::from(reg)) << 21) | value)
}

/// `li r4,code; b panic`, with the first word placed at `at`.
pub fn panic_call_words(at: usize, panic_fn: usize, code: u32) -> Result<[u32; 2]> {
    Ok([load_immediate_word(Register::R4, code)?, branch_word(at + 4, panic_fn, false)?])
}

/// `li r4,code; bl post`, with the first word placed at `at`.
pub fn post_code_call_words(at: usize, post_fn: usize, code: u32) -> Result<[u32; 2]> {
    Ok([load_immediate_word(Register::R4, code)?, branch_word(at + 4, post_fn, true)?])
}

/// POST routine: writes the code in r4 to the POST register at 0x8000020000061010.
/// Clobbers r3.
pub fn trampoline_function_words() -> [u32; 7] {
    [
        0x3860_0200, // li r3,0x200
        0x6463_8000, // oris r3,r3,0x8000
        0x7863_07C6, // rldicr r3,r3,32,31
        0x6463_0006, // oris r3,r3,0x6
        0x7884_C1C6, // rldicr r4,r4,56,7
        0xF883_1010, // std r4,0x1010(r3)
        BLR,
    ]
}

/// Encodes `b`/`bl` at `at`. Returns `at + 4`.
pub fn encode_branch(data: &mut [u8], at: usize, target: usize, with_link: bool) -> Result<usize> {
    let word = branch_word(at, target, with_link)?;
    write_words(data, at, &[word])
}

/// Target of the unconditional branch `word` located at `at`.
pub fn decode_branch(word: u32, at: usize) -> Result<usize> {
    let form = word & BRANCH_FORM_MASK;
    if form != BRANCH_OPCODE && form != BRANCH_OPCODE | LINK_BIT {
        return Err(Error::NotABranchInstruction { word, at });
    }

    // Sign extend the 26-bit displacement
    let displacement = (((word & BRANCH_TARGET_MASK) << 6) as i32 >> 6) as i64;
    resolve_target(word, at, displacement)
}

/// Target of the conditional branch (`bc`, `beq`, `bne`, ...) `word` located at `at`.
pub fn decode_conditional_branch(word: u32, at: usize) -> Result<usize> {
    if word >> 26 != CONDITIONAL_BRANCH_OPCODE {
        return Err(Error::NotABranchInstruction { word, at });
    }

    let displacement = ((word & 0xFFFC) as u16 as i16) as i64;
    resolve_target(word, at, displacement)
}

fn resolve_target(word: u32, at: usize, displacement: i64) -> Result<usize> {
    usize::try_from(at as i64 + displacement).map_err(|_| Error::NotABranchInstruction { word, at })
}

pub fn encode_branch_to_return_address(data: &mut [u8], at: usize) -> Result<usize> {
    write_words(data, at, &[BLR])
}

pub fn encode_no_op(data: &mut [u8], at: usize) -> Result<usize> {
    write_words(data, at, &[NOP])
}

pub fn encode_short_immediate_load(
    data: &mut [u8],
    at: usize,
    reg: Register,
    value: u32,
) -> Result<usize> {
    let word = load_immediate_word(reg, value)?;
    write_words(data, at, &[word])
}

pub fn encode_panic_call(data: &mut [u8], at: usize, panic_fn: usize, code: u32) -> Result<usize> {
    check_aligned(at)?;
    let words = panic_call_words(at, panic_fn, code)?;
    write_words(data, at, &words)
}

pub fn encode_post_code_call(data: &mut [u8], at: usize, post_fn: usize, code: u32) -> Result<usize> {
    check_aligned(at)?;
    let words = post_code_call_words(at, post_fn, code)?;
    write_words(data, at, &words)
}

pub fn encode_trampoline_function(data: &mut [u8], at: usize) -> Result<usize> {
    write_words(data, at, &trampoline_function_words())
}

/// Fills `from..until` with `nop`s. Returns `until`.
pub fn fill_nops_between(data: &mut [u8], from: usize, until: usize) -> Result<usize> {
    check_aligned(from)?;
    check_aligned(until)?;
    if from > until {
        return Err(Error::InvalidRange { start: from, end: until });
    }

    let nops = vec![NOP; (until - from) / 4];
    write_words(data, from, &nops)
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn test_branch_encodings() {
        let mut data = vec![0u8; 0x40];

        assert_eq!(encode_branch(&mut data, 0x10, 0x20, false).unwrap(), 0x14);
        assert_eq!(read_word(&data, 0x10).unwrap(), 0x4800_0010);

        encode_branch(&mut data, 0x20, 0x10, true).unwrap();
        assert_eq!(read_word(&data, 0x20).unwrap(), 0x4BFF_FFF1);

        encode_branch(&mut data, 0x30, 0x30, false).unwrap();
        assert_eq!(read_word(&data, 0x30).unwrap(), 0x4800_0000);
    }

    #[test]
    fn test_branch_round_trip() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let at = rng.random_range(0x0200_0000usize..0x0400_0000) & !3;
            let delta = rng.random_range(BRANCH_MIN_DISPLACEMENT..=BRANCH_MAX_DISPLACEMENT) & !3;
            let target = (at as i64 + delta) as usize;
            let with_link = rng.random_bool(0.5);

            let word = branch_word(at, target, with_link).unwrap();
            assert_eq!(word & LINK_BIT == LINK_BIT, with_link);
            assert_eq!(decode_branch(word, at).unwrap(), target);
        }
    }

    #[test]
    fn test_branch_range_edges() {
        let at = 0x0300_0000usize;
        assert!(branch_word(at, at + 0x01FF_FFFC, false).is_ok());
        assert!(branch_word(at, at - 0x0200_0000, false).is_ok());
        assert!(matches!(
            branch_word(at, at + 0x0200_0000, false),
            Err(Error::DisplacementOutOfRange { .. })
        ));
        assert!(matches!(
            branch_word(at, at - 0x0200_0004, false),
            Err(Error::DisplacementOutOfRange { .. })
        ));
        assert!(matches!(branch_word(at, at + 2, false), Err(Error::DisplacementOutOfRange { .. })));
    }

    #[test]
    fn test_out_of_range_branch_leaves_buffer_untouched() {
        let mut data = vec![0xA5u8; 0x100];
        let before = data.clone();

        let result = encode_branch(&mut data, 0x10, 0x0400_0000, false);
        assert!(matches!(result, Err(Error::DisplacementOutOfRange { from: 0x10, .. })));
        assert_eq!(data, before);
    }

    #[test]
    fn test_misaligned_writes_are_rejected() {
        let mut data = vec![0u8; 0x20];
        assert!(matches!(encode_no_op(&mut data, 2), Err(Error::MisalignedAddress(2))));
        assert!(matches!(
            encode_post_code_call(&mut data, 6, 0x10, 0x22),
            Err(Error::MisalignedAddress(6))
        ));
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_rejects_non_branches() {
        assert!(matches!(decode_branch(NOP, 0), Err(Error::NotABranchInstruction { .. })));
        // absolute-address form is not a relative branch
        assert!(matches!(decode_branch(0x4800_0012, 0), Err(Error::NotABranchInstruction { .. })));
        assert!(matches!(
            decode_conditional_branch(0x4800_0010, 0),
            Err(Error::NotABranchInstruction { .. })
        ));
    }

    #[test]
    fn test_decode_negative_branch() {
        assert_eq!(decode_branch(0x4BFF_FFF8, 0x100).unwrap(), 0xF8);
        assert_eq!(decode_branch(0x4A00_0000, 0x0200_0000).unwrap(), 0);
    }

    #[test]
    fn test_decode_conditional_branch() {
        // bne cr6,+0x14
        assert_eq!(decode_conditional_branch(0x409A_0014, 0x100).unwrap(), 0x114);
        // blt cr6,-0x1C
        assert_eq!(decode_conditional_branch(0x4198_FFE4, 0x100).unwrap(), 0xE4);
    }

    #[test]
    fn test_immediate_loads() {
        let mut data = vec![0u8; 8];
        encode_short_immediate_load(&mut data, 0, Register::R3, 0xAE).unwrap();
        encode_short_immediate_load(&mut data, 4, Register::R4, 0x23).unwrap();
        assert_eq!(read_word(&data, 0).unwrap(), 0x3860_00AE);
        assert_eq!(read_word(&data, 4).unwrap(), 0x3880_0023);

        let before = data.clone();
        assert!(matches!(
            encode_short_immediate_load(&mut data, 0, Register::R4, 0x100),
            Err(Error::ImmediateOutOfRange(0x100))
        ));
        assert_eq!(data, before);
        assert_eq!(Register::try_from(4u8).unwrap(), Register::R4);
    }

    #[test]
    fn test_composites() {
        let mut data = vec![0u8; 0x80];

        let end = encode_trampoline_function(&mut data, 0x00).unwrap();
        assert_eq!(end, 0x1C);
        assert_eq!(
            &data[..0x1C],
            &hex::decode("3860020064638000786307C6646300067884C1C6F88310104E800020").unwrap()[..]
        );

        let end = encode_post_code_call(&mut data, 0x20, 0x00, 0x2E).unwrap();
        assert_eq!(end, 0x28);
        assert_eq!(read_word(&data, 0x20).unwrap(), 0x3880_002E);
        assert_eq!(decode_branch(read_word(&data, 0x24).unwrap(), 0x24).unwrap(), 0x00);
        assert_eq!(read_word(&data, 0x24).unwrap() & LINK_BIT, LINK_BIT);

        let end = encode_panic_call(&mut data, 0x40, 0x00, 0x9B).unwrap();
        assert_eq!(end, 0x48);
        assert_eq!(read_word(&data, 0x40).unwrap(), 0x3880_009B);
        assert_eq!(read_word(&data, 0x44).unwrap() & LINK_BIT, 0);
        assert_eq!(decode_branch(read_word(&data, 0x44).unwrap(), 0x44).unwrap(), 0x00);

        assert_eq!(encode_branch_to_return_address(&mut data, 0x48).unwrap(), 0x4C);
        assert_eq!(read_word(&data, 0x48).unwrap(), BLR);
    }

    #[test]
    fn test_panic_and_post_calls_differ_only_in_link() {
        let panic = panic_call_words(0x100, 0x3C0, 0xA4).unwrap();
        let post = post_code_call_words(0x100, 0x3C0, 0xA4).unwrap();

        assert_eq!(panic[0], 0x3880_00A4);
        assert_eq!(post[0], panic[0]);
        assert_eq!(post[1], panic[1] | LINK_BIT);
        assert_eq!(decode_branch(panic[1], 0x104).unwrap(), 0x3C0);
    }

    #[test]
    fn test_writes_past_end_are_rejected() {
        let mut data = vec![0u8; 0x10];
        assert!(matches!(
            encode_trampoline_function(&mut data, 0x0),
            Err(Error::ImageOverrun { at: 0, len: 0x1C, size: 0x10 })
        ));
        assert!(data.iter().all(|b| *b == 0));
        assert!(read_word(&data, 0x10).is_err());
    }

    #[test]
    fn test_fill_nops_between() {
        let mut data = vec![0xFFu8; 0x20];
        assert_eq!(fill_nops_between(&mut data, 0x8, 0x14).unwrap(), 0x14);
        assert_eq!(&data[..8], &[0xFF; 8]);
        for at in (0x8..0x14).step_by(4) {
            assert_eq!(read_word(&data, at).unwrap(), NOP);
        }
        assert_eq!(&data[0x14..], &[0xFF; 0xC]);

        assert!(matches!(fill_nops_between(&mut data, 0x10, 0x8), Err(Error::InvalidRange { .. })));
        assert_eq!(fill_nops_between(&mut data, 0x10, 0x10).unwrap(), 0x10);
    }
}
