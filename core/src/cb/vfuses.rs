/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Virtual fuse patches for Glitch2m style images.
//!
//! The fuse copy loops are rewritten to copy 12 doublewords from the NAND
//! (at the offsets stored in the NAND header) instead of the real fuses.
use log::info;

use crate::error::Result;
use crate::utilities::patching::patch_bytes;
use crate::utilities::ppc::{branch_word, write_words};

/// 64-bit block move, the same across every CB. Used to load CD from NAND.
pub const COPY_64BIT_BLOCKS: &str = "7C641850 7CA903A6 80C40000 80E40004 78C7000E \
                                     7CE3212A 38840008 4320FFEC 4E800020";

/// `lhz r3,6(r2); li r4,0x600; andc r3,r3,r4`
pub const LI_600: &str = "A0620006 38800600 7C632078";

/// Fuse copy loop inside secengine init.
pub const SECENGINE_FUSE_COPY_LOOP: &str = "39XX0000 79XX1F4C 396B0040 2B0B0300 \
                                            7DXXXX2A F9XX0000 394A0008 4198FFE4";

/// `ld r3,0x258(r29)`
pub const NAND_BASE_FROM_R29: u32 = 0xE87D_0258;
/// `ld r3,0x258(r26)`
pub const NAND_BASE_FROM_R26: u32 = 0xE87A_0258;

/// Everything after the NAND base load, the destination is in r10.
const COPY_SETUP: [u32; 6] = [
    0x8083_0064, // lwz r4,0x64(r3)
    0x80A3_0070, // lwz r5,0x70(r3)
    0x7C63_2214, // add r3,r3,r4
    0x7C83_2A14, // add r4,r3,r5
    0x7D43_5378, // mr r3,r10
    0x38A0_000C, // li r5,0xC
];

/// Replaces the fuse copy loop at `at` with a call to `copy_fn`.
pub fn write_fuse_copy(data: &mut [u8], at: usize, base_load: u32, copy_fn: usize) -> Result<usize> {
    let mut words = Vec::with_capacity(COPY_SETUP.len() + 2);
    words.push(base_load);
    words.extend_from_slice(&COPY_SETUP);
    words.push(branch_word(at + words.len() * 4, copy_fn, true)?);

    write_words(data, at, &words)
}

/// `li r4,0x600` becomes `li r4,0x601`.
pub fn patch_li_600(data: &mut [u8], li_600: usize) -> Result<()> {
    let at = li_600 + 7;
    info!("vfuse: change byte at 0x{:04X} from 0 to 1", at);
    patch_bytes(data, at, &[0x01])
}

pub fn patch_secengine_fuse_copy_loop(data: &mut [u8], loop_at: usize, copy_fn: usize) -> Result<()> {
    info!("vfuse: rewriting secengine fuse copy loop at 0x{:04X}", loop_at);
    write_fuse_copy(data, loop_at, NAND_BASE_FROM_R26, copy_fn)?;
    Ok(())
}
