/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! Old-style CBs: entry point at 0x3C0, POST codes intact and a plain call into CD.
use log::info;

use crate::cb::{Dialect, PatchOutcome, PatchParams, log_matches, vfuses};
use crate::error::Result;
use crate::utilities::patching::{SignatureSet, bulk_find};
use crate::utilities::ppc::{encode_branch, encode_no_op, fill_nops_between};

pub const POST_FUNCTION: &str = "post_function";
pub const CB_LDV: &str = "cb_ldv";
pub const SMC_HEADER: &str = "smc_header";
pub const SMC_CHECKSUM: &str = "smc_checksum";
pub const FUSECHECK_CALL: &str = "fusecheck_call";
pub const DECRYPT_CD: &str = "decrypt_cd";
pub const CD_HASHCHECK: &str = "cd_hashcheck";
pub const COPY_64BIT_BLOCKS: &str = "copy_64bit_blocks";
pub const VFUSE_LI_600: &str = "vfuse_li_600";
pub const FUSE_COPY_LOOP: &str = "fuse_copy_loop";
pub const SECENGINE_FUSE_COPY_LOOP: &str = "secengine_fuse_copy_loop";

// rldicr r4,r4,56,7; std r4,0(r3); blr
const POST_FUNCTION_PATTERN: &str = "7884C1C6 F8830000 4E800020";

// cmpw cr6,r11,r10; bne cr6,+0x10 (the LDV check); rlwinm; ori; b
const CB_LDV_PATTERN: &str = "7F0B5000 409A0010 56XX043E 61XX0008 48000038";

// Header sanity check against the SMC, fails with POST 0xA3
const SMC_HEADER_PATTERN: &str = "57EB053E 2B0B0000 409A0020 2BXX3000 409A0018 38803000";

// cmpwi cr6,r3,0; bne cr6,+0x14; li r4,0xA4
const SMC_CHECKSUM_PATTERN: &str = "2F030000 409A0014 388000A4";

// mr r3..r6 then bl fusecheck
const FUSECHECK_CALL_PATTERN: &str = "7F63DB78 7F84E378 7FA5EB78 7FC6F378 48XXXXXX";

// li r4,0x36; mr r3,r31; bl post; <rc4 setup>; bl rc4_decrypt
const DECRYPT_CD_PATTERN: &str = "38800036 7FE3FB78 48XXXXXX XXXXXXXX XXXXXXXX XXXXXXXX \
                                  XXXXXXXX 48XXXXXX";

// cmpwi cr6,r3,0; beq/bne cr6,+0x14; li r4,0xAD; mr r3,r31; bl post
const CD_HASHCHECK_PATTERN: &str = "2F030000 XX9A0014 388000AD 7FE3FB78 48XXXXXX";

// Register usage differs between builds
const FUSE_COPY_LOOP_PATTERN: &str = "7D6907B4 396B0040 79XX1F24 2F0B0300 \
                                      XXXXXX2A XXXX0000 394A0008 4198FFE4";

const SIGNATURES: &[(&str, &str)] = &[
    (POST_FUNCTION, POST_FUNCTION_PATTERN),
    (CB_LDV, CB_LDV_PATTERN),
    (SMC_HEADER, SMC_HEADER_PATTERN),
    (SMC_CHECKSUM, SMC_CHECKSUM_PATTERN),
    (FUSECHECK_CALL, FUSECHECK_CALL_PATTERN),
    (DECRYPT_CD, DECRYPT_CD_PATTERN),
    (CD_HASHCHECK, CD_HASHCHECK_PATTERN),
    (COPY_64BIT_BLOCKS, vfuses::COPY_64BIT_BLOCKS),
    (VFUSE_LI_600, vfuses::LI_600),
    (FUSE_COPY_LOOP, FUSE_COPY_LOOP_PATTERN),
    (SECENGINE_FUSE_COPY_LOOP, vfuses::SECENGINE_FUSE_COPY_LOOP),
];

pub fn signatures() -> Result<SignatureSet> {
    SignatureSet::from_table(SIGNATURES)
}

pub fn patch(image: &[u8], params: &PatchParams) -> Result<PatchOutcome> {
    let matches = bulk_find(&signatures()?, image);
    log_matches(&matches);
    let sigs = matches.resolve()?;

    let mut cbb = image.to_vec();
    let copy_fn = sigs.get(COPY_64BIT_BLOCKS)?;

    if params.nofuse {
        let at = sigs.get(FUSECHECK_CALL)? + 0x10;
        info!("nofuse: put nop at 0x{:04X}", at);
        encode_no_op(&mut cbb, at)?;
    } else {
        if params.nosmcsum {
            // Jump over the 0xA4 panic
            let at = sigs.get(SMC_CHECKSUM)? + 4;
            info!("nosmcsum: branch from 0x{:04X} to 0x{:04X}", at, at + 0x14);
            encode_branch(&mut cbb, at, at + 0x14, false)?;
        }

        // Inlined in the fusecheck function on old CBs
        if params.vfuse {
            let at = sigs.get(FUSE_COPY_LOOP)?;
            info!("vfuse: rewriting fuse copy loop at 0x{:04X}", at);
            vfuses::write_fuse_copy(&mut cbb, at, vfuses::NAND_BASE_FROM_R29, copy_fn)?;
        }

        if !params.disable_default {
            encode_no_op(&mut cbb, sigs.get(CB_LDV)? + 4)?;

            let smc_header = sigs.get(SMC_HEADER)?;
            fill_nops_between(&mut cbb, smc_header + 8, smc_header + 0x14)?;
        }
    }

    if params.vfuse {
        vfuses::patch_li_600(&mut cbb, sigs.get(VFUSE_LI_600)?)?;
        vfuses::patch_secengine_fuse_copy_loop(
            &mut cbb,
            sigs.get(SECENGINE_FUSE_COPY_LOOP)?,
            copy_fn,
        )?;
    }

    if params.nodecrypt {
        let at = sigs.get(DECRYPT_CD)? + 0x1C;
        info!("nodecrypt: put nop at 0x{:04X}", at);
        encode_no_op(&mut cbb, at)?;
    }

    if !params.disable_default {
        let at = sigs.get(CD_HASHCHECK)? + 4;
        info!("CD hashcheck: branch from 0x{:04X} to 0x{:04X}", at, at + 0x14);
        encode_branch(&mut cbb, at, at + 0x14, false)?;
    }

    Ok(PatchOutcome { dialect: Dialect::Old, image: cbb, signatures: sigs, free_space: Vec::new() })
}
