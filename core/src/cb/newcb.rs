/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! New-style CBs: entry point at 0x3E0, POST codes removed, random delays
//! sprinkled around the CD load and a few more checks on the CD header.
//!
//! Getting POST codes back means synthesizing code, which lives in functions
//! that are patched out along the way (the CD hash compare, the random delay,
//! the LDV fusecheck tail and the real entry point decryption).
use log::{info, warn};

use crate::cb::{Dialect, PatchOutcome, PatchParams, log_matches};
use crate::error::{Error, Result};
use crate::utilities::freespace::FreeSpaceArea;
use crate::utilities::patching::{Pattern, SignatureSet, bulk_find, find_all, patch as patch_hex};
use crate::utilities::ppc::{
    BLR,
    branch_word,
    decode_branch,
    encode_branch,
    encode_no_op,
    encode_panic_call,
    panic_call_words,
    post_code_call_words,
    read_word,
    trampoline_function_words,
    write_words,
};

pub const PANIC_AE_FUNCTION: &str = "panic_ae_function";
pub const RANDOM_DELAY_FUNCTION: &str = "random_delay_function";
pub const CD_HASH_COMPARE_FUNCTION: &str = "cd_hash_compare_function";
pub const HWINIT_PROXY: &str = "hwinit_proxy";
pub const CB_LDV: &str = "cb_ldv";
pub const FUSECHECK_CALL: &str = "fusecheck_call";
pub const SMC_CHECKSUM: &str = "smc_checksum";
pub const SMC_HEADER: &str = "smc_header";
pub const SECOTP_1_CHECK: &str = "secotp_1_check";
pub const SECOTP_2_CHECK: &str = "secotp_2_check";
pub const SECOTP_4_CHECK: &str = "secotp_4_check";
pub const SECOTP_5_CHECK: &str = "secotp_5_check";
pub const SECOTP_3_CHECK: &str = "secotp_3_check";
pub const CONSOLE_TYPE_CHECK: &str = "console_type_check";
pub const SECOTP_7_CHECK: &str = "secotp_7_check";
pub const REAL_ENTRYPOINT_DECRYPT: &str = "real_entrypoint_decrypt";
pub const CD_HEADER_CHECK: &str = "cd_header_check";

/// Missing on some later builds (16128), which don't check the console type.
const OPTIONAL: &[&str] = &[CONSOLE_TYPE_CHECK];

// The only panic left: li r3,0xAE followed by the shared panic body
const PANIC_AE_PATTERN: &str = "386000AE 7863C1C6 38800200 64848000 788407C6 64840006 \
                                F8641010 38000000 7C1823A6 4BFFFFF8";

// li r5,0x1BFF; li r4,0x400; addi r3,r1,0x80; bl random_delay
const RANDOM_DELAY_CALL_PATTERN: &str = "38A01BFF 38800400 38610080 4800XXXX";

const RANDOM_DELAY_PATTERN: &str = "7D8802A6 XXXXXXXX F821FF81 7C7F1B78 7C9D2378 7CBE2B78 \
                                    38A00004 38810050 7FE3FB78 XXXXXXXX 81610050 7D6BF038 \
                                    2B0B0000 419AFFE4 7C6BEA14 XXXXXXXX 38210080 XXXXXXXX";

const CD_HASH_COMPARE_PATTERN: &str = "60000000 60000000 60000000 60000000 3963FFFF 3984FFFF \
                                       7CA903A6 60000000 38600000 7CA50034 60000000 60000000 \
                                       7CB02120 4D9A0020 60000000 60000000 3860FFFF 38800000 \
                                       60000000 60000000 8D0B0001 8D2C0001 60000000 60000000 \
                                       7D064B78 690700FF 60000000 60000000 7CE54A78 60000000 \
                                       60000000 60000000 7C632838 7C843378 60000000 60000000 \
                                       4200FFC0 60000000 60000000 60000000 7C850034 60000000 \
                                       60000000 60000000 54A5D000 60000000 60000000 60000000 \
                                       7CA5FE70 60000000 60000000 60000000 7C632878 60000000 \
                                       60000000 60000000 7C630774 60000000 60000000 60000000 \
                                       4E800020";

// Clears r3/r4 and calls hwinit at +0x1C
const HWINIT_PROXY_PATTERN: &str = "7D8802A6 F981FFF8 FBE1FFF0 F821FFA1 7C7F1B78 38800000 \
                                    38600000 XXXXXXXX 7FE3FB78 38210060 E981FFF8 7D8803A6 \
                                    EBE1FFF0 4E800020";

// Same as old CBs but the trailing branch is shorter, the LDV panic is gone
const CB_LDV_PATTERN: &str = "7F0B5000 409A0010 XXXX043E 61XX0008 4800002C";

// bl fusecheck at +0x10, bl secengine_init at +0x14, mfspr r3,IAC1 at +0x18
const FUSECHECK_CALL_PATTERN: &str = "7F63DB78 7F84E378 7FA5EB78 7FC6F378 48XXXXXX 48XXXXXX \
                                      7C74FAA6";

// bl hmac_verify; cmpwi cr6,r3,0; bne cr6,+8; die (used to be POST 0xA4)
const SMC_CHECKSUM_PATTERN: &str = "48XXXXXX 2F030000 409A0008 00000000";

// SMC header check, accepts 0x3000 and 0x3800. The 0xA3 panic slot is at +0x30
const SMC_HEADER_PATTERN: &str = "2B0A0000 409A002C 2B1E3000 419A000C 2B1E3800 409A001C \
                                  7FC4F378 7BE30020 XXXXXXXX E97D0258 2F030000 409A0008 \
                                  00000000";

// Each secotp/console type check dies at +0x10
const SECOTP_1_PATTERN: &str = "798CD146 7D6A6038 2B2A0000 419A0008 00000000";
const SECOTP_2_PATTERN: &str = "5707043E 54EAFFFE 7F0B5000 419A0008 00000000";
const SECOTP_4_PATTERN: &str = "419A0014 79XX0720 2BXX0000 419A0008 00000000";
const SECOTP_5_PATTERN: &str = "7DXXXXF8 54XX07FE 7FXXXX00 419A0008 00000000";
const SECOTP_3_PATTERN: &str = "409A0010 54EB07BC 2B0B0000 419A0008 00000000";
const CONSOLE_TYPE_PATTERN: &str = "798C07C6 7D2B6038 2B2B0000 419A0008 00000000";
const SECOTP_7_PATTERN: &str = "48000014 570B07BC 2B0B0000 419A0008 00000000";

// Whole block can be replaced with addis r31,r22,0x400
const REAL_ENTRYPOINT_DECRYPT_PATTERN: &str = "E95E02F8 E97E0300 7FA907B4 E91E02F0 38A01BFF \
                                               7D6B5278 38800400 7D6B4278 38610080 7D6A4A78 \
                                               E97F03D8 7D4A5A78 E97F03C8 7D4A5A78 E97F03C0 \
                                               7D4B5A78 E9410068 7D6B5278 E9410060 7D7F5278 \
                                               48XXXXXX 2F1DFFFF 419A0008 00000000";

// +0x08/+0x0C: size limit, +0x24: minimum entry point, +0x68: 0xAB panic slot
const CD_HEADER_CHECK_PATTERN: &str = "83BE000C 82DE0008 397DF8F0 2B0BF8F0 41990058 A17E0000 \
                                       556B051E 2F0B0344 409A0048 2B160310 41980040 397DFFFC \
                                       7F165840 41990034 56CB07BE 2B0B0000 409A0028 A17F0006 \
                                       556B05AC 2B0B0000 409A001C 7FA4EB78 7F83E378 48XXXXXX \
                                       2F030000 409A0008 00000000";

const SIGNATURES: &[(&str, &str)] = &[
    (PANIC_AE_FUNCTION, PANIC_AE_PATTERN),
    (RANDOM_DELAY_FUNCTION, RANDOM_DELAY_PATTERN),
    (CD_HASH_COMPARE_FUNCTION, CD_HASH_COMPARE_PATTERN),
    (HWINIT_PROXY, HWINIT_PROXY_PATTERN),
    (CB_LDV, CB_LDV_PATTERN),
    (FUSECHECK_CALL, FUSECHECK_CALL_PATTERN),
    (SMC_CHECKSUM, SMC_CHECKSUM_PATTERN),
    (SMC_HEADER, SMC_HEADER_PATTERN),
    (SECOTP_1_CHECK, SECOTP_1_PATTERN),
    (SECOTP_2_CHECK, SECOTP_2_PATTERN),
    (SECOTP_4_CHECK, SECOTP_4_PATTERN),
    (SECOTP_5_CHECK, SECOTP_5_PATTERN),
    (SECOTP_3_CHECK, SECOTP_3_PATTERN),
    (CONSOLE_TYPE_CHECK, CONSOLE_TYPE_PATTERN),
    (SECOTP_7_CHECK, SECOTP_7_PATTERN),
    (REAL_ENTRYPOINT_DECRYPT, REAL_ENTRYPOINT_DECRYPT_PATTERN),
    (CD_HEADER_CHECK, CD_HEADER_CHECK_PATTERN),
];

/// `li r3,-1`
const LI_R3_MINUS_ONE: u32 = 0x3860_FFFF;
/// `mfspr r3,IAC1`
const MFSPR_R3_IAC1: u32 = 0x7C74_FAA6;
/// `addis r31,r22,0x400`
const ADDIS_R31_R22_0X400: u32 = 0x3FF6_0400;

const CB_LDV_FREE_SPACE_OFFSET: usize = 0x14;
const CB_LDV_FREE_SPACE_SIZE: usize = 0x2C;

pub fn signatures() -> Result<SignatureSet> {
    SignatureSet::from_table(SIGNATURES)
}

fn pattern_len(set: &SignatureSet, name: &str) -> Result<usize> {
    set.get(name).map(Pattern::len).ok_or_else(|| Error::UnknownSignature(name.to_string()))
}

/// Writes a branch at `site` to a block emitted in `fs`.
fn reroute<F>(
    data: &mut [u8],
    fs: &mut FreeSpaceArea,
    name: &str,
    site: usize,
    with_link: bool,
    build: F,
) -> Result<usize>
where
    F: FnOnce(usize) -> Result<Vec<u32>>,
{
    let site_word = branch_word(site, fs.head(), with_link)?;
    read_word(data, site)?;

    let target = fs.emit(data, name, build)?;
    write_words(data, site, &[site_word])?;
    Ok(target)
}

/// Moves the panic at `site` into `fs`, as `li r4,code; b panic`.
fn reinstate_panic(
    data: &mut [u8],
    fs: &mut FreeSpaceArea,
    site: usize,
    panic_fn: usize,
    code: u32,
) -> Result<()> {
    let name = format!("panic_{:02X}", code);
    reroute(data, fs, &name, site, false, |at| Ok(panic_call_words(at, panic_fn, code)?.to_vec()))?;
    Ok(())
}

/// Makes the hash compare return -1 (match). The rest of its body becomes free space.
fn reclaim_cd_hash_compare(data: &mut [u8], at: usize, size: usize) -> Result<FreeSpaceArea> {
    info!("Patching CD hash compare at 0x{:04X} to always return -1", at);
    let start = write_words(data, at, &[LI_R3_MINUS_ONE, BLR])?;
    let fs = FreeSpaceArea::new(start, at + size)?;
    info!("Reclaimed 0x{:04X} ~ 0x{:04X} as free space", fs.start(), fs.end());
    Ok(fs)
}

fn reclaim_random_delay(data: &mut [u8], at: usize, size: usize) -> Result<FreeSpaceArea> {
    let start = write_words(data, at, &[BLR])?;
    let fs = FreeSpaceArea::new(start, at + size)?;
    info!("Reclaimed 0x{:04X} ~ 0x{:04X} as free space", fs.start(), fs.end());
    Ok(fs)
}

fn reclaim_cb_ldv_fusecheck(cb_ldv: usize) -> Result<FreeSpaceArea> {
    let start = cb_ldv + CB_LDV_FREE_SPACE_OFFSET;
    let fs = FreeSpaceArea::new(start, start + CB_LDV_FREE_SPACE_SIZE)?;
    info!("Reclaimed 0x{:04X} ~ 0x{:04X} as free space", fs.start(), fs.end());
    Ok(fs)
}

fn reclaim_real_entrypoint_decrypt(data: &mut [u8], at: usize, size: usize) -> Result<FreeSpaceArea> {
    let end = at + size;
    let skip = branch_word(at + 4, end, false)?;
    let start = write_words(data, at, &[ADDIS_R31_R22_0X400, skip])?;
    let fs = FreeSpaceArea::new(start, end)?;
    info!("Reclaimed 0x{:04X} ~ 0x{:04X} as free space", fs.start(), fs.end());
    Ok(fs)
}

/// Puts back the size limit and minimum entry point old CDs expect.
fn restore_old_cd_header_limits(data: &mut [u8], at: usize) -> Result<()> {
    patch_hex(data, at + 0x0A, "F9A0")?;
    patch_hex(data, at + 0x0E, "F9A0")?;
    patch_hex(data, at + 0x26, "0260")?;
    Ok(())
}

/// POST 0x23 and 0x2E before hwinit runs, like old CBs do.
fn post_hwinit(data: &mut [u8], fs: &mut FreeSpaceArea, proxy: usize, post_fn: usize) -> Result<()> {
    let site = proxy + 0x1C;
    let hwinit = decode_branch(read_word(data, site)?, site)?;

    reroute(data, fs, "hwinit_23_2e_reroute", site, true, |at| {
        let mut words = post_code_call_words(at, post_fn, 0x23)?.to_vec();
        words.extend(post_code_call_words(at + 8, post_fn, 0x2E)?);
        words.push(branch_word(at + 16, hwinit, false)?);
        Ok(words)
    })?;
    Ok(())
}

/// POST `code` and tail call whatever `site` used to call.
fn post_before_call(
    data: &mut [u8],
    fs: &mut FreeSpaceArea,
    name: &str,
    site: usize,
    post_fn: usize,
    code: u32,
) -> Result<()> {
    let callee = decode_branch(read_word(data, site)?, site)?;

    reroute(data, fs, name, site, true, |at| {
        let mut words = post_code_call_words(at, post_fn, code)?.to_vec();
        words.push(branch_word(at + 8, callee, false)?);
        Ok(words)
    })?;
    Ok(())
}

/// POST 0x2F around the relocation, right after `mfspr r3,IAC1`.
fn post_relocation(data: &mut [u8], fs: &mut FreeSpaceArea, fusecheck_call: usize, post_fn: usize) -> Result<()> {
    let site = fusecheck_call + 0x18;
    let resume = fusecheck_call + 0x1C;

    reroute(data, fs, "reloc_2f_reroute", site, false, |at| {
        let mut words = vec![MFSPR_R3_IAC1];
        words.extend(post_code_call_words(at + 4, post_fn, 0x2F)?);
        words.push(branch_word(at + 12, resume, false)?);
        Ok(words)
    })?;
    Ok(())
}

pub fn patch(image: &[u8], params: &PatchParams) -> Result<PatchOutcome> {
    let set = signatures()?;
    let matches = bulk_find(&set, image);
    log_matches(&matches);
    let sigs = matches.resolve_with_optional(OPTIONAL)?;

    let console_type_check = sigs.optional(CONSOLE_TYPE_CHECK)?;
    if console_type_check.is_none() {
        warn!("No console type check found, assuming this CB doesn't have one");
    }
    if params.vfuse {
        warn!("vfuse patches are only available for old-style CBs, ignoring");
    }

    let mut cbb = image.to_vec();
    let reenable_posts = !params.nopost;

    let mut hash_fs = reclaim_cd_hash_compare(
        &mut cbb,
        sigs.get(CD_HASH_COMPARE_FUNCTION)?,
        pattern_len(&set, CD_HASH_COMPARE_FUNCTION)?,
    )?;
    let mut delay_fs = reclaim_random_delay(
        &mut cbb,
        sigs.get(RANDOM_DELAY_FUNCTION)?,
        pattern_len(&set, RANDOM_DELAY_FUNCTION)?,
    )?;

    // Skip the li r3,0xAE
    let panic_fn = sigs.get(PANIC_AE_FUNCTION)? + 4;
    let fusecheck_call = sigs.get(FUSECHECK_CALL)?;

    let post_fn = if reenable_posts {
        let post_fn = delay_fs.emit(&mut cbb, "post", |_| Ok(trampoline_function_words().to_vec()))?;

        post_hwinit(&mut cbb, &mut hash_fs, sigs.get(HWINIT_PROXY)?, post_fn)?;
        post_before_call(&mut cbb, &mut hash_fs, "seceng_22_reroute", fusecheck_call + 0x14, post_fn, 0x22)?;
        post_relocation(&mut cbb, &mut hash_fs, fusecheck_call, post_fn)?;
        Some(post_fn)
    } else {
        None
    };

    let mut ldv_fs = None;
    if params.nofuse {
        let at = fusecheck_call + 0x10;
        info!("nofuse: put nop at 0x{:04X}", at);
        encode_no_op(&mut cbb, at)?;
    } else {
        if let Some(post_fn) = post_fn {
            post_before_call(&mut cbb, &mut hash_fs, "fusecheck_21_reroute", fusecheck_call + 0x10, post_fn, 0x21)?;
        }

        let smc_checksum = sigs.get(SMC_CHECKSUM)?;
        if params.nosmcsum {
            encode_branch(&mut cbb, smc_checksum + 0x0C, smc_checksum + 0x14, false)?;
        } else if post_fn.is_some() {
            reinstate_panic(&mut cbb, &mut hash_fs, smc_checksum + 0x0C, panic_fn, 0xA4)?;
        }

        let cb_ldv = sigs.get(CB_LDV)?;
        encode_no_op(&mut cbb, cb_ldv + 4)?;
        // Code past the LDV check is dead now, room for five panics
        let mut fs = reclaim_cb_ldv_fusecheck(cb_ldv)?;

        let smc_header = sigs.get(SMC_HEADER)?;
        encode_branch(&mut cbb, smc_header, smc_header + 0x18, false)?;

        if post_fn.is_some() {
            // Old panic slot at +0x30 jumps back into the block skipped above
            encode_panic_call(&mut cbb, smc_header + 4, panic_fn, 0xA3)?;
            encode_branch(&mut cbb, smc_header + 0x30, smc_header + 4, false)?;

            // secotp 4, 5 and 3 are checked out of order
            for (name, code) in [
                (SECOTP_1_CHECK, 0x9B),
                (SECOTP_2_CHECK, 0x9C),
                (SECOTP_4_CHECK, 0x9E),
                (SECOTP_5_CHECK, 0x9F),
                (SECOTP_3_CHECK, 0x9D),
            ] {
                reinstate_panic(&mut cbb, &mut fs, sigs.get(name)? + 0x10, panic_fn, code)?;
            }

            if let Some(at) = console_type_check {
                reinstate_panic(&mut cbb, &mut hash_fs, at + 0x10, panic_fn, 0xB0)?;
            }
            reinstate_panic(&mut cbb, &mut hash_fs, sigs.get(SECOTP_7_CHECK)? + 0x10, panic_fn, 0xA1)?;
        }
        ldv_fs = Some(fs);
    }

    let delay_call = Pattern::parse(RANDOM_DELAY_CALL_PATTERN)?;
    for at in find_all(&cbb, &delay_call, 0) {
        info!("Random delay call at 0x{:04X}", at);
    }

    let mut entry_fs = reclaim_real_entrypoint_decrypt(
        &mut cbb,
        sigs.get(REAL_ENTRYPOINT_DECRYPT)?,
        pattern_len(&set, REAL_ENTRYPOINT_DECRYPT)?,
    )?;

    let cd_header_check = sigs.get(CD_HEADER_CHECK)?;
    restore_old_cd_header_limits(&mut cbb, cd_header_check)?;
    if post_fn.is_some() {
        reinstate_panic(&mut cbb, &mut entry_fs, cd_header_check + 0x68, panic_fn, 0xAB)?;
    }

    if !params.allow_experimental {
        warn!("Resulting patch probably won't boot, for best results also pass --nopost");
        return Err(Error::ExperimentalDialect(Dialect::New.to_string()));
    }

    let mut free_space = vec![hash_fs, delay_fs];
    free_space.extend(ldv_fs);
    free_space.push(entry_fs);

    Ok(PatchOutcome { dialect: Dialect::New, image: cbb, signatures: sigs, free_space })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_table_is_valid() {
        let set = signatures().unwrap();
        assert_eq!(set.len(), 17);
        assert_eq!(pattern_len(&set, RANDOM_DELAY_FUNCTION).unwrap(), 0x48);
        assert_eq!(pattern_len(&set, CD_HASH_COMPARE_FUNCTION).unwrap(), 0xF4);
        assert_eq!(pattern_len(&set, HWINIT_PROXY).unwrap(), 0x38);
        assert_eq!(pattern_len(&set, SMC_HEADER).unwrap(), 0x34);
        assert_eq!(pattern_len(&set, REAL_ENTRYPOINT_DECRYPT).unwrap(), 0x60);
        assert_eq!(pattern_len(&set, CD_HEADER_CHECK).unwrap(), 0x6C);
        assert!(Pattern::parse(RANDOM_DELAY_CALL_PATTERN).is_ok());
    }

    #[test]
    fn test_reclaim_random_delay() {
        let mut data = vec![0xFFu8; 0x100];
        let fs = reclaim_random_delay(&mut data, 0x40, 0x48).unwrap();
        assert_eq!(read_word(&data, 0x40).unwrap(), BLR);
        assert_eq!((fs.start(), fs.end()), (0x44, 0x88));
    }

    #[test]
    fn test_reclaim_real_entrypoint_decrypt() {
        let mut data = vec![0u8; 0x100];
        let fs = reclaim_real_entrypoint_decrypt(&mut data, 0x20, 0x60).unwrap();
        assert_eq!(read_word(&data, 0x20).unwrap(), ADDIS_R31_R22_0X400);
        assert_eq!(decode_branch(read_word(&data, 0x24).unwrap(), 0x24).unwrap(), 0x80);
        assert_eq!((fs.start(), fs.end()), (0x28, 0x80));
    }

    #[test]
    fn test_reroute_leaves_call_site_alone_on_failure() {
        let mut data = vec![0u8; 0x100];
        let mut fs = FreeSpaceArea::new(0x80, 0x88).unwrap();
        let before = data.clone();

        let result = reroute(&mut data, &mut fs, "too_big", 0x10, true, |_| Ok(vec![BLR; 3]));
        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
        assert_eq!(data, before);
        assert_eq!(fs.head(), 0x80);
    }
}
