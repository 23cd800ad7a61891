/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod newcb;
pub mod oldcb;
pub mod vfuses;

use std::fmt;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::utilities::freespace::FreeSpaceArea;
use crate::utilities::patching::{BulkMatches, MatchResult, ResolvedSignatures, bulk_find};
use crate::{be_u16, be_u32};

pub const CB_MAGIC: [u8; 2] = *b"CB";
/// Matches CB_B 5772.
pub const DEFAULT_PAD_SIZE: usize = 0x9350;

const HEADER_SIZE: usize = 0x10;
const LDV_BITFIELD_OFFSET: usize = 0x3B2;
const CRC_ZEROED_RANGE: std::ops::Range<usize> = 0x10..0x40;

/// `li r4,0x20`, right before old-style CBs POST 0x20.
const OLD_ENTRY_MARKER: [u8; 4] = [0x38, 0x80, 0x00, 0x20];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CbHeader {
    pub magic: [u8; 2],
    pub version: u16,
    pub entry_point: u32,
    pub size: u32,
}

impl CbHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::invalid_image(format!(
                "image is only 0x{:X} bytes, header needs 0x{:X}",
                data.len(),
                HEADER_SIZE
            )));
        }

        Ok(CbHeader {
            magic: [data[0], data[1]],
            version: be_u16!(data, 2),
            entry_point: be_u32!(data, 8),
            size: be_u32!(data, 0xC),
        })
    }

    /// Magic is "CB" and entry point and size both fit in 16 bits.
    pub fn looks_valid(&self) -> bool {
        self.magic == CB_MAGIC && self.entry_point >> 16 == 0 && self.size >> 16 == 0
    }

    pub fn magic_str(&self) -> String {
        String::from_utf8_lossy(&self.magic).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Entry point at 0x3C0 (0x3D0 on a few builds), POST codes intact.
    Old,
    /// Entry point at 0x3E0, POST codes removed and random delays added.
    New,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Old => write!(f, "old-style"),
            Dialect::New => write!(f, "new-style"),
        }
    }
}

fn has_old_entry_marker(image: &[u8], at: usize) -> bool {
    image.get(at..at + 4) == Some(&OLD_ENTRY_MARKER[..])
}

pub fn detect_dialect(image: &[u8]) -> Result<Dialect> {
    let header = CbHeader::parse(image)?;
    if !header.looks_valid() {
        return Err(Error::invalid_image("doesn't look like a valid CB"));
    }

    match header.entry_point {
        0x3C0 if has_old_entry_marker(image, 0x3DC) => Ok(Dialect::Old),
        0x3D0 if has_old_entry_marker(image, 0x3EC) => Ok(Dialect::Old),
        0x3E0 => Ok(Dialect::New),
        _ => Err(Error::UnsupportedDialect),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdvInfo {
    pub bitfield: u16,
    pub ldv: u32,
}

/// Lockdown value: number of bits set in the revocation bitfield.
pub fn ldv(image: &[u8]) -> Result<LdvInfo> {
    if image.len() < LDV_BITFIELD_OFFSET + 2 {
        return Err(Error::invalid_image("image too short to hold the LDV bitfield"));
    }

    let bitfield = be_u16!(image, LDV_BITFIELD_OFFSET);
    Ok(LdvInfo { bitfield, ldv: bitfield.count_ones() })
}

fn loader_body(image: &[u8]) -> Result<&[u8]> {
    let size = CbHeader::parse(image)?.size as usize;
    if size > image.len() {
        return Err(Error::invalid_image(format!(
            "size field 0x{:X} is past the end of the image (0x{:X})",
            size,
            image.len()
        )));
    }
    Ok(&image[..size])
}

/// CRC-32 xeBuild expects for this CB: the loader truncated to its size field,
/// with 0x10..0x40 zeroed.
pub fn xebuild_crc32(image: &[u8]) -> Result<u32> {
    let mut body = loader_body(image)?.to_vec();
    if body.len() < CRC_ZEROED_RANGE.end {
        return Err(Error::invalid_image("loader too small for a CRC-32"));
    }
    body[CRC_ZEROED_RANGE].fill(0);

    Ok(crc32fast::hash(&body))
}

/// Zero-pads the loader to `pad_to` bytes and updates its size field.
pub fn pad_loader(image: &[u8], pad_to: usize) -> Result<Vec<u8>> {
    let body = loader_body(image)?;

    if body.len() > pad_to {
        return Err(Error::invalid_image(format!(
            "loader is 0x{:X} bytes, already larger than 0x{:X}",
            body.len(),
            pad_to
        )));
    }
    if pad_to % 0x10 != 0 {
        return Err(Error::invalid_image(format!(
            "target size 0x{:X} is not a multiple of 0x10",
            pad_to
        )));
    }
    let size = u32::try_from(pad_to)
        .map_err(|_| Error::invalid_image(format!("target size 0x{:X} is too large", pad_to)))?;

    let mut padded = body.to_vec();
    padded.resize(pad_to, 0);
    padded[0xC..0x10].copy_from_slice(&size.to_be_bytes());

    Ok(padded)
}

pub fn set_version(image: &mut [u8], version: u16) -> Result<()> {
    CbHeader::parse(image)?;
    image[2..4].copy_from_slice(&version.to_be_bytes());
    Ok(())
}

/// Switches for the dialect recipes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchParams {
    /// Skip fusechecks altogether (XeLL builds)
    pub nofuse: bool,
    /// Skip the SMC checksum check
    pub nosmcsum: bool,
    /// Don't patch POST codes back into new-style CBs
    pub nopost: bool,
    /// Skip CD decryption (XeLL builds)
    pub nodecrypt: bool,
    /// Virtual fuses for Glitch2m style images
    pub vfuse: bool,
    pub disable_default: bool,
    /// Return new-style output even though it likely won't boot yet
    pub allow_experimental: bool,
}

/// A successfully patched CB.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    pub dialect: Dialect,
    pub image: Vec<u8>,
    pub signatures: ResolvedSignatures,
    pub free_space: Vec<FreeSpaceArea>,
}

/// Detects the dialect and runs the matching recipe.
/// `image` is never touched, the patched copy is returned on success only.
pub fn patch_cb(image: &[u8], params: &PatchParams) -> Result<PatchOutcome> {
    let dialect = detect_dialect(image)?;
    info!("Found {} CB, attempting patches", dialect);

    match dialect {
        Dialect::Old => oldcb::patch(image, params),
        Dialect::New => newcb::patch(image, params),
    }
}

/// Looks up every landmark of the detected dialect without patching anything.
pub fn signature_report(image: &[u8]) -> Result<(Dialect, BulkMatches)> {
    let dialect = detect_dialect(image)?;
    let set = match dialect {
        Dialect::Old => oldcb::signatures()?,
        Dialect::New => newcb::signatures()?,
    };

    Ok((dialect, bulk_find(&set, image)))
}

pub(crate) fn log_matches(matches: &BulkMatches) {
    for (name, result) in matches.iter() {
        match result {
            MatchResult::Found(offset) => info!("{} = 0x{:04X}", name, offset),
            MatchResult::Missing => warn!("{} = NOT FOUND", name),
        }
    }
}
