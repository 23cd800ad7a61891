/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use cbpatch::cb::{CbHeader, ldv, signature_report, xebuild_crc32};
use cbpatch::utilities::patching::MatchResult;
use clap::Args;
use colored::Colorize;
use human_bytes::human_bytes;
use log::{info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file};

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// The CB to inspect.
    pub input: PathBuf,
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl CommandMetadata for InfoArgs {
    fn visible_aliases() -> &'static [&'static str] {
        &["i"]
    }

    fn about() -> &'static str {
        "Show information about a CB."
    }

    fn long_about() -> &'static str {
        "Print the CB header, dialect, lockdown value, checksums and where each landmark of the \
         detected dialect was found, without patching anything."
    }
}

#[derive(Serialize, Debug)]
pub struct SignatureEntry {
    pub name: String,
    pub offset: Option<usize>,
}

#[derive(Serialize, Debug)]
pub struct InfoReport {
    pub magic: String,
    pub version: u16,
    pub entry_point: u32,
    pub loader_size: u32,
    pub file_size: usize,
    pub valid: bool,
    pub dialect: Option<String>,
    pub ldv: Option<u32>,
    pub ldv_bitfield: Option<u16>,
    pub xebuild_crc32: Option<String>,
    pub sha256: String,
    pub signatures: Vec<SignatureEntry>,
}

impl InfoReport {
    /// Everything that can be told about `image`. Fields that need a sane CB are left out otherwise.
    pub fn build(image: &[u8]) -> Result<Self> {
        let header = CbHeader::parse(image)?;
        let ldv_info = ldv(image).ok();

        let (dialect, signatures) = match signature_report(image) {
            Ok((dialect, matches)) => {
                let signatures = matches
                    .iter()
                    .map(|(name, result)| SignatureEntry { name: name.to_string(), offset: result.offset() })
                    .collect();
                (Some(dialect.to_string()), signatures)
            }
            Err(_) => (None, Vec::new()),
        };

        Ok(InfoReport {
            magic: header.magic_str(),
            version: header.version,
            entry_point: header.entry_point,
            loader_size: header.size,
            file_size: image.len(),
            valid: header.looks_valid(),
            dialect,
            ldv: ldv_info.map(|l| l.ldv),
            ldv_bitfield: ldv_info.map(|l| l.bitfield),
            xebuild_crc32: xebuild_crc32(image).ok().map(|crc| format!("{:08X}", crc)),
            sha256: hex::encode(Sha256::digest(image)),
            signatures,
        })
    }

    fn log(&self) {
        info!("Magic: {} \t Version: {}", self.magic, self.version);
        info!("Entry point: 0x{:04X}", self.entry_point);
        info!(
            "Loader size: 0x{:X} ({}) \t File size: 0x{:X}",
            self.loader_size,
            human_bytes(self.loader_size as f64),
            self.file_size
        );
        if !self.valid {
            warn!("Header doesn't look like a valid CB");
        }

        match &self.dialect {
            Some(dialect) => info!("Dialect: {}", dialect.bold()),
            None => warn!("Dialect: unsupported"),
        }
        if let (Some(ldv), Some(bitfield)) = (self.ldv, self.ldv_bitfield) {
            info!("LDV: {} (0x{:04X})", ldv, bitfield);
        }
        if let Some(crc) = &self.xebuild_crc32 {
            info!("xeBuild CRC-32: 0x{}", crc);
        }
        info!("SHA-256: {}", self.sha256);

        if self.signatures.is_empty() {
            return;
        }
        info!("Landmarks:");
        for sig in &self.signatures {
            match MatchResult::from(sig.offset) {
                MatchResult::Found(offset) => info!("{:<26} 0x{:04X}", sig.name, offset),
                MatchResult::Missing => warn!("{:<26} {}", sig.name, "NOT FOUND".red()),
            }
        }
    }
}

#[async_trait]
impl CbCommand for InfoArgs {
    async fn run(&self, _ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let report = InfoReport::build(&image)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.log();
        }

        Ok(())
    }
}
