/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::{Result, bail};
use async_trait::async_trait;
use cbpatch::Pattern;
use clap::Args;
use clap_num::maybe_hex;
use log::{info, warn};

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file};

#[derive(Args, Debug)]
pub struct FindArgs {
    /// The image to search.
    pub input: PathBuf,
    /// Hex pattern, `XX` or `??` matches any byte.
    pub pattern: String,
    /// Report every non-overlapping match instead of the first one.
    #[arg(short, long)]
    pub all: bool,
    /// Offset to start searching from.
    #[arg(short, long, value_parser = maybe_hex::<usize>, default_value_t = 0)]
    pub start: usize,
}

impl CommandMetadata for FindArgs {
    fn about() -> &'static str {
        "Search an image for a signature."
    }
}

#[async_trait]
impl CbCommand for FindArgs {
    async fn run(&self, _ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let pattern: Pattern = self.pattern.parse()?;

        if self.start >= image.len() {
            bail!("Start offset 0x{:X} is past the end of the image (0x{:X})", self.start, image.len());
        }

        info!("Searching for {} ({} bytes) from 0x{:X}", pattern, pattern.len(), self.start);

        let offsets: Vec<usize> = if self.all {
            pattern.find_all(&image, self.start).collect()
        } else {
            pattern.find(&image, self.start).into_iter().collect()
        };

        if offsets.is_empty() {
            warn!("Pattern not found");
            return Ok(());
        }

        for offset in offsets {
            info!("Found at 0x{:08X}", offset);
        }

        Ok(())
    }
}
