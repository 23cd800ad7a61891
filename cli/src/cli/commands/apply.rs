/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use cbpatch::PatchList;
use clap::Args;
use log::info;

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file, write_file};

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// The image to patch.
    pub input: PathBuf,
    /// The xeBuild patch list.
    pub list: PathBuf,
    /// Where to write the patched image.
    pub output: PathBuf,
}

impl CommandMetadata for ApplyArgs {
    fn about() -> &'static str {
        "Apply an xeBuild patch list to an image."
    }
}

#[async_trait]
impl CbCommand for ApplyArgs {
    async fn run(&self, _ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let raw = read_file(&self.list).await?;

        let (list, rest) = PatchList::parse(&raw)?;
        if !rest.is_empty() {
            info!("Ignoring 0x{:X} bytes after the patch list terminator", rest.len());
        }

        let patched = list.apply(&image)?;
        info!("Applied {} patches (0x{:X} bytes)", list.len(), list.patched_bytes());

        write_file(&self.output, &patched).await
    }
}
