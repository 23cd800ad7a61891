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
pub struct DiffArgs {
    /// The unpatched image.
    pub original: PathBuf,
    /// The patched image, same size as the original.
    pub patched: PathBuf,
    /// Where to write the patch list.
    pub output: PathBuf,
    /// Append this file after the patch list terminator.
    #[arg(long, value_name = "TEMPLATE_FILE")]
    pub template: Option<PathBuf>,
}

impl CommandMetadata for DiffArgs {
    fn about() -> &'static str {
        "Build an xeBuild patch list from two images."
    }
}

#[async_trait]
impl CbCommand for DiffArgs {
    async fn run(&self, _ctx: &CliContext) -> Result<()> {
        let original = read_file(&self.original).await?;
        let patched = read_file(&self.patched).await?;

        let list = PatchList::diff(&original, &patched)?;
        for run in list.runs() {
            info!("0x{:08X}: {} words", run.offset, run.words.len());
        }
        info!("{} patches, 0x{:X} bytes patched", list.len(), list.patched_bytes());

        let bytes = match &self.template {
            Some(path) => list.to_bytes_with_template(&read_file(path).await?),
            None => list.to_bytes(),
        };
        write_file(&self.output, &bytes).await
    }
}
