/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use cbpatch::cb::pad_loader;
use clap::Args;
use clap_num::maybe_hex;
use human_bytes::human_bytes;
use log::info;

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file, write_file};

#[derive(Args, Debug)]
pub struct PadArgs {
    /// The loader to pad.
    pub input: PathBuf,
    /// Where to write the padded loader.
    pub output: PathBuf,
    /// Target size, a multiple of 0x10. Defaults to the configured `pad_to`.
    #[arg(long, value_parser = maybe_hex::<usize>)]
    pub pad_to: Option<usize>,
}

impl CommandMetadata for PadArgs {
    fn about() -> &'static str {
        "Zero-pad a loader and update its size field."
    }
}

#[async_trait]
impl CbCommand for PadArgs {
    async fn run(&self, ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let pad_to = self.pad_to.unwrap_or(ctx.settings.pad_to);

        let padded = pad_loader(&image, pad_to)?;
        info!("Padded loader to 0x{:X} ({})", pad_to, human_bytes(pad_to as f64));

        write_file(&self.output, &padded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    #[tokio::test]
    async fn test_pads_to_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.pad_to = 0x100;
        let ctx = CliContext { settings, config_path: None };

        let mut loader = vec![0xAAu8; 0x80];
        loader[0..2].copy_from_slice(b"CB");
        loader[0xC..0x10].copy_from_slice(&0x80u32.to_be_bytes());
        std::fs::write(dir.path().join("cb.bin"), &loader).unwrap();

        PadArgs { input: dir.path().join("cb.bin"), output: dir.path().join("out.bin"), pad_to: None }
            .run(&ctx)
            .await
            .unwrap();

        let padded = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(padded.len(), 0x100);
        assert_eq!(&padded[0xC..0x10], &0x100u32.to_be_bytes());
        assert!(padded[0x80..].iter().all(|&b| b == 0));
    }
}
