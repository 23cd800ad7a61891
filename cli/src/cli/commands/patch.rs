/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use cbpatch::cb::{set_version, xebuild_crc32};
use cbpatch::{PatchList, PatchParams, patch_cb};
use clap::Args;
use clap_num::maybe_hex;
use human_bytes::human_bytes;
use log::info;

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file, write_file};
use crate::settings::PatchDefaults;

/// Recipe switches. Each one can only turn a switch on, configuration may already have.
#[derive(Args, Debug, Default, Clone, Copy)]
pub struct PatchSwitches {
    /// Skip fusechecks altogether (XeLL builds)
    #[arg(long)]
    pub nofuse: bool,
    /// Skip the SMC checksum check
    #[arg(long)]
    pub nosmcsum: bool,
    /// Don't patch POST codes back into new-style CBs
    #[arg(long)]
    pub nopost: bool,
    /// Skip CD decryption (XeLL builds)
    #[arg(long)]
    pub nodecrypt: bool,
    /// Read fuses from NAND instead of the eFuse block
    #[arg(long)]
    pub vfuse: bool,
    /// Only apply the patches requested by other switches
    #[arg(long)]
    pub disable_default: bool,
    /// Write new-style output even though it likely won't boot
    #[arg(long)]
    pub allow_experimental: bool,
}

impl PatchSwitches {
    pub fn merge(&self, defaults: PatchDefaults) -> PatchParams {
        let mut params = PatchParams::from(defaults);
        params.nofuse |= self.nofuse;
        params.nosmcsum |= self.nosmcsum;
        params.nopost |= self.nopost;
        params.nodecrypt |= self.nodecrypt;
        params.vfuse |= self.vfuse;
        params.disable_default |= self.disable_default;
        params.allow_experimental |= self.allow_experimental;
        params
    }
}

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// The CB to patch.
    pub input: PathBuf,
    /// Where to write the patched CB (or patch list).
    pub output: PathBuf,
    #[command(flatten)]
    pub switches: PatchSwitches,
    /// Write an xeBuild patch list instead of the patched image.
    #[arg(long)]
    pub xebuild: bool,
    /// Append this file after the patch list terminator.
    #[arg(long, value_name = "TEMPLATE_FILE", requires = "xebuild")]
    pub template: Option<PathBuf>,
    /// Overwrite the version field of the patched CB. Binary output only.
    #[arg(long, value_parser = maybe_hex::<u16>, conflicts_with = "xebuild")]
    pub set_version: Option<u16>,
}

impl CommandMetadata for PatchArgs {
    fn about() -> &'static str {
        "Patch a CB."
    }

    fn long_about() -> &'static str {
        "Detect the CB dialect, locate every landmark and apply the matching recipe. \
         Nothing is written unless every required landmark is found and every patch fits."
    }
}

#[async_trait]
impl CbCommand for PatchArgs {
    async fn run(&self, ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let params = self.switches.merge(ctx.settings.patch);

        info!("Loaded {} ({})", self.input.display(), human_bytes(image.len() as f64));

        let outcome = patch_cb(&image, &params)?;
        let mut patched = outcome.image;

        for area in &outcome.free_space {
            info!(
                "Free space 0x{:04X}-0x{:04X}: 0x{:X} bytes used, 0x{:X} left",
                area.start(),
                area.end(),
                area.head() - area.start(),
                area.remaining()
            );
        }

        if !self.xebuild {
            if let Some(version) = self.set_version {
                info!("Setting CB version to {}", version);
                set_version(&mut patched, version)?;
            }
            info!("xeBuild CRC-32: 0x{:08X}", xebuild_crc32(&patched)?);
            return write_file(&self.output, &patched).await;
        }

        info!("xeBuild CRC-32: 0x{:08X}", xebuild_crc32(&patched)?);
        let list = PatchList::diff(&image, &patched)?;
        info!("{} patches, 0x{:X} bytes patched", list.len(), list.patched_bytes());

        let bytes = match &self.template {
            Some(path) => list.to_bytes_with_template(&read_file(path).await?),
            None => list.to_bytes(),
        };
        write_file(&self.output, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switches_only_add_to_defaults() {
        let defaults = PatchDefaults { vfuse: true, ..Default::default() };
        let switches = PatchSwitches { nosmcsum: true, ..Default::default() };

        let params = switches.merge(defaults);
        assert!(params.vfuse);
        assert!(params.nosmcsum);
        assert!(!params.nofuse);
        assert!(!params.allow_experimental);
    }
}
