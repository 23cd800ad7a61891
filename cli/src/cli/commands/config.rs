/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use log::{info, warn};

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata};
use crate::settings::ENV_PREFIX;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the effective configuration as TOML.
    #[arg(long)]
    pub dump: bool,
}

impl CommandMetadata for ConfigArgs {
    fn about() -> &'static str {
        "Show the configuration in use."
    }

    fn long_about() -> &'static str {
        "Show where configuration is read from. Values come from the defaults, then the config \
         file, then CBPATCH_* environment variables (CBPATCH_PATCH__VFUSE=true), then flags."
    }
}

#[async_trait]
impl CbCommand for ConfigArgs {
    async fn run(&self, ctx: &CliContext) -> Result<()> {
        if self.dump {
            print!("{}", ctx.settings.to_toml()?);
            return Ok(());
        }

        match &ctx.config_path {
            Some(path) if path.exists() => info!("Config file: {}", path.display()),
            Some(path) => info!("Config file: {} (not present)", path.display()),
            None => warn!("No config directory on this system"),
        }
        info!("Environment prefix: {}_", ENV_PREFIX);
        info!("Default pad size: 0x{:X}", ctx.settings.pad_to);

        Ok(())
    }
}
