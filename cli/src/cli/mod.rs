/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod commands;
pub mod common;
mod macros;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::{CommandFactory, Parser};

use crate::cli::commands::*;
use crate::cli::common::CliContext;
use crate::cli::macros::cb_commands;
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Enable verbose logging, including debug information
    #[arg(short, long)]
    pub verbose: bool,
    /// Configuration file to use instead of the one in the user config directory
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

cb_commands! {
    Patch(PatchArgs),
    Info(InfoArgs),
    Find(FindArgs),
    Branch(BranchArgs),
    Diff(DiffArgs),
    Apply(ApplyArgs),
    Pad(PadArgs),
    Config(ConfigArgs),
}

#[async_trait]
pub trait CbCommand {
    async fn run(&self, ctx: &CliContext) -> Result<()>;
}

pub async fn run_cli(args: &CliArgs) -> Result<()> {
    let Some(cmd) = &args.command else {
        CliArgs::command().print_help()?;
        return Ok(());
    };

    let settings = Settings::load(args.config.as_deref())?;
    let config_path = args.config.clone().or_else(Settings::default_path);
    let ctx = CliContext { settings, config_path };

    cmd.run(&ctx).await
}
