/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use tokio::fs::{read, write};

use crate::settings::Settings;

/// What every command gets to see besides its own arguments.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub settings: Settings,
    /// The file the settings were read from, if any.
    pub config_path: Option<PathBuf>,
}

/// A trait for providing metadata for CLI commands.
/// This trait can be implemented by command structs to give additional info
pub trait CommandMetadata {
    fn aliases() -> &'static [&'static str] {
        &[]
    }
    fn visible_aliases() -> &'static [&'static str] {
        &[]
    }
    fn about() -> &'static str {
        ""
    }
    fn long_about() -> &'static str {
        ""
    }
    fn hide() -> bool {
        false
    }
}

pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    read(path).await.with_context(|| format!("Failed to read {}", path.display()))
}

pub async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    write(path, data).await.with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote 0x{:X} bytes to {}", data.len(), path.display());
    Ok(())
}
