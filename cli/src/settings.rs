/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cbpatch::PatchParams;
use cbpatch::cb::DEFAULT_PAD_SIZE;
use config::{Config, Environment, File, FileFormat};
use log::debug;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "CBPATCH";

/// Patch switches that are on unless the command line says otherwise.
#[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct PatchDefaults {
    pub nofuse: bool,
    pub nosmcsum: bool,
    pub nopost: bool,
    pub nodecrypt: bool,
    pub vfuse: bool,
    pub disable_default: bool,
    pub allow_experimental: bool,
}

impl From<PatchDefaults> for PatchParams {
    fn from(d: PatchDefaults) -> Self {
        PatchParams {
            nofuse: d.nofuse,
            nosmcsum: d.nosmcsum,
            nopost: d.nopost,
            nodecrypt: d.nodecrypt,
            vfuse: d.vfuse,
            disable_default: d.disable_default,
            allow_experimental: d.allow_experimental,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Size `pad` grows loaders to when `--pad-to` isn't given.
    pub pad_to: usize,
    pub patch: PatchDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { pad_to: DEFAULT_PAD_SIZE, patch: PatchDefaults::default() }
    }
}

impl Settings {
    /// `<config dir>/cbpatch/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cbpatch").join("config.toml"))
    }

    /// Defaults, then the config file, then `CBPATCH_*` variables.
    /// An explicit file must exist, the default one is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from(Some(path), true, None),
            None => Self::load_from(Self::default_path().as_deref(), false, None),
        }
    }

    /// `env` replaces the process environment when given.
    pub fn load_from(
        path: Option<&Path>,
        required: bool,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(required));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings = builder
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .context("Failed to load configuration")?;

        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
