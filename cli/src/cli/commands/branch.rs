/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use cbpatch::utilities::ppc::{decode_branch, decode_conditional_branch, read_word};
use clap::Args;
use clap_num::maybe_hex;
use log::info;

use crate::cli::CbCommand;
use crate::cli::common::{CliContext, CommandMetadata, read_file};

#[derive(Args, Debug)]
pub struct BranchArgs {
    /// The image holding the branch.
    pub input: PathBuf,
    /// Offset of the branch instruction.
    #[arg(value_parser = maybe_hex::<usize>)]
    pub offset: usize,
}

impl CommandMetadata for BranchArgs {
    fn about() -> &'static str {
        "Decode the branch at an offset."
    }

    fn long_about() -> &'static str {
        "Decode the relative branch (b, bl, bc, bcl) at the given offset and print its target."
    }
}

/// Mnemonic and target of the branch `word` at `at`.
pub fn describe_branch(word: u32, at: usize) -> cbpatch::Result<(&'static str, usize)> {
    let link = word & 1 != 0;
    match decode_branch(word, at) {
        Ok(target) => Ok((if link { "bl" } else { "b" }, target)),
        Err(_) => {
            let target = decode_conditional_branch(word, at)?;
            Ok((if link { "bcl" } else { "bc" }, target))
        }
    }
}

#[async_trait]
impl CbCommand for BranchArgs {
    async fn run(&self, _ctx: &CliContext) -> Result<()> {
        let image = read_file(&self.input).await?;
        let word = read_word(&image, self.offset)?;
        let (mnemonic, target) = describe_branch(word, self.offset)?;

        info!("0x{:08X}: {:08X} {} 0x{:X}", self.offset, word, mnemonic, target);
        Ok(())
    }
}
