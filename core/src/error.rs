/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Required signature(s) not found: {}", .names.join(", "))]
    PatternNotFound { names: Vec<String> },

    #[error("Signature '{0}' was never part of the resolved set")]
    UnknownSignature(String),

    #[error("Address 0x{0:08X} is not 32-bit aligned")]
    MisalignedAddress(usize),

    #[error("Branch from 0x{from:08X} to 0x{to:X} does not fit the displacement field")]
    DisplacementOutOfRange { from: usize, to: i64 },

    #[error("Immediate 0x{0:X} does not fit in 8 bits")]
    ImmediateOutOfRange(u32),

    #[error("Instruction 0x{word:08X} at 0x{at:08X} is not a branch")]
    NotABranchInstruction { word: u32, at: usize },

    #[error("Invalid free space range 0x{start:08X} ~ 0x{end:08X}")]
    InvalidRange { start: usize, end: usize },

    #[error("Free space exhausted: 0x{requested:08X} is past the end at 0x{end:08X}")]
    OutOfBounds { requested: usize, end: usize },

    #[error("Free space head can't move back from 0x{head:08X} to 0x{requested:08X}")]
    HeadRegression { head: usize, requested: usize },

    #[error("Function '{0}' already exists in free space")]
    DuplicateName(String),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Access of 0x{len:X} bytes at 0x{at:08X} exceeds image size 0x{size:X}")]
    ImageOverrun { at: usize, len: usize, size: usize },

    #[error("Invalid CB image: {0}")]
    InvalidImage(String),

    #[error("CB doesn't match any supported dialect")]
    UnsupportedDialect,

    #[error("Patches for {0} CBs are experimental and were not requested")]
    ExperimentalDialect(String),

    #[error("Patch list error: {0}")]
    PatchList(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Error::InvalidImage(msg.into())
    }

    pub fn patch_list(msg: impl Into<String>) -> Self {
        Error::PatchList(msg.into())
    }

    /// Names of the signatures that failed to resolve, if this is a resolution failure.
    pub fn missing_signatures(&self) -> &[String] {
        match self {
            Error::PatternNotFound { names } => names,
            _ => &[],
        }
    }
}
