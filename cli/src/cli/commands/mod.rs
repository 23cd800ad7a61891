/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod apply;
pub mod branch;
pub mod config;
pub mod diff;
pub mod find;
pub mod info;
pub mod pad;
pub mod patch;

pub use apply::ApplyArgs;
pub use branch::BranchArgs;
pub use config::ConfigArgs;
pub use diff::DiffArgs;
pub use find::FindArgs;
pub use info::InfoArgs;
pub use pad::PadArgs;
pub use patch::PatchArgs;
