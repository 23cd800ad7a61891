/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
mod macros;

pub mod cb;
pub mod error;
pub mod patchlist;
pub mod utilities;

pub use cb::{Dialect, PatchOutcome, PatchParams, detect_dialect, patch_cb};
pub use error::{Error, Result};
pub use patchlist::PatchList;
pub use utilities::freespace::FreeSpaceArea;
pub use utilities::patching::{Pattern, SignatureSet, bulk_find};
