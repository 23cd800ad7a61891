/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

// Everything on the CB side is big-endian.
// Callers are expected to bounds check before using these.

#[macro_export]
macro_rules! be_u16 {
    ($data:expr, $offset:expr) => {
        u16::from_be_bytes([$data[$offset], $data[$offset + 1]])
    };
}

#[macro_export]
macro_rules! be_u32 {
    ($data:expr, $offset:expr) => {
        u32::from_be_bytes([
            $data[$offset],
            $data[$offset + 1],
            $data[$offset + 2],
            $data[$offset + 3],
        ])
    };
}
