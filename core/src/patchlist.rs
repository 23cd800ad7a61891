/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
//! xeBuild patch lists.
//!
//! A list is a sequence of big-endian `(offset, word_count, words...)` runs
//! terminated by `0xFFFFFFFF`. Anything after the terminator (usually a
//! template) is left alone.
use log::debug;

use crate::be_u32;
use crate::error::{Error, Result};

pub const TERMINATOR: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRun {
    pub offset: u32,
    pub words: Vec<u32>,
}

impl PatchRun {
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    fn bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchList {
    runs: Vec<PatchRun>,
}

fn take_u32(data: &[u8], pos: &mut usize, what: &str) -> Result<u32> {
    if data.len() < *pos + 4 {
        return Err(Error::patch_list(format!("truncated while reading {} at 0x{:X}", what, pos)));
    }
    let value = be_u32!(data, *pos);
    *pos += 4;
    Ok(value)
}

impl PatchList {
    /// Compares both images one word at a time, each run of changed words becomes a patch.
    pub fn diff(original: &[u8], patched: &[u8]) -> Result<Self> {
        if original.len() != patched.len() {
            return Err(Error::patch_list(format!(
                "images differ in length (0x{:X} vs 0x{:X})",
                original.len(),
                patched.len()
            )));
        }
        if original.len() % 4 != 0 {
            return Err(Error::patch_list("image length is not a multiple of 4"));
        }

        let mut runs: Vec<PatchRun> = Vec::new();
        let mut current: Option<PatchRun> = None;

        for (i, (a, b)) in original.chunks_exact(4).zip(patched.chunks_exact(4)).enumerate() {
            let pos = i * 4;
            if a == b {
                if let Some(run) = current.take() {
                    debug!("diff end 0x{:08X}", pos);
                    runs.push(run);
                }
                continue;
            }

            if current.is_none() {
                debug!("diff start 0x{:08X}", pos);
                let offset = u32::try_from(pos)
                    .map_err(|_| Error::patch_list("image too large for a patch list"))?;
                current = Some(PatchRun { offset, words: Vec::new() });
            }
            if let Some(run) = current.as_mut() {
                run.words.push(be_u32!(b, 0));
            }
        }
        runs.extend(current);

        Ok(PatchList { runs })
    }

    /// Parses a patch list, returns it along with whatever follows the terminator.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut runs = Vec::new();
        let mut pos = 0;

        loop {
            let offset = take_u32(data, &mut pos, "patch offset")?;
            if offset == TERMINATOR {
                return Ok((PatchList { runs }, &data[pos..]));
            }

            let count = take_u32(data, &mut pos, "word count")? as usize;
            if (data.len() - pos) / 4 < count {
                return Err(Error::patch_list(format!(
                    "patch at 0x{:08X} claims 0x{:X} words but only 0x{:X} bytes are left",
                    offset,
                    count,
                    data.len() - pos
                )));
            }

            let words = (0..count).map(|i| be_u32!(data, pos + i * 4)).collect();
            pos += count * 4;
            runs.push(PatchRun { offset, words });
        }
    }

    pub fn runs(&self) -> &[PatchRun] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Total number of patched bytes.
    pub fn patched_bytes(&self) -> usize {
        self.runs.iter().map(PatchRun::byte_len).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.patched_bytes() + self.runs.len() * 8 + 4);
        for run in &self.runs {
            out.extend_from_slice(&run.offset.to_be_bytes());
            out.extend_from_slice(&(run.words.len() as u32).to_be_bytes());
            out.extend(run.bytes());
        }
        out.extend_from_slice(&TERMINATOR.to_be_bytes());
        out
    }

    pub fn to_bytes_with_template(&self, template: &[u8]) -> Vec<u8> {
        let mut out = self.to_bytes();
        out.extend_from_slice(template);
        out
    }

    /// Applies every run to a copy of `image`. Fails before writing anything if a run doesn't fit.
    pub fn apply(&self, image: &[u8]) -> Result<Vec<u8>> {
        for run in &self.runs {
            let end = run.offset as usize + run.byte_len();
            if end > image.len() {
                return Err(Error::ImageOverrun {
                    at: run.offset as usize,
                    len: run.byte_len(),
                    size: image.len(),
                });
            }
        }

        let mut out = image.to_vec();
        for run in &self.runs {
            let at = run.offset as usize;
            let bytes = run.bytes();
            debug!(
                "at 0x{:08X} changed {} to {}",
                at,
                hex::encode(&out[at..at + bytes.len()]),
                hex::encode(&bytes)
            );
            out[at..at + bytes.len()].copy_from_slice(&bytes);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_of_identical_images_is_empty() {
        let image = vec![0x5Au8; 0x40];
        let list = PatchList::diff(&image, &image).unwrap();
        assert!(list.is_empty());
        assert_eq!(list.to_bytes(), vec![0xFF; 4]);
    }

    #[test]
    fn test_diff_groups_adjacent_words() {
        let original = vec![0u8; 0x20];
        let mut patched = original.clone();
        patched[0x4..0xC].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        patched[0x13] = 0xAA;
        patched[0x1C] = 0xBB;

        let list = PatchList::diff(&original, &patched).unwrap();
        assert_eq!(
            list.runs(),
            &[
                PatchRun { offset: 0x4, words: vec![0x0102_0304, 0x0506_0708] },
                PatchRun { offset: 0x10, words: vec![0x0000_00AA] },
                PatchRun { offset: 0x1C, words: vec![0xBB00_0000] },
            ]
        );
        assert_eq!(list.patched_bytes(), 0x10);

        let bytes = list.to_bytes();
        assert_eq!(&bytes[..8], &[0, 0, 0, 4, 0, 0, 0, 2]);
        assert_eq!(&bytes[bytes.len() - 4..], &[0xFF; 4]);
        assert_eq!(list.apply(&original).unwrap(), patched);
    }

    #[test]
    fn test_diff_rejects_mismatched_images() {
        assert!(matches!(PatchList::diff(&[0; 8], &[0; 12]), Err(Error::PatchList(_))));
        assert!(matches!(PatchList::diff(&[0; 6], &[0; 6]), Err(Error::PatchList(_))));
    }

    #[test]
    fn test_parse_keeps_template() {
        let list = PatchList { runs: vec![PatchRun { offset: 0x100, words: vec![0x6000_0000] }] };
        let bytes = list.to_bytes_with_template(b"template");

        let (parsed, rest) = PatchList::parse(&bytes).unwrap();
        assert_eq!(parsed, list);
        assert_eq!(rest, b"template");
    }

    #[test]
    fn test_parse_rejects_truncated_lists() {
        assert!(matches!(PatchList::parse(&[]), Err(Error::PatchList(_))));
        assert!(matches!(PatchList::parse(&[0, 0, 1, 0, 0, 0]), Err(Error::PatchList(_))));
        assert!(matches!(
            PatchList::parse(&[0, 0, 1, 0, 0, 0, 0, 2, 0x60, 0, 0, 0]),
            Err(Error::PatchList(_))
        ));
        // no terminator
        assert!(matches!(
            PatchList::parse(&[0, 0, 1, 0, 0, 0, 0, 1, 0x60, 0, 0, 0]),
            Err(Error::PatchList(_))
        ));
    }

    #[test]
    fn test_apply_out_of_range_writes_nothing() {
        let list = PatchList {
            runs: vec![
                PatchRun { offset: 0x0, words: vec![0x1111_1111] },
                PatchRun { offset: 0x1C, words: vec![0x2222_2222, 0x3333_3333] },
            ],
        };
        let image = vec![0u8; 0x20];
        assert!(matches!(list.apply(&image), Err(Error::ImageOverrun { at: 0x1C, .. })));
    }
}
