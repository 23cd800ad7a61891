/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use indexmap::IndexMap;
use log::info;

use crate::error::{Error, Result};
use crate::utilities::ppc::write_words;

/// A reclaimed range of dead code that new functions get appended to.
///
/// The head only moves forward, so two functions claimed from the same area
/// can never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceArea {
    start: usize,
    end: usize,
    head: usize,
    functions: IndexMap<String, usize>,
}

impl FreeSpaceArea {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if end < start || start & 3 != 0 || end & 3 != 0 {
            return Err(Error::InvalidRange { start, end });
        }

        Ok(FreeSpaceArea { start, end, head: start, functions: IndexMap::new() })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn remaining(&self) -> usize {
        self.end - self.head
    }

    /// Claimed functions and their entry points, in claim order.
    pub fn functions(&self) -> impl Iterator<Item = (&str, usize)> {
        self.functions.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    /// Names the code at the current head `name` and moves the head to `new_head`.
    pub fn claim_function(&mut self, name: &str, new_head: usize) -> Result<usize> {
        if self.functions.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        if new_head & 3 != 0 {
            return Err(Error::MisalignedAddress(new_head));
        }
        if new_head > self.end {
            return Err(Error::OutOfBounds { requested: new_head, end: self.end });
        }
        if new_head < self.head {
            return Err(Error::HeadRegression { head: self.head, requested: new_head });
        }

        let address = self.head;
        self.functions.insert(name.to_string(), address);
        self.head = new_head;
        info!("Claimed {} at 0x{:04X} ~ 0x{:04X}", name, address, new_head);

        Ok(address)
    }

    pub fn function_address(&self, name: &str) -> Result<usize> {
        self.functions.get(name).copied().ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    /// Assembles a block at the current head and claims it as `name`.
    ///
    /// `build` receives the address the block will live at. Nothing is written
    /// and nothing is claimed unless the whole block fits.
    pub fn emit<F>(&mut self, data: &mut [u8], name: &str, build: F) -> Result<usize>
    where
        F: FnOnce(usize) -> Result<Vec<u32>>,
    {
        if self.functions.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let address = self.head;
        let words = build(address)?;
        let new_head = address + words.len() * 4;
        if new_head > self.end {
            return Err(Error::OutOfBounds { requested: new_head, end: self.end });
        }

        write_words(data, address, &words)?;
        self.claim_function(name, new_head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utilities::ppc::{BLR, NOP, read_word};

    #[test]
    fn test_allocator_scenario() {
        let mut fs = FreeSpaceArea::new(0x100, 0x200).unwrap();
        assert_eq!(fs.head(), 0x100);

        fs.claim_function("a", 0x120).unwrap();
        assert_eq!(fs.function_address("a").unwrap(), 0x100);
        assert_eq!(fs.head(), 0x120);

        fs.claim_function("b", 0x1F0).unwrap();
        assert_eq!(fs.function_address("b").unwrap(), 0x120);

        let before = fs.clone();
        assert!(matches!(
            fs.claim_function("c", 0x210),
            Err(Error::OutOfBounds { requested: 0x210, end: 0x200 })
        ));
        assert_eq!(fs, before);

        assert!(matches!(fs.claim_function("a", 0x1F8), Err(Error::DuplicateName(_))));
        assert_eq!(fs, before);

        assert!(matches!(fs.function_address("zzz"), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn test_head_never_moves_back() {
        let mut fs = FreeSpaceArea::new(0x100, 0x200).unwrap();
        fs.claim_function("a", 0x140).unwrap();
        assert!(matches!(
            fs.claim_function("b", 0x120),
            Err(Error::HeadRegression { head: 0x140, requested: 0x120 })
        ));
        assert_eq!(fs.head(), 0x140);
        assert!(fs.function_address("b").is_err());
    }

    #[test]
    fn test_head_stays_word_aligned() {
        let mut fs = FreeSpaceArea::new(0x100, 0x200).unwrap();
        fs.claim_function("a", 0x108).unwrap();

        let before = fs.clone();
        assert!(matches!(fs.claim_function("b", 0x10A), Err(Error::MisalignedAddress(0x10A))));
        assert_eq!(fs, before);
        assert!(fs.function_address("b").is_err());
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(FreeSpaceArea::new(0x200, 0x100), Err(Error::InvalidRange { .. })));
        assert!(matches!(FreeSpaceArea::new(0x102, 0x200), Err(Error::InvalidRange { .. })));
        assert!(matches!(FreeSpaceArea::new(0x100, 0x1FE), Err(Error::InvalidRange { .. })));

        let empty = FreeSpaceArea::new(0x100, 0x100).unwrap();
        assert_eq!(empty.remaining(), 0);
    }

    #[test]
    fn test_claimed_functions_never_overlap() {
        let mut fs = FreeSpaceArea::new(0x0, 0x100).unwrap();
        for (i, size) in [0x8usize, 0x10, 0x4, 0x0, 0x20].into_iter().enumerate() {
            let head = fs.head();
            fs.claim_function(&format!("f{}", i), head + size).unwrap();
        }

        let addrs: Vec<usize> = fs.functions().map(|(_, addr)| addr).collect();
        assert_eq!(addrs, vec![0x0, 0x8, 0x18, 0x1C, 0x1C]);
        assert!(addrs.iter().all(|a| *a <= fs.end()));
        assert_eq!(fs.remaining(), 0x100 - 0x3C);
    }

    #[test]
    fn test_emit_writes_and_claims() {
        let mut data = vec![0u8; 0x40];
        let mut fs = FreeSpaceArea::new(0x10, 0x20).unwrap();

        let addr = fs.emit(&mut data, "ret", |_| Ok(vec![NOP, BLR])).unwrap();
        assert_eq!(addr, 0x10);
        assert_eq!(fs.head(), 0x18);
        assert_eq!(read_word(&data, 0x10).unwrap(), NOP);
        assert_eq!(read_word(&data, 0x14).unwrap(), BLR);

        let before = data.clone();
        let result = fs.emit(&mut data, "big", |_| Ok(vec![NOP; 3]));
        assert!(matches!(result, Err(Error::OutOfBounds { requested: 0x24, end: 0x20 })));
        assert_eq!(data, before);
        assert_eq!(fs.head(), 0x18);

        let result = fs.emit(&mut data, "ret", |_| Ok(vec![NOP]));
        assert!(matches!(result, Err(Error::DuplicateName(_))));
        assert_eq!(data, before);
    }
}
