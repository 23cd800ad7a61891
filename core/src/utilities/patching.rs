/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use log::debug;

use crate::error::{Error, Result};

/// A single position of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteMatcher {
    Exact(u8),
    Wildcard,
}

impl ByteMatcher {
    pub fn matches(&self, byte: u8) -> bool {
        match self {
            ByteMatcher::Exact(b) => *b == byte,
            ByteMatcher::Wildcard => true,
        }
    }
}

impl From<u8> for ByteMatcher {
    fn from(byte: u8) -> Self {
        ByteMatcher::Exact(byte)
    }
}

impl From<Option<u8>> for ByteMatcher {
    fn from(byte: Option<u8>) -> Self {
        byte.map_or(ByteMatcher::Wildcard, ByteMatcher::Exact)
    }
}

fn parse_hex(input: &str) -> Result<Vec<Option<u8>>> {
    let filtered: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '-' && *c != ':')
        .collect();

    if filtered.len() % 2 != 0 {
        return Err(Error::InvalidPattern(format!(
            "'{}' has an odd number of hex digits",
            input
        )));
    }

    (0..filtered.len())
        .step_by(2)
        .map(|i| {
            let pair = filtered.get(i..i + 2).ok_or_else(|| {
                Error::InvalidPattern(format!("'{}' contains non-ASCII characters", input))
            })?;
            if pair.eq_ignore_ascii_case("XX") || pair == "??" {
                Ok(None)
            } else {
                u8::from_str_radix(pair, 16)
                    .map(Some)
                    .map_err(|_| Error::InvalidPattern(format!("invalid hex byte '{}'", pair)))
            }
        })
        .collect()
}

/// Wildcard-tolerant byte signature. Never empty, never modified after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    matchers: Box<[ByteMatcher]>,
}

impl Pattern {
    pub fn build<I, M>(matchers: I) -> Result<Self>
    where
        I: IntoIterator<Item = M>,
        M: Into<ByteMatcher>,
    {
        let matchers: Box<[ByteMatcher]> = matchers.into_iter().map(Into::into).collect();
        if matchers.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }
        Ok(Pattern { matchers })
    }

    /// Parses a pattern such as `"7F63DB78 48XXXXXX"`.
    /// Separators (whitespace, `,`, `-`, `:`) are ignored, `XX` or `??` is a wildcard.
    pub fn parse(input: &str) -> Result<Self> {
        Self::build(parse_hex(input)?)
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn matchers(&self) -> &[ByteMatcher] {
        &self.matchers
    }

    fn matches_window(&self, window: &[u8]) -> bool {
        self.matchers.iter().zip(window).all(|(m, &b)| m.matches(b))
    }

    /// Checks whether the pattern matches `data` at exactly `offset`.
    pub fn matches_at(&self, data: &[u8], offset: usize) -> bool {
        match offset.checked_add(self.len()) {
            Some(end) if end <= data.len() => self.matches_window(&data[offset..end]),
            _ => false,
        }
    }

    pub fn find(&self, data: &[u8], start: usize) -> Option<usize> {
        find(data, self, start)
    }

    pub fn find_all<'a>(&'a self, data: &'a [u8], start: usize) -> FindAll<'a> {
        find_all(data, self, start)
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                f.write_str(" ")?;
            }
            match m {
                ByteMatcher::Exact(b) => write!(f, "{:02X}", b)?,
                ByteMatcher::Wildcard => f.write_str("XX")?,
            }
        }
        Ok(())
    }
}

/// Returns the lowest offset `>= start` where `pattern` matches.
pub fn find(data: &[u8], pattern: &Pattern, start: usize) -> Option<usize> {
    let len = pattern.len();
    if start > data.len() || data.len() - start < len {
        return None;
    }

    data[start..].windows(len).position(|window| pattern.matches_window(window)).map(|p| p + start)
}

/// Iterates over every non-overlapping match of `pattern`, in ascending order.
pub fn find_all<'a>(data: &'a [u8], pattern: &'a Pattern, start: usize) -> FindAll<'a> {
    FindAll { data, pattern, next: start }
}

#[derive(Debug, Clone)]
pub struct FindAll<'a> {
    data: &'a [u8],
    pattern: &'a Pattern,
    next: usize,
}

impl Iterator for FindAll<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let found = find(self.data, self.pattern, self.next)?;
        self.next = found + self.pattern.len();
        Some(found)
    }
}

/// Outcome of looking up one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Found(usize),
    Missing,
}

impl MatchResult {
    pub fn offset(self) -> Option<usize> {
        match self {
            MatchResult::Found(off) => Some(off),
            MatchResult::Missing => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, MatchResult::Found(_))
    }
}

impl From<Option<usize>> for MatchResult {
    fn from(value: Option<usize>) -> Self {
        value.map_or(MatchResult::Missing, MatchResult::Found)
    }
}

#[derive(Debug, Clone)]
struct Signature {
    pattern: Pattern,
    start: usize,
}

/// Named signatures searched together by [`bulk_find`].
/// Names are unique and keep their insertion order.
#[derive(Debug, Clone, Default)]
pub struct SignatureSet {
    entries: IndexMap<String, Signature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from a `(name, hex pattern)` table.
    pub fn from_table(table: &[(&str, &str)]) -> Result<Self> {
        let mut set = SignatureSet::new();
        for (name, hex) in table {
            let pattern = Pattern::parse(hex).map_err(|e| match e {
                Error::InvalidPattern(msg) => Error::InvalidPattern(format!("{}: {}", name, msg)),
                other => other,
            })?;
            set.insert(*name, pattern)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: impl Into<String>, pattern: Pattern) -> Result<()> {
        self.insert_from(name, pattern, 0)
    }

    /// Same as [`SignatureSet::insert`], but the search for this entry begins at `start`.
    pub fn insert_from(
        &mut self,
        name: impl Into<String>,
        pattern: Pattern,
        start: usize,
    ) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(Error::InvalidPattern(format!("duplicate signature name '{}'", name)));
        }
        self.entries.insert(name, Signature { pattern, start });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Pattern> {
        self.entries.get(name).map(|s| &s.pattern)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a [`bulk_find`] call, one entry per requested signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkMatches {
    results: IndexMap<String, MatchResult>,
}

impl BulkMatches {
    pub fn get(&self, name: &str) -> Option<MatchResult> {
        self.results.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MatchResult)> {
        self.results.iter().map(|(name, res)| (name.as_str(), *res))
    }

    pub fn missing(&self) -> Vec<&str> {
        self.iter().filter(|(_, res)| !res.is_found()).map(|(name, _)| name).collect()
    }

    pub fn all_resolved(&self) -> bool {
        self.results.values().all(|res| res.is_found())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Every signature is required. Fails with the full list of missing names.
    pub fn resolve(self) -> Result<ResolvedSignatures> {
        self.resolve_with_optional(&[])
    }

    /// Like [`BulkMatches::resolve`], but the names in `optional` may be absent.
    /// Those are only reachable through [`ResolvedSignatures::optional`].
    pub fn resolve_with_optional(self, optional: &[&str]) -> Result<ResolvedSignatures> {
        let mut resolved = ResolvedSignatures::default();
        let mut missing = Vec::new();

        for (name, res) in self.results {
            if optional.contains(&name.as_str()) {
                resolved.optional.insert(name, res.offset());
                continue;
            }
            match res {
                MatchResult::Found(off) => {
                    resolved.required.insert(name, off);
                }
                MatchResult::Missing => missing.push(name),
            }
        }

        if !missing.is_empty() {
            return Err(Error::PatternNotFound { names: missing });
        }
        Ok(resolved)
    }
}

/// Runs [`find`] independently for every entry of `set`.
pub fn bulk_find(set: &SignatureSet, data: &[u8]) -> BulkMatches {
    let results = set
        .entries
        .iter()
        .map(|(name, sig)| {
            let res = MatchResult::from(find(data, &sig.pattern, sig.start));
            debug!("bulk_find: {} -> {:?}", name, res);
            (name.clone(), res)
        })
        .collect();

    BulkMatches { results }
}

pub fn all_resolved(results: &BulkMatches) -> bool {
    results.all_resolved()
}

/// A signature set in which every required landmark was found.
/// Can only be obtained through [`BulkMatches::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedSignatures {
    required: IndexMap<String, usize>,
    optional: IndexMap<String, Option<usize>>,
}

impl ResolvedSignatures {
    pub fn get(&self, name: &str) -> Result<usize> {
        self.required.get(name).copied().ok_or_else(|| Error::UnknownSignature(name.to_string()))
    }

    pub fn optional(&self, name: &str) -> Result<Option<usize>> {
        self.optional.get(name).copied().ok_or_else(|| Error::UnknownSignature(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<usize>)> {
        self.required
            .iter()
            .map(|(n, off)| (n.as_str(), Some(*off)))
            .chain(self.optional.iter().map(|(n, off)| (n.as_str(), *off)))
    }
}

pub(crate) fn ensure_in_bounds(data: &[u8], at: usize, len: usize) -> Result<()> {
    match at.checked_add(len) {
        Some(end) if end <= data.len() => Ok(()),
        _ => Err(Error::ImageOverrun { at, len, size: data.len() }),
    }
}

/// Applies a patch to the data at the specified offset.
/// The patch string can contain wildcards ('XX') which leave the corresponding byte unchanged.
pub fn patch(data: &mut [u8], offset: usize, patch_str: &str) -> Result<()> {
    let patch = parse_hex(patch_str)?;
    ensure_in_bounds(data, offset, patch.len())?;

    for (i, byte) in patch.into_iter().enumerate() {
        if let Some(b) = byte {
            data[offset + i] = b;
        }
    }

    Ok(())
}

pub fn patch_bytes(data: &mut [u8], offset: usize, bytes: &[u8]) -> Result<()> {
    ensure_in_bounds(data, offset, bytes.len())?;
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn random_buffer(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::rng().fill(&mut buf[..]);
        buf
    }

    #[test]
    fn test_parse_pattern() {
        let pattern = Pattern::parse("7F63DB78, 48xx:XX-??").unwrap();
        assert_eq!(pattern.len(), 8);
        assert_eq!(pattern.matchers()[0], ByteMatcher::Exact(0x7F));
        assert_eq!(pattern.matchers()[4], ByteMatcher::Exact(0x48));
        assert!(pattern.matchers()[5..].iter().all(|m| *m == ByteMatcher::Wildcard));
        assert_eq!(pattern.to_string(), "7F63DB78 48XXXXXX");
    }

    #[test]
    fn test_parse_pattern_rejects_garbage() {
        assert!(matches!(Pattern::parse("ABC"), Err(Error::InvalidPattern(_))));
        assert!(matches!(Pattern::parse("GG"), Err(Error::InvalidPattern(_))));
        assert!(matches!(Pattern::parse(""), Err(Error::InvalidPattern(_))));
        assert!(matches!(Pattern::parse(" , "), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_build_empty_pattern_fails() {
        let empty: Vec<ByteMatcher> = Vec::new();
        assert!(matches!(Pattern::build(empty), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_find_inserted_pattern_in_random_buffer() {
        let needle: Vec<u8> = (0u8..16).map(|i| i.wrapping_mul(37).wrapping_add(11)).collect();
        let pattern = Pattern::build(needle.iter().copied()).unwrap();

        for &at in &[0usize, 1, 0x123, 0x1000 - 16] {
            let mut buf = random_buffer(0x1000);
            buf[at..at + 16].copy_from_slice(&needle);
            assert_eq!(find(&buf, &pattern, 0), Some(at));
        }
    }

    #[test]
    fn test_find_returns_smallest_offset() {
        let data = [0u8, 1, 2, 1, 2, 1, 2];
        let pattern = Pattern::build([1u8, 2]).unwrap();
        assert_eq!(find(&data, &pattern, 0), Some(1));
        assert_eq!(find(&data, &pattern, 2), Some(3));
        assert_eq!(find(&data, &pattern, 6), None);
    }

    #[test]
    fn test_find_never_reads_past_end() {
        let data = [0xAAu8, 0xBB, 0xCC];
        let pattern = Pattern::parse("BBCCDD").unwrap();
        assert_eq!(find(&data, &pattern, 0), None);
        assert_eq!(find(&data, &pattern, 10), None);

        let tail = Pattern::parse("BBCC").unwrap();
        assert_eq!(find(&data, &tail, 0), Some(1));
        assert_eq!(find(&data, &tail, 3), None);
    }

    #[test]
    fn test_wildcards_match_any_byte() {
        let pattern = Pattern::parse("2F030000 XX9A0014 388000AD").unwrap();
        let mut data = vec![0u8; 64];
        data[20..32].copy_from_slice(&[
            0x2F, 0x03, 0x00, 0x00, 0x41, 0x9A, 0x00, 0x14, 0x38, 0x80, 0x00, 0xAD,
        ]);
        assert_eq!(find(&data, &pattern, 0), Some(20));

        data[24] = 0x40;
        assert_eq!(find(&data, &pattern, 0), Some(20));

        data[25] = 0x9B;
        assert_eq!(find(&data, &pattern, 0), None);
    }

    #[test]
    fn test_find_all_does_not_overlap() {
        let data = [0xAAu8; 9];
        let pattern = Pattern::parse("AAAA").unwrap();
        let hits: Vec<usize> = find_all(&data, &pattern, 0).collect();
        assert_eq!(hits, vec![0, 2, 4, 6]);

        for pair in hits.windows(2) {
            assert!(pair[1] >= pair[0] + pattern.len());
        }
    }

    #[test]
    fn test_find_all_is_restartable() {
        let mut data = random_buffer(0x400);
        let pattern = Pattern::parse("DEADBEEF XX CAFE").unwrap();
        for at in [0x10usize, 0x80, 0x200] {
            data[at..at + 7].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0xCA, 0xFE]);
        }

        let iter = find_all(&data, &pattern, 0);
        let first: Vec<usize> = iter.clone().collect();
        let second: Vec<usize> = iter.collect();
        assert_eq!(first, vec![0x10, 0x80, 0x200]);
        assert_eq!(first, second);
        assert_eq!(pattern.find_all(&data, 0x81).collect::<Vec<_>>(), vec![0x200]);
    }

    #[test]
    fn test_bulk_find_with_one_absent_pattern() {
        let data = b"....hello....world....".to_vec();
        let mut set = SignatureSet::new();
        set.insert("hello", Pattern::build(*b"hello").unwrap()).unwrap();
        set.insert("world", Pattern::build(*b"world").unwrap()).unwrap();
        set.insert("absent", Pattern::build(*b"nothere").unwrap()).unwrap();

        let results = bulk_find(&set, &data);
        assert_eq!(results.len(), 3);
        assert_eq!(results.get("hello"), Some(MatchResult::Found(4)));
        assert_eq!(results.get("world"), Some(MatchResult::Found(13)));
        assert_eq!(results.get("absent"), Some(MatchResult::Missing));
        assert!(!all_resolved(&results));
        assert_eq!(results.missing(), vec!["absent"]);

        match results.resolve() {
            Err(Error::PatternNotFound { names }) => assert_eq!(names, vec!["absent"]),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_bulk_find_all_present() {
        let data = b"....hello....world....".to_vec();
        let set = SignatureSet::from_table(&[("hello", "68656C6C6F"), ("world", "776FXX6C64")])
            .unwrap();

        let results = bulk_find(&set, &data);
        assert!(all_resolved(&results));

        let resolved = results.resolve().unwrap();
        assert_eq!(resolved.get("hello").unwrap(), 4);
        assert_eq!(resolved.get("world").unwrap(), 13);
        assert!(matches!(resolved.get("nope"), Err(Error::UnknownSignature(_))));
    }

    #[test]
    fn test_bulk_find_honours_start_offset() {
        let data = b"abcXabcX".to_vec();
        let mut set = SignatureSet::new();
        set.insert("first", Pattern::build(*b"abc").unwrap()).unwrap();
        set.insert_from("second", Pattern::build(*b"abc").unwrap(), 1).unwrap();

        let resolved = bulk_find(&set, &data).resolve().unwrap();
        assert_eq!(resolved.get("first").unwrap(), 0);
        assert_eq!(resolved.get("second").unwrap(), 4);
    }

    #[test]
    fn test_resolve_with_optional() {
        let data = b"....hello....".to_vec();
        let set = SignatureSet::from_table(&[("hello", "68656C6C6F"), ("maybe", "00112233")])
            .unwrap();

        let resolved = bulk_find(&set, &data).resolve_with_optional(&["maybe"]).unwrap();
        assert_eq!(resolved.get("hello").unwrap(), 4);
        assert_eq!(resolved.optional("maybe").unwrap(), None);
        assert!(resolved.get("maybe").is_err());
    }

    #[test]
    fn test_duplicate_signature_names_are_rejected() {
        let result = SignatureSet::from_table(&[("a", "00"), ("a", "01")]);
        assert!(matches!(result, Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_patch_keeps_wildcard_bytes() {
        let mut data = vec![0x11u8; 8];
        patch(&mut data, 2, "AA XX BB").unwrap();
        assert_eq!(data, vec![0x11, 0x11, 0xAA, 0x11, 0xBB, 0x11, 0x11, 0x11]);

        let before = data.clone();
        assert!(matches!(patch(&mut data, 6, "AABBCC"), Err(Error::ImageOverrun { .. })));
        assert_eq!(data, before);
    }
}
