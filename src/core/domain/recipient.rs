//! Recipient list files.
//!
//! A recipient list holds one identifier per line. Blank lines and `#`
//! comments are ignored when parsing; writing always produces the canonical
//! sorted, deduplicated form with a trailing newline.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

/// Parsed, canonical set of recipient identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    ids: BTreeSet<String>,
}

impl Recipients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the contents of a recipient list file.
    ///
    /// Never fails: unreadable lines are dropped, everything else is kept
    /// verbatim after trimming.
    pub fn parse(buf: &[u8]) -> Self {
        let text = String::from_utf8_lossy(buf);
        let mut ids = BTreeSet::new();
        for line in text.split('\n') {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = match line.find(" #") {
                Some(i) => line[..i].trim_end(),
                None => line,
            };
            if !line.is_empty() {
                ids.insert(line.to_string());
            }
        }
        Self { ids }
    }

    /// Build from identifiers, trimming and dropping empties.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Canonical file contents.
    pub fn serialize(&self) -> Vec<u8> {
        if self.ids.is_empty() {
            return b"\n".to_vec();
        }
        let mut out = String::new();
        for id in &self.ids {
            out.push_str(id);
            out.push('\n');
        }
        out.into_bytes()
    }

    /// SHA-256 of the canonical form, hex encoded.
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.serialize()))
    }

    /// Insert an identifier; returns `false` if it was already present.
    pub fn add(&mut self, id: impl AsRef<str>) -> bool {
        let id = id.as_ref().trim();
        !id.is_empty() && self.ids.insert(id.to_string())
    }

    /// Remove an identifier; returns `false` if it was absent.
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id.trim())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    /// Identifiers in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }
}

impl FromIterator<String> for Recipients {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self::from_ids(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_comments_and_blanks() {
        let buf = b"# team\r\nBBBB\n\nAAAA # alice\n  CCCC  \n#DDDD\nAAAA\n";
        let r = Recipients::parse(buf);
        assert_eq!(r.ids(), vec!["AAAA", "BBBB", "CCCC"]);
    }

    #[test]
    fn test_serialize_canonical() {
        let r = Recipients::from_ids(["b", "a", "b", " c "]);
        assert_eq!(r.serialize(), b"a\nb\nc\n");
    }

    #[test]
    fn test_empty_serializes_to_newline() {
        assert_eq!(Recipients::new().serialize(), b"\n");
        assert!(Recipients::parse(b"\n").is_empty());
    }

    #[test]
    fn test_hash_is_stable_across_order() {
        let a = Recipients::from_ids(["x", "y"]);
        let b = Recipients::parse(b"y\nx\n# comment\n");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_add_remove() {
        let mut r = Recipients::new();
        assert!(r.add("X"));
        assert!(!r.add("X"));
        assert!(!r.add("  "));
        assert!(r.remove("X"));
        assert!(!r.remove("X"));
    }

    proptest! {
        #[test]
        fn prop_parse_serialize_is_canonical(ids in proptest::collection::vec("[A-F0-9]{4,40}", 0..10)) {
            let canonical = Recipients::from_ids(&ids).serialize();
            let reparsed = Recipients::parse(&canonical);
            prop_assert_eq!(reparsed.serialize(), canonical);
        }

        #[test]
        fn prop_serialize_is_sorted_and_unique(text in "[a-z0-9# \n]{0,200}") {
            let out = Recipients::parse(text.as_bytes()).serialize();
            let s = String::from_utf8(out).unwrap();
            let lines: Vec<&str> = s.lines().filter(|l| !l.is_empty()).collect();
            let mut sorted = lines.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(lines, sorted);
        }
    }
}
