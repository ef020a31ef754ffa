//! Canonical framed encoding
//!
//! Every field is written as `<tag-len><tag><byte-len><bytes>` with both
//! lengths as little-endian `u64`. Containers write a header carrying their
//! element count, followed by self-framed elements. No field relies on a
//! separator, so two distinct operand tuples can never produce the same
//! byte stream.

use super::{Fingerprint, HashAlgorithm};
use sha2::digest::DynDigest;

/// Streaming encoder feeding a hasher
pub struct Encoder {
    hasher: Box<dyn DynDigest>,
}

impl Encoder {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            hasher: algo.hasher(),
        }
    }

    /// Write one tagged, length-prefixed field
    pub fn field(&mut self, tag: &str, bytes: &[u8]) {
        self.frame(tag.as_bytes());
        self.frame(bytes);
    }

    /// Write a container header; `count` framed entries must follow
    pub fn header(&mut self, tag: &str, count: usize) {
        self.frame(tag.as_bytes());
        self.hasher.update(&(count as u64).to_le_bytes());
    }

    /// Write an already computed fingerprint as a field
    pub fn fingerprint(&mut self, fp: &Fingerprint) {
        self.field("fp", fp.as_bytes());
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint::from_bytes(self.hasher.finalize())
    }

    fn frame(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(build: impl FnOnce(&mut Encoder)) -> Fingerprint {
        let mut enc = Encoder::new(HashAlgorithm::Sha256);
        build(&mut enc);
        enc.finish()
    }

    #[test]
    fn field_boundaries_matter() {
        let a = digest(|e| {
            e.field("str", b"ab");
            e.field("str", b"c");
        });
        let b = digest(|e| {
            e.field("str", b"a");
            e.field("str", b"bc");
        });
        assert_ne!(a, b);
    }

    #[test]
    fn tag_is_part_of_the_frame() {
        let a = digest(|e| e.field("int", b"1"));
        let b = digest(|e| e.field("str", b"1"));
        assert_ne!(a, b);
    }

    #[test]
    fn header_count_matters() {
        let a = digest(|e| {
            e.header("list", 2);
            e.field("int", b"1");
            e.field("int", b"2");
        });
        let b = digest(|e| {
            e.header("list", 1);
            e.field("int", b"1");
            e.field("int", b"2");
        });
        assert_ne!(a, b);
    }
}
