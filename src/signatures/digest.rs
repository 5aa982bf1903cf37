//! Incremental message digests over the covered byte ranges.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use super::types::HashAlgorithm;

/// Running digest computation for one of the supported algorithms.
#[derive(Clone)]
pub enum DigestContext {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl DigestContext {
    /// Start a digest; `None` for algorithms that cannot be computed.
    pub fn new(algorithm: HashAlgorithm) -> Option<Self> {
        match algorithm {
            HashAlgorithm::Md5 => Some(DigestContext::Md5(Md5::new())),
            HashAlgorithm::Sha1 => Some(DigestContext::Sha1(Sha1::new())),
            HashAlgorithm::Sha224 => Some(DigestContext::Sha224(Sha224::new())),
            HashAlgorithm::Sha256 => Some(DigestContext::Sha256(Sha256::new())),
            HashAlgorithm::Sha384 => Some(DigestContext::Sha384(Sha384::new())),
            HashAlgorithm::Sha512 => Some(DigestContext::Sha512(Sha512::new())),
            HashAlgorithm::Unknown | HashAlgorithm::Md2 => None,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            DigestContext::Md5(_) => HashAlgorithm::Md5,
            DigestContext::Sha1(_) => HashAlgorithm::Sha1,
            DigestContext::Sha224(_) => HashAlgorithm::Sha224,
            DigestContext::Sha256(_) => HashAlgorithm::Sha256,
            DigestContext::Sha384(_) => HashAlgorithm::Sha384,
            DigestContext::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            DigestContext::Md5(h) => h.update(data),
            DigestContext::Sha1(h) => h.update(data),
            DigestContext::Sha224(h) => h.update(data),
            DigestContext::Sha256(h) => h.update(data),
            DigestContext::Sha384(h) => h.update(data),
            DigestContext::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            DigestContext::Md5(h) => h.finalize().to_vec(),
            DigestContext::Sha1(h) => h.finalize().to_vec(),
            DigestContext::Sha224(h) => h.finalize().to_vec(),
            DigestContext::Sha256(h) => h.finalize().to_vec(),
            DigestContext::Sha384(h) => h.finalize().to_vec(),
            DigestContext::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// One-shot digest of `data`.
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Option<Vec<u8>> {
    let mut ctx = DigestContext::new(algorithm)?;
    ctx.update(data);
    Some(ctx.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_answer() {
        let out = digest(HashAlgorithm::Sha256, b"abc").unwrap();
        assert_eq!(
            hex::encode(out),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut ctx = DigestContext::new(HashAlgorithm::Sha1).unwrap();
        ctx.update(b"hello ");
        ctx.update(b"world");
        assert_eq!(ctx.finalize(), digest(HashAlgorithm::Sha1, b"hello world").unwrap());
    }

    #[test]
    fn test_unsupported_algorithms() {
        assert!(DigestContext::new(HashAlgorithm::Md2).is_none());
        assert!(DigestContext::new(HashAlgorithm::Unknown).is_none());
    }
}
