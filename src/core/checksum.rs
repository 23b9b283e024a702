// ─── Checksum Store ───
// Streaming content digests for downloaded artifacts and installed files.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

use crate::core::error::{LauncherError, LauncherResult};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
}

impl Algorithm {
    fn hex_len(self) -> usize {
        match self {
            Algorithm::Md5 => 32,
            Algorithm::Sha1 => 40,
            Algorithm::Sha256 => 64,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
        }
    }
}

/// A known-good digest: algorithm plus lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub fn new(algorithm: Algorithm, hex: &str) -> LauncherResult<Self> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LauncherError::InvalidDigest(format!(
                "{}:{}",
                algorithm.name(),
                hex
            )));
        }
        Ok(Self { algorithm, hex })
    }

    pub fn md5(hex: &str) -> LauncherResult<Self> {
        Self::new(Algorithm::Md5, hex)
    }

    pub fn sha256(hex: &str) -> LauncherResult<Self> {
        Self::new(Algorithm::Sha256, hex)
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.hex)
    }
}

/// Accepts `sha256:<hex>` or bare hex (length picks the algorithm).
impl FromStr for Digest {
    type Err = LauncherError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if let Some((prefix, hex)) = raw.split_once(':') {
            let algorithm = match prefix.to_ascii_lowercase().as_str() {
                "md5" => Algorithm::Md5,
                "sha1" => Algorithm::Sha1,
                "sha256" => Algorithm::Sha256,
                _ => return Err(LauncherError::InvalidDigest(raw.to_string())),
            };
            return Digest::new(algorithm, hex);
        }

        let algorithm = match raw.len() {
            32 => Algorithm::Md5,
            40 => Algorithm::Sha1,
            64 => Algorithm::Sha256,
            _ => return Err(LauncherError::InvalidDigest(raw.to_string())),
        };
        Digest::new(algorithm, raw)
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => Hasher::Md5(Md5::new()),
            Algorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(bytes),
            Hasher::Sha1(h) => h.update(bytes),
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest of a file, read in bounded chunks.
pub fn digest(path: &Path, algorithm: Algorithm) -> LauncherResult<Digest> {
    let file = File::open(path).map_err(|source| LauncherError::io(path, source))?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|source| LauncherError::io(path, source))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Digest {
        algorithm,
        hex: hasher.finish(),
    })
}

/// Whether `path` hashes to `expected`. Unreadable paths are errors.
pub fn verify(path: &Path, expected: &Digest) -> LauncherResult<bool> {
    Ok(digest(path, expected.algorithm)? == *expected)
}

/// Like [`verify`] but a missing file is simply "not valid".
pub fn is_valid(path: &Path, expected: &Digest) -> bool {
    path.is_file() && verify(path, expected).unwrap_or(false)
}

pub async fn digest_async(path: &Path, algorithm: Algorithm) -> LauncherResult<Digest> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || digest(&owned, algorithm))
        .await
        .map_err(|e| LauncherError::Other(format!("Task join error: {e}")))?
}

pub async fn is_valid_async(path: &Path, expected: &Digest) -> bool {
    let owned = path.to_path_buf();
    let expected = expected.clone();
    tokio::task::spawn_blocking(move || is_valid(&owned, &expected))
        .await
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_md5_and_sha256_of_abc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();

        let md5 = digest(&path, Algorithm::Md5).unwrap();
        assert_eq!(md5.hex(), "900150983cd24fb0d6963f7d28e17f72");

        let sha = digest(&path, Algorithm::Sha256).unwrap();
        assert_eq!(
            sha.hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digest_is_stable_across_copies_and_self_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("blob.bin");
        let copy = dir.path().join("copy.bin");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&original, &payload).unwrap();
        std::fs::copy(&original, &copy).unwrap();

        for algorithm in [Algorithm::Md5, Algorithm::Sha1, Algorithm::Sha256] {
            let before = digest(&original, algorithm).unwrap();
            assert_eq!(before, digest(&copy, algorithm).unwrap());
            assert!(verify(&original, &before).unwrap());
        }
    }

    #[test]
    fn unreadable_path_is_an_io_error() {
        let err = digest(Path::new("/definitely/not/here"), Algorithm::Md5).unwrap_err();
        assert!(matches!(err, LauncherError::Io { .. }));
        assert!(!is_valid(
            Path::new("/definitely/not/here"),
            &Digest::md5("900150983cd24fb0d6963f7d28e17f72").unwrap()
        ));
    }

    #[test]
    fn parses_prefixed_and_bare_digests() {
        let bare: Digest = "B2CC65E1930E75F563078C6A20221B37".parse().unwrap();
        assert_eq!(bare.algorithm, Algorithm::Md5);
        assert_eq!(bare.to_string(), "md5:b2cc65e1930e75f563078c6a20221b37");

        let prefixed: Digest = "sha1:a9993e364706816aba3e25717850c26c9cd0d89d"
            .parse()
            .unwrap();
        assert_eq!(prefixed.algorithm, Algorithm::Sha1);

        assert!("sha256:abcd".parse::<Digest>().is_err());
        assert!("crc32:abcd1234".parse::<Digest>().is_err());
    }
}
