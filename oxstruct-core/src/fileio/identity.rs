//! Stable file identity.
//!
//! Two logical references with the same identity share one remote upload.
//! On POSIX systems identity is `(device, inode)`; elsewhere (or when stat
//! metadata is unusable) it falls back to a content hash under the
//! configured algorithm.

use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::error::{OxError, Result};

/// Hash algorithm for the content-hash fallback and template file hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Md5,
}

impl std::str::FromStr for HashAlgorithm {
    type Err = OxError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha1" => Ok(HashAlgorithm::Sha1),
            "md5" => Ok(HashAlgorithm::Md5),
            other => Err(OxError::Usage(format!(
                "unknown hash algorithm '{other}' (expected sha256, sha1, or md5)"
            ))),
        }
    }
}

/// Hash a byte slice under the given algorithm, hex-encoded.
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> String {
    use md5::Md5;
    use sha1::Sha1;
    use sha2::{Digest, Sha256};

    fn hex(digest: &[u8]) -> String {
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    match algorithm {
        HashAlgorithm::Sha256 => hex(&Sha256::digest(bytes)),
        HashAlgorithm::Sha1 => hex(&Sha1::digest(bytes)),
        HashAlgorithm::Md5 => hex(&Md5::digest(bytes)),
    }
}

/// Stream-hash a file without loading it whole.
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> Result<String> {
    use md5::Md5;
    use sha1::Sha1;
    use sha2::{Digest, Sha256};

    let mut file = std::fs::File::open(path).map_err(|_| OxError::NotFound {
        path: path.to_path_buf(),
    })?;
    let mut buf = [0u8; 64 * 1024];

    macro_rules! drive {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = file
                    .read(&mut buf)
                    .map_err(|e| OxError::Internal(anyhow::anyhow!("read {}: {e}", path.display())))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            let digest = hasher.finalize();
            let mut out = String::with_capacity(digest.len() * 2);
            for byte in digest.iter() {
                out.push_str(&format!("{byte:02x}"));
            }
            out
        }};
    }

    Ok(match algorithm {
        HashAlgorithm::Sha256 => drive!(Sha256::new()),
        HashAlgorithm::Sha1 => drive!(Sha1::new()),
        HashAlgorithm::Md5 => drive!(Md5::new()),
    })
}

/// Identity key for deduplicating uploads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileIdentity {
    DeviceInode { device: u64, inode: u64 },
    ContentHash(String),
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIdentity::DeviceInode { device, inode } => write!(f, "dev{device}:ino{inode}"),
            FileIdentity::ContentHash(hash) => write!(f, "hash:{hash}"),
        }
    }
}

impl FileIdentity {
    /// Compute the identity of an existing file.
    pub fn of(path: &Path, algorithm: HashAlgorithm) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|_| OxError::NotFound {
            path: path.to_path_buf(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let _ = algorithm;
            Ok(FileIdentity::DeviceInode {
                device: metadata.dev(),
                inode: metadata.ino(),
            })
        }

        #[cfg(not(unix))]
        {
            let _ = metadata;
            Ok(FileIdentity::ContentHash(hash_file(algorithm, path)?))
        }
    }
}
