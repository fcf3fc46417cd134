//! Content fingerprints.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::models::task::Fingerprint;

/// SHA-256 of a byte slice.
pub fn fingerprint_bytes(data: &[u8]) -> Fingerprint {
    Fingerprint::new(format!("{:x}", Sha256::digest(data)))
}

/// Stream a file through SHA-256.
pub fn fingerprint_file(path: &Path) -> io::Result<Fingerprint> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(Fingerprint::new(format!("{:x}", hasher.finalize())))
}

/// Content fingerprint, or a composite `path+size+mtime` digest when the
/// content cannot be read.
pub fn fingerprint_or_composite(path: &Path) -> Fingerprint {
    match fingerprint_file(path) {
        Ok(fp) => fp,
        Err(e) => {
            warn!(
                "Cannot read {} for fingerprinting ({}), using composite fingerprint",
                path.display(),
                e
            );
            composite_fingerprint(path)
        }
    }
}

fn composite_fingerprint(path: &Path) -> Fingerprint {
    let (size, mtime) = std::fs::metadata(path)
        .map(|m| {
            let mtime = m
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (m.len(), mtime)
        })
        .unwrap_or((0, 0));
    let key = format!("{}|{}|{}", path.display(), size, mtime);
    fingerprint_bytes(key.as_bytes())
}
