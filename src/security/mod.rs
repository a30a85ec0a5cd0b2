use sha2::{Digest, Sha256};
use std::path::Path;

/// Paths are logged as digests so icon and category names stay out of log files.
pub fn hash_path(p: &Path) -> String {
    let mut h = Sha256::new();
    h.update(p.as_os_str().to_string_lossy().as_bytes());
    format!("{:x}", h.finalize())
}
