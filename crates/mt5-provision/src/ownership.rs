//! Recursive ownership normalization of the persistent volume.

use std::io;
use std::os::unix::fs::lchown;
use std::path::Path;

use crate::config::Owner;
use crate::error::{ProvisionError, Result};

/// Create `dir` if needed, then hand it and everything below it to `owner`.
///
/// Symlinks are re-owned themselves and never followed. Returns the number
/// of entries whose ownership was set. Any failure is fatal to the caller.
pub fn normalize(dir: &Path, owner: Owner) -> Result<u64> {
    std::fs::create_dir_all(dir).map_err(|source| ProvisionError::Ownership {
        path: dir.to_path_buf(),
        source,
    })?;
    walk(dir, owner)
}

/// Hand `path` and every ancestor below `root` to `owner`.
///
/// Used for files the supervisor writes into the volume after the
/// normalizer ran (ledger, cached installers), including any directories
/// created on the way. Paths outside `root` are left alone.
pub fn adopt(path: &Path, root: &Path, owner: Owner) -> Result<u64> {
    let mut count = 0;
    for p in path.ancestors().take_while(|p| *p != root && p.starts_with(root)) {
        lchown(p, Some(owner.uid), Some(owner.gid)).map_err(|source| {
            ProvisionError::Ownership {
                path: p.to_path_buf(),
                source,
            }
        })?;
        count += 1;
    }
    Ok(count)
}

fn walk(path: &Path, owner: Owner) -> Result<u64> {
    let wrap = |source: io::Error| ProvisionError::Ownership {
        path: path.to_path_buf(),
        source,
    };

    lchown(path, Some(owner.uid), Some(owner.gid)).map_err(wrap)?;
    let mut count = 1;

    let meta = std::fs::symlink_metadata(path).map_err(wrap)?;
    if meta.is_dir() {
        for entry in std::fs::read_dir(path).map_err(wrap)? {
            let entry = entry.map_err(wrap)?;
            count += walk(&entry.path(), owner)?;
        }
    }

    Ok(count)
}
