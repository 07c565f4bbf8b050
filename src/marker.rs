use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::SyncResult;

/// Overwrites the marker at `path` with the decimal `total`.
pub fn write_total_count(path: &Path, total: u64) -> SyncResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    atomic_write_bytes(path, total.to_string().as_bytes())
}

/// Last recorded total, or `None` when the marker is absent or unreadable.
#[must_use]
pub fn read_total_count(path: &Path) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(())
}
