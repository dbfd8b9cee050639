//! Read/write the scan result bundle.
//!
//! The bundle is written to a temporary file next to the target and renamed
//! into place, so a failed run never leaves a truncated output file behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Result, ScanError};
use crate::scan::ScanBundle;

/// Write a result bundle as pretty-printed JSON.
pub fn write_bundle(path: &Path, bundle: &ScanBundle) -> Result<()> {
    write_atomically(path, "results", |writer| {
        serde_json::to_writer_pretty(writer, bundle).map_err(std::io::Error::from)
    })
}

/// Fill a temporary file next to `path`, then rename it into place.
///
/// `path` is untouched unless `fill` and the flush both succeed.
pub(crate) fn write_atomically<F>(path: &Path, what: &str, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)
        .map_err(|e| ScanError::io(path, format!("failed to create temporary {what} file: {e}")))?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        fill(&mut writer)
            .and_then(|()| writer.flush())
            .map_err(|e| ScanError::io(path, format!("failed to write {what}: {e}")))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| ScanError::io(path, format!("failed to sync {what}: {e}")))?;
    tmp.persist(path)
        .map_err(|e| ScanError::io(path, format!("failed to move {what} into place: {}", e.error)))?;
    Ok(())
}

/// Read a result bundle.
pub fn read_bundle(path: &Path) -> Result<ScanBundle> {
    let file = File::open(path).map_err(|e| ScanError::io(path, format!("failed to open: {e}")))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ScanError::Config(format!("invalid result bundle '{}': {e}", path.display())))
}
