//! Cross-project introspection log shared by concurrent runs.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fs2::FileExt;

const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// Append one YAML document, holding an exclusive lock for the whole
/// read-then-append so concurrent runs never interleave.
pub fn append_document(path: &Path, document: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("lock {}", path.display()))?;

    let result = append_locked(&mut file, document);
    let _ = FileExt::unlock(&file);
    result.with_context(|| format!("append to {}", path.display()))
}

fn append_locked(file: &mut fs::File, document: &str) -> Result<()> {
    let mut existing = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut existing)?;

    let mut payload = String::new();
    if !existing.trim().is_empty() {
        payload.push_str(DOCUMENT_SEPARATOR);
    }
    payload.push_str(document.trim_end());
    payload.push('\n');
    file.write_all(payload.as_bytes())?;
    file.flush()?;
    Ok(())
}
