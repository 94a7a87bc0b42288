use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use beam_transfer::CompletedTransfer;

const FALLBACK_NAME: &str = "received.bin";

/// Reduce an announced file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && *c != ':')
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Candidate names for `name`: `name`, then `name (1)`, `name (2)`...
fn candidate(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

/// Create the first free candidate in `dir`. Creation is exclusive, so two
/// concurrent saves of the same name never get the same file.
async fn create_unique(dir: &Path, name: &str) -> io::Result<(PathBuf, File)> {
    let mut n = 0u32;
    loop {
        let path = dir.join(candidate(name, n));
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Write a received file into `dir` without overwriting anything.
pub async fn save(dir: &Path, transfer: &CompletedTransfer) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let name = sanitize_file_name(&transfer.metadata.file_name);
    let (path, mut file) = create_unique(dir, &name).await?;
    file.write_all(&transfer.payload).await?;
    file.flush().await?;
    Ok(path)
}
