//! On-disk handling for uploaded files.

use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Writes to a temp name first so a half-written upload never sits at
/// the final path.
pub async fn store_upload(dir: &Path, final_path: &Path, id: Uuid, bytes: &[u8]) -> Result<()> {
    let tmp_path = dir.join(format!("tmp_{id}.part"));
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create {}", dir.display()))?;
    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, final_path)
        .await
        .with_context(|| format!("rename to {}", final_path.display()))?;
    Ok(())
}

/// Removes a file; one that is already gone counts as removed.
pub async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

pub async fn remove_dir(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Lowercased extension of an uploaded file name, if it has a plain one.
pub fn upload_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    (!ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric())).then(|| ext.to_ascii_lowercase())
}

/// File name safe to put in a `Content-Disposition` header.
pub fn attachment_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}
