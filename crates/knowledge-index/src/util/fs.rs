use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};

/// Write `contents` to `path` via a sibling `.tmp` file and rename, so a
/// reader never observes a partially written file. The parent directory is
/// created when absent.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> IndexResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| IndexError::io("create directory", parent, error))?;
    }
    let tmp_path = tmp_sibling(path);
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|error| IndexError::io("write", &tmp_path, error))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|error| IndexError::io("rename", &tmp_path, error))?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
