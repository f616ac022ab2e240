//! File-based locking for single-writer safety (persistent mode).
//!
//! Cross-platform (fs2) advisory lock on a sibling `<db>.lock` file.
//! Lock is released on Drop.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub struct LockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Ошибки unlock на Drop игнорируются сознательно.
        let _ = self.file.unlock();
    }
}

fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// Эксклюзивная блокировка БД; Err, если файл уже захвачен другим процессом.
pub fn acquire_exclusive(db_path: &Path) -> Result<LockGuard> {
    let path = lock_path_for(db_path);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .map_err(|e| anyhow!("database {} is locked: {}", db_path.display(), e))?;
    Ok(LockGuard { file, path })
}
