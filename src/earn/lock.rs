//! Single-writer guard for `update`.

use crate::earn::paths::EarnPaths;
use crate::error::EarnError;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Takes the exclusive lock or fails at once; a second run never waits.
    pub fn acquire(paths: &EarnPaths) -> Result<Self> {
        fs::create_dir_all(&paths.home)
            .with_context(|| format!("failed to create {}", paths.home.display()))?;
        let path = paths.lock_file();
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(EarnError::Locked(path.display().to_string()).into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EarnErrorCode, code_of};
    use tempfile::tempdir;

    #[test]
    fn second_holder_is_refused_until_release() {
        let tmp = tempdir().expect("tempdir");
        let paths = EarnPaths::under(tmp.path());

        let first = RunLock::acquire(&paths).expect("first lock");
        let err = RunLock::acquire(&paths).expect_err("second lock refused");
        assert_eq!(code_of(&err), Some(EarnErrorCode::E001Locked));

        assert!(first.path().exists());
        drop(first);
        RunLock::acquire(&paths).expect("lock after release");
    }
}
