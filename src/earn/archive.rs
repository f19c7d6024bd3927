use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct ArchiveOutcome {
    pub moved: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match fs::rename(from, to) {
        Ok(_) => Ok(()),
        Err(rename_err) => {
            if matches!(
                rename_err.kind(),
                ErrorKind::CrossesDevices | ErrorKind::PermissionDenied
            ) {
                fs::copy(from, to).with_context(|| {
                    format!("failed to copy {} to {}", from.display(), to.display())
                })?;
                fs::remove_file(from)
                    .with_context(|| format!("failed to remove {}", from.display()))?;
                Ok(())
            } else {
                Err(rename_err).with_context(|| {
                    format!("failed to move {} to {}", from.display(), to.display())
                })
            }
        }
    }
}

/// Moves each named source file from `input_dir` into `archive_dir`.
///
/// A name with no file behind it is reported, not treated as an error.
pub fn archive_sources<S: AsRef<str>>(
    input_dir: &Path,
    archive_dir: &Path,
    names: &[S],
) -> Result<ArchiveOutcome> {
    let mut out = ArchiveOutcome::default();
    for name in names {
        let from = input_dir.join(name.as_ref());
        if !from.exists() {
            out.missing.push(from);
            continue;
        }
        let to = archive_dir.join(name.as_ref());
        move_file(&from, &to)?;
        out.moved.push(to);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archive_moves_present_files_and_reports_missing() {
        let tmp = tempdir().expect("tempdir");
        let input = tmp.path().join("input");
        let archive = tmp.path().join("archive");
        fs::create_dir_all(&input).expect("mkdir");
        fs::write(input.join("a.xlsx"), b"a").expect("write");

        let out = archive_sources(&input, &archive, &["a.xlsx", "gone.xlsx"]).expect("archive");
        assert_eq!(out.moved, vec![archive.join("a.xlsx")]);
        assert_eq!(out.missing, vec![input.join("gone.xlsx")]);
        assert!(!input.join("a.xlsx").exists());
        assert_eq!(fs::read(archive.join("a.xlsx")).expect("read"), b"a");
    }

    #[test]
    fn move_file_replaces_existing_target() {
        let tmp = tempdir().expect("tempdir");
        let from = tmp.path().join("new.csv");
        let to = tmp.path().join("backup/old.csv");
        fs::create_dir_all(tmp.path().join("backup")).expect("mkdir");
        fs::write(&to, "old").expect("seed");
        fs::write(&from, "new").expect("seed");
        move_file(&from, &to).expect("move");
        assert_eq!(fs::read_to_string(&to).expect("read"), "new");
    }
}
