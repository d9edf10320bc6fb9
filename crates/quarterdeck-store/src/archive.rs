use std::fs;
use std::path::Path;

use crate::error::Result;

/// Recursively copy `src` into `dest`, creating `dest` if needed.
///
/// Symlinks are followed; the console's staged archives are plain trees of
/// manifest files, so there is nothing exotic to preserve.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Replace `dest` with a copy of `src` (remove-then-copy so stale files
/// from a previous staging attempt never survive).
pub fn replace_dir(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    copy_dir_all(src, dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("qd-archive-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn copy_preserves_nested_tree() {
        let src = scratch("src");
        let dest = scratch("dest");
        fs::create_dir_all(src.join("upstream/userdata")).unwrap();
        fs::write(src.join("installation.json"), "{}").unwrap();
        fs::write(src.join("upstream/userdata/config.yaml"), "a: 1").unwrap();

        copy_dir_all(&src, &dest).unwrap();

        assert!(dest.join("installation.json").exists());
        assert_eq!(
            fs::read_to_string(dest.join("upstream/userdata/config.yaml")).unwrap(),
            "a: 1"
        );

        fs::remove_dir_all(&src).unwrap();
        fs::remove_dir_all(&dest).unwrap();
    }

    #[test]
    fn replace_removes_stale_files() {
        let src = scratch("src");
        let dest = scratch("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(src.join("new.txt"), "new").unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        replace_dir(&src, &dest).unwrap();

        assert!(dest.join("new.txt").exists());
        assert!(!dest.join("stale.txt").exists());

        fs::remove_dir_all(&src).unwrap();
        fs::remove_dir_all(&dest).unwrap();
    }
}
