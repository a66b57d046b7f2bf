//! 原子写文件：先写临时文件，刷盘后 rename 覆盖目标
//!
//! 进程在任意时刻被杀，目标文件要么是旧内容，要么是新内容。

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 目标文件对应的临时文件路径（同目录，保证 rename 不跨文件系统）
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// 原子替换 `path` 的内容
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path_for(path);
    let result = (|| {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    sync_parent_dir(path);
    Ok(())
}

/// rename 之后同步目录项，尽力而为
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_failed_write_keeps_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        write_atomic(&path, b"committed").unwrap();

        // 临时文件位置被目录占住，写入必然失败
        fs::create_dir(temp_path_for(&path)).unwrap();
        assert!(write_atomic(&path, b"half").is_err());

        assert_eq!(fs::read(&path).unwrap(), b"committed");
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/tmp/out/x_labeled_20250101_000000.csv");
        assert_eq!(
            temp_path_for(p),
            PathBuf::from("/tmp/out/x_labeled_20250101_000000.csv.tmp")
        );
    }
}
