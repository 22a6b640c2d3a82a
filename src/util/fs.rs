use std::path::Path;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir_exists(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Copy a file, creating parent directories as needed.
pub fn copy_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !src.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Source file not found: {}", src.display()),
        ));
    }

    if let Some(parent) = dst.parent() {
        ensure_dir_exists(parent)?;
    }

    std::fs::copy(src, dst).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("Failed to copy {} to {}: {}", src.display(), dst.display(), e),
        )
    })?;
    Ok(())
}

/// Remove a file if it exists. Returns whether a file was removed.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether `path` is a file the current user can open for reading.
pub fn is_readable_file(path: &Path) -> bool {
    path.is_file() && std::fs::File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dir_exists_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let new_dir = dir.path().join("subdir");

        ensure_dir_exists(&new_dir).unwrap();
        ensure_dir_exists(&new_dir).unwrap();
        assert!(new_dir.is_dir());
    }

    #[test]
    fn test_copy_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("app.apk");
        let dst = dir.path().join("a/b/app.apk");
        std::fs::write(&src, b"PK").unwrap();

        copy_file(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"PK");
    }

    #[test]
    fn test_copy_file_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = copy_file(&dir.path().join("missing.apk"), &dir.path().join("out.apk"));
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_file_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sdcard.img");
        std::fs::write(&file, b"").unwrap();

        assert!(remove_file_if_exists(&file).unwrap());
        assert!(!remove_file_if_exists(&file).unwrap());
    }

    #[test]
    fn test_is_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("debug.keystore");
        assert!(!is_readable_file(&file));
        std::fs::write(&file, b"ks").unwrap();
        assert!(is_readable_file(&file));
        assert!(!is_readable_file(dir.path()));
    }
}
