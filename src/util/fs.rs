use std::io;
use std::path::Path;
use std::time::Duration;

/// Remove a directory tree, retrying briefly when the filesystem is flaky
/// (open handles, antivirus scanners, NFS). Returns once the path is absent.
pub fn remove_dir_all_with_retries(path: &Path, attempts: u32, delay: Duration) -> io::Result<()> {
    let mut last_err: Option<io::Error> = None;
    for _ in 0..attempts.max(1) {
        if !path.exists() {
            return Ok(());
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => last_err = Some(e),
        }
        std::thread::sleep(delay);
    }
    if !path.exists() {
        return Ok(());
    }
    Err(last_err.unwrap_or_else(|| io::Error::other(format!("{} still exists", path.display()))))
}

/// True when `child` equals `root` or lies below it, comparing canonical paths
/// where they exist (temp dirs are often symlinked, e.g. /tmp on macOS).
pub fn is_within(child: &Path, root: &Path) -> bool {
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let child = canonicalize_lenient(child);
    child.starts_with(&root)
}

// Canonicalize the longest existing ancestor and re-append the rest.
fn canonicalize_lenient(p: &Path) -> std::path::PathBuf {
    let mut existing = p;
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(c) = std::fs::canonicalize(existing) {
            let mut out = c;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return p.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let td = tempfile::tempdir().expect("tmpdir");
        let gone = td.path().join("never-created");
        remove_dir_all_with_retries(&gone, 3, Duration::from_millis(1)).expect("missing is fine");
    }

    #[test]
    fn test_remove_nested_dir() {
        let td = tempfile::tempdir().expect("tmpdir");
        let dir = td.path().join("a/b/c");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("f.txt"), "x").unwrap();
        remove_dir_all_with_retries(&td.path().join("a"), 3, Duration::from_millis(1)).unwrap();
        assert!(!td.path().join("a").exists());
    }

    #[test]
    fn test_is_within_handles_missing_leaf() {
        let td = tempfile::tempdir().expect("tmpdir");
        assert!(is_within(&td.path().join("not/yet/there"), td.path()));
        assert!(!is_within(Path::new("/"), td.path()));
    }
}
