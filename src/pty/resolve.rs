use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{ProxyError, Result};

/// Find the executable `command` would run, the way a shell does: names
/// with a slash are taken as paths, bare names are looked up in `path_var`.
///
/// Distinguishes "not there at all" from "there but not executable".
pub fn resolve_executable(command: &str, path_var: Option<&OsStr>, cwd: &Path) -> Result<PathBuf> {
    if command.is_empty() {
        return Err(ProxyError::CommandNotFound(command.to_string()));
    }

    if command.contains('/') {
        return check(&cwd.join(command), command);
    }

    let mut denied = false;
    for dir in path_var.map(std::env::split_paths).into_iter().flatten() {
        // An empty entry means the current directory
        let dir = cwd.join(dir);
        match check(&dir.join(command), command) {
            Ok(found) => return Ok(found),
            Err(ProxyError::NotExecutable(_)) => denied = true,
            Err(_) => {}
        }
    }

    if denied {
        Err(ProxyError::NotExecutable(command.to_string()))
    } else {
        Err(ProxyError::CommandNotFound(command.to_string()))
    }
}

fn check(candidate: &Path, command: &str) -> Result<PathBuf> {
    let meta =
        fs::metadata(candidate).map_err(|_| ProxyError::CommandNotFound(command.to_string()))?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(ProxyError::NotExecutable(command.to_string()));
    }
    Ok(candidate.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn touch(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_found_on_path() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let agent = touch(second.path(), "agent", 0o755);

        let path = std::env::join_paths([first.path(), second.path()]).unwrap();
        let found = resolve_executable("agent", Some(&path), Path::new("/")).unwrap();
        assert_eq!(found, agent);
    }

    #[test]
    fn test_earlier_entry_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let winner = touch(first.path(), "agent", 0o755);
        touch(second.path(), "agent", 0o755);

        let path = std::env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(resolve_executable("agent", Some(&path), Path::new("/")).unwrap(), winner);
    }

    #[test]
    fn test_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = OsString::from(dir.path());
        assert!(matches!(
            resolve_executable("agent", Some(&path), Path::new("/")),
            Err(ProxyError::CommandNotFound(_))
        ));
        assert!(matches!(
            resolve_executable("agent", None, Path::new("/")),
            Err(ProxyError::CommandNotFound(_))
        ));
    }

    #[test]
    fn test_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "agent", 0o644);
        let path = OsString::from(dir.path());
        assert!(matches!(
            resolve_executable("agent", Some(&path), Path::new("/")),
            Err(ProxyError::NotExecutable(_))
        ));
    }

    #[test]
    fn test_relative_path_uses_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let agent = touch(dir.path(), "agent", 0o700);
        assert_eq!(resolve_executable("./agent", None, dir.path()).unwrap(), dir.path().join("./agent"));
        assert!(agent.exists());
    }

    #[test]
    fn test_directory_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let abs = dir.path().to_str().unwrap();
        assert!(matches!(
            resolve_executable(abs, None, Path::new("/")),
            Err(ProxyError::NotExecutable(_))
        ));
    }
}
