use crate::{BlocklistError, Result};
use log::*;
use std::{
    env,
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// The name of Privoxy's executable.
pub const PRIVOXY_EXECUTABLE: &str = "privoxy";
// searched after PATH
const FALLBACK_DIRS: [&str; 3] = ["/usr/sbin", "/usr/local/sbin", "/sbin"];

/// Looks for an executable with the given name in the directories of the given `PATH`-style variable, and then in the
/// usual system binary directories.
pub fn find_executable(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let path_dirs = path_var.map(|var| env::split_paths(var).collect::<Vec<_>>()).unwrap_or_default();

    path_dirs
        .into_iter()
        .chain(FALLBACK_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Ensures Privoxy is installed.
///
/// # Errors
///
/// Returns [`BlocklistError::MissingDependency`] if the `privoxy` executable can't be found.
pub fn require_privoxy() -> Result<PathBuf> {
    let path_var = env::var_os("PATH");
    match find_executable(PRIVOXY_EXECUTABLE, path_var.as_deref()) {
        Some(path) => {
            debug!("Found {} at {}", PRIVOXY_EXECUTABLE, path.display());
            Ok(path)
        }
        None => Err(BlocklistError::MissingDependency(PRIVOXY_EXECUTABLE.to_string())),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::find_executable;
    use std::{env, fs};

    #[cfg(unix)]
    fn make_executable(path: &std::path::Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;

        fs::write(path, "#!/bin/sh\n").expect("failed to write executable");
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("failed to set permissions");
    }

    #[cfg(unix)]
    #[test]
    fn find_in_path() {
        let first = tempfile::tempdir().expect("failed to create tempdir");
        let second = tempfile::tempdir().expect("failed to create tempdir");
        make_executable(&first.path().join("privoxy-test-bin"), 0o644);
        make_executable(&second.path().join("privoxy-test-bin"), 0o755);

        let path_var = env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(
            find_executable("privoxy-test-bin", Some(path_var.as_os_str())),
            Some(second.path().join("privoxy-test-bin"))
        );
    }

    #[test]
    fn missing_executable() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path_var = env::join_paths([dir.path()]).unwrap();
        assert_eq!(find_executable("privoxy-blocklist-missing-bin", Some(path_var.as_os_str())), None);
        assert_eq!(find_executable("privoxy-blocklist-missing-bin", None), None);
    }
}
