//! Utility functions.

pub mod config;
pub mod errors;

use std::{
    borrow::Cow,
    fs,
    path::{self, Path},
};

use walkdir::WalkDir;

use crate::util::errors::Res;

/// Rewrites a relative path using the platform separator into the canonical
/// forward-slash form used as hash input. A path which is already canonical
/// is returned as-is, so the result is byte-identical across operating
/// systems.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if path::MAIN_SEPARATOR == '/' || !path.contains(path::MAIN_SEPARATOR) {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(path.replace(path::MAIN_SEPARATOR, "/"))
    }
}

/// A random name for an in-flight directory under `tmp/`.
pub fn tmp_dir_name() -> String {
    format!("{:016x}", rand::random::<u64>())
}

pub fn clear_dir(dir: &Path) -> Res<()> {
    if dir.exists() {
        remove_dir_all::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Copies a directory tree into `to`, used to materialize local directory
/// dependencies. `fs::copy` carries the permission bits over, so executable
/// files stay executable in the copy.
pub fn copy_dir(from: &Path, to: &Path) -> Res<()> {
    let walker = WalkDir::new(from)
        .follow_links(true)
        .into_iter()
        .filter_map(|x| x.ok())
        .filter(|x| x.file_type().is_file());

    for entry in walker {
        let to_p = to.join(entry.path().strip_prefix(from).unwrap());
        // Make sure that the parent exists before we try copying
        fs::create_dir_all(to_p.parent().unwrap())?;
        fs::copy(entry.path(), &to_p)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_path("a/b/c.zig");
        let twice = normalize_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_forward_slashes_unchanged() {
        match normalize_path("src/deep/nested.zig") {
            Cow::Borrowed(s) => assert_eq!(s, "src/deep/nested.zig"),
            Cow::Owned(_) => panic!("canonical path should be returned as-is"),
        }
    }

    #[cfg(windows)]
    #[test]
    fn normalize_replaces_backslashes() {
        assert_eq!(normalize_path("src\\main.zig"), "src/main.zig");
    }
}
