//! Content hashing of package trees.
//!
//! The package hash folds the sorted per-file digests together, so it is
//! invariant under filesystem enumeration order. Each per-file digest covers
//! the normalized relative path, a separator byte, the executable bit, and
//! the file contents; renaming a file changes the package hash even when the
//! contents are identical.

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use failure::format_err;
use scoped_threadpool::Pool;
use sha2::{Digest as _, Sha256};
use slog::{error, Logger};
use walkdir::WalkDir;

use crate::util::{
    errors::{ErrorKind, Res},
    normalize_path,
};

/// Multihash header for a sha2-256 digest of 32 bytes.
pub const MULTIHASH_SHA256: [u8; 2] = [0x12, 0x20];

/// Length of the hex form of a multihash-wrapped digest.
pub const HEX_DIGEST_LEN: usize = (MULTIHASH_SHA256.len() + 32) * 2;

pub type Digest = [u8; 32];

/// Renders a raw digest in the multihash-wrapped hex form used for cache
/// addressing and manifest `hash` fields.
pub fn hex_digest(digest: &Digest) -> String {
    let mut out = String::with_capacity(HEX_DIGEST_LEN);
    out.push_str(&hex::encode(MULTIHASH_SHA256));
    out.push_str(&hex::encode(digest));
    out
}

/// Whether `s` is a syntactically well-formed multihash hex digest.
pub fn is_well_formed_hex(s: &str) -> bool {
    s.len() == HEX_DIGEST_LEN
        && s.starts_with(&hex::encode(MULTIHASH_SHA256))
        && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Per-file record dispatched to the worker pool. Failures are captured
/// here rather than propagated so one bad file doesn't wedge the pool.
struct HashedFile {
    fs_path: PathBuf,
    normalized_path: String,
    hash: Option<Digest>,
    failure: Option<io::Error>,
}

/// Walks `root`, hashes every file on the worker pool, and folds the sorted
/// per-file digests into the package digest. Anything that is neither a
/// regular file nor a directory is rejected outright.
pub fn compute_directory_hash(pool: &mut Pool, root: &Path, logger: &Logger) -> Res<Digest> {
    let mut files: Vec<HashedFile> = Vec::new();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            return Err(format_err!(
                "{} is neither a regular file nor a directory",
                entry.path().display()
            )
            .context(ErrorKind::IllegalFileTypeInPackage)
            .into());
        }
        let rel = entry.path().strip_prefix(root).unwrap();
        let normalized_path = normalize_path(&rel.to_string_lossy()).into_owned();
        files.push(HashedFile {
            fs_path: entry.path().to_path_buf(),
            normalized_path,
            hash: None,
            failure: None,
        });
    }

    pool.scoped(|scoped| {
        for file in &mut files {
            scoped.execute(move || hash_file(file));
        }
    });

    files.sort_by(|a, b| a.normalized_path.cmp(&b.normalized_path));

    let mut any_failed = false;
    let mut hasher = Sha256::new();
    for file in &files {
        match (&file.hash, &file.failure) {
            (Some(hash), None) => hasher.input(&hash[..]),
            (_, Some(err)) => {
                error!(
                    logger, "unable to hash file";
                    "path" => file.fs_path.display().to_string(),
                    "err" => %err
                );
                any_failed = true;
            }
            _ => unreachable!(),
        }
    }
    if any_failed {
        return Err(ErrorKind::PackageHashUnavailable.into());
    }

    Ok(finish(hasher))
}

fn hash_file(file: &mut HashedFile) {
    match hash_file_inner(&file.normalized_path, &file.fs_path) {
        Ok(digest) => file.hash = Some(digest),
        Err(err) => file.failure = Some(err),
    }
}

fn hash_file_inner(normalized_path: &str, fs_path: &Path) -> io::Result<Digest> {
    let mut f = fs::File::open(fs_path)?;
    let meta = f.metadata()?;

    let mut hasher = Sha256::new();
    hasher.input(normalized_path.as_bytes());
    hasher.input(&[0u8]);
    hasher.input(&[executable_bit(&meta) as u8]);

    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.input(&buf[..n]);
    }

    Ok(finish(hasher))
}

#[cfg(unix)]
fn executable_bit(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

// The user-execute bit cannot be determined here, so such packages hash
// differently than they would on a POSIX host.
#[cfg(not(unix))]
fn executable_bit(_meta: &fs::Metadata) -> bool {
    false
}

fn finish(hasher: Sha256) -> Digest {
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.result().as_slice());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use slog::o;
    use tempdir::TempDir;

    fn logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn tree(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new("hash-test").unwrap();
        for (path, contents) in files {
            let p = dir.path().join(path);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(&p, contents).unwrap();
        }
        dir
    }

    #[test]
    fn digest_is_independent_of_worker_count() {
        let files: Vec<(String, String)> = (0..64)
            .map(|i| (format!("src/f{:03}.zig", i), format!("// file {}\n", i)))
            .collect();
        let borrowed: Vec<(&str, &str)> = files
            .iter()
            .map(|(p, c)| (p.as_str(), c.as_str()))
            .collect();
        let dir = tree(&borrowed);

        let mut serial = Pool::new(1);
        let mut parallel = Pool::new(8);
        let a = compute_directory_hash(&mut serial, dir.path(), &logger()).unwrap();
        let b = compute_directory_hash(&mut parallel, dir.path(), &logger()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn content_change_changes_digest() {
        let dir = tree(&[("lib.zig", "a\n"), ("other.zig", "b\n")]);
        let mut pool = Pool::new(2);
        let before = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        fs::write(dir.path().join("lib.zig"), "c\n").unwrap();
        let after = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn rename_changes_digest() {
        let dir = tree(&[("lib.zig", "a\n")]);
        let mut pool = Pool::new(2);
        let before = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        fs::rename(dir.path().join("lib.zig"), dir.path().join("lib2.zig")).unwrap();
        let after = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        assert_ne!(before, after);
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_changes_digest() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tree(&[("run.sh", "#!/bin/sh\n")]);
        let mut pool = Pool::new(2);
        let before = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        let p = dir.path().join("run.sh");
        fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
        let after = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap();
        assert_ne!(before, after);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_rejected() {
        let dir = tree(&[("lib.zig", "a\n")]);
        std::os::unix::fs::symlink(dir.path().join("lib.zig"), dir.path().join("link.zig"))
            .unwrap();
        let mut pool = Pool::new(2);
        let err = compute_directory_hash(&mut pool, dir.path(), &logger()).unwrap_err();
        assert!(err.to_string().contains("illegal file type"));
    }

    #[test]
    fn hex_digest_shape() {
        let hex = hex_digest(&[0xab; 32]);
        assert_eq!(hex.len(), HEX_DIGEST_LEN);
        assert!(hex.starts_with("1220"));
        assert!(is_well_formed_hex(&hex));
        assert!(!is_well_formed_hex("1220abcd"));
        assert!(!is_well_formed_hex(&hex.to_uppercase()));
    }
}
