//! The global content-addressed package cache.
//!
//! Layout under the cache root:
//!
//! * `tmp/<hex64>`: in-flight unpack directories with random names.
//! * `p/<hex-multihash>`: finalized content-addressed package trees.
//! * `o/<hex64>`: synthetic packages generated by the core itself.
//!
//! A tree is always built under `tmp/` first and promoted with a single
//! rename, so concurrent processes racing on the same hash either win the
//! rename or find an equivalent tree already in place.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use reqwest::blocking::Client;
use slog::{debug, o, Logger};

use crate::util::{self, config::Config, errors::Res};

#[derive(Debug, Clone)]
pub struct Layout {
    /// Root directory of the cache.
    pub root: PathBuf,
    /// Finalized content-addressed packages (`p/`).
    pub pkg: PathBuf,
    /// Synthetic packages generated by the core (`o/`).
    pub obj: PathBuf,
    /// In-flight unpack directories (`tmp/`).
    pub tmp: PathBuf,
}

impl Layout {
    pub fn new(root: &Path) -> Res<Self> {
        let layout = Layout {
            root: root.to_path_buf(),
            pkg: root.join("p"),
            obj: root.join("o"),
            tmp: root.join("tmp"),
        };

        // `p` and `o` are created lazily by the first insertion.
        fs::create_dir_all(&layout.root)?;
        fs::create_dir_all(&layout.tmp)?;

        Ok(layout)
    }
}

/// The Cache encapsulates the global state needed to fetch and store
/// packages: the on-disk layout and the HTTP client.
///
/// Note that a Cache can be located anywhere, including in the current
/// directory!
#[derive(Debug)]
pub struct Cache {
    pub layout: Layout,
    client: Client,
    pub logger: Logger,
}

impl Cache {
    pub fn from_disk(plog: &Logger, location: &Path) -> Res<Self> {
        let layout = Layout::new(location)?;

        let client = Client::new();
        let logger = plog.new(o!("cache" => location.to_string_lossy().into_owned()));

        Ok(Cache {
            layout,
            client,
            logger,
        })
    }

    /// Opens the cache at the location the configuration points at.
    pub fn from_config(plog: &Logger, config: &Config) -> Res<Self> {
        Cache::from_disk(plog, &config.directories.cache)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Creates a fresh randomly-named directory under `tmp/` and returns
    /// its absolute path together with its name.
    pub fn tmp_dir(&self) -> Res<(PathBuf, String)> {
        let name = util::tmp_dir_name();
        let path = self.layout.tmp.join(&name);
        fs::create_dir_all(&path)?;
        Ok((path, name))
    }

    /// Promotes `tmp/<tmp_name>` to `<dest_sub_path>` under the cache root.
    ///
    /// `dest_sub_path` must name a single-level bucket subdirectory of the
    /// cache root, such as `p/<hex>` or `o/<hex>`: the byte at index 1 must
    /// be the separator. A concurrent process may promote an identical tree
    /// first; losing that race counts as success and the leftover temp tree
    /// is deleted.
    pub fn rename_tmp_into_cache(&self, tmp_name: &str, dest_sub_path: &str) -> Res<PathBuf> {
        debug_assert_eq!(dest_sub_path.as_bytes()[1], b'/');
        let tmp_path = self.layout.tmp.join(tmp_name);
        let dest_path = self.layout.root.join(dest_sub_path);

        match fs::rename(&tmp_path, &dest_path) {
            Ok(()) => Ok(dest_path),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                // The bucket directory may not exist yet; create it and
                // retry once.
                fs::create_dir_all(self.layout.root.join(&dest_sub_path[..1]))?;
                match fs::rename(&tmp_path, &dest_path) {
                    Ok(()) => Ok(dest_path),
                    Err(ref e) if lost_insert_race(e) => {
                        self.discard_tmp(&tmp_path)?;
                        Ok(dest_path)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(ref e) if lost_insert_race(e) => {
                self.discard_tmp(&tmp_path)?;
                Ok(dest_path)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn discard_tmp(&self, tmp_path: &Path) -> Res<()> {
        debug!(
            self.logger, "lost cache insertion race";
            "tmp" => tmp_path.display().to_string()
        );
        remove_dir_all::remove_dir_all(tmp_path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn lost_insert_race(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied => true,
        // Renaming onto an existing non-empty directory.
        _ => err.raw_os_error() == Some(libc::ENOTEMPTY),
    }
}

#[cfg(not(unix))]
fn lost_insert_race(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::AlreadyExists | io::ErrorKind::PermissionDenied => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use slog::o;
    use tempdir::TempDir;

    fn cache() -> (TempDir, Cache) {
        let dir = TempDir::new("cache-test").unwrap();
        let logger = Logger::root(slog::Discard, o!());
        let cache = Cache::from_disk(&logger, dir.path()).unwrap();
        (dir, cache)
    }

    #[test]
    fn promote_into_missing_bucket() {
        let (_dir, cache) = cache();
        let (tmp_path, tmp_name) = cache.tmp_dir().unwrap();
        fs::write(tmp_path.join("build.zig"), "// x\n").unwrap();

        let dest = cache
            .rename_tmp_into_cache(&tmp_name, "p/1220aaaa")
            .unwrap();
        assert!(dest.join("build.zig").exists());
        assert!(!tmp_path.exists());
    }

    #[test]
    fn losing_the_race_is_success() {
        let (_dir, cache) = cache();

        // Another process got there first.
        let winner = cache.layout.pkg.join("1220bbbb");
        fs::create_dir_all(&winner).unwrap();
        fs::write(winner.join("lib.zig"), "a\n").unwrap();

        let (tmp_path, tmp_name) = cache.tmp_dir().unwrap();
        fs::write(tmp_path.join("lib.zig"), "a\n").unwrap();

        let dest = cache
            .rename_tmp_into_cache(&tmp_name, "p/1220bbbb")
            .unwrap();
        assert_eq!(dest, winner);
        assert!(!tmp_path.exists(), "loser's temp tree should be deleted");
        assert!(winner.join("lib.zig").exists());
    }
}
