//! Package objects and the local dependency name table.
//!
//! A package owns a root directory somewhere on disk (a project directory,
//! a `p/<hex>` cache entry, or a synthetic `o/<hex>` entry) and maps the
//! local names its manifest declares onto child packages. The same child
//! may appear under different names in different parents; the registry is
//! the authoritative owner of fetched packages, and parent tables hold
//! shared references.

use std::{
    cell::{Ref, RefCell},
    env, fs,
    hash::Hasher,
    path::{Path, PathBuf},
    rc::Rc,
};

use failure::bail;
use indexmap::IndexMap;

use crate::{cache::Cache, util::errors::Res};

/// Basename of the build script the build runner looks for in a package
/// root.
pub const BUILD_FILE_BASENAME: &str = "build.zig";

pub type PackageTable = IndexMap<String, Rc<Package>>;

/// Filesystem handle to a package's root directory. Exactly one package in
/// the graph owns any given directory; the rest borrow it.
#[derive(Debug, Clone)]
pub enum DirHandle {
    Owned(PathBuf),
    Borrowed(PathBuf),
}

impl DirHandle {
    pub fn path(&self) -> &Path {
        match self {
            DirHandle::Owned(p) | DirHandle::Borrowed(p) => p,
        }
    }
}

#[derive(Debug)]
pub struct Package {
    root_dir: DirHandle,
    /// Path of the root source file relative to `root_dir`; empty for
    /// packages without a build script of their own.
    root_src_path: String,
    table: RefCell<PackageTable>,
}

impl Package {
    /// Creates a package rooted at `dir_path`, or at the current working
    /// directory when no path is given.
    pub fn from_path(dir_path: Option<&Path>, src_path: &str) -> Res<Rc<Package>> {
        let root_dir = match dir_path {
            Some(p) => DirHandle::Owned(checked_dir(p)?),
            None => DirHandle::Borrowed(env::current_dir()?),
        };

        Ok(Package::new(root_dir, src_path))
    }

    /// Creates a package under `parent_dir`, either in the `sub_path`
    /// subdirectory (owned) or sharing the parent directory itself.
    pub fn with_dir(parent_dir: &Path, sub_path: Option<&str>, src_path: &str) -> Res<Rc<Package>> {
        let root_dir = match sub_path {
            Some(sub) => DirHandle::Owned(checked_dir(&parent_dir.join(sub))?),
            None => DirHandle::Borrowed(checked_dir(parent_dir)?),
        };

        Ok(Package::new(root_dir, src_path))
    }

    /// Creates a synthetic single-file package under `o/` in the cache.
    /// The digest covers the crate version and the contents, so generated
    /// sources are shared between runs but never between releases.
    pub fn from_file_contents(cache: &Cache, basename: &str, contents: &str) -> Res<Rc<Package>> {
        let (tmp_path, tmp_name) = cache.tmp_dir()?;
        fs::write(tmp_path.join(basename), contents)?;

        let mut hasher = seahash::SeaHasher::new();
        hasher.write(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.write(contents.as_bytes());
        let hex = format!("{:016x}", hasher.finish());

        let dest = cache.rename_tmp_into_cache(&tmp_name, &format!("o/{}", hex))?;
        Ok(Package::new(DirHandle::Owned(dest), basename))
    }

    fn new(root_dir: DirHandle, src_path: &str) -> Rc<Package> {
        Rc::new(Package {
            root_dir,
            root_src_path: src_path.to_string(),
            table: RefCell::new(PackageTable::new()),
        })
    }

    /// Inserts `child` into the local table under `name`. The table holds a
    /// shared reference; destruction of the child is the registry's call.
    pub fn add(&self, name: &str, child: &Rc<Package>) {
        self.table
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(child));
    }

    pub fn get(&self, name: &str) -> Option<Rc<Package>> {
        self.table.borrow().get(name).cloned()
    }

    pub fn table(&self) -> Ref<'_, PackageTable> {
        self.table.borrow()
    }

    pub fn root_dir(&self) -> &Path {
        self.root_dir.path()
    }

    pub fn root_src_path(&self) -> &str {
        &self.root_src_path
    }

    /// Whether this package carries its own build script.
    pub fn has_build_file(&self) -> bool {
        !self.root_src_path.is_empty()
    }
}

fn checked_dir(p: &Path) -> Res<PathBuf> {
    let meta = fs::metadata(p)?;
    if !meta.is_dir() {
        bail!("package root {} is not a directory", p.display());
    }
    Ok(p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    use slog::o;
    use tempdir::TempDir;

    #[test]
    fn same_child_under_different_names() {
        let dir = TempDir::new("pkg-test").unwrap();
        let parent_a = Package::from_path(Some(dir.path()), BUILD_FILE_BASENAME).unwrap();
        let parent_b = Package::from_path(Some(dir.path()), BUILD_FILE_BASENAME).unwrap();
        let child = Package::from_path(Some(dir.path()), BUILD_FILE_BASENAME).unwrap();

        parent_a.add("alpha", &child);
        parent_b.add("beta", &child);

        assert!(Rc::ptr_eq(&parent_a.get("alpha").unwrap(), &child));
        assert!(Rc::ptr_eq(&parent_b.get("beta").unwrap(), &child));
    }

    #[test]
    fn with_dir_owns_subdirectory_or_borrows_parent() {
        let dir = TempDir::new("pkg-test").unwrap();
        fs::create_dir(dir.path().join("vendored")).unwrap();

        let owned = Package::with_dir(dir.path(), Some("vendored"), BUILD_FILE_BASENAME).unwrap();
        assert_eq!(owned.root_dir(), dir.path().join("vendored"));

        let borrowed = Package::with_dir(dir.path(), None, BUILD_FILE_BASENAME).unwrap();
        assert_eq!(borrowed.root_dir(), dir.path());

        assert!(Package::with_dir(dir.path(), Some("missing"), BUILD_FILE_BASENAME).is_err());
    }

    #[test]
    fn file_pkg_lands_in_obj_bucket() {
        let dir = TempDir::new("pkg-test").unwrap();
        let logger = slog::Logger::root(slog::Discard, o!());
        let cache = Cache::from_disk(&logger, dir.path()).unwrap();

        let pkg =
            Package::from_file_contents(&cache, "dependencies.zig", "pub const x = 1;\n").unwrap();
        assert!(pkg.root_dir().starts_with(&cache.layout.obj));
        assert!(pkg.root_dir().join("dependencies.zig").exists());

        // Identical contents land in the same entry.
        let again =
            Package::from_file_contents(&cache, "dependencies.zig", "pub const x = 1;\n").unwrap();
        assert_eq!(pkg.root_dir(), again.root_dir());
    }
}
