//! The global module registry: a hash-keyed dedup table guaranteeing that
//! each content-addressed package yields at most one package object per
//! run.
//!
//! The compiler has a rule that a file must not belong to more than one
//! module, so when two manifests pin the same hash they must receive
//! pointers to the same package.

use std::{fs, io, path::Path, rc::Rc};

use failure::bail;
use indexmap::IndexMap;

use crate::{
    cache::Cache,
    hash,
    package::{Package, BUILD_FILE_BASENAME},
    util::errors::Res,
};

/// State of one hash in the registry.
#[derive(Debug)]
pub enum Slot {
    /// Declared by some manifest but not fetched yet; only used to size
    /// the progress estimate before work begins.
    Pending,
    /// Resolved to a package with its own build script.
    Module(Rc<Package>),
    /// Resolved to a plain source tree without a build script.
    SourceOnly(Rc<Package>),
}

impl Slot {
    pub fn package(&self) -> Option<&Rc<Package>> {
        match self {
            Slot::Module(pkg) | Slot::SourceOnly(pkg) => Some(pkg),
            Slot::Pending => None,
        }
    }
}

/// A successful cache lookup.
pub struct CacheHit {
    pub pkg: Rc<Package>,
    pub is_module: bool,
    /// Whether this package object had already been handed out earlier in
    /// the run, in which case the caller must not recurse into it again.
    pub found_existing: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    slots: IndexMap<String, Slot>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Marks a declared hash as known-but-unfetched. Returns true when the
    /// hash was new, so the caller can grow the progress estimate.
    pub fn mark_pending(&mut self, hex: &str) -> bool {
        if self.slots.contains_key(hex) {
            false
        } else {
            self.slots.insert(hex.to_string(), Slot::Pending);
            true
        }
    }

    /// Looks `hex` up in the cache, avoiding fetch and unpack entirely
    /// when `p/<hex>` already exists on disk. Returns `None` when it
    /// doesn't and the fetch path must run.
    pub fn get_cached(&mut self, cache: &Cache, hex: &str) -> Res<Option<CacheHit>> {
        // A malformed digest can never name a cache entry, and must not be
        // joined into a path.
        if !hash::is_well_formed_hex(hex) {
            return Ok(None);
        }

        let pkg_dir = cache.layout.pkg.join(hex);
        match fs::metadata(&pkg_dir) {
            Ok(ref meta) if meta.is_dir() => {}
            Ok(_) => bail!("{} exists but is not a directory", pkg_dir.display()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if let Some(slot) = self.slots.get(hex) {
            match slot {
                Slot::Module(pkg) => {
                    return Ok(Some(CacheHit {
                        pkg: Rc::clone(pkg),
                        is_module: true,
                        found_existing: true,
                    }));
                }
                Slot::SourceOnly(pkg) => {
                    return Ok(Some(CacheHit {
                        pkg: Rc::clone(pkg),
                        is_module: false,
                        found_existing: true,
                    }));
                }
                Slot::Pending => {}
            }
        }

        let (pkg, is_module) = package_for_dir(&pkg_dir)?;
        self.resolve_slot(hex, &pkg, is_module);
        Ok(Some(CacheHit {
            pkg,
            is_module,
            found_existing: false,
        }))
    }

    /// Registers a freshly fetched package. If a resolved entry already
    /// exists for the hash the earlier package wins and the fresh one is
    /// dropped, so pointer identity holds for the rest of the run.
    pub fn register(&mut self, hex: &str, pkg: Rc<Package>, is_module: bool) -> (Rc<Package>, bool) {
        if let Some(existing) = self.slots.get(hex).and_then(Slot::package) {
            return (Rc::clone(existing), true);
        }
        self.resolve_slot(hex, &pkg, is_module);
        (pkg, false)
    }

    fn resolve_slot(&mut self, hex: &str, pkg: &Rc<Package>, is_module: bool) {
        let slot = if is_module {
            Slot::Module(Rc::clone(pkg))
        } else {
            Slot::SourceOnly(Rc::clone(pkg))
        };
        self.slots.insert(hex.to_string(), slot);
    }

    pub fn get(&self, hex: &str) -> Option<&Slot> {
        self.slots.get(hex)
    }

    pub fn resolved_package(&self, hex: &str) -> Option<&Rc<Package>> {
        self.slots.get(hex).and_then(Slot::package)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Slot)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Builds a package object rooted at a cache directory, probing for the
/// build script to decide whether it is a module.
fn package_for_dir(pkg_dir: &Path) -> Res<(Rc<Package>, bool)> {
    let is_module = pkg_dir.join(BUILD_FILE_BASENAME).exists();
    let src_path = if is_module { BUILD_FILE_BASENAME } else { "" };
    let pkg = Package::from_path(Some(pkg_dir), src_path)?;
    Ok((pkg, is_module))
}
