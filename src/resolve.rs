//! Recursive resolution of the dependency graph.
//!
//! The driver walks manifests depth-first, one dependency at a time in
//! manifest order. Each dependency is either found in the cache or fetched,
//! unpacked, hashed and promoted; either way the result is a shared package
//! object registered under its hash, and the walk recurses into it. The
//! walk is deliberately serial so cache insertions, diagnostics and the
//! emitted dependency source stay deterministic; parallelism lives inside
//! the per-file hashing pool.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    rc::Rc,
};

use scoped_threadpool::Pool;
use slog::{debug, info, o, warn, Logger};

use crate::{
    cache::Cache,
    emit::{DepsSource, DEPS_SOURCE_BASENAME},
    fetch::{self, FetchLocation},
    hash,
    manifest::{self, Dependency, Manifest},
    package::{Package, PackageTable, BUILD_FILE_BASENAME},
    progress::ProgressNode,
    registry::{CacheHit, Registry},
    report::{Diagnostic, DiagnosticSite, Report},
    util::errors::{ErrorKind, Res},
};

/// Everything the build runner needs once the graph is resolved.
#[derive(Debug)]
pub struct Resolved {
    pub root: Rc<Package>,
    /// Synthetic package holding the generated dependency source, with
    /// every distinct dependency in its table keyed by hash.
    pub deps_pkg: Rc<Package>,
    pub registry: Registry,
    /// The rendered dependency source fragment.
    pub source: String,
}

/// Resolves the whole dependency graph of the project rooted at
/// `root_dir`. User-attributable failures land in `report` and surface as
/// `PackageFetchFailed`.
pub fn fetch_and_resolve(
    cache: &Cache,
    root_dir: &Path,
    report: &mut Report,
    progress: &ProgressNode,
) -> Res<Resolved> {
    // The project directory belongs to the caller; the root package only
    // borrows it.
    let root = Package::with_dir(root_dir, None, BUILD_FILE_BASENAME)?;
    progress.increase_estimated_total(1);

    let mut resolver = Resolver {
        cache,
        root: Rc::clone(&root),
        registry: Registry::new(),
        deps_table: PackageTable::new(),
        output: DepsSource::new(),
        report,
        progress,
        pool: Pool::new(num_cpus::get() as u32),
        logger: cache
            .logger
            .new(o!("root" => root_dir.display().to_string())),
    };

    resolver.resolve(&root, None, true)?;

    let source = resolver.output.render();
    let deps_pkg = Package::from_file_contents(cache, DEPS_SOURCE_BASENAME, &source)?;
    for (hex, pkg) in &resolver.deps_table {
        deps_pkg.add(hex, pkg);
    }

    Ok(Resolved {
        root,
        deps_pkg,
        registry: resolver.registry,
        source,
    })
}

struct Resolver<'a> {
    cache: &'a Cache,
    root: Rc<Package>,
    registry: Registry,
    /// One entry per distinct hash encountered, keyed by hash. Becomes
    /// the deps-package's table once the walk finishes.
    deps_table: PackageTable,
    output: DepsSource,
    report: &'a mut Report,
    progress: &'a ProgressNode,
    pool: Pool,
    logger: Logger,
}

impl<'a> Resolver<'a> {
    /// Resolves one package and its transitive dependencies. `this_hash`
    /// is absent only for the root package.
    fn resolve(
        &mut self,
        pkg: &Rc<Package>,
        this_hash: Option<&str>,
        has_build_file: bool,
    ) -> Res<()> {
        let dir = pkg.root_dir().to_path_buf();
        if let Some(hex) = this_hash {
            self.output.begin_package(hex, &dir, has_build_file);
        }

        let manifest = match manifest::load(&dir)? {
            // No manifest, no dependencies.
            None => {
                self.progress.complete_one();
                return Ok(());
            }
            Some((path, source)) => Manifest::parse(path, source, self.report)?,
        };

        // Pending slots let the progress total reflect the whole known
        // graph before any fetch begins.
        for dep in manifest.dependencies.values() {
            if let Some(declared) = &dep.hash {
                if hash::is_well_formed_hex(declared) && self.registry.mark_pending(declared) {
                    self.progress.increase_estimated_total(1);
                }
            }
        }

        for (name, dep) in &manifest.dependencies {
            let (child, hex, is_module, found_existing) =
                match self.resolve_dependency(&manifest, dep) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        warn!(
                            self.logger, "dependency resolution failed";
                            "package" => package_path_name(&self.root, None, pkg),
                            "name" => name.as_str()
                        );
                        return Err(err);
                    }
                };

            if !found_existing {
                self.resolve(&child, Some(&hex), is_module)?;
            }

            pkg.add(name, &child);
            match self.deps_table.get(&hex) {
                Some(existing) => debug_assert!(Rc::ptr_eq(existing, &child)),
                None => {
                    self.deps_table.insert(hex.clone(), Rc::clone(&child));
                }
            }
            self.output.push_dep(this_hash, name, &hex);
        }

        self.progress.complete_one();
        Ok(())
    }

    /// Resolves a single dependency to a package object: a registry or
    /// disk cache hit when possible, the full fetch pipeline otherwise.
    fn resolve_dependency(
        &mut self,
        manifest: &Manifest,
        dep: &Dependency,
    ) -> Res<(Rc<Package>, String, bool, bool)> {
        if let Some(declared) = &dep.hash {
            if let Some(CacheHit {
                pkg,
                is_module,
                found_existing,
            }) = self.registry.get_cached(self.cache, declared)?
            {
                debug!(self.logger, "cache hit"; "hash" => declared.as_str());
                return Ok((pkg, declared.clone(), is_module, found_existing));
            }
        }

        self.fetch_and_unpack(manifest, dep)
    }

    /// The slow path: fetch, unpack into a temp directory, hash, verify
    /// and promote into the cache.
    fn fetch_and_unpack(
        &mut self,
        manifest: &Manifest,
        dep: &Dependency,
    ) -> Res<(Rc<Package>, String, bool, bool)> {
        let site = DiagnosticSite::new(&manifest.path, &manifest.source, dep.location_span);
        let base_dir = manifest.path.parent().unwrap_or_else(|| Path::new("."));

        let location = FetchLocation::from_location(&dep.location, base_dir, self.report, site)?;
        let resource = fetch::fetch_readable(self.cache.client(), location, self.report, site)?;

        let (tmp_path, tmp_name) = self.cache.tmp_dir()?;
        fetch::unpack_resource(resource, &tmp_path, self.progress, self.report, site)?;

        let digest = hash::compute_directory_hash(&mut self.pool, &tmp_path, &self.logger)?;
        let hex = hash::hex_digest(&digest);

        match &dep.hash {
            None => {
                self.report.push(
                    Diagnostic::new(site, "dependency is missing hash field")
                        .note(format!("expected .hash = \"{}\"", hex)),
                );
                let _ = remove_dir_all::remove_dir_all(&tmp_path);
                return Err(ErrorKind::PackageFetchFailed.into());
            }
            Some(declared) if *declared != hex => {
                let hash_site = site.with_span(dep.hash_span.unwrap_or(dep.location_span));
                self.report.push(Diagnostic::new(
                    hash_site,
                    format!("hash mismatch: expected {}, found {}", declared, hex),
                ));
                let _ = remove_dir_all::remove_dir_all(&tmp_path);
                return Err(ErrorKind::PackageFetchFailed.into());
            }
            Some(_) => {}
        }

        self.cache
            .rename_tmp_into_cache(&tmp_name, &format!("p/{}", hex))?;
        let pkg_dir = self.cache.layout.pkg.join(&hex);
        info!(
            self.logger, "fetched dependency";
            "hash" => hex.as_str(),
            "dest" => pkg_dir.display().to_string()
        );

        let is_module = pkg_dir.join(BUILD_FILE_BASENAME).exists();
        let src_path = if is_module { BUILD_FILE_BASENAME } else { "" };
        let pkg = Package::from_path(Some(&pkg_dir), src_path)?;

        // A sibling manifest listing the same hash may have resolved it
        // while our unpack was in flight; the registry's pointer wins.
        let (pkg, found_existing) = self.registry.register(&hex, pkg, is_module);
        Ok((pkg, hex, is_module, found_existing))
    }
}

/// A human-readable dotted path to `target`, recovered by breadth-first
/// search over the package graph from the root (and the main package, if
/// it differs). Slow, and used only to name packages in error messages.
pub fn package_path_name(
    root: &Rc<Package>,
    main_pkg: Option<&Rc<Package>>,
    target: &Rc<Package>,
) -> String {
    let mut queue: VecDeque<Rc<Package>> = VecDeque::new();
    let mut parents: HashMap<*const Package, Rc<Package>> = HashMap::new();
    let mut visited: Vec<*const Package> = Vec::new();

    queue.push_back(Rc::clone(root));
    visited.push(Rc::as_ptr(root));
    if let Some(main_pkg) = main_pkg {
        if !Rc::ptr_eq(main_pkg, root) {
            queue.push_back(Rc::clone(main_pkg));
            visited.push(Rc::as_ptr(main_pkg));
        }
    }

    while let Some(current) = queue.pop_front() {
        if Rc::ptr_eq(&current, target) {
            let mut names: Vec<String> = Vec::new();
            let mut node = current;
            while let Some(parent) = parents.get(&Rc::as_ptr(&node)) {
                let edge = parent
                    .table()
                    .iter()
                    .find(|(_, child)| Rc::ptr_eq(child, &node))
                    .map(|(name, _)| name.clone())
                    .unwrap_or_default();
                names.push(edge);
                node = Rc::clone(parent);
            }
            names.reverse();
            let mut out = String::from("root");
            for name in names {
                out.push('.');
                out.push_str(&name);
            }
            return out;
        }

        let children: Vec<Rc<Package>> = current.table().values().cloned().collect();
        for child in children {
            let ptr = Rc::as_ptr(&child);
            if !visited.contains(&ptr) {
                visited.push(ptr);
                parents.insert(ptr, Rc::clone(&current));
                queue.push_back(child);
            }
        }
    }

    "<unnamed>".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempdir::TempDir;

    fn pkg(dir: &TempDir) -> Rc<Package> {
        Package::from_path(Some(dir.path()), BUILD_FILE_BASENAME).unwrap()
    }

    #[test]
    fn path_name_walks_parent_chain() {
        let dir = TempDir::new("resolve-test").unwrap();
        let root = pkg(&dir);
        let mid = pkg(&dir);
        let leaf = pkg(&dir);
        root.add("alpha", &mid);
        mid.add("beta", &leaf);

        assert_eq!(package_path_name(&root, None, &root), "root");
        assert_eq!(package_path_name(&root, None, &mid), "root.alpha");
        assert_eq!(package_path_name(&root, None, &leaf), "root.alpha.beta");
    }

    #[test]
    fn path_name_survives_cycles() {
        let dir = TempDir::new("resolve-test").unwrap();
        let root = pkg(&dir);
        let child = pkg(&dir);
        root.add("alpha", &child);
        child.add("back", &root);

        let stranger = pkg(&dir);
        assert_eq!(package_path_name(&root, None, &stranger), "<unnamed>");
    }

    #[test]
    fn shortest_path_wins() {
        let dir = TempDir::new("resolve-test").unwrap();
        let root = pkg(&dir);
        let via = pkg(&dir);
        let shared = pkg(&dir);
        root.add("direct", &shared);
        root.add("via", &via);
        via.add("indirect", &shared);

        assert_eq!(package_path_name(&root, None, &shared), "root.direct");
    }
}
