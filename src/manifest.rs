//! The per-package dependency manifest (`deps.toml`).
//!
//! Each dependency pins down exactly where its content comes from and what
//! that content hashes to; the manifest doubles as the lockfile. Spans of
//! the interesting tokens are kept so later failures (a 404 months after
//! the manifest was written, a hash mismatch) can point at the line that
//! caused them.

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use failure::bail;
use indexmap::IndexMap;
use serde::Deserialize;
use toml::Spanned;

use crate::{
    report::{Diagnostic, DiagnosticSite, Report, Span},
    util::errors::{ErrorKind, Res},
};

pub const MANIFEST_BASENAME: &str = "deps.toml";

/// Manifests beyond this size are rejected outright.
pub const MAX_MANIFEST_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Url(String),
    Path(String),
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub location: Location,
    pub location_span: Span,
    pub hash: Option<String>,
    pub hash_span: Option<Span>,
}

#[derive(Debug)]
pub struct Manifest {
    pub path: PathBuf,
    pub source: String,
    pub dependencies: IndexMap<String, Dependency>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    dependencies: IndexMap<String, Spanned<RawDependency>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    url: Option<Spanned<String>>,
    path: Option<Spanned<String>>,
    hash: Option<Spanned<String>>,
}

/// Reads `dir/deps.toml`. A missing manifest is not an error; it just
/// means the package has no dependencies.
pub fn load(dir: &Path) -> Res<Option<(PathBuf, String)>> {
    let path = dir.join(MANIFEST_BASENAME);
    let mut file = match fs::File::open(&path) {
        Ok(f) => f,
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    if len > MAX_MANIFEST_BYTES {
        bail!(
            "{}: manifest is larger than the {} byte limit",
            path.display(),
            MAX_MANIFEST_BYTES
        );
    }

    let mut source = String::with_capacity(len as usize);
    file.read_to_string(&mut source)?;
    Ok(Some((path, source)))
}

impl Manifest {
    /// Parses and validates manifest source. Syntactic and semantic
    /// problems are pushed into the error bundle and surface as a fetch
    /// failure.
    pub fn parse(path: PathBuf, source: String, report: &mut Report) -> Res<Manifest> {
        let raw: RawManifest = match toml::from_str(&source) {
            Ok(raw) => raw,
            Err(err) => {
                let span = toml_error_span(&source, &err);
                report.push(Diagnostic::new(
                    DiagnosticSite::new(&path, &source, span),
                    err.to_string(),
                ));
                return Err(ErrorKind::PackageFetchFailed.into());
            }
        };

        let mut dependencies = IndexMap::new();
        let mut invalid = false;
        for (name, spanned_dep) in raw.dependencies {
            let dep_span = Span::new(spanned_dep.start(), spanned_dep.end());
            let dep = spanned_dep.into_inner();
            let (location, location_span) = match (dep.url, dep.path) {
                (Some(url), None) => {
                    let span = Span::new(url.start(), url.end());
                    (Location::Url(url.into_inner()), span)
                }
                (None, Some(path_val)) => {
                    let span = Span::new(path_val.start(), path_val.end());
                    (Location::Path(path_val.into_inner()), span)
                }
                (Some(url), Some(_)) => {
                    report.push(Diagnostic::new(
                        DiagnosticSite::new(&path, &source, Span::new(url.start(), url.end())),
                        format!("dependency '{}' specifies both url and path", name),
                    ));
                    invalid = true;
                    continue;
                }
                (None, None) => {
                    report.push(Diagnostic::new(
                        DiagnosticSite::new(&path, &source, dep_span),
                        format!("dependency '{}' must specify either url or path", name),
                    ));
                    invalid = true;
                    continue;
                }
            };

            let (hash, hash_span) = match dep.hash {
                Some(h) => {
                    let span = Span::new(h.start(), h.end());
                    (Some(h.into_inner()), Some(span))
                }
                None => (None, None),
            };

            dependencies.insert(
                name,
                Dependency {
                    location,
                    location_span,
                    hash,
                    hash_span,
                },
            );
        }

        if invalid {
            return Err(ErrorKind::PackageFetchFailed.into());
        }

        Ok(Manifest {
            path,
            source,
            dependencies,
        })
    }
}

fn toml_error_span(source: &str, err: &toml::de::Error) -> Span {
    let offset = match err.line_col() {
        Some((line, col)) => {
            let line_start = source
                .split('\n')
                .take(line)
                .map(|l| l.len() + 1)
                .sum::<usize>();
            (line_start + col).min(source.len())
        }
        None => 0,
    };
    Span::new(offset, (offset + 1).min(source.len()))
}
