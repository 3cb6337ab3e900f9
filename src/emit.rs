//! Generation of the dependency source fragment the build runner imports.
//!
//! The fragment enumerates every distinct package once under `packages`,
//! keyed by its hash, followed by the root package's own dependency list.
//! Entries accumulate in depth-first traversal order while the resolver
//! walks the graph; `render` serializes them at the end.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// Basename of the generated source file.
pub const DEPS_SOURCE_BASENAME: &str = "dependencies.zig";

#[derive(Debug)]
struct PackageEntry {
    build_root: PathBuf,
    has_build_file: bool,
    deps: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct DepsSource {
    packages: IndexMap<String, PackageEntry>,
    root_deps: Vec<(String, String)>,
}

impl DepsSource {
    pub fn new() -> Self {
        DepsSource::default()
    }

    /// Opens the entry for a package as the resolver enters it. Entering
    /// the same hash again is a no-op, so each distinct package is
    /// enumerated exactly once.
    pub fn begin_package(&mut self, hash: &str, build_root: &Path, has_build_file: bool) {
        self.packages
            .entry(hash.to_string())
            .or_insert_with(|| PackageEntry {
                build_root: build_root.to_path_buf(),
                has_build_file,
                deps: Vec::new(),
            });
    }

    /// Appends a resolved dependency edge; `parent_hash` of `None` means
    /// the edge belongs to the root package.
    pub fn push_dep(&mut self, parent_hash: Option<&str>, name: &str, dep_hash: &str) {
        match parent_hash {
            Some(parent) => {
                if let Some(entry) = self.packages.get_mut(parent) {
                    entry.deps.push((name.to_string(), dep_hash.to_string()));
                }
            }
            None => self.root_deps.push((name.to_string(), dep_hash.to_string())),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("pub const packages = struct {\n");
        for (hash, entry) in &self.packages {
            out.push_str("    pub const ");
            write_ident(&mut out, hash);
            out.push_str(" = struct {\n");

            out.push_str("        pub const build_root = ");
            write_string_literal(&mut out, &entry.build_root.to_string_lossy());
            out.push_str(";\n");

            if entry.has_build_file {
                out.push_str("        pub const build_zig = @import(");
                write_string_literal(&mut out, hash);
                out.push_str(");\n");
            }

            write_deps(&mut out, "        ", "deps", &entry.deps);
            out.push_str("    };\n");
        }
        out.push_str("};\n\n");
        write_deps(&mut out, "", "root_deps", &self.root_deps);
        out
    }
}

fn write_deps(out: &mut String, indent: &str, name: &str, deps: &[(String, String)]) {
    out.push_str(indent);
    out.push_str("pub const ");
    out.push_str(name);
    out.push_str(": []const struct { []const u8, []const u8 } = &.{");
    if deps.is_empty() {
        out.push_str("};\n");
        return;
    }
    out.push('\n');
    for (dep_name, dep_hash) in deps {
        out.push_str(indent);
        out.push_str("    .{ ");
        write_string_literal(out, dep_name);
        out.push_str(", ");
        write_string_literal(out, dep_hash);
        out.push_str(" },\n");
    }
    out.push_str(indent);
    out.push_str("};\n");
}

/// Writes `name` as an identifier, quoting it when it isn't a valid bare
/// identifier (hashes start with a digit, so they always are).
fn write_ident(out: &mut String, name: &str) {
    let mut chars = name.chars();
    let bare = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if bare {
        out.push_str(name);
    } else {
        out.push('@');
        write_string_literal(out, name);
    }
}

fn write_string_literal(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
