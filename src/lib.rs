//! The package acquisition and content-addressed cache core of the quarry
//! build runner.
//!
//! Given a root project directory, [`resolve::fetch_and_resolve`] walks the
//! `deps.toml` manifests, fetches every pinned dependency from its local
//! path or remote archive, verifies it against its multihash digest,
//! materializes it in the global content-addressed cache, and emits the
//! dependency source fragment the build runner imports.

pub mod cache;
pub mod emit;
pub mod fetch;
pub mod hash;
pub mod manifest;
pub mod package;
pub mod progress;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod util;
