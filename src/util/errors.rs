//! Error types for the fetch core; nothing ever goes right.

pub use failure::{Error, Fail, ResultExt};

pub type Res<T> = Result<T, Error>;

/// The coarse error kinds surfaced at the crate boundary. User-attributable
/// failures carry their details in the error bundle; these kinds only tell
/// the caller which bucket a failure landed in.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "package fetch failed")]
    PackageFetchFailed,
    #[fail(display = "package hash unavailable")]
    PackageHashUnavailable,
    #[fail(display = "illegal file type in package")]
    IllegalFileTypeInPackage,
    #[fail(display = "could not download package")]
    CannotDownload,
}
