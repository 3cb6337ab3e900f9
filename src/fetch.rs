//! Fetching dependencies: location resolution, resource opening,
//! classification and unpacking.
//!
//! Heterogeneous sources (local paths, `file://` URLs, `http(s)://`
//! tarballs) are normalized into a canonical tree under the cache's `tmp/`
//! directory; hashing and promotion into `p/` happen afterwards and don't
//! care where the bytes came from.

use std::{
    fs,
    io::{BufReader, Read},
    path::{self, Component, Path, PathBuf},
};

use failure::bail;
use flate2::read::GzDecoder;
use reqwest::{
    blocking::{Client, Response},
    StatusCode,
};
use tar::Archive;
use url::Url;
use xz2::read::XzDecoder;

use crate::{
    manifest::Location,
    progress::{ProgressNode, ProgressRead},
    report::{Diagnostic, DiagnosticSite, Report},
    util::{
        self,
        errors::{ErrorKind, Res, ResultExt},
    },
};

/// The largest TLS ciphertext record; one buffered read swallows a whole
/// record from a network stream.
const MAX_TLS_RECORD_LEN: usize = (1 << 14) + 256 + 5;

/// Where a dependency's bytes live, after scheme classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchLocation {
    File(PathBuf),
    HttpRequest(Url),
}

impl FetchLocation {
    /// Classifies a dependency location. Path dependencies resolve
    /// relative to the referring package's directory; URLs must carry a
    /// supported scheme.
    pub fn from_location(
        location: &Location,
        base_dir: &Path,
        report: &mut Report,
        site: DiagnosticSite<'_>,
    ) -> Res<FetchLocation> {
        match location {
            Location::Path(p) => Ok(FetchLocation::File(base_dir.join(p))),
            Location::Url(raw) => {
                let url = match Url::parse(raw) {
                    Ok(url) => url,
                    Err(err) => {
                        report.push(Diagnostic::new(site, format!("invalid URL: {}", err)));
                        return Err(ErrorKind::PackageFetchFailed.into());
                    }
                };
                match url.scheme() {
                    "file" => match url.to_file_path() {
                        Ok(path) => Ok(FetchLocation::File(path)),
                        Err(()) => {
                            report.push(Diagnostic::new(site, "invalid file URL"));
                            Err(ErrorKind::PackageFetchFailed.into())
                        }
                    },
                    "http" | "https" => Ok(FetchLocation::HttpRequest(url)),
                    scheme => {
                        report.push(Diagnostic::new(site, format!("unknown scheme: {}", scheme)));
                        Err(ErrorKind::PackageFetchFailed.into())
                    }
                }
            }
        }
    }
}

/// An opened source of package bytes.
pub enum ReadableResource {
    File { path: PathBuf, file: fs::File },
    Directory { path: PathBuf },
    Http { url: Url, response: Response },
}

/// Opens a resolved location for reading. A trailing separator or the
/// absence of a file extension marks a local path as a directory; HTTP
/// requests must come back `200 OK`.
pub fn fetch_readable(
    client: &Client,
    location: FetchLocation,
    report: &mut Report,
    site: DiagnosticSite<'_>,
) -> Res<ReadableResource> {
    match location {
        FetchLocation::File(path) => {
            if path_names_directory(&path) {
                Ok(ReadableResource::Directory { path })
            } else {
                let file = fs::File::open(&path).context(ErrorKind::CannotDownload)?;
                Ok(ReadableResource::File { path, file })
            }
        }
        FetchLocation::HttpRequest(url) => {
            let response = client
                .get(url.as_str())
                .send()
                .context(ErrorKind::CannotDownload)?;
            if response.status() != StatusCode::OK {
                report.push(Diagnostic::new(
                    site,
                    format!(
                        "expected response status '200 OK', got '{}'",
                        response.status()
                    ),
                ));
                return Err(ErrorKind::PackageFetchFailed.into());
            }
            Ok(ReadableResource::Http { url, response })
        }
    }
}

fn path_names_directory(p: &Path) -> bool {
    let s = p.to_string_lossy();
    if s.ends_with('/') || s.ends_with(path::MAIN_SEPARATOR) {
        return true;
    }
    if p.extension().map_or(false, |e| !e.is_empty()) {
        return false;
    }
    fs::metadata(p).map(|m| m.is_dir()).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    /// Guesses the format from a file path suffix.
    pub fn from_path(path: &Path) -> Option<ArchiveFormat> {
        let name = path.file_name()?.to_str()?;
        if ends_with_ignore_case(name, ".tar.gz") {
            Some(ArchiveFormat::TarGz)
        } else if ends_with_ignore_case(name, ".tar.xz") {
            Some(ArchiveFormat::TarXz)
        } else {
            None
        }
    }

    /// Decides the format from HTTP response headers. `octet-stream`
    /// bodies are accepted only when the attachment filename gives the
    /// format away.
    pub fn from_http_headers(
        content_type: Option<&str>,
        content_disposition: Option<&str>,
    ) -> Option<ArchiveFormat> {
        let mime = content_type?.split(';').next().unwrap_or("").trim();
        if mime.eq_ignore_ascii_case("application/gzip")
            || mime.eq_ignore_ascii_case("application/x-gzip")
            || mime.eq_ignore_ascii_case("application/tar+gzip")
        {
            return Some(ArchiveFormat::TarGz);
        }
        if mime.eq_ignore_ascii_case("application/x-xz") {
            return Some(ArchiveFormat::TarXz);
        }
        if mime.eq_ignore_ascii_case("application/octet-stream")
            && is_tar_gz_attachment(content_disposition?)
        {
            return Some(ArchiveFormat::TarGz);
        }
        None
    }
}

fn ends_with_ignore_case(s: &str, suffix: &str) -> bool {
    s.len() >= suffix.len() && s[s.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Whether a `Content-Disposition` header announces a `.tar.gz`
/// attachment. Case-insensitive; the filename parameter may be quoted or
/// RFC 5987 encoded (`filename*=`).
pub fn is_tar_gz_attachment(content_disposition: &str) -> bool {
    fn inner(header: &str) -> Option<bool> {
        let lower = header.trim_start().to_ascii_lowercase();
        // The disposition type must lead the header, not merely occur in it.
        if !lower.starts_with("attachment;") {
            return Some(false);
        }
        let after_type = "attachment;".len();
        let mut value_start = lower[after_type..].find("filename")? + after_type + "filename".len();
        if lower.as_bytes().get(value_start) == Some(&b'*') {
            value_start += 1;
        }
        if lower.as_bytes().get(value_start) != Some(&b'=') {
            return Some(false);
        }
        value_start += 1;
        let value_end = lower[value_start..]
            .find(';')
            .map(|i| value_start + i)
            .unwrap_or_else(|| lower.len());
        let mut value = &lower[value_start..value_end];
        if value.ends_with('"') {
            value = &value[..value.len() - 1];
        }
        Some(value.ends_with(".tar.gz"))
    }
    inner(content_disposition).unwrap_or(false)
}

/// Materializes `resource` into `tmp_path`: directories are copied,
/// archives are decompressed and untarred with their single top-level
/// directory stripped.
pub fn unpack_resource(
    resource: ReadableResource,
    tmp_path: &Path,
    progress: &ProgressNode,
    report: &mut Report,
    site: DiagnosticSite<'_>,
) -> Res<()> {
    match resource {
        ReadableResource::Directory { path } => util::copy_dir(&path, tmp_path),
        ReadableResource::File { path, file } => {
            let format = match ArchiveFormat::from_path(&path) {
                Some(format) => format,
                None => {
                    report.push(Diagnostic::new(
                        site,
                        format!("unknown file type: {}", path.display()),
                    ));
                    return Err(ErrorKind::PackageFetchFailed.into());
                }
            };
            let len_hint = file.metadata().ok().map(|m| m.len());
            unpack_archive(format, file, len_hint, tmp_path, progress)
        }
        ReadableResource::Http { url, response } => {
            let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
            let content_disposition = header_str(&response, reqwest::header::CONTENT_DISPOSITION);
            let format =
                match ArchiveFormat::from_http_headers(content_type.as_deref(), content_disposition.as_deref()) {
                    Some(format) => format,
                    None => {
                        report.push(Diagnostic::new(
                            site,
                            format!(
                                "unrecognized Content-Type '{}' for {}",
                                content_type.as_deref().unwrap_or("<missing>"),
                                url
                            ),
                        ));
                        return Err(ErrorKind::PackageFetchFailed.into());
                    }
                };
            let len_hint = response.content_length();
            unpack_archive(format, response, len_hint, tmp_path, progress)
        }
    }
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn unpack_archive<R: Read>(
    format: ArchiveFormat,
    reader: R,
    len_hint: Option<u64>,
    tmp_path: &Path,
    progress: &ProgressNode,
) -> Res<()> {
    let reader = ProgressRead::new(reader, progress, len_hint);
    let reader = BufReader::with_capacity(MAX_TLS_RECORD_LEN, reader);
    match format {
        ArchiveFormat::TarGz => untar(GzDecoder::new(reader), tmp_path),
        ArchiveFormat::TarXz => untar(XzDecoder::new(reader), tmp_path),
    }
}

/// Tarballs conventionally wrap their contents in a single top-level
/// directory, which is stripped here. File modes from the archive are
/// kept, so executable bits survive the round trip onto disk and back
/// into the hash.
fn untar<R: Read>(reader: R, tmp_path: &Path) -> Res<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();

        let mut components = path.components().filter(|c| *c != Component::CurDir);
        let _top_level = components.next();
        let mut stripped = PathBuf::new();
        for component in components {
            match component {
                Component::Normal(c) => stripped.push(c),
                _ => bail!("archive entry has an unsupported path: {}", path.display()),
            }
        }
        if stripped.as_os_str().is_empty() {
            continue;
        }

        let dest = tmp_path.join(&stripped);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest)?;
    }

    Ok(())
}
