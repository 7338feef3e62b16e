//! Static file serving: a request handler that maps requests to files
//! under a configured root and streams them back, optionally compressed
//! through on-disk gzip sidecars and/or limited to a byte range.
//!
//! Requested file handles are cached and reference-counted; a background
//! janitor evicts entries after [`StaticFs::cache_duration`] of age and
//! defers closing handles that still have readers streaming from them.

mod cache;
mod compress;
mod dir_index;
mod entry;
mod error;
mod range;
mod reader;
mod rewrite;

pub use error::FsError;
pub use range::{parse_byte_range, RangeError};
pub use rewrite::{path_slashes_stripper, vhost_path_rewriter, PathRewriteFn};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use httpdate::parse_http_date;
use hyper::{header, HeaderMap, Method, Request, Response, StatusCode};
use once_cell::sync::{Lazy, OnceCell};
use tracing::{error, warn};

use crate::common::{empty, full, BoxedBody};
use crate::handlers::Handler;

use cache::{spawn_janitor, CacheKind, EntryCache, EntryGuard};
use compress::MAX_COMPRESSIBLE_FILE_SIZE;
use entry::FileEntry;
use reader::{new_reader, reader_body};

/// Default idle time before cached file handles are evicted.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(10);
/// Default suffix appended to compressed sidecar files.
pub const DEFAULT_COMPRESSED_FILE_SUFFIX: &str = ".gz";

/// Produces the body of a 404 response, given the request path, in place
/// of the default "Cannot open requested path" text.
pub type NotFoundHandler = Arc<dyn Fn(&str) -> Response<BoxedBody> + Send + Sync>;

/// Settings for a static file handler.
///
/// With `compress` enabled the handler minimizes CPU usage by caching
/// compressed files on disk: it appends `compressed_file_suffix` to the
/// original file name and saves the gzip-encoded contents under the new
/// name, so give the process write access to the served tree to avoid
/// re-encoding on every cache miss.
pub struct StaticFs {
    /// Directory whose contents are exposed. Empty → current directory.
    /// Trailing slashes are stripped.
    pub root: PathBuf,
    /// Index file names tried, in order, on directory access.
    pub index_names: Vec<String>,
    /// Synthesize an HTML listing for directories without an index file.
    /// Generation can be slow for directories with many entries.
    pub generate_index_pages: bool,
    /// Transparently gzip responses, caching sidecar files next to the
    /// originals.
    pub compress: bool,
    /// Advertise and honor `Range: bytes=...` requests.
    pub accept_byte_range: bool,
    /// Optional rewriter applied to the request path before the root
    /// lookup. The result must not contain `/../`.
    pub path_rewrite: Option<PathRewriteFn>,
    /// Replaces the default 404 body.
    pub path_not_found: Option<NotFoundHandler>,
    /// Idle time before cached entries are evicted. Zero → 10 s.
    pub cache_duration: Duration,
    /// Sidecar suffix. Empty → `.gz`.
    pub compressed_file_suffix: String,
}

impl Default for StaticFs {
    fn default() -> Self {
        StaticFs {
            root: PathBuf::new(),
            index_names: Vec::new(),
            generate_index_pages: false,
            compress: false,
            accept_byte_range: false,
            path_rewrite: None,
            path_not_found: None,
            cache_duration: DEFAULT_CACHE_DURATION,
            compressed_file_suffix: DEFAULT_COMPRESSED_FILE_SUFFIX.to_owned(),
        }
    }
}

impl StaticFs {
    pub fn into_handler(self) -> StaticFileHandler {
        StaticFileHandler::new(self)
    }
}

struct FsInner {
    root: PathBuf,
    index_names: Vec<String>,
    generate_index_pages: bool,
    compress: bool,
    accept_byte_range: bool,
    path_rewrite: Option<PathRewriteFn>,
    path_not_found: Option<NotFoundHandler>,
    cache_duration: Duration,
    compressed_file_suffix: String,
    cache: Arc<EntryCache>,
    janitor: OnceCell<()>,
}

/// The request handler built from a [`StaticFs`]. Cheap to clone; clones
/// share the handle cache and its janitor.
#[derive(Clone)]
pub struct StaticFileHandler {
    inner: Arc<FsInner>,
}

impl StaticFileHandler {
    pub fn new(options: StaticFs) -> StaticFileHandler {
        let mut root = options.root;
        if root.as_os_str().is_empty() {
            root = PathBuf::from(".");
        } else if let Some(s) = root.to_str() {
            let trimmed = s.trim_end_matches('/');
            root = if trimmed.is_empty() {
                PathBuf::from("/")
            } else {
                PathBuf::from(trimmed)
            };
        }

        let cache_duration = if options.cache_duration.is_zero() {
            DEFAULT_CACHE_DURATION
        } else {
            options.cache_duration
        };
        let compressed_file_suffix = if options.compressed_file_suffix.is_empty() {
            DEFAULT_COMPRESSED_FILE_SUFFIX.to_owned()
        } else {
            options.compressed_file_suffix
        };

        StaticFileHandler {
            inner: Arc::new(FsInner {
                root,
                index_names: options.index_names,
                generate_index_pages: options.generate_index_pages,
                compress: options.compress,
                accept_byte_range: options.accept_byte_range,
                path_rewrite: options.path_rewrite,
                path_not_found: options.path_not_found,
                cache_duration,
                compressed_file_suffix,
                cache: EntryCache::new(),
                janitor: OnceCell::new(),
            }),
        }
    }

    /// Serves one request. The response is always fully formed: errors
    /// surface as 4xx/5xx statuses with short text bodies, never as
    /// `Err`. Generic over the request body, which is ignored.
    pub async fn serve<B>(&self, req: &Request<B>) -> Response<BoxedBody> {
        self.serve_inner(req, None, true).await
    }

    async fn serve_inner<B>(
        &self,
        req: &Request<B>,
        path_override: Option<&str>,
        allow_compress: bool,
    ) -> Response<BoxedBody> {
        let fs = &self.inner;
        fs.janitor
            .get_or_init(|| spawn_janitor(&fs.cache, fs.cache_duration));

        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok());
        let rewritten = match path_override {
            Some(p) => Some(p.to_owned()),
            None => fs
                .path_rewrite
                .as_ref()
                .map(|rewrite| rewrite(req.uri().path(), host)),
        };
        let used_rewriter = path_override.is_none() && rewritten.is_some();
        let path = match &rewritten {
            Some(p) => p.as_str(),
            None => req.uri().path(),
        };
        let path = path.trim_end_matches('/');

        if path.contains('\0') {
            error!(path, "refusing to serve path with NUL byte");
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        }
        // Without a rewriter the request pipeline is trusted to have
        // normalized the path already.
        if used_rewriter && path.contains("/../") {
            error!(path, "refusing to serve rewritten path with '/../'");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
        }

        let range_header = req
            .headers()
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok());

        let must_compress = allow_compress
            && fs.compress
            && range_header.is_none()
            && accepts_gzip(req.headers());
        let kind = if must_compress {
            CacheKind::Compressed
        } else {
            CacheKind::Plain
        };

        let guard = match fs.cache.lookup(kind, path) {
            Some(guard) => guard,
            None => match self.open_for_request(path, must_compress).await {
                Ok(guard) => guard,
                Err(response) => return *response,
            },
        };
        let file_entry = Arc::clone(guard.entry());

        let if_modified_since = req
            .headers()
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_http_date(v).ok());
        if let Some(since) = if_modified_since {
            if since >= file_entry.last_modified {
                drop(guard);
                return Response::builder()
                    .status(StatusCode::NOT_MODIFIED)
                    .body(empty())
                    .unwrap();
            }
        }

        let mut reader = match new_reader(guard).await {
            Ok(reader) => reader,
            Err(e) => {
                error!(path, error = %e, "cannot obtain file reader");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };

        let mut builder = Response::builder();
        if file_entry.compressed {
            builder = builder.header(header::CONTENT_ENCODING, "gzip");
        }

        let mut status = StatusCode::OK;
        let mut content_length = file_entry.content_length;
        if fs.accept_byte_range {
            builder = builder.header(header::ACCEPT_RANGES, "bytes");
            if let Some(range) = range_header {
                match parse_byte_range(range, file_entry.content_length) {
                    Ok((start, end)) => {
                        if let Err(e) = reader.update_byte_range(start, end).await {
                            error!(path, error = %e, "cannot seek to byte range");
                            return text_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "Internal Server Error",
                            );
                        }
                        builder = builder.header(
                            header::CONTENT_RANGE,
                            format!("bytes {start}-{end}/{}", file_entry.content_length),
                        );
                        content_length = end - start + 1;
                        status = StatusCode::PARTIAL_CONTENT;
                    }
                    Err(e) => {
                        warn!(path, range, error = %e, "unsatisfiable byte range");
                        drop(reader);
                        return Response::builder()
                            .status(StatusCode::RANGE_NOT_SATISFIABLE)
                            .header(
                                header::CONTENT_RANGE,
                                format!("bytes */{}", file_entry.content_length),
                            )
                            .body(empty())
                            .unwrap();
                    }
                }
            }
        }

        builder = builder
            .status(status)
            .header(header::LAST_MODIFIED, file_entry.last_modified_http.clone())
            .header(header::CONTENT_TYPE, file_entry.content_type.clone())
            .header(header::CONTENT_LENGTH, content_length);

        if req.method() == Method::HEAD {
            drop(reader);
            return builder.body(empty()).unwrap();
        }
        builder.body(reader_body(reader)).unwrap()
    }

    /// Resolves a cache miss: opens (or compresses, or renders an index
    /// for) the requested path and inserts the entry, adopting whatever
    /// a racing request inserted first. Failures come back as complete
    /// responses.
    async fn open_for_request(
        &self,
        path: &str,
        must_compress: bool,
    ) -> Result<EntryGuard, Box<Response<BoxedBody>>> {
        let fs = &self.inner;
        let file_path = fs.root.join(path.trim_start_matches('/'));

        let mut must_compress = must_compress;
        let mut opened = self.open_fs_file(&file_path, must_compress).await;
        if must_compress && matches!(opened, Err(FsError::NoCreatePermission)) {
            warn!(
                path = %file_path.display(),
                "insufficient permissions to save the compressed file, serving uncompressed; \
                 allow write access to this directory to avoid re-encoding"
            );
            must_compress = false;
            opened = self.open_fs_file(&file_path, must_compress).await;
        }

        let file_entry = match opened {
            Ok(file_entry) => file_entry,
            Err(FsError::DirectoryIndexRequired) => {
                match self.open_index(path, &file_path, must_compress).await {
                    Ok(file_entry) => file_entry,
                    Err(e) => {
                        error!(path = %file_path.display(), error = %e, "cannot open directory index");
                        return Err(Box::new(text_response(
                            StatusCode::FORBIDDEN,
                            "Directory index is forbidden",
                        )));
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                return Err(Box::new(self.not_found_response(path)));
            }
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "cannot open file");
                return Err(Box::new(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                )));
            }
        };

        let kind = if must_compress {
            CacheKind::Compressed
        } else {
            CacheKind::Plain
        };
        Ok(fs.cache.insert_or_adopt(kind, path, Arc::new(file_entry)))
    }

    /// Opens the servable artifact for `file_path`: the sidecar
    /// (creating or refreshing it as needed) when compression is wanted,
    /// the file itself otherwise.
    async fn open_fs_file(
        &self,
        file_path: &Path,
        must_compress: bool,
    ) -> Result<FileEntry, FsError> {
        let suffix = &self.inner.compressed_file_suffix;
        if !must_compress {
            let (file, meta) = open_with_meta(file_path).await?;
            return FileEntry::from_file(
                Arc::new(file),
                &meta,
                file_path.to_owned(),
                false,
                suffix,
            )
            .await;
        }

        let sidecar_path = append_suffix(file_path, suffix);
        match open_with_meta(&sidecar_path).await {
            Ok((file, meta)) => {
                if meta.is_dir() {
                    return Err(FsError::Io(io::Error::other(format!(
                        "directory with unexpected suffix: {}",
                        sidecar_path.display()
                    ))));
                }
                let orig_meta = tokio::fs::metadata(file_path).await?;
                if orig_meta.modified()? != meta.modified()? {
                    // the original changed since the sidecar was written
                    drop(file);
                    tokio::fs::remove_file(&sidecar_path).await?;
                    return self.compress_and_open(file_path, &sidecar_path).await;
                }
                FileEntry::from_file(Arc::new(file), &meta, sidecar_path, true, suffix).await
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.compress_and_open(file_path, &sidecar_path).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Opens the original and produces an entry for it, materializing the
    /// sidecar first when the file is worth compressing. Sidecar creation
    /// for a given path is serialized through its path lock; a concurrent
    /// creator's finished sidecar is simply opened.
    async fn compress_and_open(
        &self,
        file_path: &Path,
        sidecar_path: &Path,
    ) -> Result<FileEntry, FsError> {
        let suffix = &self.inner.compressed_file_suffix;
        let (file, meta) = open_with_meta(file_path).await?;
        if meta.is_dir() {
            return Err(FsError::DirectoryIndexRequired);
        }

        let file = Arc::new(file);
        let already_suffixed = file_path
            .to_string_lossy()
            .ends_with(suffix.as_str());
        if already_suffixed
            || meta.len() > MAX_COMPRESSIBLE_FILE_SIZE
            || !compress::is_file_compressible(&file).await
        {
            return FileEntry::from_file(file, &meta, file_path.to_owned(), false, suffix).await;
        }

        let abs_sidecar = std::path::absolute(sidecar_path)?;
        let lock = compress::path_lock(&abs_sidecar);
        let _locked = lock.lock().await;

        // Another worker may have produced the sidecar while we waited
        // on the lock; it is safe to open, creation is rename-atomic.
        if tokio::fs::try_exists(sidecar_path).await.unwrap_or(false) {
            return self.open_compressed(sidecar_path).await;
        }

        compress::write_sidecar(&file, meta.modified()?, sidecar_path).await?;
        self.open_compressed(sidecar_path).await
    }

    async fn open_compressed(&self, sidecar_path: &Path) -> Result<FileEntry, FsError> {
        let (file, meta) = open_with_meta(sidecar_path).await?;
        FileEntry::from_file(
            Arc::new(file),
            &meta,
            sidecar_path.to_owned(),
            true,
            &self.inner.compressed_file_suffix,
        )
        .await
    }

    /// Directory access: try the configured index files, then fall back
    /// to a generated listing if enabled.
    async fn open_index(
        &self,
        request_path: &str,
        dir_path: &Path,
        must_compress: bool,
    ) -> Result<FileEntry, FsError> {
        let fs = &self.inner;
        for index_name in &fs.index_names {
            let index_path = dir_path.join(index_name);
            match self.open_fs_file(&index_path, must_compress).await {
                Ok(file_entry) => return Ok(file_entry),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        if !fs.generate_index_pages {
            return Err(FsError::Io(io::Error::other(format!(
                "directory without index page: {}",
                dir_path.display()
            ))));
        }

        let page =
            dir_index::render_dir_index(request_path, dir_path, &fs.compressed_file_suffix)
                .await?;
        let body = if must_compress {
            Bytes::from(compress::gzip_bytes(&page).await?)
        } else {
            page
        };
        Ok(FileEntry::dir_index(body, must_compress))
    }

    fn not_found_response(&self, path: &str) -> Response<BoxedBody> {
        match &self.inner.path_not_found {
            Some(handler) => handler(path),
            None => text_response(StatusCode::NOT_FOUND, "Cannot open requested path"),
        }
    }
}

#[async_trait]
impl Handler for StaticFileHandler {
    async fn handle(&self, req: Request<hyper::body::Incoming>) -> Result<Response<BoxedBody>> {
        Ok(self.serve(&req).await)
    }
}

/// True when the client lists gzip (or a wildcard) in Accept-Encoding.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.split(';').next().unwrap_or("").trim())
        .any(|token| token.eq_ignore_ascii_case("gzip") || token == "*")
}

fn text_response(status: StatusCode, message: &'static str) -> Response<BoxedBody> {
    Response::builder()
        .status(status)
        .body(full(message))
        .unwrap()
}

async fn open_with_meta(path: &Path) -> io::Result<(std::fs::File, std::fs::Metadata)> {
    let file = tokio::fs::File::open(path).await?;
    let meta = file.metadata().await?;
    Ok((file.into_std().await, meta))
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

static ROOT_FS: Lazy<StaticFileHandler> = Lazy::new(|| {
    StaticFs {
        root: PathBuf::from("/"),
        generate_index_pages: true,
        compress: true,
        accept_byte_range: true,
        ..Default::default()
    }
    .into_handler()
});

/// Serves the file or directory at `path` through a process-wide handler
/// rooted at `/` (gzip, byte ranges and index generation enabled),
/// absolutizing relative paths. The response may be compressed when the
/// request accepts gzip; use [`serve_file_uncompressed`] to always serve
/// identity content.
pub async fn serve_file<B>(req: &Request<B>, path: impl AsRef<Path>) -> Response<BoxedBody> {
    serve_file_inner(req, path.as_ref(), true).await
}

/// Like [`serve_file`], but never serves compressed content. Useful for
/// files with a poor compression ratio.
pub async fn serve_file_uncompressed<B>(
    req: &Request<B>,
    path: impl AsRef<Path>,
) -> Response<BoxedBody> {
    serve_file_inner(req, path.as_ref(), false).await
}

async fn serve_file_inner<B>(
    req: &Request<B>,
    path: &Path,
    allow_compress: bool,
) -> Response<BoxedBody> {
    let absolute;
    let path = if path.is_absolute() {
        path
    } else {
        match std::path::absolute(path) {
            Ok(p) => {
                absolute = p;
                &absolute
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot resolve path to absolute");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        }
    };
    let Some(path_str) = path.to_str() else {
        error!(path = %path.display(), "cannot serve non-UTF-8 path");
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    };
    ROOT_FS.serve_inner(req, Some(path_str), allow_compress).await
}
