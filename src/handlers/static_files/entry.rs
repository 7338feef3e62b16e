use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::task;

use super::compress::read_prefix;
use super::error::FsError;

/// Files above this size are served through pooled independent handles
/// instead of positional reads on the shared cached one.
pub(crate) const SMALL_FILE_THRESHOLD: u64 = 2 * 1024 * 1024;

const SNIFF_LEN: usize = 512;
const COMPRESSED_SNIFF_LEN: usize = 4096;

/// What a cache entry actually serves.
pub(crate) enum EntrySource {
    /// An open file on disk. The path is kept so big readers can open
    /// independent handles to the same file.
    File {
        file: Arc<std::fs::File>,
        path: PathBuf,
    },
    /// A rendered in-memory directory listing.
    DirIndex(Bytes),
}

/// A cached, reference-counted description of a servable artifact:
/// either a regular file (possibly a compressed sidecar) or a
/// synthesized directory listing.
pub(crate) struct FileEntry {
    pub(crate) source: EntrySource,
    pub(crate) content_type: String,
    pub(crate) content_length: u64,
    pub(crate) compressed: bool,
    /// mtime truncated to whole seconds, the precision `Last-Modified`
    /// and `If-Modified-Since` work at.
    pub(crate) last_modified: SystemTime,
    pub(crate) last_modified_http: String,
    pub(crate) created_at: Instant,
    /// Number of readers currently streaming from this entry. Mutated
    /// only while the cache lock is held; atomic so it can live inside a
    /// shared entry.
    pub(crate) readers: AtomicI64,
    big_pool: Mutex<Vec<std::fs::File>>,
}

impl FileEntry {
    /// Wraps an open file. Rejects directories (the caller falls back to
    /// index handling) and files whose length cannot size a response.
    pub(crate) async fn from_file(
        file: Arc<std::fs::File>,
        meta: &std::fs::Metadata,
        path: PathBuf,
        compressed: bool,
        compressed_file_suffix: &str,
    ) -> Result<FileEntry, FsError> {
        if meta.is_dir() {
            return Err(FsError::DirectoryIndexRequired);
        }
        let content_length = meta.len();
        if usize::try_from(content_length).is_err() {
            return Err(FsError::TooBig(content_length));
        }

        let content_type = match extension_content_type(&path, compressed, compressed_file_suffix)
        {
            Some(ct) => ct,
            None => {
                let head = read_decoded_head(&file, compressed).await?;
                sniff_content_type(&head).to_owned()
            }
        };

        let last_modified = truncate_to_seconds(meta.modified()?);
        Ok(FileEntry {
            source: EntrySource::File { file, path },
            content_type,
            content_length,
            compressed,
            last_modified,
            last_modified_http: httpdate::fmt_http_date(last_modified),
            created_at: Instant::now(),
            readers: AtomicI64::new(0),
            big_pool: Mutex::new(Vec::new()),
        })
    }

    /// Wraps a rendered directory listing, gzipped by the caller when the
    /// request negotiated compression.
    pub(crate) fn dir_index(body: Bytes, compressed: bool) -> FileEntry {
        let last_modified = truncate_to_seconds(SystemTime::now());
        FileEntry {
            content_length: body.len() as u64,
            source: EntrySource::DirIndex(body),
            content_type: "text/html; charset=utf-8".to_owned(),
            compressed,
            last_modified,
            last_modified_http: httpdate::fmt_http_date(last_modified),
            created_at: Instant::now(),
            readers: AtomicI64::new(0),
            big_pool: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_big(&self) -> bool {
        self.content_length > SMALL_FILE_THRESHOLD
            && matches!(self.source, EntrySource::File { .. })
    }

    /// Takes the most recently pooled big-file handle, if any.
    pub(crate) fn take_pooled_handle(&self) -> Option<std::fs::File> {
        self.big_pool.lock().unwrap().pop()
    }

    /// Returns a rewound big-file handle to the pool for reuse.
    pub(crate) fn pool_handle(&self, file: std::fs::File) {
        self.big_pool.lock().unwrap().push(file);
    }

    /// Closes the pooled big-file handles. The main handle closes when
    /// the last reference to the entry drops, which the cache's pending
    /// protocol arranges to coincide with release.
    pub(crate) fn release(&self) {
        self.big_pool.lock().unwrap().clear();
    }
}

fn truncate_to_seconds(t: SystemTime) -> SystemTime {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

/// MIME type by file extension, with the sidecar suffix stripped first
/// so `style.css.gz` resolves like `style.css`.
fn extension_content_type(path: &Path, compressed: bool, suffix: &str) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let name = if compressed {
        name.strip_suffix(suffix).unwrap_or(name)
    } else {
        name
    };
    mime_guess::from_path(name).first_raw().map(str::to_owned)
}

/// Reads the first bytes of the *decoded* content for sniffing: a
/// positional read of the head, gunzipped in memory when the file is a
/// sidecar. A truncated gzip window still yields enough leading bytes.
async fn read_decoded_head(file: &Arc<std::fs::File>, compressed: bool) -> io::Result<Vec<u8>> {
    let f = Arc::clone(file);
    let want = if compressed {
        COMPRESSED_SNIFF_LEN
    } else {
        SNIFF_LEN
    };
    let raw = task::spawn_blocking(move || read_prefix(&f, want))
        .await
        .map_err(io::Error::other)??;
    if !compressed {
        return Ok(raw);
    }

    let mut decoder = GzipDecoder::new(raw.as_slice());
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        match decoder.read(&mut head[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => break,
        }
    }
    head.truncate(filled);
    Ok(head)
}

/// Minimal content sniffer for files whose extension resolves to no
/// known MIME type: a few unambiguous magic numbers, then a text
/// heuristic.
fn sniff_content_type(head: &[u8]) -> &'static str {
    const MAGICS: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
        (b"\0asm", "application/wasm"),
    ];
    for (magic, content_type) in MAGICS {
        if head.starts_with(magic) {
            return content_type;
        }
    }

    let text = head.trim_ascii_start();
    if starts_with_ignore_case(text, b"<!doctype html") || starts_with_ignore_case(text, b"<html")
    {
        return "text/html; charset=utf-8";
    }
    if looks_like_text(head) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn starts_with_ignore_case(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // the sniff window may end mid-codepoint
        Err(e) => e.error_len().is_none(),
    }
}
