use std::io;

use thiserror::Error;

/// Errors surfaced while opening or compressing a servable file.
#[derive(Debug, Error)]
pub enum FsError {
    /// open() succeeded on a directory; the caller should try index files
    /// or render a listing instead.
    #[error("directory index required")]
    DirectoryIndexRequired,

    /// Creating the compressed sidecar was denied; the caller falls back
    /// to serving the file uncompressed.
    #[error("no permission to create compressed file")]
    NoCreatePermission,

    /// The file is larger than a response body can be sized.
    #[error("file too big to serve: {0} bytes")]
    TooBig(u64),

    /// Any other I/O failure (open, stat, read, rename, encode).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FsError {
    /// True when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
