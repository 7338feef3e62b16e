use std::collections::HashMap;
use std::fs::FileTimes;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_compression::tokio::write::GzipEncoder;
use once_cell::sync::Lazy;
use tokio::io::AsyncWriteExt;
use tokio::task;

use super::error::FsError;

/// Compression is skipped when the first probed bytes do not shrink
/// below this ratio.
const MIN_COMPRESS_RATIO: f64 = 0.8;
/// Files larger than this are served uncompressed; encoding them would
/// stall the first request for too long.
pub(crate) const MAX_COMPRESSIBLE_FILE_SIZE: u64 = 8 * 1024 * 1024;
const COMPRESS_PROBE_LEN: usize = 4096;

static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the mutex serializing sidecar creation for an absolute path,
/// creating it on first use. Locks are never removed; the map is bounded
/// by the working set of served paths. The per-path lock is async
/// because it is held across the compression I/O.
pub(crate) fn path_lock(abs_path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = PATH_LOCKS.lock().unwrap();
    locks.entry(abs_path.to_path_buf()).or_default().clone()
}

/// Gzip-encodes a buffer in memory at the default compression level.
pub(crate) async fn gzip_bytes(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

/// Decides whether a file is worth compressing by gzip-encoding its
/// first 4 KiB and checking the achieved ratio. Positional reads leave
/// the shared cursor untouched. Any I/O failure counts as "no".
pub(crate) async fn is_file_compressible(file: &Arc<std::fs::File>) -> bool {
    let f = Arc::clone(file);
    let head = match task::spawn_blocking(move || read_prefix(&f, COMPRESS_PROBE_LEN)).await {
        Ok(Ok(head)) => head,
        _ => return false,
    };
    if head.is_empty() {
        return false;
    }
    match gzip_bytes(&head).await {
        Ok(encoded) => (encoded.len() as f64) < head.len() as f64 * MIN_COMPRESS_RATIO,
        Err(_) => false,
    }
}

/// Reads up to `len` bytes from the start of the file without moving its
/// cursor.
pub(crate) fn read_prefix(file: &std::fs::File, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Stream-compresses `orig` into `sidecar_path` through a temporary
/// file, then renames it into place so concurrent requests never observe
/// a half-written sidecar. The sidecar inherits the original's mtime,
/// which is what stale detection compares later. The caller must hold
/// the sidecar's path lock and have checked that no sidecar exists.
pub(crate) async fn write_sidecar(
    orig: &Arc<std::fs::File>,
    orig_modified: SystemTime,
    sidecar_path: &Path,
) -> Result<(), FsError> {
    let tmp_path = tmp_path_for(sidecar_path);
    let tmp = match tokio::fs::File::create(&tmp_path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(FsError::NoCreatePermission);
        }
        Err(e) => return Err(e.into()),
    };

    let reader = orig.try_clone().map_err(FsError::Io)?;
    if let Err(e) = compress_into(reader, tmp, orig_modified).await {
        tokio::fs::remove_file(&tmp_path).await.ok();
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, sidecar_path).await {
        tokio::fs::remove_file(&tmp_path).await.ok();
        return Err(e.into());
    }
    Ok(())
}

async fn compress_into(
    orig: std::fs::File,
    tmp: tokio::fs::File,
    orig_modified: SystemTime,
) -> io::Result<()> {
    let mut reader = tokio::fs::File::from_std(orig);
    let mut encoder = GzipEncoder::new(tmp);
    tokio::io::copy(&mut reader, &mut encoder).await?;
    encoder.shutdown().await?;
    let tmp = encoder.into_inner().into_std().await;
    tmp.set_times(FileTimes::new().set_modified(orig_modified))?;
    Ok(())
}

fn tmp_path_for(sidecar_path: &Path) -> PathBuf {
    let mut os = sidecar_path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
