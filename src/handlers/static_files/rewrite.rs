use std::sync::Arc;

/// A path rewriter maps `(request path, host header)` to the filesystem
/// path served relative to the handler's root.
///
/// The returned path must not contain `/../` substrings, since such paths
/// may refer to files outside the root; the handler rejects them.
pub type PathRewriteFn = Arc<dyn Fn(&str, Option<&str>) -> String + Send + Sync>;

const INVALID_HOST: &str = "invalid-host";

/// Returns a rewriter that strips `slashes_count` leading `/`-segments
/// from the request path.
///
/// Examples:
///
///   - slashes_count = 0, path "/foo/bar" → "/foo/bar"
///   - slashes_count = 1, path "/foo/bar" → "/bar"
///   - slashes_count = 2, path "/foo/bar" → ""
pub fn path_slashes_stripper(slashes_count: usize) -> PathRewriteFn {
    Arc::new(move |path, _host| strip_leading_slashes(path, slashes_count).to_owned())
}

/// Returns a rewriter that strips `slashes_count` leading `/`-segments
/// and prepends the request's host, simplifying virtual hosting of
/// static files.
///
/// Examples:
///
///   - host "foobar.com", slashes_count = 0, path "/foo/bar"
///     → "/foobar.com/foo/bar"
///   - host "img.aaa.com", slashes_count = 1, path "/images/123/456.jpg"
///     → "/img.aaa.com/123/456.jpg"
pub fn vhost_path_rewriter(slashes_count: usize) -> PathRewriteFn {
    Arc::new(move |path, host| {
        let stripped = strip_leading_slashes(path, slashes_count);
        let host = match host {
            Some(h) if !h.is_empty() && !h.contains('/') => h,
            _ => INVALID_HOST,
        };
        format!("/{host}{stripped}")
    })
}

fn strip_leading_slashes(path: &str, mut strip: usize) -> &str {
    let mut path = path;
    while strip > 0 && path.starts_with('/') {
        match path[1..].find('/') {
            Some(n) => path = &path[n + 1..],
            None => {
                path = "";
                break;
            }
        }
        strip -= 1;
    }
    path
}
