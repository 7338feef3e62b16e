use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use std::io;

// Type alias for the response body
pub type BoxedBody = BoxBody<Bytes, std::io::Error>;

// Helper function to create an empty body
pub fn empty() -> BoxedBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

// Helper function to create a full body
pub fn full<T: Into<Bytes>>(chunk: T) -> BoxedBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Helper function to check for common Hyper errors that can usually be ignored
/// Used to avoid spamming logs during normal operation or client disconnects.
pub fn should_ignore_hyper_error(err: &dyn std::error::Error) -> bool {
    let err_str = err.to_string();
    err_str.contains("connection reset by peer")
        || err_str.contains("unexpected EOF")
        || err_str.contains("connection closed")
        || err_str.contains("broken pipe")
        || err_str.contains("operation canceled")
}

/// Helper function to check for transient TCP accept errors, including FD limits
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
    // Check for file descriptor exhaustion as well
    || err.raw_os_error().is_some_and(|code| {
        code == libc::EMFILE || code == libc::ENFILE
    })
}
