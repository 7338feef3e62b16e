use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hyper::{Request, Response};
use tracing::info;

use crate::common::BoxedBody;
use crate::config::HandlerConfig;

pub mod static_files;

// Re-export the static file serving surface
pub use self::static_files::{
    parse_byte_range, path_slashes_stripper, serve_file, serve_file_uncompressed,
    vhost_path_rewriter, FsError, NotFoundHandler, PathRewriteFn, RangeError, StaticFileHandler,
    StaticFs, DEFAULT_CACHE_DURATION, DEFAULT_COMPRESSED_FILE_SUFFIX,
};

// Define the core Handler trait
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, req: Request<hyper::body::Incoming>) -> Result<Response<BoxedBody>>;
}

// Implement Handler for Arc<dyn Handler> so wrappers can hold the trait
// object directly.
#[async_trait]
impl Handler for Arc<dyn Handler> {
    async fn handle(&self, req: Request<hyper::body::Incoming>) -> Result<Response<BoxedBody>> {
        (**self).handle(req).await
    }
}

// Type alias for convenience
pub type SharedHandler = Arc<dyn Handler>;

/// Creates a concrete `Handler` instance based on the provided
/// configuration block.
pub fn create_handler(config: &HandlerConfig) -> Result<SharedHandler> {
    let handler: SharedHandler = match config {
        HandlerConfig::Static(static_cfg) => {
            info!(
                root           = %static_cfg.root.display(),
                compress       = static_cfg.compress,
                byte_ranges    = static_cfg.accept_byte_range,
                generate_index = static_cfg.generate_index_pages,
                "Creating static file handler"
            );

            let fs = StaticFs {
                root: static_cfg.root.clone(),
                index_names: static_cfg.index_names.clone(),
                generate_index_pages: static_cfg.generate_index_pages,
                compress: static_cfg.compress,
                accept_byte_range: static_cfg.accept_byte_range,
                cache_duration: static_cfg
                    .cache_duration_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_CACHE_DURATION),
                compressed_file_suffix: static_cfg
                    .compressed_file_suffix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COMPRESSED_FILE_SUFFIX.to_owned()),
                ..Default::default()
            };
            Arc::new(fs.into_handler())
        }
    };

    Ok(handler)
}
