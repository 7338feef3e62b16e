//! End-to-end tests that exercise the full stack: config parsing,
//! listener setup, hyper connection handling and the static file
//! handler, driven over real HTTP with reqwest.

use anyhow::Result;
use citron::config::load_and_validate_config;
use citron::shutdown::setup_shutdown_signal;
use citron::start_services;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing::info;

struct TestServer {
    shutdown_tx: tokio::sync::watch::Sender<()>,
    server_handles: Vec<tokio::task::JoinHandle<Result<()>>>,
    base_url: String,
    root: PathBuf,
    _temp_dir: tempfile::TempDir,
}

/// Creates the given files under a fresh www root, writes a config
/// pointing at it (with `extra_handler_config` appended to the static
/// handler table) and starts the server on an unused port.
async fn setup_static_server(
    files_to_create: &[(&str, &[u8])],
    extra_handler_config: &str,
) -> Result<TestServer> {
    // ignore the error if an earlier test already installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let temp_dir = tempdir()?;
    let root = temp_dir.path().join("www");
    fs::create_dir_all(&root).await?;

    for (relative_path, content_bytes) in files_to_create {
        let full_path = root.join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, *content_bytes).await?;
    }

    let port = portpicker::pick_unused_port().expect("Failed to find unused port");
    let listen_addr = format!("127.0.0.1:{}", port);
    let config_content = format!(
        r#"
[server.test_static]
listen_addr = "{}"

[server.test_static.handler]
type = "static"
root = "{}"
{}
"#,
        listen_addr,
        root.display(),
        extra_handler_config
    );

    let config_path = temp_dir.path().join("citron_test.toml");
    fs::write(&config_path, config_content).await?;

    let config = load_and_validate_config(config_path.to_str().unwrap()).await?;
    let (shutdown_tx, shutdown_rx, _) = setup_shutdown_signal();
    let server_handles = start_services(&config, shutdown_rx.clone()).await?;

    // Allow some time for the accept loops to start
    sleep(Duration::from_millis(100)).await;

    Ok(TestServer {
        shutdown_tx,
        server_handles,
        base_url: format!("http://{}", listen_addr),
        root,
        _temp_dir: temp_dir,
    })
}

async fn shutdown_test_server(server: TestServer) -> Result<()> {
    info!("Sending shutdown signal for static server...");
    let _ = server.shutdown_tx.send(());
    for handle in server.server_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    info!("Static test server shutdown complete.");
    Ok(())
}

async fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = async_compression::tokio::bufread::GzipDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).await.expect("gunzip");
    out
}

// --- Test Cases --- //

#[tokio::test]
async fn test_serve_existing_file() -> Result<()> {
    let file_content = b"Hello from static test!";
    let path = "index.html";
    let server = setup_static_server(&[(path, file_content)], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/{}", server.base_url, path);

    let response = client.get(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(
        response.headers().get(reqwest::header::LAST_MODIFIED).is_some(),
        "Last-Modified header missing"
    );
    let body = response.text().await?;
    assert_eq!(body, std::str::from_utf8(file_content)?);

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_serve_non_existent_file() -> Result<()> {
    let server = setup_static_server(&[("dummy.txt", b"dummy content")], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/non_existent_file.html", server.base_url);

    let response = client.get(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_serve_file_in_subdirectory() -> Result<()> {
    let file_content = b"Content in subdirectory";
    let path = "subdir/file.txt";
    let server = setup_static_server(&[(path, file_content)], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/{}", server.base_url, path);

    let response = client.get(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await?;
    assert_eq!(body, std::str::from_utf8(file_content)?);

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_serve_file_with_content_type() -> Result<()> {
    let file_content = b"body { color: blue; }";
    let path = "style.css";
    let expected_content_type = "text/css";

    let server = setup_static_server(&[(path, file_content)], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/{}", server.base_url, path);

    let response = client.get(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let content_type_header = response.headers().get(reqwest::header::CONTENT_TYPE);
    assert!(content_type_header.is_some(), "Content-Type header missing");
    assert_eq!(
        content_type_header.unwrap().to_str()?,
        expected_content_type
    );

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_head_request() -> Result<()> {
    let file_content = b"head only";
    let server = setup_static_server(&[("h.txt", file_content)], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/h.txt", server.base_url);

    let response = client.head(&url).send().await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.content_length(), Some(file_content.len() as u64));
    let body = response.bytes().await?;
    assert!(body.is_empty());

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_conditional_get_returns_304() -> Result<()> {
    let server = setup_static_server(&[("c.txt", b"conditional")], "").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/c.txt", server.base_url);

    let first = client.get(&url).send().await?;
    assert_eq!(first.status(), reqwest::StatusCode::OK);
    let last_modified = first
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .expect("Last-Modified header")
        .to_str()?
        .to_owned();

    let second = client
        .get(&url)
        .header(reqwest::header::IF_MODIFIED_SINCE, &last_modified)
        .send()
        .await?;
    assert_eq!(second.status(), reqwest::StatusCode::NOT_MODIFIED);
    assert!(second.bytes().await?.is_empty());

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_range_request() -> Result<()> {
    let server = setup_static_server(&[("r.txt", b"hello")], "accept_byte_range = true").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/r.txt", server.base_url);

    let response = client
        .get(&url)
        .header(reqwest::header::RANGE, "bytes=1-3")
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok()),
        Some("bytes 1-3/5")
    );
    assert_eq!(response.text().await?, "ell");

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_big_file_full_and_ranged() -> Result<()> {
    // past the small-file threshold, so the pooled big-file reader
    // carries both responses
    let content: Vec<u8> = (0..3usize * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let server =
        setup_static_server(&[("big.bin", &content)], "accept_byte_range = true").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/big.bin", server.base_url);

    let response = client.get(&url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.bytes().await?;
    assert_eq!(body.len(), content.len());
    assert_eq!(&body[..], &content[..]);

    let response = client
        .get(&url)
        .header(reqwest::header::RANGE, "bytes=2097152-2097161")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok()),
        Some("bytes 2097152-2097161/3145728")
    );
    let partial = response.bytes().await?;
    assert_eq!(&partial[..], &content[2_097_152..=2_097_161]);

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_gzip_sidecar_created_and_reused() -> Result<()> {
    let file_content = vec![b'a'; 100 * 1024];
    let server =
        setup_static_server(&[("big.txt", &file_content)], "compress = true").await?;

    let client = reqwest::Client::new();
    let url = format!("{}/big.txt", server.base_url);

    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT_ENCODING, "gzip")
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok()),
        Some("gzip")
    );
    let body = response.bytes().await?;
    assert_eq!(gunzip(&body).await, file_content);

    // the sidecar was materialized next to the original with its mtime
    let sidecar = server.root.join("big.txt.gz");
    assert!(sidecar.exists(), "sidecar file missing");
    let original_mtime = std::fs::metadata(server.root.join("big.txt"))?.modified()?;
    assert_eq!(std::fs::metadata(&sidecar)?.modified()?, original_mtime);

    // a second request within the cache window serves the same bytes
    let again = client
        .get(&url)
        .header(reqwest::header::ACCEPT_ENCODING, "gzip")
        .send()
        .await?;
    assert_eq!(again.status(), reqwest::StatusCode::OK);
    assert_eq!(again.bytes().await?, body);

    shutdown_test_server(server).await?;
    Ok(())
}

#[tokio::test]
async fn test_directory_listing_generated() -> Result<()> {
    let server = setup_static_server(
        &[("d/one.txt", b"1"), ("d/two.txt", b"2")],
        "generate_index_pages = true",
    )
    .await?;

    let client = reqwest::Client::new();
    let url = format!("{}/d/", server.base_url);

    let response = client.get(&url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/html; charset=utf-8")
    );
    let body = response.text().await?;
    assert!(body.contains("one.txt"));
    assert!(body.contains("two.txt"));
    assert!(body.contains(r#"class="dir">..</a>"#));

    shutdown_test_server(server).await?;
    Ok(())
}
