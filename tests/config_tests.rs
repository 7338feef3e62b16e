use anyhow::Result;
use citron::config::load_and_validate_config;
use tempfile::tempdir;
use tokio::fs;

// Helper to write a config into a temp dir and load it
async fn load_config_str(content: &str) -> Result<citron::config::CitronConfig> {
    // ignore the error if an earlier test already installed a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let dir = tempdir()?;
    let path = dir.path().join("citron_test.toml");
    fs::write(&path, content).await?;
    load_and_validate_config(path.to_str().unwrap()).await
}

#[tokio::test]
async fn test_load_valid_static_config() -> Result<()> {
    let result = load_config_str(
        r#"
[server.web]
listen_addr = "127.0.0.1:8081"

[server.web.handler]
type = "static"
root = "/tmp/citron_test_www" # Needs to be non-empty, existence not checked here
index_names = ["index.html"]
compress = true
accept_byte_range = true
cache_duration_secs = 5
compressed_file_suffix = ".gzip"
"#,
    )
    .await;

    assert!(
        result.is_ok(),
        "Failed to load valid static config: {:?}",
        result.err()
    );
    Ok(())
}

#[tokio::test]
async fn test_invalid_empty_root() -> Result<()> {
    let result = load_config_str(
        r#"
[server.web]
listen_addr = "127.0.0.1:8082"

[server.web.handler]
type = "static"
root = ""
"#,
    )
    .await;

    assert!(result.is_err(), "Empty root must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_invalid_zero_cache_duration() -> Result<()> {
    let result = load_config_str(
        r#"
[server.web]
listen_addr = "127.0.0.1:8083"

[server.web.handler]
type = "static"
root = "/srv/www"
cache_duration_secs = 0
"#,
    )
    .await;

    assert!(result.is_err(), "Zero cache duration must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_invalid_index_name_with_slash() -> Result<()> {
    let result = load_config_str(
        r#"
[server.web]
listen_addr = "127.0.0.1:8084"

[server.web.handler]
type = "static"
root = "/srv/www"
index_names = ["nested/index.html"]
"#,
    )
    .await;

    assert!(result.is_err(), "Index names with '/' must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_invalid_unknown_field() -> Result<()> {
    let result = load_config_str(
        r#"
[server.web]
listen_addr = "127.0.0.1:8085"
unknown_key = true

[server.web.handler]
type = "static"
root = "/srv/www"
"#,
    )
    .await;

    assert!(result.is_err(), "Unknown fields must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_invalid_log_level() -> Result<()> {
    let result = load_config_str(
        r#"
[logging]
level = "verbose"
"#,
    )
    .await;

    assert!(result.is_err(), "Invalid log level must be rejected");
    Ok(())
}

#[tokio::test]
async fn test_empty_config_rejected() -> Result<()> {
    let result = load_config_str("").await;
    assert!(
        result.is_err(),
        "A config without servers or logging must be rejected"
    );
    Ok(())
}
