use std::fmt::Write;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;

/// Renders the HTML listing served for a directory without a matching
/// index file. Entries carrying the compressed-file suffix are hidden;
/// the rest appear in filename order.
pub(crate) async fn render_dir_index(
    request_path: &str,
    dir_path: &Path,
    compressed_file_suffix: &str,
) -> io::Result<Bytes> {
    let base = if request_path.is_empty() {
        "/"
    } else {
        request_path
    };
    let base_escaped = html_escape::encode_text(base);

    let mut page = String::with_capacity(1024);
    let _ = write!(
        page,
        "<html><head><title>{base_escaped}</title>\
         <style>.dir {{ font-weight: bold }}</style></head><body>\
         <h1>{base_escaped}</h1><ul>"
    );

    if base.len() > 1 {
        let parent = match base.rfind('/') {
            Some(0) | None => "/",
            Some(n) => &base[..n],
        };
        let _ = write!(
            page,
            r#"<li><a href="{}" class="dir">..</a></li>"#,
            html_escape::encode_double_quoted_attribute(parent)
        );
    }

    let mut entries = Vec::new();
    let mut dir = fs::read_dir(dir_path).await?;
    while let Some(dir_entry) = dir.next_entry().await? {
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(compressed_file_suffix) {
            // sidecars are an implementation detail, keep them off the page
            continue;
        }
        let meta = dir_entry.metadata().await?;
        entries.push((name, meta));
    }
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let base_trimmed = base.trim_end_matches('/');
    for (name, meta) in entries {
        let href = format!("{base_trimmed}/{name}");
        let (class, label) = if meta.is_dir() {
            ("dir", "dir".to_owned())
        } else {
            ("file", format!("file, {} bytes", meta.len()))
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let _ = write!(
            page,
            r#"<li><a href="{}" class="{}">{}</a>, {}, last modified {}</li>"#,
            html_escape::encode_double_quoted_attribute(&href),
            class,
            html_escape::encode_text(&name),
            label,
            httpdate::fmt_http_date(modified),
        );
    }

    page.push_str("</ul></body></html>");
    Ok(Bytes::from(page))
}
