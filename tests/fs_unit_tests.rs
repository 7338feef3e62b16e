use citron::handlers::{
    parse_byte_range, path_slashes_stripper, vhost_path_rewriter, RangeError, StaticFs,
};
use http_body_util::BodyExt;

// --- Byte range grammar --- //

#[test]
fn closed_range() {
    assert_eq!(parse_byte_range("bytes=1-3", 5).unwrap(), (1, 3));
    assert_eq!(parse_byte_range("bytes=0-0", 5).unwrap(), (0, 0));
    assert_eq!(parse_byte_range("bytes=0-4", 5).unwrap(), (0, 4));
}

#[test]
fn open_ended_range() {
    assert_eq!(parse_byte_range("bytes=2-", 5).unwrap(), (2, 4));
    assert_eq!(parse_byte_range("bytes=0-", 5).unwrap(), (0, 4));
}

#[test]
fn suffix_range() {
    assert_eq!(parse_byte_range("bytes=-2", 5).unwrap(), (3, 4));
    assert_eq!(parse_byte_range("bytes=-5", 5).unwrap(), (0, 4));
}

#[test]
fn suffix_longer_than_file_starts_at_zero() {
    assert_eq!(parse_byte_range("bytes=-100", 5).unwrap(), (0, 4));
}

#[test]
fn end_clamped_to_last_byte() {
    assert_eq!(parse_byte_range("bytes=2-100", 5).unwrap(), (2, 4));
}

#[test]
fn unsupported_units() {
    assert_eq!(
        parse_byte_range("items=0-1", 5),
        Err(RangeError::UnsupportedUnits)
    );
    assert_eq!(parse_byte_range("", 5), Err(RangeError::UnsupportedUnits));
    assert_eq!(
        parse_byte_range("bytes 0-1", 5),
        Err(RangeError::UnsupportedUnits)
    );
}

#[test]
fn malformed_ranges() {
    assert_eq!(parse_byte_range("bytes=", 5), Err(RangeError::Malformed));
    assert_eq!(parse_byte_range("bytes=abc", 5), Err(RangeError::Malformed));
    assert_eq!(
        parse_byte_range("bytes=1-x", 5),
        Err(RangeError::Malformed)
    );
    // multi-range is not supported; the second range poisons the number
    assert_eq!(
        parse_byte_range("bytes=0-1,3-4", 5),
        Err(RangeError::Malformed)
    );
}

#[test]
fn start_out_of_range() {
    assert_eq!(
        parse_byte_range("bytes=5-", 5),
        Err(RangeError::StartOutOfRange)
    );
    assert_eq!(
        parse_byte_range("bytes=9-10", 5),
        Err(RangeError::StartOutOfRange)
    );
}

#[test]
fn inverted_range() {
    assert_eq!(
        parse_byte_range("bytes=3-1", 5),
        Err(RangeError::InvertedRange)
    );
}

#[test]
fn suffix_of_zero_bytes_is_unsatisfiable() {
    assert_eq!(
        parse_byte_range("bytes=-0", 5),
        Err(RangeError::StartOutOfRange)
    );
}

#[test]
fn any_range_on_empty_file_is_unsatisfiable() {
    assert_eq!(
        parse_byte_range("bytes=0-", 0),
        Err(RangeError::StartOutOfRange)
    );
    assert_eq!(
        parse_byte_range("bytes=-1", 0),
        Err(RangeError::StartOutOfRange)
    );
}

#[test]
fn format_parse_round_trip() {
    let len = 9u64;
    for start in 0..len {
        for end in start..len {
            let header = format!("bytes={start}-{end}");
            assert_eq!(
                parse_byte_range(&header, len).unwrap(),
                (start, end),
                "round trip failed for {header}"
            );
        }
    }
}

// --- Path rewriters --- //

#[test]
fn slashes_stripper_keeps_path_with_zero_count() {
    let rewrite = path_slashes_stripper(0);
    assert_eq!(rewrite("/foo/bar", None), "/foo/bar");
}

#[test]
fn slashes_stripper_drops_leading_segments() {
    let rewrite = path_slashes_stripper(1);
    assert_eq!(rewrite("/foo/bar", None), "/bar");

    let rewrite = path_slashes_stripper(2);
    assert_eq!(rewrite("/foo/bar/baz", None), "/baz");
}

#[test]
fn slashes_stripper_exhausts_to_empty() {
    let rewrite = path_slashes_stripper(2);
    assert_eq!(rewrite("/foo/bar", None), "");
    let rewrite = path_slashes_stripper(5);
    assert_eq!(rewrite("/foo", None), "");
}

#[test]
fn vhost_rewriter_prepends_host() {
    let rewrite = vhost_path_rewriter(0);
    assert_eq!(
        rewrite("/foo/bar", Some("foobar.com")),
        "/foobar.com/foo/bar"
    );

    let rewrite = vhost_path_rewriter(1);
    assert_eq!(
        rewrite("/images/123/456.jpg", Some("img.aaa.com")),
        "/img.aaa.com/123/456.jpg"
    );
}

#[test]
fn vhost_rewriter_sanitizes_bad_hosts() {
    let rewrite = vhost_path_rewriter(0);
    assert_eq!(rewrite("/foo", None), "/invalid-host/foo");
    assert_eq!(rewrite("/foo", Some("")), "/invalid-host/foo");
    assert_eq!(rewrite("/foo", Some("evil/host")), "/invalid-host/foo");
}

// --- Big-file reader --- //

// Files past the small-file threshold take the pooled
// independent-handle reader; cover a full read and a seeked range read
// against a position-dependent pattern.
#[tokio::test]
async fn big_file_full_and_ranged_reads() {
    let content: Vec<u8> = (0..3usize * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("big.bin"), &content).unwrap();

    let handler = StaticFs {
        root: dir.path().to_path_buf(),
        accept_byte_range: true,
        ..Default::default()
    }
    .into_handler();

    let request = hyper::Request::builder().uri("/big.bin").body(()).unwrap();
    let response = handler.serve(&request).await;
    assert_eq!(response.status(), hyper::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &content[..]);

    let request = hyper::Request::builder()
        .uri("/big.bin")
        .header(hyper::header::RANGE, "bytes=2500000-2500099")
        .body(())
        .unwrap();
    let response = handler.serve(&request).await;
    assert_eq!(response.status(), hyper::StatusCode::PARTIAL_CONTENT);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &content[2_500_000..=2_500_099]);
}
