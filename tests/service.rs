//! Integration tests for `ComparisonService`: validation, bounded
//! concurrency and result delivery.

use docdiff::{
    ComparisonConfig, ComparisonError, ComparisonRequest, ComparisonService, ServiceConfig,
};
use futures::future::join_all;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn png(w: u32, h: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(w, h, |x, y| {
        if (w / 4..w / 2).contains(&x) && (h / 4..h / 2).contains(&y) {
            Rgb([shade, shade, shade])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("png encode");
    buf
}

fn request(a: Vec<u8>, b: Vec<u8>) -> ComparisonRequest {
    ComparisonRequest::new(a, "image/png", b, "image/png", ComparisonConfig::default())
}

#[tokio::test]
async fn runs_a_comparison_end_to_end() {
    let svc = ComparisonService::new(ServiceConfig::default()).unwrap();
    let result = svc
        .compare(request(png(120, 90, 0), png(120, 90, 0)))
        .await
        .expect("comparison should succeed");
    assert_eq!(result.metadata.result_size, "120x90");
    assert_eq!(svc.available_permits(), 5);
}

#[tokio::test]
async fn many_requests_share_a_small_pool() {
    let svc = Arc::new(
        ComparisonService::new(ServiceConfig {
            max_concurrent: 2,
            worker_threads: 2,
            ..ServiceConfig::default()
        })
        .unwrap(),
    );

    let jobs = (0..6u8).map(|i| {
        let svc = Arc::clone(&svc);
        async move {
            svc.compare(request(png(96, 64, i * 10), png(96, 64, 0)))
                .await
        }
    });
    let results = join_all(jobs).await;

    assert_eq!(results.len(), 6);
    for r in results {
        let r = r.expect("every queued request completes");
        assert_eq!(r.metadata.result_size, "96x64");
    }
    assert_eq!(svc.available_permits(), 2);
}

#[tokio::test]
async fn validation_happens_before_queueing() {
    let svc = ComparisonService::new(ServiceConfig {
        max_concurrent: 1,
        queue_timeout: Some(Duration::from_millis(10)),
        max_file_size: 1024,
        ..ServiceConfig::default()
    })
    .unwrap();

    let too_big = vec![0u8; 2048];
    let err = svc
        .compare(request(too_big, png(10, 10, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ComparisonError::FileTooLarge { .. }), "got {err:?}");
    assert_eq!(err.status_code(), 413);

    let bad_type = ComparisonRequest::new(
        png(10, 10, 0),
        "text/plain",
        png(10, 10, 0),
        "image/png",
        ComparisonConfig::default(),
    );
    let err = svc.compare(bad_type).await.unwrap_err();
    assert!(matches!(err, ComparisonError::UnsupportedMediaType { .. }));
}

#[tokio::test]
async fn decode_errors_pass_through_the_pool() {
    let svc = ComparisonService::new(ServiceConfig::default()).unwrap();
    let err = svc
        .compare(request(b"garbage".to_vec(), png(10, 10, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, ComparisonError::Decode { .. }), "got {err:?}");
    assert_eq!(svc.available_permits(), 5);
}
