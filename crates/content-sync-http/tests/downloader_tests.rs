use std::sync::{Arc, Mutex};
use std::time::Duration;

use content_sync::test_support::FakeProbe;
use content_sync::{CatalogEntry, ContentLayout, Progress, SyncError, Url};
use content_sync_http::{DownloaderConfig, ResumableDownloader, RetryPolicy};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn layout_in(dir: &TempDir) -> ContentLayout {
    ContentLayout::new(dir.path(), "mp4")
}

fn downloader(dir: &TempDir, probe: Arc<FakeProbe>, max_attempts: u32) -> ResumableDownloader {
    downloader_with(dir, probe, no_backoff(max_attempts))
}

fn downloader_with(
    dir: &TempDir,
    probe: Arc<FakeProbe>,
    config: DownloaderConfig,
) -> ResumableDownloader {
    ResumableDownloader::new(layout_in(dir), probe, config).unwrap()
}

fn no_backoff(max_attempts: u32) -> DownloaderConfig {
    DownloaderConfig {
        retry: RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO),
        ..DownloaderConfig::default()
    }
}

fn online_downloader(dir: &TempDir) -> ResumableDownloader {
    downloader(dir, Arc::new(FakeProbe::new(true)), 2)
}

fn entry_for(server: &MockServer, filename: &str) -> CatalogEntry {
    let url = Url::parse(&format!("{}/media/{filename}", server.uri())).unwrap();
    CatalogEntry::new(filename, url)
}

fn media_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn fresh_download_materializes_final_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let body = media_bytes(1000);

    Mock::given(method("GET"))
        .and(path("/media/ad1.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad1.mp4")).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(!outcome.resumed);
    assert_eq!(outcome.bytes_written, 1000);
    assert_eq!(outcome.total_bytes, Some(1000));

    let layout = layout_in(&dir);
    assert_eq!(std::fs::read(layout.final_path("ad1.mp4")).unwrap(), body);
    assert!(!layout.partial_path("ad1.mp4").exists());
}

#[tokio::test]
async fn resumes_from_partial_with_range_request() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(2000);

    std::fs::write(layout.partial_path("ad2.mp4"), &body[..500]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad2.mp4"))
        .and(header("Range", "bytes=500-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 500-1999/2000")
                .set_body_bytes(body[500..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad2.mp4")).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.resumed);
    assert_eq!(outcome.bytes_written, 1500);
    assert_eq!(outcome.total_bytes, Some(2000));

    let final_bytes = std::fs::read(layout.final_path("ad2.mp4")).unwrap();
    assert_eq!(final_bytes.len(), 2000);
    assert_eq!(final_bytes, body);
    assert!(!layout.partial_path("ad2.mp4").exists());
}

#[tokio::test]
async fn server_ignoring_range_restarts_from_zero() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(800);

    std::fs::write(layout.partial_path("ad3.mp4"), vec![0xFFu8; 300]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad3.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad3.mp4")).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(!outcome.resumed);
    assert_eq!(std::fs::read(layout.final_path("ad3.mp4")).unwrap(), body);
}

#[tokio::test]
async fn range_not_satisfiable_promotes_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(2000);

    std::fs::write(layout.partial_path("ad4.mp4"), &body).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad4.mp4"))
        .respond_with(ResponseTemplate::new(416))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad4.mp4")).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.resumed);
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(std::fs::read(layout.final_path("ad4.mp4")).unwrap(), body);
    assert!(!layout.partial_path("ad4.mp4").exists());
}

#[tokio::test]
async fn access_denied_discards_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.partial_path("ad5.mp4"), vec![1u8; 100]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad5.mp4"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad5.mp4")).await;

    assert!(!outcome.success);
    assert!(!outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::PermanentTransfer(_))));
    assert!(!layout.partial_path("ad5.mp4").exists());
    assert!(!layout.final_path("ad5.mp4").exists());
}

#[tokio::test]
async fn transient_failure_keeps_partial_for_resume() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.partial_path("ad6.mp4"), vec![1u8; 100]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad6.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad6.mp4")).await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::TransientTransfer(_))));
    assert_eq!(std::fs::metadata(layout.partial_path("ad6.mp4")).unwrap().len(), 100);
    assert!(!layout.final_path("ad6.mp4").exists());
}

#[tokio::test]
async fn retries_after_server_error_then_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(400);

    std::fs::write(layout.partial_path("ad7.mp4"), &body[..100]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad7.mp4"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/ad7.mp4"))
        .and(header("Range", "bytes=100-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 100-399/400")
                .set_body_bytes(body[100..].to_vec()),
        )
        .mount(&server)
        .await;

    let outcome = downloader(&dir, Arc::new(FakeProbe::new(true)), 3)
        .run(&entry_for(&server, "ad7.mp4"))
        .await;

    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.resumed);
    assert_eq!(std::fs::read(layout.final_path("ad7.mp4")).unwrap(), body);
}

#[tokio::test]
async fn short_body_is_kept_as_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(3000);

    std::fs::write(layout.partial_path("ad8.mp4"), &body[..500]).unwrap();

    // Server claims 3000 bytes total but only sends up to byte 1999.
    Mock::given(method("GET"))
        .and(path("/media/ad8.mp4"))
        .and(header("Range", "bytes=500-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 500-2999/3000")
                .set_body_bytes(body[500..2000].to_vec()),
        )
        .mount(&server)
        .await;

    let outcome = downloader(&dir, Arc::new(FakeProbe::new(true)), 1)
        .run(&entry_for(&server, "ad8.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(!layout.final_path("ad8.mp4").exists());
    assert_eq!(std::fs::read(layout.partial_path("ad8.mp4")).unwrap(), &body[..2000]);
}

#[tokio::test]
async fn offline_returns_paused_without_requests() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let probe = Arc::new(FakeProbe::new(false));
    let outcome = downloader(&dir, probe, 3)
        .run(&entry_for(&server, "ad9.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::Unavailable(_))));
}

#[tokio::test]
async fn existing_final_file_is_not_downloaded_again() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.final_path("ad10.mp4"), b"already here").unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad10.mp4")).await;

    assert!(outcome.success);
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(std::fs::read(layout.final_path("ad10.mp4")).unwrap(), b"already here");
}

#[tokio::test]
async fn progress_reported_as_percent_when_length_known() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    let body = media_bytes(4096);

    Mock::given(method("GET"))
        .and(path("/media/ad11.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;

    let seen: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let downloader = online_downloader(&dir).with_progress(Arc::new(move |_: &str, progress: Progress| {
        sink.lock().unwrap().push(progress);
    }));

    let outcome = downloader.run(&entry_for(&server, "ad11.mp4")).await;
    assert!(outcome.success);

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| matches!(p, Progress::Percent(_))));
    assert_eq!(seen.last(), Some(&Progress::Percent(100)));
}

#[tokio::test]
async fn range_not_satisfiable_without_partial_restarts_once_then_pauses() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    // Size check plus the body request, for the first try and the restart.
    Mock::given(method("GET"))
        .and(path("/media/ad12.mp4"))
        .respond_with(ResponseTemplate::new(416))
        .expect(4)
        .mount(&server)
        .await;

    let outcome = online_downloader(&dir).run(&entry_for(&server, "ad12.mp4")).await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(
        &outcome.error,
        Some(SyncError::TransientTransfer(msg)) if msg.contains("range not satisfiable")
    ));
    assert!(!layout.final_path("ad12.mp4").exists());
}

#[tokio::test]
async fn stalled_response_keeps_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.partial_path("ad13.mp4"), vec![7u8; 10]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad13.mp4"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 10-19/20")
                .set_body_bytes(vec![8u8; 10])
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config = DownloaderConfig {
        stall_timeout: Duration::from_millis(200),
        ..no_backoff(1)
    };
    let outcome = downloader_with(&dir, Arc::new(FakeProbe::new(true)), config)
        .run(&entry_for(&server, "ad13.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::TransientTransfer(_))));
    assert_eq!(std::fs::read(layout.partial_path("ad13.mp4")).unwrap(), vec![7u8; 10]);
    assert!(!layout.final_path("ad13.mp4").exists());
}

#[tokio::test]
async fn oversized_body_discards_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.partial_path("ad14.mp4"), vec![1u8; 10]).unwrap();

    // Declares 60 bytes in total but sends 100 after the first 10.
    Mock::given(method("GET"))
        .and(path("/media/ad14.mp4"))
        .and(header("Range", "bytes=10-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 10-59/60")
                .set_body_bytes(media_bytes(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = downloader(&dir, Arc::new(FakeProbe::new(true)), 1)
        .run(&entry_for(&server, "ad14.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::TransientTransfer(_))));
    assert!(!layout.partial_path("ad14.mp4").exists());
    assert!(!layout.final_path("ad14.mp4").exists());
}

/// Answers 503 and takes the device offline while doing so.
struct DropsConnection(Arc<FakeProbe>);

impl Respond for DropsConnection {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        self.0.set_online(false);
        ResponseTemplate::new(503)
    }
}

#[tokio::test]
async fn connectivity_lost_between_retries_pauses_as_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let probe = Arc::new(FakeProbe::new(true));

    std::fs::write(layout.partial_path("ad15.mp4"), vec![1u8; 10]).unwrap();

    Mock::given(method("GET"))
        .and(path("/media/ad15.mp4"))
        .respond_with(DropsConnection(Arc::clone(&probe)))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = downloader(&dir, probe, 3)
        .run(&entry_for(&server, "ad15.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::Unavailable(_))));
    assert_eq!(std::fs::metadata(layout.partial_path("ad15.mp4")).unwrap().len(), 10);
}

#[tokio::test]
async fn concurrent_runs_of_one_file_download_it_once() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;
    let body = media_bytes(500);

    Mock::given(method("GET"))
        .and(path("/media/ad16.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let downloader = online_downloader(&dir);
    let entry = entry_for(&server, "ad16.mp4");
    let (first, second) = tokio::join!(downloader.run(&entry), downloader.run(&entry));

    assert!(first.success, "{first:?}");
    assert!(!second.success);
    assert!(second.resumable);
    assert!(matches!(
        &second.error,
        Some(SyncError::TransientTransfer(msg)) if msg.contains("already in progress")
    ));
    assert_eq!(std::fs::read(layout.final_path("ad16.mp4")).unwrap(), body);
}

#[tokio::test]
async fn mismatched_resume_offset_discards_partial() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    std::fs::write(layout.partial_path("ad17.mp4"), vec![1u8; 10]).unwrap();

    // Asked for byte 10 onwards, answers from byte 0 with no total.
    Mock::given(method("GET"))
        .and(path("/media/ad17.mp4"))
        .and(header("Range", "bytes=10-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-99/*")
                .set_body_bytes(media_bytes(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = downloader(&dir, Arc::new(FakeProbe::new(true)), 1)
        .run(&entry_for(&server, "ad17.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(outcome.error, Some(SyncError::TransientTransfer(_))));
    assert!(!layout.partial_path("ad17.mp4").exists());
    assert!(!layout.final_path("ad17.mp4").exists());
}

#[tokio::test]
async fn empty_body_leaves_no_partial_behind() {
    let dir = tempfile::tempdir().unwrap();
    let layout = layout_in(&dir);
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/media/ad18.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let outcome = downloader(&dir, Arc::new(FakeProbe::new(true)), 1)
        .run(&entry_for(&server, "ad18.mp4"))
        .await;

    assert!(!outcome.success);
    assert!(outcome.resumable);
    assert!(matches!(
        &outcome.error,
        Some(SyncError::TransientTransfer(msg)) if msg.contains("empty")
    ));
    assert!(!layout.partial_path("ad18.mp4").exists());
    assert!(!layout.final_path("ad18.mp4").exists());
}
