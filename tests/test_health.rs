//! Supervisor health-probe tests against a stub HTTP app

use stevedore::engine::supervisor::Supervisor;
use stevedore::errors::ManagerError;
use stevedore::storage::layout::StorageLayout;

use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve a canned HTTP response on a fresh loopback port
async fn spawn_stub(status_line: &'static str, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    port
}

fn supervisor() -> Supervisor {
    let dir = tempdir().unwrap();
    Supervisor::new(StorageLayout::new(dir.path())).unwrap()
}

#[tokio::test]
async fn healthy_app_passes() {
    let port = spawn_stub("200 OK", "Hello World!").await;
    let supervisor = supervisor();

    supervisor.wait_for_health(port, "/").await.unwrap();
    assert_eq!(supervisor.probe_health(port, "/").await.unwrap(), 200);
}

#[tokio::test]
async fn non_200_fails_immediately() {
    let port = spawn_stub("500 Internal Server Error", "boom").await;
    let supervisor = supervisor();

    let start = std::time::Instant::now();
    let err = supervisor.wait_for_health(port, "/").await.unwrap_err();
    assert!(matches!(err, ManagerError::HealthFailed(_)));
    // Fails on the first probe, not after the 20s budget.
    assert!(start.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn redirects_are_treated_as_misconfiguration() {
    let port = spawn_stub("302 Found", "").await;
    let supervisor = supervisor();

    // The redirect must not be followed; the 302 itself is the failure.
    assert_eq!(supervisor.probe_health(port, "/").await.unwrap(), 302);
    let err = supervisor.wait_for_health(port, "/").await.unwrap_err();
    assert!(matches!(err, ManagerError::HealthFailed(_)));
}

#[tokio::test]
async fn closed_port_is_a_probe_error() {
    // Bind then immediately drop, so the port is (very likely) closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let supervisor = supervisor();
    assert!(supervisor.probe_health(port, "/").await.is_err());
}
