//! Tree listing and fetching against a local stand-in for the hub.

use std::collections::HashMap;

use podtrain_dataset::{
    Aria2Downloader, FetchError, HubClient, HubError, MANIFEST_FILE, Manifest, fetch,
    hub::page_cursor,
};
use tempfile::tempdir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

/// Serve `pages` (request path -> JSON body) until the test ends. Unknown
/// paths get a 404.
async fn serve(pages: HashMap<String, String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let request = String::from_utf8_lossy(&buf);
            let path = request.split_whitespace().nth(1).unwrap_or_default();

            let (status, body) = match pages.get(path) {
                Some(body) => ("200 OK", body.clone()),
                None => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
            };
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    format!("http://{addr}")
}

fn tree(cursor: &str) -> String {
    format!("/api/datasets/tatsu-lab/alpaca/tree/main?cursor={cursor}")
}

#[tokio::test]
async fn test_listing_follows_pages_until_empty() {
    let mut pages = HashMap::new();
    pages.insert(
        tree(""),
        r#"[
            {"type": "directory", "oid": "0", "path": "data"},
            {"type": "file", "oid": "1", "size": 12, "path": "README.md"},
            {"type": "file", "oid": "2", "size": 99, "path": "data/train.parquet",
             "lfs": {"oid": "aaa111", "size": 99, "pointerSize": 130}}
        ]"#
        .to_string(),
    );
    pages.insert(
        tree(&page_cursor("data/train.parquet")),
        r#"[
            {"type": "file", "oid": "3", "size": 50, "path": "data/test.parquet",
             "lfs": {"oid": "bbb222", "size": 50, "pointerSize": 130}}
        ]"#
        .to_string(),
    );
    pages.insert(tree(&page_cursor("data/test.parquet")), "[]".to_string());

    let base = serve(pages).await;
    let hub = HubClient::new(base.clone()).unwrap();
    let files = hub.list_files("tatsu-lab/alpaca", "main").await.unwrap();

    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        ["README.md", "data/train.parquet", "data/test.parquet"]
    );
    assert_eq!(
        files[1].url,
        format!("{base}/datasets/tatsu-lab/alpaca/resolve/main/data/train.parquet")
    );
    assert_eq!(files[0].sha256, None);
    assert_eq!(files[2].sha256.as_deref(), Some("bbb222"));

    let mut manifest = Manifest::new("tatsu-lab/alpaca", "main", &files);
    manifest.downloaded_at = "2024-03-01 12:00:00".into();
    assert_eq!(
        manifest.render(),
        "url: https://huggingface.co/tatsu-lab/alpaca\n\
         branch: main\n\
         download date: 2024-03-01 12:00:00\n\
         sha256sum:\n    \
         aaa111 data/train.parquet\n    \
         bbb222 data/test.parquet\n"
    );
}

#[tokio::test]
async fn test_empty_first_page_lists_nothing() {
    let mut pages = HashMap::new();
    pages.insert(tree(""), "[]".to_string());

    let hub = HubClient::new(serve(pages).await).unwrap();
    let files = hub.list_files("tatsu-lab/alpaca", "main").await.unwrap();
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_unknown_dataset_is_an_error() {
    let hub = HubClient::new(serve(HashMap::new()).await).unwrap();
    let err = hub.list_files("tatsu-lab/alpaca", "main").await.unwrap_err();
    assert!(matches!(err, HubError::Status { status: 404, .. }), "{err}");
}

#[tokio::test]
async fn test_failed_listing_writes_nothing() {
    let hub = HubClient::new(serve(HashMap::new()).await).unwrap();
    let out = tempdir().unwrap();
    let base = out.path().join("datasets");

    let err = fetch(
        &hub,
        &Aria2Downloader::new(1),
        "tatsu-lab/alpaca",
        "main",
        &base,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FetchError::Hub(HubError::Status { status: 404, .. })));
    assert!(!base.exists());
}

#[tokio::test]
async fn test_successful_listing_writes_manifest() {
    let mut pages = HashMap::new();
    pages.insert(
        "/api/datasets/tatsu-lab/alpaca/tree/v2?cursor=".to_string(),
        "[]".to_string(),
    );
    let hub = HubClient::new(serve(pages).await).unwrap();
    let out = tempdir().unwrap();

    let outcome = fetch(
        &hub,
        &Aria2Downloader::new(1),
        "tatsu-lab/alpaca",
        "v2",
        out.path(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.folder, out.path().join("tatsu-lab_alpaca_v2"));
    assert_eq!(outcome.listed, 0);
    let manifest = std::fs::read_to_string(outcome.folder.join(MANIFEST_FILE)).unwrap();
    assert!(manifest.starts_with("url: https://huggingface.co/tatsu-lab/alpaca\nbranch: v2\n"));
    assert!(!manifest.contains("sha256sum"));
}
