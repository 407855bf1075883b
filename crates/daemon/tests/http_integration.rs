//! End-to-end tests for the HTTP surface.
//!
//! These tests drive the router in-process and verify complete flows:
//! - Token issuance and inspection
//! - Directory listing, creation and deletion
//! - Multipart uploads
//! - One-time downloads, single and batched

use std::fs;
use std::io::{Cursor, Read};
use std::time::Duration;

use access::unix_now;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use daemon::config::Config;
use daemon::{router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tower::ServiceExt;

const API: &str = "/api/nas/v0";
const ADMIN_SECRET: &str = "admin-secret";
const BOUNDARY: &str = "sharegate-test-boundary";

struct TestServer {
    app: Router,
    state: AppState,
    public: TempDir,
    temp: TempDir,
}

/// Create a server over fresh public and temp roots.
fn create_test_server() -> TestServer {
    let public = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage.public_root = public.path().to_path_buf();
    config.storage.temp_root = temp.path().to_path_buf();
    config.auth.token_secret = "integration-secret".to_string();
    config.auth.admin_secret = ADMIN_SECRET.to_string();
    config.validate().unwrap();

    let state = AppState::new(config).unwrap();
    TestServer {
        app: router(state.clone()),
        state,
        public,
        temp,
    }
}

impl TestServer {
    fn token(&self, mode: &str, dir: &str) -> String {
        self.state.codec.issue(mode, dir, 10).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body.to_vec())
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(format!("{API}{path}"));
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    async fn upload(&self, token: &str, key: &str, field: &str, name: &str, data: &[u8]) -> StatusCode {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{API}/upload?key={key}"))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await.0
    }

    async fn fetch(&self, link: &Value) -> (StatusCode, HeaderMap, Vec<u8>) {
        let uri = format!(
            "{API}/download?signed={}&nc={}",
            link["signed"].as_str().unwrap(),
            link["nonce"].as_str().unwrap()
        );
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }
}

fn text(body: &[u8]) -> &str {
    std::str::from_utf8(body).unwrap()
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

// =============================================================================
// Token Tests
// =============================================================================

#[tokio::test]
async fn test_issue_token_requires_admin_secret() {
    let server = create_test_server();
    let request = json!({"mode": "r--", "dir": "", "valid": 5});

    let (status, body) = server
        .call(Method::POST, "/token", None, Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text(&body), "Invalid token");

    let (status, _) = server
        .call(Method::POST, "/token", Some("wrong"), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server
        .call(Method::POST, "/token", Some(ADMIN_SECRET), Some(request))
        .await;
    assert_eq!(status, StatusCode::OK);
    let capability = server.state.codec.validate(text(&body)).unwrap();
    assert!(capability.can_read());
    assert!(!capability.can_write());
}

#[tokio::test]
async fn test_issue_token_rejects_bad_input() {
    let server = create_test_server();

    for request in [
        json!({"mode": "rx-", "dir": ""}),
        json!({"mode": "r--", "dir": "../outside"}),
        json!({"mode": "r--", "dir": "", "valid": 0}),
    ] {
        let (status, _) = server
            .call(Method::POST, "/token", Some(ADMIN_SECRET), Some(request))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_token_info() {
    let server = create_test_server();
    let token = server.token("rw-", "");

    let (status, body) = server.call(Method::GET, "/token", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let info = json_body(&body);
    assert_eq!(info["read"], true);
    assert_eq!(info["write"], true);
    assert_eq!(info["delete"], false);
    assert_eq!(info["expires_at"].as_str().unwrap().len(), 19);
}

#[tokio::test]
async fn test_missing_and_expired_tokens() {
    let server = create_test_server();

    let (status, body) = server.call(Method::GET, "/dir?key=", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text(&body), "Invalid token");

    let (status, _) = server
        .call(Method::GET, "/dir?key=", Some("not.a.token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = server
        .state
        .codec
        .issue_at("rwd", "", 1, unix_now() - 3600)
        .unwrap();
    let (status, body) = server
        .call(Method::GET, "/dir?key=", Some(&expired), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text(&body), "Token expired");
}

// =============================================================================
// Directory Tests
// =============================================================================

#[tokio::test]
async fn test_list_directory() {
    let server = create_test_server();
    fs::write(server.public.path().join("b.txt"), "hello").unwrap();
    fs::create_dir(server.public.path().join("zeta")).unwrap();
    let token = server.token("r--", "");

    let (status, body) = server.call(Method::GET, "/dir?key=", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let listing = json_body(&body);
    assert_eq!(listing["queryFolder"], "");
    let entries = listing["metadatas"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "zeta");
    assert_eq!(entries[0]["type"], "Folder");
    assert_eq!(entries[1]["name"], "b.txt");
    assert_eq!(entries[1]["type"], "txt");
    assert_eq!(entries[1]["size"], 5);
}

#[tokio::test]
async fn test_list_is_confined_to_capability_directory() {
    let server = create_test_server();
    fs::create_dir(server.public.path().join("team")).unwrap();
    fs::create_dir(server.public.path().join("other")).unwrap();
    let token = server.token("r--", "team");

    let (status, _) = server.call(Method::GET, "/dir?key=", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server
        .call(Method::GET, "/dir?key=../other", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(text(&body), "No permission");
}

#[tokio::test]
async fn test_list_missing_directory() {
    let server = create_test_server();
    let token = server.token("r--", "");

    let (status, _) = server
        .call(Method::GET, "/dir?key=nope", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_directory_conflict() {
    let server = create_test_server();
    let token = server.token("rw-", "");

    let (status, body) = server
        .call(Method::POST, "/dir?key=new/nested", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text(&body), "new/nested");
    assert!(server.public.path().join("new/nested").is_dir());

    let (status, _) = server
        .call(Method::POST, "/dir?key=new/nested", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_read_only_capability_cannot_write() {
    let server = create_test_server();
    let token = server.token("r--", "");

    let (status, _) = server
        .call(Method::POST, "/dir?key=new", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!server.public.path().join("new").exists());

    let status = server.upload(&token, "", "uploadFile", "a.txt", b"data").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_directory() {
    let server = create_test_server();
    fs::create_dir_all(server.public.path().join("team/old")).unwrap();
    fs::write(server.public.path().join("team/old/file.txt"), "x").unwrap();
    let token = server.token("rwd", "team");

    let (status, body) = server
        .call(Method::DELETE, "/dir?key=old", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text(&body), "old");
    assert!(!server.public.path().join("team/old").exists());

    // The granted directory itself is never deletable.
    let (status, _) = server
        .call(Method::DELETE, "/dir?key=", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(server.public.path().join("team").is_dir());

    let (status, _) = server
        .call(Method::DELETE, "/dir?key=old", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_upload_and_conflict() {
    let server = create_test_server();
    fs::create_dir(server.public.path().join("inbox")).unwrap();
    let token = server.token("rw-", "");
    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

    let status = server
        .upload(&token, "inbox", "uploadFile", "data.bin", &data)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fs::read(server.public.path().join("inbox/data.bin")).unwrap(), data);

    let status = server
        .upload(&token, "inbox", "uploadFile", "data.bin", b"other")
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(fs::read(server.public.path().join("inbox/data.bin")).unwrap(), data);

    // Spool files do not outlive the request.
    assert_eq!(fs::read_dir(server.temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_abandoned_upload_leaves_nothing_behind() {
    let server = create_test_server();
    let token = server.token("rw-", "");

    // A body that sends the part headers and some bytes, then stalls.
    let (mut client, body) = tokio::io::duplex(64 * 1024);
    client
        .write_all(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"uploadFile\"; filename=\"big.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        )
        .await
        .unwrap();
    client.write_all(&[0xab; 32 * 1024]).await.unwrap();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("{API}/upload?key="))
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(ReaderStream::new(body)))
        .unwrap();
    let handle = tokio::spawn(server.app.clone().oneshot(request));

    // Wait until the handler is spooling the body.
    let spooling = async {
        while fs::read_dir(server.temp.path()).unwrap().count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), spooling)
        .await
        .expect("upload never started spooling");

    // The client goes away: the handler future is dropped mid-request.
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    drop(client);

    assert!(!server.public.path().join("big.bin").exists());
    assert_eq!(fs::read_dir(server.public.path()).unwrap().count(), 0);
    assert_eq!(fs::read_dir(server.temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_upload_requires_file_field() {
    let server = create_test_server();
    let token = server.token("rw-", "");

    let status = server.upload(&token, "", "file", "a.txt", b"data").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!server.public.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_upload_rejects_long_file_name() {
    let server = create_test_server();
    let token = server.token("rw-", "");
    let name = "x".repeat(251);

    let status = server.upload(&token, "", "uploadFile", &name, b"data").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_into_missing_directory() {
    let server = create_test_server();
    let token = server.token("rw-", "");

    let status = server
        .upload(&token, "missing", "uploadFile", "a.txt", b"data")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Download Tests
// =============================================================================

#[tokio::test]
async fn test_download_link_is_single_use() {
    let server = create_test_server();
    fs::write(server.public.path().join("report.txt"), "quarterly numbers").unwrap();
    let token = server.token("r--", "");

    let (status, body) = server
        .call(Method::POST, "/download?key=report.txt", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let link = json_body(&body);

    let (status, headers, body) = server.fetch(&link).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"quarterly numbers");
    assert_eq!(
        headers[CONTENT_DISPOSITION],
        "attachment; filename=\"report.txt\""
    );

    let (status, _, body) = server.fetch(&link).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text(&body), "Invalid signed key");
}

#[tokio::test]
async fn test_download_requires_a_file() {
    let server = create_test_server();
    fs::create_dir(server.public.path().join("sub")).unwrap();
    let token = server.token("r--", "");

    let (status, _) = server
        .call(Method::POST, "/download?key=sub", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .call(Method::POST, "/download?key=missing.txt", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_rejects_garbage_links() {
    let server = create_test_server();

    for link in [
        json!({"signed": "", "nonce": ""}),
        json!({"signed": "zz", "nonce": "00"}),
        json!({"signed": "00112233445566778899aabbccddeeff", "nonce": "000000000000000000000000"}),
    ] {
        let (status, _, body) = server.fetch(&link).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(text(&body), "Invalid signed key");
    }
}

#[tokio::test]
async fn test_download_of_deleted_file() {
    let server = create_test_server();
    let path = server.public.path().join("gone.txt");
    fs::write(&path, "soon gone").unwrap();
    let token = server.token("r--", "");

    let (_, body) = server
        .call(Method::POST, "/download?key=gone.txt", Some(&token), None)
        .await;
    let link = json_body(&body);
    fs::remove_file(&path).unwrap();

    let (status, _, _) = server.fetch(&link).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_download() {
    let server = create_test_server();
    fs::write(server.public.path().join("a.txt"), "alpha").unwrap();
    fs::create_dir_all(server.public.path().join("docs/inner")).unwrap();
    fs::write(server.public.path().join("docs/inner/b.txt"), "beta").unwrap();
    let token = server.token("r--", "");

    let (status, body) = server
        .call(
            Method::POST,
            "/download/batch",
            Some(&token),
            Some(json!({"keys": ["a.txt", "docs"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let link = json_body(&body);
    assert_eq!(fs::read_dir(server.temp.path()).unwrap().count(), 1);

    let (status, headers, body) = server.fetch(&link).await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers[CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.ends_with(".zip\""));

    let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["a.txt", "docs/", "docs/inner/", "docs/inner/b.txt"]
    );
    let mut contents = String::new();
    archive
        .by_name("docs/inner/b.txt")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "beta");

    // The archive is deleted once served, and the link is spent.
    assert_eq!(fs::read_dir(server.temp.path()).unwrap().count(), 0);
    let (status, _, _) = server.fetch(&link).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_batch_download_validation() {
    let server = create_test_server();
    fs::create_dir(server.public.path().join("team")).unwrap();
    fs::write(server.public.path().join("secret.txt"), "no").unwrap();
    let token = server.token("r--", "team");

    let (status, _) = server
        .call(
            Method::POST,
            "/download/batch",
            Some(&token),
            Some(json!({"keys": []})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .call(
            Method::POST,
            "/download/batch",
            Some(&token),
            Some(json!({"keys": ["../secret.txt"]})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .call(
            Method::POST,
            "/download/batch",
            Some(&token),
            Some(json!({"keys": ["missing"]})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(fs::read_dir(server.temp.path()).unwrap().count(), 0);
}
