#![allow(dead_code)]

use openworld_server::{build_router, AppState, AuthConfig, Db, RateLimitConfig, ServerConfig};
use openworld_store::{Database, LocalFsMediaStore, MediaStore};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const TEST_PASSWORD: &str = "correct-horse";
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot-a-real-bitmap";

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub media_root: PathBuf,
    _keep: (TempDir, TempDir),
}

pub async fn spawn_app() -> TestServer {
    spawn_app_with(|_| {}).await
}

/// Boots a server on an ephemeral port against throwaway storage. Hashing
/// iterations are lowered and the auth rate limit is effectively disabled
/// so tests can register freely; scenarios that exercise either tweak the
/// config back up.
pub async fn spawn_app_with(tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let data_dir = tempfile::tempdir().expect("data tempdir");
    let media_dir = tempfile::tempdir().expect("media tempdir");

    let mut config = ServerConfig {
        max_upload_bytes: 64 * 1024,
        auth: AuthConfig {
            session_secret: "integration-secret-0123456789abcdef".to_string(),
            pbkdf2_iterations: 2,
            expose_reset_tokens: true,
            admin_emails: vec![ADMIN_EMAIL.to_string()],
            ..AuthConfig::default()
        },
        rate_limit_auth: RateLimitConfig {
            capacity: 1000.0,
            refill_per_sec: 1000.0,
        },
        ..ServerConfig::default()
    };
    tweak(&mut config);

    let database = Database::open(data_dir.path().join("openworld.db")).expect("open database");
    let db = Db::new(database, config.db_max_connections);
    let media_root = media_dir.path().to_path_buf();
    let media: Arc<dyn MediaStore> =
        Arc::new(LocalFsMediaStore::new(media_root.clone(), "/media".to_string()));
    let state = AppState::new(db, media, config).expect("app state");
    state.ready.store(true, Ordering::Relaxed);

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });

    TestServer {
        addr,
        state,
        media_root,
        _keep: (data_dir, media_dir),
    }
}

pub async fn request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    content_type: Option<&str>,
    payload: &[u8],
    extra_headers: &[(&str, &str)],
) -> (u16, String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(token) = token {
        head.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    if let Some(content_type) = content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    for (name, value) in extra_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", payload.len()));

    let mut raw = head.into_bytes();
    raw.extend_from_slice(payload);
    stream.write_all(&raw).await.expect("write request");

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response must have separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    (status, head.to_string(), body.to_string())
}

pub async fn send_json(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: &Value,
) -> (u16, Value) {
    let payload = serde_json::to_vec(body).expect("encode request body");
    let (status, _, raw) = request(
        addr,
        method,
        path,
        token,
        Some("application/json"),
        &payload,
        &[],
    )
    .await;
    (status, parse_json_body(&raw))
}

pub async fn get_json(addr: SocketAddr, path: &str, token: Option<&str>) -> (u16, Value) {
    let (status, _, raw) = request(addr, "GET", path, token, None, &[], &[]).await;
    (status, parse_json_body(&raw))
}

pub async fn send_empty(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
) -> (u16, Value) {
    let (status, _, raw) = request(addr, method, path, token, None, &[], &[]).await;
    (status, parse_json_body(&raw))
}

fn parse_json_body(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(raw).expect("json body")
    }
}

pub fn error_code(body: &Value) -> &str {
    body.get("error")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

pub fn error_message(body: &Value) -> &str {
    body.get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Builds a multipart/form-data payload by hand; the file tuple is
/// (filename, content type, bytes) and lands in a part named `file`.
pub fn multipart_payload(
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> (String, Vec<u8>) {
    let boundary = "openworld-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

pub async fn register(addr: SocketAddr, name: &str, email: &str) -> (String, String) {
    let (status, body) = send_json(
        addr,
        "POST",
        "/v1/auth/register",
        None,
        &serde_json::json!({"name": name, "email": email, "password": TEST_PASSWORD}),
    )
    .await;
    assert_eq!(status, 201, "register {email} failed: {body}");
    let token = body
        .get("token")
        .and_then(Value::as_str)
        .expect("session token")
        .to_string();
    let user_id = body
        .get("user")
        .and_then(|u| u.get("id"))
        .and_then(Value::as_str)
        .expect("user id")
        .to_string();
    (token, user_id)
}

pub async fn upload_image(addr: SocketAddr, token: &str, title: &str, tags: &str) -> Value {
    let (content_type, payload) = multipart_payload(
        &[("title", title), ("tags", tags)],
        Some(("shot.png", "image/png", PNG_BYTES)),
    );
    let (status, _, raw) = request(
        addr,
        "POST",
        "/v1/images",
        Some(token),
        Some(&content_type),
        &payload,
        &[],
    )
    .await;
    assert_eq!(status, 201, "upload {title} failed: {raw}");
    serde_json::from_str(&raw).expect("image json")
}
