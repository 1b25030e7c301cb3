#![forbid(unsafe_code)]

use openworld_server::{
    build_router, validate_startup_config, AppState, AuthConfig, Db, RateLimitConfig, ServerConfig,
};
use openworld_store::{
    Database, HttpMediaStore, LocalFsMediaStore, MediaStore, RetryPolicy, StoreError,
};
use rand::RngCore;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(name, default_secs))
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("OPENWORLD_LOG_JSON", true) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let bind_addr = env::var("OPENWORLD_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let db_path = PathBuf::from(
        env::var("OPENWORLD_DB_PATH").unwrap_or_else(|_| "artifacts/openworld.db".to_string()),
    );
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("create db dir failed: {e}"))?;
    }

    let media: Arc<dyn MediaStore> = if env_bool("OPENWORLD_MEDIA_S3_ENABLED", false) {
        let endpoint = env::var("OPENWORLD_MEDIA_S3_ENDPOINT")
            .map_err(|_| "OPENWORLD_MEDIA_S3_ENDPOINT is required when S3 enabled".to_string())?;
        let bucket = env::var("OPENWORLD_MEDIA_S3_BUCKET")
            .map_err(|_| "OPENWORLD_MEDIA_S3_BUCKET is required when S3 enabled".to_string())?;
        let retry = RetryPolicy {
            max_attempts: env_usize("OPENWORLD_MEDIA_RETRY_ATTEMPTS", 4),
            base_backoff_ms: env_u64("OPENWORLD_MEDIA_RETRY_BASE_MS", 120),
        };
        Arc::new(
            HttpMediaStore::new(endpoint, bucket)
                .with_bearer_token(env::var("OPENWORLD_MEDIA_S3_BEARER").ok())
                .with_public_endpoint(env::var("OPENWORLD_MEDIA_PUBLIC_ENDPOINT").ok())
                .with_retry(retry),
        )
    } else {
        let media_root = PathBuf::from(
            env::var("OPENWORLD_MEDIA_ROOT").unwrap_or_else(|_| "artifacts/media".to_string()),
        );
        fs::create_dir_all(&media_root).map_err(|e| format!("create media root failed: {e}"))?;
        let public_base = env::var("OPENWORLD_MEDIA_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "/media".to_string());
        Arc::new(LocalFsMediaStore::new(media_root, public_base))
    };

    let session_secret = match env::var("OPENWORLD_SESSION_SECRET") {
        Ok(secret) => secret,
        Err(_) => {
            let mut bytes = [0_u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            warn!("OPENWORLD_SESSION_SECRET not set; sessions will not survive restarts");
            hex::encode(bytes)
        }
    };

    let config = ServerConfig {
        max_body_bytes: env_usize("OPENWORLD_MAX_BODY_BYTES", 16 * 1024),
        max_upload_bytes: env_usize("OPENWORLD_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        db_max_connections: env_usize("OPENWORLD_DB_MAX_CONNECTIONS", 8),
        cors_allowed_origins: env_list("OPENWORLD_CORS_ALLOWED_ORIGINS"),
        auth: AuthConfig {
            session_secret,
            session_ttl: env_duration_secs("OPENWORLD_SESSION_TTL_SECS", 30 * 24 * 60 * 60),
            pbkdf2_iterations: env_u64("OPENWORLD_PBKDF2_ITERATIONS", 120_000) as u32,
            reset_token_ttl: env_duration_secs("OPENWORLD_RESET_TOKEN_TTL_SECS", 600),
            expose_reset_tokens: env_bool("OPENWORLD_EXPOSE_RESET_TOKENS", false),
            admin_emails: env_list("OPENWORLD_ADMIN_EMAILS"),
        },
        rate_limit_auth: RateLimitConfig {
            capacity: env_f64("OPENWORLD_AUTH_RATE_LIMIT_CAPACITY", 10.0),
            refill_per_sec: env_f64("OPENWORLD_AUTH_RATE_LIMIT_REFILL_PER_SEC", 0.5),
        },
    };
    validate_startup_config(&config)?;

    let database = Database::open(&db_path)
        .map_err(|e| format!("open database {}: {e}", db_path.display()))?;
    let db = Db::new(database, config.db_max_connections);
    let state = AppState::new(db, media, config)?;
    let app = build_router(state.clone());

    // Ready once the schema is in place and a ping round-trips.
    state
        .db
        .run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(StoreError::from)
        })
        .await
        .map_err(|e| format!("database ping failed: {e}"))?;
    state.ready.store(true, Ordering::Relaxed);

    let db_bg = state.db.clone();
    let ready_bg = state.ready.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(15));
        loop {
            interval.tick().await;
            let ok = db_bg
                .run(|conn| {
                    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                        .map_err(StoreError::from)
                })
                .await
                .is_ok();
            ready_bg.store(ok, Ordering::Relaxed);
        }
    });

    let addr: std::net::SocketAddr = bind_addr
        .parse()
        .map_err(|e| format!("invalid bind addr {bind_addr}: {e}"))?;
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4().map_err(|e| format!("socket v4 failed: {e}"))?
    } else {
        tokio::net::TcpSocket::new_v6().map_err(|e| format!("socket v6 failed: {e}"))?
    };
    socket
        .set_reuseaddr(true)
        .map_err(|e| format!("set_reuseaddr failed: {e}"))?;
    socket
        .set_keepalive(env_bool("OPENWORLD_TCP_KEEPALIVE_ENABLED", true))
        .map_err(|e| format!("set_keepalive failed: {e}"))?;
    socket.bind(addr).map_err(|e| format!("bind failed: {e}"))?;
    let listener: TcpListener = socket
        .listen(1024)
        .map_err(|e| format!("listen failed: {e}"))?;
    info!("openworld-server listening on {bind_addr}");
    let accepting = state.accepting_requests.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            accepting.store(false, Ordering::Relaxed);
            // Flip readiness off first, then drain in-flight requests.
            let drain_ms = env_u64("OPENWORLD_SHUTDOWN_DRAIN_MS", 5000);
            tokio::time::sleep(Duration::from_millis(drain_ms)).await;
        })
        .await
        .map_err(|e| format!("server failed: {e}"))
}
