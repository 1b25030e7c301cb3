use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 0.5,
        }
    }
}

/// Session and credential settings. `admin_emails` lists accounts that are
/// granted the admin role at registration; everyone else registers as a
/// regular user.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    pub session_ttl: Duration,
    pub pbkdf2_iterations: u32,
    pub reset_token_ttl: Duration,
    /// Returns password reset tokens in the forgot-password response instead
    /// of delivering them out of band. Development and test setups only.
    pub expose_reset_tokens: bool,
    pub admin_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: String::new(),
            session_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            pbkdf2_iterations: 120_000,
            reset_token_ttl: Duration::from_secs(600),
            expose_reset_tokens: false,
            admin_emails: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_body_bytes: usize,
    pub max_upload_bytes: usize,
    pub db_max_connections: usize,
    pub cors_allowed_origins: Vec<String>,
    pub auth: AuthConfig,
    pub rate_limit_auth: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024,
            max_upload_bytes: 10 * 1024 * 1024,
            db_max_connections: 8,
            cors_allowed_origins: Vec::new(),
            auth: AuthConfig::default(),
            rate_limit_auth: RateLimitConfig::default(),
        }
    }
}

pub fn validate_startup_config(config: &ServerConfig) -> Result<(), String> {
    if config.max_body_bytes == 0 || config.max_upload_bytes == 0 {
        return Err("body size limits must be > 0".to_string());
    }
    if config.db_max_connections == 0 {
        return Err("db_max_connections must be > 0".to_string());
    }
    if config.auth.session_secret.len() < 16 {
        return Err("session_secret must be at least 16 bytes".to_string());
    }
    if config.auth.pbkdf2_iterations == 0 {
        return Err("pbkdf2_iterations must be > 0".to_string());
    }
    if config.auth.session_ttl.is_zero() || config.auth.reset_token_ttl.is_zero() {
        return Err("token lifetimes must be > 0".to_string());
    }
    for email in &config.auth.admin_emails {
        if openworld_model::Email::parse(email).is_err() {
            return Err(format!("admin_emails contains an invalid address: {email}"));
        }
    }
    if config.rate_limit_auth.capacity < 1.0 || config.rate_limit_auth.refill_per_sec <= 0.0 {
        return Err("auth rate limit needs capacity >= 1 and a positive refill rate".to_string());
    }
    Ok(())
}
