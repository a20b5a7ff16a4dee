use cookie::SameSite;
use tracing::warn;

#[derive(Clone)]
pub struct SecurityConfig {
    pub access_cookie_name: String,
    pub refresh_cookie_name: String,
    pub secure_cookies: bool,
    pub same_site: SameSite,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub cleanup_interval_secs: u64,
    pub default_key_rate_limit: i32,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let access_cookie_name =
            env_string("ACCESS_COOKIE_NAME").unwrap_or_else(|| "access_token".into());
        let refresh_cookie_name =
            env_string("REFRESH_COOKIE_NAME").unwrap_or_else(|| "refresh_token".into());

        let mut secure_cookies = env_bool("COOKIE_SECURE").unwrap_or(true);
        let same_site = env_same_site().unwrap_or(SameSite::Lax);

        if same_site == SameSite::None && !secure_cookies {
            warn!("SameSite=None requires secure cookies; forcing COOKIE_SECURE=true");
            secure_cookies = true;
        }

        SecurityConfig {
            access_cookie_name,
            refresh_cookie_name,
            secure_cookies,
            same_site,
            access_ttl_minutes: env_i64("ACCESS_TTL_MINUTES").unwrap_or(5),
            refresh_ttl_days: env_i64("REFRESH_TTL_DAYS").unwrap_or(30),
            cleanup_interval_secs: env_i64("TOKEN_CLEANUP_INTERVAL_SECS")
                .map(|v| v.max(1) as u64)
                .unwrap_or(3600),
            default_key_rate_limit: env_i64("API_KEY_DEFAULT_RATE_LIMIT")
                .map(|v| v.max(1) as i32)
                .unwrap_or(60),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| {
        let val = v.trim().to_ascii_lowercase();
        match val.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_same_site() -> Option<SameSite> {
    std::env::var("COOKIE_SAMESITE")
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "none" => Some(SameSite::None),
            "lax" => Some(SameSite::Lax),
            "strict" => Some(SameSite::Strict),
            _ => None,
        })
}
