use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub redis_url: Option<String>,
    /// Visits that started up to this many minutes ago still count as active.
    pub queue_grace_minutes: i64,
    pub expiration_sweep_seconds: u64,
    pub recompute_sweep_seconds: u64,
    pub session_ttl_seconds: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            queue_grace_minutes: parse_var("QUEUE_GRACE_MINUTES", 20),
            expiration_sweep_seconds: parse_var("EXPIRATION_SWEEP_SECONDS", 60),
            recompute_sweep_seconds: parse_var("RECOMPUTE_SWEEP_SECONDS", 300),
            session_ttl_seconds: parse_var("SESSION_TTL_SECONDS", 86400),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_queue_store_configured(&self) -> bool {
        self.redis_url.is_some()
    }
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid value, using default", name);
            default
        }),
        Err(_) => default,
    }
}
