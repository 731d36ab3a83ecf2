//! Process configuration, collected once at startup (mirrors the
//! `Config::from_env()` pattern already used in
//! `rcrt-context-builder/src/config.rs`).

use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub max_db_connections: u32,
    pub bind_addr: String,
    pub auth_mode: AuthMode,
    pub jwt_public_key_pem: Option<String>,
    pub nats_url: Option<String>,
    pub webhook_max_retries: usize,
    pub local_kek_base64: Option<String>,
    pub hygiene: HygieneConfig,
    /// Dev-mode identity, only consulted when `auth_mode == Disabled`.
    pub dev_owner_id: Option<Uuid>,
    pub dev_agent_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Enabled,
    Disabled,
}

#[derive(Clone, Debug)]
pub struct HygieneConfig {
    pub enabled: bool,
    pub run_interval_seconds: u64,
    pub batch_size: i64,
    pub healthcheck_ttl_minutes: i64,
    pub temp_data_ttl_hours: i64,
    pub agent_max_idle_hours: i64,
    pub dlq_retention_days: i64,
}

impl Default for HygieneConfig {
    fn default() -> Self {
        HygieneConfig {
            enabled: true,
            run_interval_seconds: 300,
            batch_size: 1000,
            healthcheck_ttl_minutes: 5,
            temp_data_ttl_hours: 24,
            agent_max_idle_hours: 48,
            dlq_retention_days: 7,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let auth_mode = match std::env::var("AUTH_MODE").as_deref() {
            Ok("disabled") => AuthMode::Disabled,
            _ => AuthMode::Enabled,
        };

        Config {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL not set"),
            max_db_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            auth_mode,
            jwt_public_key_pem: std::env::var("JWT_PUBLIC_KEY_PEM").ok(),
            nats_url: std::env::var("NATS_URL").ok(),
            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", 6),
            local_kek_base64: std::env::var("LOCAL_KEK_BASE64").ok(),
            hygiene: HygieneConfig {
                enabled: env_parse_bool("HYGIENE_ENABLED", true),
                run_interval_seconds: env_parse("HYGIENE_INTERVAL_SECONDS", 300),
                batch_size: env_parse("HYGIENE_BATCH_SIZE", 1000),
                healthcheck_ttl_minutes: env_parse("HYGIENE_HEALTHCHECK_TTL_MINUTES", 5),
                temp_data_ttl_hours: env_parse("HYGIENE_TEMP_DATA_TTL_HOURS", 24),
                agent_max_idle_hours: env_parse("HYGIENE_AGENT_IDLE_HOURS", 48),
                dlq_retention_days: env_parse("HYGIENE_DLQ_RETENTION_DAYS", 7),
            },
            dev_owner_id: std::env::var("OWNER_ID").ok().and_then(|s| Uuid::parse_str(&s).ok()),
            dev_agent_id: std::env::var("AGENT_ID").ok().and_then(|s| Uuid::parse_str(&s).ok()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).as_deref() {
        Ok("false") | Ok("0") => false,
        Ok("true") | Ok("1") => true,
        _ => default,
    }
}
