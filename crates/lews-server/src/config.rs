//! Server configuration from environment.
//!
//! Every parameter that affects behaviour is enumerated here and supplied at
//! construction time; nothing inside the pipeline reads the environment.

use std::env;

use lews_core::zones::SoilDefaults;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,

    // Detection engine
    pub risk_threshold: f64,
    pub correlation_radius_m: f64,
    pub cluster_radius_m: f64,
    pub min_cluster_size: usize,
    pub window_seconds: i64,
    pub detect_interval_s: u64,
    pub detect_deadline_s: u64,
    pub max_parallel_detections: usize,

    // Zone index (RAG) defaults
    pub max_distance_km: f64,
    pub radius_km: f64,
    pub zone_geohash_precision: usize,
    pub fine_geohash_precision: usize,
    pub zone_query_timeout_s: u64,
    pub telemetry_page_timeout_s: u64,

    // LLM call + retry policy
    pub llm_url: String,
    pub llm_api_key: String,
    pub llm_model_id: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f64,
    pub llm_top_p: f64,
    pub llm_timeout_s: u64,
    pub llm_max_attempts: u32,
    pub llm_backoff_base_s: f64,
    pub llm_backoff_cap_s: f64,
    pub llm_parse_retries: u32,

    // Alert lifecycle
    pub alert_ttl_seconds: i64,
    pub alert_dedup_window_s: i64,
    pub alert_expiry_grace_s: i64,
    pub expiry_sweep_interval_s: u64,

    // Feature toggles
    pub enable_enrichment: bool,
    pub enable_event_publish: bool,
    pub treat_zero_safety_factor_as_failure: bool,

    // External endpoints (empty = disabled / fallback behaviour)
    pub event_bus_url: Option<String>,
    pub notifier_url: Option<String>,
    pub geocoder_url: Option<String>,

    /// Soil-type critical-moisture baselines (percent).
    pub soil_defaults: SoilDefaults,
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|s| s.to_ascii_lowercase() == "true" || s == "1")
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_port: env_parse("LEWS_PORT", 8080),
            database_path: env_str("LEWS_DB_PATH", "data/lews.db"),
            database_max_connections: env_parse("LEWS_DB_MAX_CONNECTIONS", 5),

            risk_threshold: env_parse("LEWS_RISK_THRESHOLD", 0.6),
            correlation_radius_m: env_parse("LEWS_CORRELATION_RADIUS_M", 50.0),
            cluster_radius_m: env_parse("LEWS_CLUSTER_RADIUS_M", 50.0),
            min_cluster_size: env_parse("LEWS_MIN_CLUSTER_SIZE", 3),
            window_seconds: env_parse("LEWS_WINDOW_SECONDS", 24 * 3600),
            detect_interval_s: env_parse("LEWS_DETECT_INTERVAL_S", 300),
            detect_deadline_s: env_parse("LEWS_DETECT_DEADLINE_S", 300),
            max_parallel_detections: env_parse("LEWS_MAX_PARALLEL_DETECTIONS", 8),

            max_distance_km: env_parse("LEWS_MAX_DISTANCE_KM", 5.0),
            radius_km: env_parse("LEWS_RADIUS_KM", 1.0),
            zone_geohash_precision: env_parse("LEWS_ZONE_GEOHASH_PRECISION", 4),
            fine_geohash_precision: env_parse("LEWS_FINE_GEOHASH_PRECISION", 6),
            zone_query_timeout_s: env_parse("LEWS_ZONE_QUERY_TIMEOUT_S", 3),
            telemetry_page_timeout_s: env_parse("LEWS_TELEMETRY_PAGE_TIMEOUT_S", 5),

            llm_url: env_str("LEWS_LLM_URL", "http://localhost:8000/v1/messages"),
            llm_api_key: env_str("LEWS_LLM_API_KEY", ""),
            llm_model_id: env_str("LEWS_LLM_MODEL_ID", "claude-3-haiku-20240307"),
            llm_max_tokens: env_parse("LEWS_LLM_MAX_TOKENS", 2000),
            llm_temperature: env_parse("LEWS_LLM_TEMPERATURE", 0.3),
            llm_top_p: env_parse("LEWS_LLM_TOP_P", 0.9),
            llm_timeout_s: env_parse("LEWS_LLM_TIMEOUT_S", 20),
            llm_max_attempts: env_parse("LEWS_LLM_MAX_ATTEMPTS", 6),
            llm_backoff_base_s: env_parse("LEWS_LLM_BACKOFF_BASE_S", 0.6),
            llm_backoff_cap_s: env_parse("LEWS_LLM_BACKOFF_CAP_S", 10.0),
            llm_parse_retries: env_parse("LEWS_LLM_PARSE_RETRIES", 2),

            alert_ttl_seconds: env_parse("LEWS_ALERT_TTL_SECONDS", 30 * 24 * 3600),
            alert_dedup_window_s: env_parse("LEWS_ALERT_DEDUP_WINDOW_S", 6 * 3600),
            alert_expiry_grace_s: env_parse("LEWS_ALERT_EXPIRY_GRACE_S", 24 * 3600),
            expiry_sweep_interval_s: env_parse("LEWS_EXPIRY_SWEEP_INTERVAL_S", 3600),

            enable_enrichment: env_bool("LEWS_ENABLE_ENRICHMENT", true),
            enable_event_publish: env_bool("LEWS_ENABLE_EVENT_PUBLISH", true),
            treat_zero_safety_factor_as_failure: env_bool("LEWS_SF_ZERO_IS_FAILURE", false),

            event_bus_url: env_opt("LEWS_EVENT_BUS_URL"),
            notifier_url: env_opt("LEWS_NOTIFIER_URL"),
            geocoder_url: env_opt("LEWS_GEOCODER_URL"),

            soil_defaults: SoilDefaults {
                colluvium: env_parse("LEWS_CRITICAL_MOISTURE_COLLUVIUM", 35.0),
                residual: env_parse("LEWS_CRITICAL_MOISTURE_RESIDUAL", 45.0),
                fill: env_parse("LEWS_CRITICAL_MOISTURE_FILL", 30.0),
                bedrock: env_parse("LEWS_CRITICAL_MOISTURE_BEDROCK", 60.0),
                default: env_parse("LEWS_CRITICAL_MOISTURE_DEFAULT", 40.0),
            },
        }
    }

    pub fn fusion_params(&self) -> lews_core::FusionParams {
        lews_core::FusionParams {
            correlation_radius_m: self.correlation_radius_m,
            cluster_radius_m: self.cluster_radius_m,
            min_cluster_size: self.min_cluster_size,
            risk_threshold: self.risk_threshold,
        }
    }
}
