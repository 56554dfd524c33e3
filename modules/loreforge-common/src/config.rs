use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI providers
    pub anthropic_api_key: String,
    pub autorag_url: String,
    pub autorag_api_key: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Auth
    pub jwt_secret: String,

    // Rebuild orchestration
    /// Accumulated impact at which a rebuild is scheduled.
    pub rebuild_impact_threshold: f64,
    /// Distinct affected entities at or below which a scheduled rebuild is partial.
    pub rebuild_partial_max_entities: usize,

    // Graph guardrails
    pub graph_max_entities: usize,
    pub graph_max_relationships: usize,

    /// Whether community summaries are generated after rebuilds.
    pub summaries_enabled: bool,
}

impl Config {
    /// Load configuration for the API binary.
    /// Panics with a clear message if required vars are missing.
    pub fn api_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            autorag_url: required_env("AUTORAG_URL"),
            autorag_api_key: env::var("AUTORAG_API_KEY").unwrap_or_default(),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            jwt_secret: required_env("JWT_SECRET"),
            rebuild_impact_threshold: env_f64("REBUILD_IMPACT_THRESHOLD", 5.0),
            rebuild_partial_max_entities: env_usize("REBUILD_PARTIAL_MAX_ENTITIES", 25),
            graph_max_entities: env_usize("GRAPH_MAX_ENTITIES", 50_000),
            graph_max_relationships: env_usize("GRAPH_MAX_RELATIONSHIPS", 200_000),
            summaries_enabled: env::var("SUMMARIES_ENABLED")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
        }
    }

    /// Load configuration for a standalone worker (no web server or JWT).
    pub fn worker_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            autorag_url: required_env("AUTORAG_URL"),
            autorag_api_key: env::var("AUTORAG_API_KEY").unwrap_or_default(),
            web_host: String::new(),
            web_port: 0,
            jwt_secret: String::new(),
            rebuild_impact_threshold: env_f64("REBUILD_IMPACT_THRESHOLD", 5.0),
            rebuild_partial_max_entities: env_usize("REBUILD_PARTIAL_MAX_ENTITIES", 25),
            graph_max_entities: env_usize("GRAPH_MAX_ENTITIES", 50_000),
            graph_max_relationships: env_usize("GRAPH_MAX_RELATIONSHIPS", 200_000),
            summaries_enabled: env::var("SUMMARIES_ENABLED")
                .map(|v| v != "0" && v != "false")
                .unwrap_or(true),
        }
    }

    /// Log the presence and length of each sensitive value, never the value.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("ANTHROPIC_API_KEY", &self.anthropic_api_key),
            ("AUTORAG_URL", &self.autorag_url),
            ("AUTORAG_API_KEY", &self.autorag_api_key),
            ("JWT_SECRET", &self.jwt_secret),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
