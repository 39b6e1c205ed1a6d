//! Configuration management for Tama.
//!
//! Loads configuration from environment variables (a `.env` file is honoured)
//! with support for:
//! - Multiple LLM providers with fallback priority
//! - Database, upload storage and session settings
//!
//! Quota ceilings and transcript caps are compile-time constants, not
//! configuration.

use std::env;
use std::sync::OnceLock;

use tama_llm::{default_endpoint, default_model, LlmConfig, LlmProviderConfig, SamplingConfig};

/// Metered requests a non-Pro user may make per calendar day (UTC).
pub const DAILY_REQUEST_LIMIT: i64 = 30;

/// Most recent messages retained per chat.
pub const MAX_CHAT_MESSAGES: usize = 10;

/// Chats returned by the history listing.
pub const MAX_HISTORY_CHATS: i64 = 10;

/// Largest accepted upload.
pub const MAX_UPLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Upload MIME types that are accepted.
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &["image/jpeg", "image/png", "application/pdf"];

const DEFAULT_SYSTEM_PROMPT: &str = "You are TamaAI from the Vietchart team. Reply naturally, \
like a close friend: casual and direct, but always respectful and genuinely helpful.";

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Initialize configuration (call once at startup)
pub fn init() -> &'static Config {
    config()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_age_seconds: u64,
}

/// Upper bound on session lifetime (ten years).
const MAX_SESSION_AGE_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

impl SessionConfig {
    /// Session lifetime, clamped so expiry arithmetic cannot overflow.
    pub fn max_age(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.max_age_seconds)
            .map_or(MAX_SESSION_AGE_SECONDS, |s| s.min(MAX_SESSION_AGE_SECONDS));
        chrono::Duration::seconds(seconds)
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding uploaded blobs.
    pub uploads_path: String,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Fixed system instruction sent ahead of every conversation.
    pub system_prompt: String,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let port = env_or("PORT", "3000").parse().unwrap_or_else(|_| {
            eprintln!("Invalid PORT, falling back to 3000");
            3000
        });

        Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port,
                public_url: env_or("PUBLIC_URL", "http://localhost:3000"),
            },
            database: DatabaseConfig {
                path: env_or("DATABASE_PATH", "./data/tama.db"),
            },
            session: SessionConfig {
                max_age_seconds: env_or("SESSION_MAX_AGE", "604800")
                    .parse()
                    .unwrap_or(604800), // 7 days
            },
            storage: StorageConfig {
                uploads_path: env_or("UPLOADS_PATH", "./data/uploads"),
            },
            chat: ChatConfig {
                system_prompt: env_or("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
                sampling: SamplingConfig::default(),
            },
            llm: LlmConfig {
                providers: Self::parse_llm_providers(),
            },
            log: LogConfig {
                format: match env_or("LOG_FORMAT", "text").to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    _ => LogFormat::Text,
                },
            },
        }
    }

    /// Configuration for tests and embedding: in-memory database, no providers.
    pub fn for_testing(uploads_path: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                public_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                path: ":memory:".to_string(),
            },
            session: SessionConfig {
                max_age_seconds: 604800,
            },
            storage: StorageConfig {
                uploads_path: uploads_path.into(),
            },
            chat: ChatConfig {
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                sampling: SamplingConfig::default(),
            },
            llm: LlmConfig::default(),
            log: LogConfig {
                format: LogFormat::Text,
            },
        }
    }

    /// Whether cookies should carry the Secure flag.
    pub fn secure_cookies(&self) -> bool {
        self.server.public_url.starts_with("https")
    }

    /// Parse LLM providers from environment.
    /// Supports Gemini, Anthropic, OpenRouter, and OpenAI with automatic fallback ordering.
    fn parse_llm_providers() -> Vec<LlmProviderConfig> {
        // (name, key variable, env prefix, priority)
        const PROVIDERS: &[(&str, &str, &str, u8)] = &[
            ("gemini", "GOOGLE_API_KEY", "GEMINI", 1),
            ("anthropic", "ANTHROPIC_API_KEY", "ANTHROPIC", 2),
            ("openrouter", "OPENROUTER_API_KEY", "OPENROUTER", 3),
            ("openai", "OPENAI_API_KEY", "OPENAI", 4),
        ];

        let mut providers: Vec<LlmProviderConfig> = PROVIDERS
            .iter()
            .filter_map(|(name, key_var, prefix, priority)| {
                let api_key = env::var(key_var).ok().filter(|k| !k.is_empty())?;
                Some(LlmProviderConfig {
                    name: name.to_string(),
                    base_url: env::var(format!("{}_BASE_URL", prefix))
                        .unwrap_or_else(|_| default_endpoint(name)),
                    model: env::var(format!("{}_MODEL", prefix))
                        .unwrap_or_else(|_| default_model(name)),
                    api_key,
                    priority: *priority,
                })
            })
            .collect();

        // Sort by priority
        providers.sort_by_key(|p| p.priority);
        providers
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
