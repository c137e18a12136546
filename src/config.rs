use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub ai: AiConfig,
    pub discord: DiscordConfig,
    pub scraper: ScraperConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Hard ceiling for one firing, shared by every task.
    pub firing_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Static bearer token for the API. Empty means open access on loopback only.
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub default_provider: String,
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub google: ProviderConfig,
    pub openrouter: ProviderConfig,
    pub deepseek: ProviderConfig,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub default_webhook: String,
    pub rate_limit: Duration,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Config {
    pub fn load() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("SERVER_HOST", "0.0.0.0"),
                port: env_parse("SERVER_PORT", 8080),
                api_token: env_or("API_TOKEN", ""),
            },
            database: DatabaseConfig {
                path: PathBuf::from(env_or("DATABASE_PATH", "conveyor.db")),
            },
            scheduler: SchedulerConfig {
                firing_timeout: Duration::from_secs(env_parse(
                    "SCHEDULER_FIRING_TIMEOUT_SECS",
                    30 * 60,
                )),
            },
            ai: AiConfig {
                default_provider: env_or("AI_DEFAULT_PROVIDER", "openai"),
                openai: ProviderConfig {
                    api_key: env_or("OPENAI_API_KEY", ""),
                    model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
                    base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
                },
                anthropic: ProviderConfig {
                    api_key: env_or("ANTHROPIC_API_KEY", ""),
                    model: env_or("ANTHROPIC_MODEL", "claude-3-5-sonnet-20241022"),
                    base_url: env_or("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
                },
                google: ProviderConfig {
                    api_key: env_or("GOOGLE_API_KEY", ""),
                    model: env_or("GOOGLE_MODEL", "gemini-1.5-flash"),
                    base_url: env_or(
                        "GOOGLE_BASE_URL",
                        "https://generativelanguage.googleapis.com/v1beta",
                    ),
                },
                openrouter: ProviderConfig {
                    api_key: env_or("OPENROUTER_API_KEY", ""),
                    model: env_or("OPENROUTER_MODEL", "openai/gpt-4o-mini"),
                    base_url: env_or("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
                },
                deepseek: ProviderConfig {
                    api_key: env_or("DEEPSEEK_API_KEY", ""),
                    model: env_or("DEEPSEEK_MODEL", "deepseek-chat"),
                    base_url: env_or("DEEPSEEK_BASE_URL", "https://api.deepseek.com/v1"),
                },
            },
            discord: DiscordConfig {
                default_webhook: env_or("DISCORD_DEFAULT_WEBHOOK", ""),
                rate_limit: Duration::from_millis(env_parse("DISCORD_RATE_LIMIT_MS", 1000)),
            },
            scraper: ScraperConfig {
                user_agent: env_or(
                    "SCRAPER_USER_AGENT",
                    "Mozilla/5.0 (compatible; Conveyor/0.3)",
                ),
                request_timeout: Duration::from_secs(env_parse("SCRAPER_REQUEST_TIMEOUT", 30)),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
