use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 600 }
fn default_max_lifetime() -> u64 { 3600 }
fn default_acquire_timeout() -> u64 { 30 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            acquire_timeout_secs: default_acquire_timeout(),
            sqlx_logging: false,
        }
    }
}

/// Settings for the registration and email verification flows.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Public origin that verification links are built from.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `From:` address for outgoing notifications.
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
    /// Upper bound on a single notification send. Registration holds its
    /// transaction open while sending, so this must stay small.
    #[serde(default = "default_mail_timeout")]
    pub mail_timeout_secs: u64,
}

fn default_base_url() -> String { "http://localhost:8080".into() }
fn default_sender() -> String { "no-reply@localhost".into() }
fn default_token_lifetime() -> u64 { 15 * 60 }
fn default_mail_timeout() -> u64 { 10 }

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sender: default_sender(),
            token_lifetime_secs: default_token_lifetime(),
            mail_timeout_secs: default_mail_timeout(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 { 64 * 1024 }
fn default_iterations() -> u32 { 1 }
fn default_parallelism() -> u32 { 8 }

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    load_from_str(&content)
}

pub fn load_from_str(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Defaults plus whatever the environment provides; used when no config file exists.
    pub fn from_env() -> Result<Self> {
        let mut cfg = AppConfig::default();
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.database.normalize_from_env();
        self.database.validate()?;
        self.identity.normalize();
        self.identity.validate()?;
        self.hashing.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn normalize_from_env(&mut self) {
        if self.url.trim().is_empty() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                self.url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("database.url is empty; set it in config.toml or via DATABASE_URL"));
        }
        let lower = self.url.to_lowercase();
        if !(lower.starts_with("postgresql://") || lower.starts_with("postgres://")) {
            return Err(anyhow!("database.url must start with postgresql:// or postgres://"));
        }
        if self.min_connections == 0 {
            return Err(anyhow!("database.min_connections must be >= 1"));
        }
        if self.max_connections < self.min_connections {
            return Err(anyhow!("database.max_connections must be >= min_connections"));
        }
        if self.connect_timeout_secs == 0 || self.acquire_timeout_secs == 0 {
            return Err(anyhow!("database timeouts must be a positive number of seconds"));
        }
        Ok(())
    }
}

impl IdentityConfig {
    fn normalize(&mut self) {
        self.base_url = self.base_url.trim().to_string();
        self.sender = self.sender.trim().to_string();
    }

    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;
        if !self.sender.contains('@') {
            return Err(anyhow!("identity.sender must be an email address"));
        }
        if self.token_lifetime_secs == 0 {
            return Err(anyhow!("identity.token_lifetime_secs must be > 0"));
        }
        if self.mail_timeout_secs == 0 {
            return Err(anyhow!("identity.mail_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| anyhow!("identity.base_url {:?} is not a valid URL: {e}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(anyhow!("identity.base_url must be an absolute http(s) URL"));
        }
        Ok(url)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs)
    }
}

impl HashingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(anyhow!("hashing.iterations must be >= 1"));
        }
        if self.parallelism == 0 {
            return Err(anyhow!("hashing.parallelism must be >= 1"));
        }
        // Argon2 needs at least 8 KiB of memory per lane.
        if self.memory_kib < 8 * self.parallelism {
            return Err(anyhow!("hashing.memory_kib must be >= 8 * parallelism"));
        }
        Ok(())
    }
}
