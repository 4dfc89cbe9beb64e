use crate::crypto::{CredentialCipher, constant_time_eq};
use crate::family::Family;
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, Row};
use std::collections::HashMap;

/// A configured upstream target. `api_key` is plaintext only on the value
/// returned by [`ChannelStore::resolve_by_custom_key`]; everywhere else the
/// stored (encrypted) form is carried untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub provider: Family,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub custom_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub enabled: bool,
    pub proxy: Option<ProxyConfig>,
    pub models_mapping: HashMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Channel {
    /// Apply the per-channel model remap exactly once. A name that is
    /// already one of the mapping's targets passes through, which keeps the
    /// operation idempotent even for chained-looking tables.
    pub fn upstream_model(&self, requested: &str) -> String {
        if self.models_mapping.values().any(|v| v == requested) {
            return requested.to_string();
        }
        self.models_mapping
            .get(requested)
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    Http,
    Https,
    Socks5,
}

impl ProxyType {
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(ProxyType::Http),
            "https" => Some(ProxyType::Https),
            "socks5" => Some(ProxyType::Socks5),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Proxy URL for the HTTP client. Empty-string credentials are treated
    /// as absent, not as empty auth.
    pub fn url(&self) -> String {
        let auth = match (
            self.username.as_deref().filter(|u| !u.is_empty()),
            self.password.as_deref().filter(|p| !p.is_empty()),
        ) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            _ => String::new(),
        };
        format!(
            "{}://{auth}{}:{}",
            self.proxy_type.scheme(),
            self.host,
            self.port
        )
    }
}

#[derive(Debug)]
pub enum ResolveError {
    NotFound,
    Disabled,
    Store(String),
}

#[derive(Debug, Default, Clone)]
pub struct NewChannel {
    pub name: String,
    pub provider: Option<Family>,
    pub base_url: String,
    pub api_key: String,
    pub custom_key: String,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub proxy: Option<ProxyConfig>,
    pub models_mapping: HashMap<String, String>,
}

#[derive(Debug, Default, Clone)]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub custom_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub enabled: Option<bool>,
    pub proxy: Option<Option<ProxyConfig>>,
    pub models_mapping: Option<HashMap<String, String>>,
}

/// Persisted channel records plus the credential cipher. Reads are safe for
/// concurrent use; writes come from the admin collaborator and are
/// serialized by the database.
#[derive(Clone)]
pub struct ChannelStore {
    pool: AnyPool,
    cipher: CredentialCipher,
}

impl ChannelStore {
    pub async fn new(pool: AnyPool, encryption_key: Option<String>) -> Result<Self, String> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channels (
                id VARCHAR(64) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                provider VARCHAR(32) NOT NULL,
                base_url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                custom_key VARCHAR(255) NOT NULL UNIQUE,
                timeout_secs INTEGER NOT NULL DEFAULT 30,
                max_retries INTEGER NOT NULL DEFAULT 3,
                enabled INTEGER NOT NULL DEFAULT 1,
                proxy_type VARCHAR(16),
                proxy_host VARCHAR(255),
                proxy_port INTEGER,
                proxy_username VARCHAR(255),
                proxy_password VARCHAR(255),
                models_mapping TEXT,
                created_at VARCHAR(64) NOT NULL,
                updated_at VARCHAR(64) NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|err| format!("channels table init failed: {err}"))?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_config (
                config_key VARCHAR(255) PRIMARY KEY,
                config_value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|err| format!("system_config table init failed: {err}"))?;

        let secret = match encryption_key.filter(|k| !k.trim().is_empty()) {
            Some(secret) => secret,
            None => resolve_stored_secret(&pool).await?,
        };
        Ok(Self {
            pool,
            cipher: CredentialCipher::new(&secret),
        })
    }

    pub async fn add_channel(&self, input: NewChannel) -> Result<Channel, String> {
        let provider = input.provider.ok_or("unsupported provider")?;
        if input.base_url.trim().is_empty() {
            return Err("base_url is required".to_string());
        }
        if input.api_key.trim().is_empty() {
            return Err("api_key is required".to_string());
        }
        if input.custom_key.trim().is_empty() {
            return Err("custom_key is required".to_string());
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let encrypted = self.cipher.encrypt(&input.api_key)?;
        let mapping_json = serde_json::to_string(&input.models_mapping)
            .map_err(|err| format!("models_mapping serialize failed: {err}"))?;
        let proxy = input.proxy.clone();
        let result = sqlx::query(
            "INSERT INTO channels
             (id, name, provider, base_url, api_key, custom_key, timeout_secs, max_retries,
              enabled, proxy_type, proxy_host, proxy_port, proxy_username, proxy_password,
              models_mapping, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.name)
        .bind(provider.as_str())
        .bind(&input.base_url)
        .bind(&encrypted)
        .bind(&input.custom_key)
        .bind(input.timeout_secs.unwrap_or(30) as i64)
        .bind(input.max_retries.unwrap_or(3) as i64)
        .bind(proxy.as_ref().map(|p| p.proxy_type.scheme()))
        .bind(proxy.as_ref().map(|p| p.host.clone()))
        .bind(proxy.as_ref().map(|p| p.port as i64))
        .bind(proxy.as_ref().and_then(|p| p.username.clone()))
        .bind(proxy.as_ref().and_then(|p| p.password.clone()))
        .bind(&mapping_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => self
                .get_channel(&id)
                .await?
                .ok_or_else(|| "channel vanished after insert".to_string()),
            Err(err) if is_unique_violation(&err) => Err(format!(
                "custom_key '{}' already exists",
                input.custom_key
            )),
            Err(err) => Err(format!("channel insert failed: {err}")),
        }
    }

    pub async fn update_channel(&self, id: &str, update: ChannelUpdate) -> Result<bool, String> {
        let Some(mut channel) = self.get_channel(id).await? else {
            return Ok(false);
        };
        if let Some(name) = update.name {
            channel.name = name;
        }
        if let Some(base_url) = update.base_url {
            channel.base_url = base_url;
        }
        if let Some(api_key) = update.api_key {
            channel.api_key = self.cipher.encrypt(&api_key)?;
        }
        if let Some(custom_key) = update.custom_key {
            channel.custom_key = custom_key;
        }
        if let Some(timeout_secs) = update.timeout_secs {
            channel.timeout_secs = timeout_secs;
        }
        if let Some(max_retries) = update.max_retries {
            channel.max_retries = max_retries;
        }
        if let Some(enabled) = update.enabled {
            channel.enabled = enabled;
        }
        if let Some(proxy) = update.proxy {
            channel.proxy = proxy;
        }
        if let Some(mapping) = update.models_mapping {
            channel.models_mapping = mapping;
        }
        let mapping_json = serde_json::to_string(&channel.models_mapping)
            .map_err(|err| format!("models_mapping serialize failed: {err}"))?;
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE channels SET name = ?, base_url = ?, api_key = ?, custom_key = ?,
             timeout_secs = ?, max_retries = ?, enabled = ?, proxy_type = ?, proxy_host = ?,
             proxy_port = ?, proxy_username = ?, proxy_password = ?, models_mapping = ?,
             updated_at = ? WHERE id = ?",
        )
        .bind(&channel.name)
        .bind(&channel.base_url)
        .bind(&channel.api_key)
        .bind(&channel.custom_key)
        .bind(channel.timeout_secs as i64)
        .bind(channel.max_retries as i64)
        .bind(if channel.enabled { 1i64 } else { 0i64 })
        .bind(channel.proxy.as_ref().map(|p| p.proxy_type.scheme()))
        .bind(channel.proxy.as_ref().map(|p| p.host.clone()))
        .bind(channel.proxy.as_ref().map(|p| p.port as i64))
        .bind(channel.proxy.as_ref().and_then(|p| p.username.clone()))
        .bind(channel.proxy.as_ref().and_then(|p| p.password.clone()))
        .bind(&mapping_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await;
        match result {
            Ok(done) => Ok(done.rows_affected() > 0),
            Err(err) if is_unique_violation(&err) => {
                Err(format!("custom_key '{}' already exists", channel.custom_key))
            }
            Err(err) => Err(format!("channel update failed: {err}")),
        }
    }

    pub async fn delete_channel(&self, id: &str) -> Result<bool, String> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| format!("channel delete failed: {err}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>, String> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| format!("channel lookup failed: {err}"))?;
        row.map(|row| channel_from_row(&row)).transpose()
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>, String> {
        let rows = sqlx::query("SELECT * FROM channels ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| format!("channel list failed: {err}"))?;
        rows.iter().map(channel_from_row).collect()
    }

    /// Look up the channel for an inbound custom key. The comparison runs in
    /// constant time against every stored key so response timing does not
    /// reveal prefixes. Returns the decrypted credential — this is the one
    /// plaintext exit from the store.
    pub async fn resolve_by_custom_key(&self, custom_key: &str) -> Result<Channel, ResolveError> {
        let rows = sqlx::query("SELECT * FROM channels")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| ResolveError::Store(format!("channel scan failed: {err}")))?;
        let mut matched: Option<Channel> = None;
        for row in &rows {
            let channel = channel_from_row(row).map_err(ResolveError::Store)?;
            // Evaluate every row; no early exit on match.
            if constant_time_eq(&channel.custom_key, custom_key) && matched.is_none() {
                matched = Some(channel);
            }
        }
        let Some(mut channel) = matched else {
            return Err(ResolveError::NotFound);
        };
        if !channel.enabled {
            return Err(ResolveError::Disabled);
        }
        channel.api_key = self
            .cipher
            .decrypt(&channel.api_key)
            .map_err(ResolveError::Store)?;
        Ok(channel)
    }
}

async fn resolve_stored_secret(pool: &AnyPool) -> Result<String, String> {
    let row = sqlx::query("SELECT config_value FROM system_config WHERE config_key = ?")
        .bind("encryption_key")
        .fetch_optional(pool)
        .await
        .map_err(|err| format!("encryption key lookup failed: {err}"))?;
    if let Some(row) = row {
        return row
            .try_get::<String, _>("config_value")
            .map_err(|err| format!("encryption key read failed: {err}"));
    }
    let secret = CredentialCipher::generate_secret()?;
    sqlx::query("INSERT INTO system_config (config_key, config_value) VALUES (?, ?)")
        .bind("encryption_key")
        .bind(&secret)
        .execute(pool)
        .await
        .map_err(|err| format!("encryption key store failed: {err}"))?;
    tracing::info!("generated new encryption key; set ENCRYPTION_KEY to pin it");
    Ok(secret)
}

fn channel_from_row(row: &sqlx::any::AnyRow) -> Result<Channel, String> {
    let get_str = |key: &str| -> Result<String, String> {
        row.try_get::<String, _>(key)
            .map_err(|err| format!("column {key}: {err}"))
    };
    let get_opt = |key: &str| -> Option<String> {
        row.try_get::<Option<String>, _>(key).ok().flatten()
    };
    let provider_raw = get_str("provider")?;
    let provider = Family::parse(&provider_raw)
        .ok_or_else(|| format!("unknown provider '{provider_raw}'"))?;
    let models_mapping = get_opt("models_mapping")
        .filter(|raw| !raw.is_empty())
        .map(|raw| serde_json::from_str::<HashMap<String, String>>(&raw))
        .transpose()
        .map_err(|err| format!("models_mapping parse failed: {err}"))?
        .unwrap_or_default();
    let proxy = match (
        get_opt("proxy_type").and_then(|t| ProxyType::parse(&t)),
        get_opt("proxy_host"),
        row.try_get::<Option<i64>, _>("proxy_port").ok().flatten(),
    ) {
        (Some(proxy_type), Some(host), Some(port)) if !host.is_empty() => Some(ProxyConfig {
            proxy_type,
            host,
            port: port as u16,
            username: get_opt("proxy_username").filter(|u| !u.is_empty()),
            password: get_opt("proxy_password").filter(|p| !p.is_empty()),
        }),
        _ => None,
    };
    Ok(Channel {
        id: get_str("id")?,
        name: get_str("name")?,
        provider,
        base_url: get_str("base_url")?,
        api_key: get_str("api_key")?,
        custom_key: get_str("custom_key")?,
        timeout_secs: row
            .try_get::<i64, _>("timeout_secs")
            .map_err(|err| format!("column timeout_secs: {err}"))?
            .max(1) as u64,
        max_retries: row
            .try_get::<i64, _>("max_retries")
            .map_err(|err| format!("column max_retries: {err}"))?
            .max(0) as u32,
        enabled: row
            .try_get::<i64, _>("enabled")
            .map_err(|err| format!("column enabled: {err}"))?
            != 0,
        proxy,
        models_mapping,
        created_at: get_str("created_at")?,
        updated_at: get_str("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    let text = err.to_string();
    text.contains("UNIQUE") || text.contains("Duplicate entry") || text.contains("custom_key")
}
