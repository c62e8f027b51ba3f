use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds allowed for reading a request body.
    pub read: u64,
    /// Seconds allowed for producing a response.
    pub write: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { read: 5, write: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub timeout: TimeoutConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            timeout: TimeoutConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.read)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.write)
    }
}

/// Longest token lifetime accepted from configuration.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub ttl_secs: u64,
    /// `0` disables the background sweep; expiry is then enforced lazily only.
    pub sweep_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl TokenConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP/HTTP traces endpoint, e.g. `http://localhost:4318/v1/traces`.
    /// Unset or empty leaves trace export off.
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub token: TokenConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load `base.yml` and then `<environment>.yml` from `dir`, later files
    /// overriding earlier ones key by key.
    pub fn load(dir: impl AsRef<Path>, environment: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let sources = [
            dir.join("base.yml"),
            dir.join(format!("{}.yml", environment.to_lowercase())),
        ];
        Self::from_sources(&sources)
    }

    pub fn from_sources<P: AsRef<Path>>(sources: &[P]) -> Result<Self> {
        let mut merged = Value::Mapping(Default::default());
        for source in sources {
            let source = source.as_ref();
            let layer = read_source(source)
                .with_context(|| format!("loading config source {}", source.display()))?;
            merge(&mut merged, layer);
        }

        let cfg: Config = serde_yaml::from_value(merged).context("mapping to Config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if self.token.ttl_secs == 0 {
            bail!("token.ttl_secs must be non-zero");
        }
        if self.token.ttl_secs > MAX_TTL_SECS {
            bail!("token.ttl_secs must be at most {MAX_TTL_SECS} (one year)");
        }
        Ok(())
    }
}

fn read_source(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).context("reading config file")?;
    let expanded = expand_env(&raw);
    let value: Value = serde_yaml::from_str(&expanded).context("parsing YAML")?;
    Ok(value)
}

/// Replace `${VAR}` and `$VAR` with the environment value, or nothing if unset.
fn expand_env(raw: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static env pattern compiles")
    });
    pattern
        .replace_all(raw, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// Deep-merge `overlay` into `base`. Nulls in the overlay never clear a value.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
