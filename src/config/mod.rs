// Bot configuration and exchange credentials
//
// `BotConfig` is built once at startup by layering, lowest priority first:
// 1. the built-in defaults (`BotConfig::default()`)
// 2. an optional file (`ENVELOPE_CONFIG`, default `envelope.toml`)
// 3. `ENVELOPE__<FIELD>` environment variables
//
// It is validated before the exchange is touched and never mutated afterwards.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "envelope.toml";
const ENV_PREFIX: &str = "ENVELOPE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported average type: {0}")]
    UnsupportedAverageType(String),

    #[error("Invalid envelope {0}: must be within (0, 1)")]
    InvalidEnvelope(f64),

    #[error("At least one envelope level is required")]
    NoEnvelopes,

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to read credentials file {path}: {source}")]
    CredentialsIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed credentials file: {0}")]
    CredentialsParse(#[from] serde_json::Error),

    #[error("No credentials named '{0}' in credentials file")]
    MissingCredentials(String),
}

/// Moving average used as the channel midpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageType {
    /// Donchian channel midpoint: (highest high + lowest low) / 2
    DonchianMid,
}

impl FromStr for AverageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DCM" | "dcm" => Ok(AverageType::DonchianMid),
            other => Err(ConfigError::UnsupportedAverageType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    #[serde(alias = "crossed")]
    Cross,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    /// Generic trading symbol, e.g. `SOL/USDT:USDT`
    pub symbol: String,
    /// Exchange-native symbol, e.g. `SOLUSDT_UMCBL`
    pub exchange_symbol: String,
    pub timeframe: String,
    pub margin_mode: MarginMode,
    pub balance_fraction: f64,
    pub leverage: u32,
    pub average_type: String,
    pub average_period: usize,
    pub envelopes: Vec<f64>,
    pub stop_loss_pct: f64,
    pub use_longs: bool,
    pub use_shorts: bool,

    /// Offset between an entry's trigger price and its limit price
    pub trigger_price_delta: f64,
    /// Candles requested per cycle (the still-forming one is dropped)
    pub candle_limit: usize,

    pub key_path: PathBuf,
    pub key_name: String,
    pub state_dir: PathBuf,

    pub base_url: String,
    pub product_type: String,
    pub margin_coin: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "SOL/USDT:USDT".to_string(),
            exchange_symbol: "SOLUSDT_UMCBL".to_string(),
            timeframe: "1h".to_string(),
            margin_mode: MarginMode::Isolated,
            balance_fraction: 1.0,
            leverage: 3,
            average_type: "DCM".to_string(),
            average_period: 5,
            envelopes: vec![0.07, 0.11, 0.14],
            stop_loss_pct: 0.4,
            use_longs: true,
            use_shorts: true,
            trigger_price_delta: 0.01,
            candle_limit: 100,
            key_path: PathBuf::from("secret.json"),
            key_name: "envelope".to_string(),
            state_dir: PathBuf::from("."),
            base_url: "https://api.bitget.com".to_string(),
            product_type: "umcbl".to_string(),
            margin_coin: "USDT".to_string(),
        }
    }
}

impl BotConfig {
    /// Load from defaults, the file named by `ENVELOPE_CONFIG` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ENVELOPE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load with an explicit config file path (the file is optional)
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let defaults = Config::try_from(&BotConfig::default())?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("envelopes")
                    .try_parsing(true),
            )
            .build()?;

        let config: BotConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the strategy meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.average_type()?;

        if self.envelopes.is_empty() {
            return Err(ConfigError::NoEnvelopes);
        }
        if let Some(&bad) = self.envelopes.iter().find(|e| !(**e > 0.0 && **e < 1.0)) {
            return Err(ConfigError::InvalidEnvelope(bad));
        }
        if self.average_period == 0 {
            return Err(ConfigError::Invalid {
                field: "average_period",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.leverage == 0 {
            return Err(ConfigError::Invalid {
                field: "leverage",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.balance_fraction > 0.0 && self.balance_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "balance_fraction",
                reason: format!("{} is outside (0, 1]", self.balance_fraction),
            });
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 1.0) {
            return Err(ConfigError::Invalid {
                field: "stop_loss_pct",
                reason: format!("{} is outside (0, 1)", self.stop_loss_pct),
            });
        }
        if self.candle_limit <= self.average_period {
            return Err(ConfigError::Invalid {
                field: "candle_limit",
                reason: format!(
                    "{} candles cannot cover an average period of {}",
                    self.candle_limit, self.average_period
                ),
            });
        }
        Ok(())
    }

    pub fn average_type(&self) -> Result<AverageType, ConfigError> {
        self.average_type.parse()
    }

    /// Tracker file for this symbol, e.g. `tracker_SOL-USDT-USDT.json`
    pub fn tracker_path(&self) -> PathBuf {
        let slug = self.symbol.replace(['/', ':'], "-");
        self.state_dir.join(format!("tracker_{}.json", slug))
    }
}

/// API credentials for signed exchange requests
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(rename = "apiKey", alias = "api_key")]
    pub api_key: String,
    pub secret: String,
    #[serde(rename = "password", alias = "passphrase")]
    pub passphrase: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

/// Read the credentials entry `name` from a JSON file of named entries
pub fn load_credentials(path: &Path, name: &str) -> Result<Credentials, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CredentialsIo {
        path: path.to_path_buf(),
        source,
    })?;

    let mut entries: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
    let entry = entries
        .remove(name)
        .ok_or_else(|| ConfigError::MissingCredentials(name.to_string()))?;

    Ok(serde_json::from_value(entry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.average_type().unwrap(), AverageType::DonchianMid);
    }

    #[test]
    fn test_unsupported_average_type_rejected() {
        let config = BotConfig {
            average_type: "SMA".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedAverageType(t)) if t == "SMA"
        ));
    }

    #[test]
    fn test_envelope_bounds() {
        for bad in [0.0, 1.0, -0.1, 1.5] {
            let config = BotConfig {
                envelopes: vec![0.05, bad],
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::InvalidEnvelope(_))));
        }

        let config = BotConfig {
            envelopes: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoEnvelopes)));
    }

    #[test]
    fn test_tracker_path_from_symbol() {
        let config = BotConfig {
            state_dir: PathBuf::from("/var/lib/bot"),
            ..Default::default()
        };
        assert_eq!(
            config.tracker_path(),
            PathBuf::from("/var/lib/bot/tracker_SOL-USDT-USDT.json")
        );
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelope.toml");
        std::fs::write(
            &path,
            r#"
leverage = 5
envelopes = [0.05, 0.1]
margin_mode = "cross"
use_shorts = false
"#,
        )
        .unwrap();

        let config = BotConfig::load_from(&path).unwrap();
        assert_eq!(config.leverage, 5);
        assert_eq!(config.envelopes, vec![0.05, 0.1]);
        assert_eq!(config.margin_mode, MarginMode::Cross);
        assert!(!config.use_shorts);
        // Untouched fields keep their defaults
        assert_eq!(config.exchange_symbol, "SOLUSDT_UMCBL");
        assert_eq!(config.average_period, 5);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.envelopes, vec![0.07, 0.11, 0.14]);
    }

    #[test]
    fn test_load_rejects_unsupported_average_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envelope.toml");
        std::fs::write(&path, "average_type = \"EMA\"\n").unwrap();

        let err = BotConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedAverageType(_)));
    }

    #[test]
    fn test_load_credentials_by_name() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "other": {{"apiKey": "a", "secret": "b", "password": "c"}},
                "envelope": {{"apiKey": "key", "secret": "shh", "password": "pass"}}
            }}"#
        )
        .unwrap();

        let creds = load_credentials(file.path(), "envelope").unwrap();
        assert_eq!(creds.api_key, "key");
        assert_eq!(creds.secret, "shh");
        assert_eq!(creds.passphrase, "pass");
        assert!(!format!("{:?}", creds).contains("shh"));

        let missing = load_credentials(file.path(), "nope");
        assert!(matches!(missing, Err(ConfigError::MissingCredentials(_))));
    }
}
