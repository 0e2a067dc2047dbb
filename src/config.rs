//! Configuration management for msgvault

use crate::crypto::{CipherScheme, MIN_SALT_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;
use zeroize::Zeroizing;

/// Environment variable holding the log passphrase
pub const PASSPHRASE_ENV: &str = "MSGVAULT_PASSPHRASE";

/// Environment variable overriding the log file path
pub const LOG_PATH_ENV: &str = "MSGVAULT_LOG_PATH";

/// Environment variable overriding the cipher scheme
pub const CIPHER_ENV: &str = "MSGVAULT_CIPHER";

/// Passphrase used when none is configured.
///
/// Anyone with this source can decrypt logs written under it.
pub const DEFAULT_PASSPHRASE: &str = "msgvault-default-passphrase";

/// Default log file name inside the data directory
pub const DEFAULT_LOG_FILE: &str = "messages.log";

/// Where the passphrase came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassphraseSource {
    Environment,
    Prompt,
    /// The compiled-in [`DEFAULT_PASSPHRASE`]
    BuiltinDefault,
}

/// Secret passphrase, zeroized on drop
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// Wrap a passphrase; empty passphrases are rejected
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::InvalidConfig("Passphrase must not be empty".to_string()));
        }
        Ok(Passphrase(Zeroizing::new(value)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Resolve the passphrase from `MSGVAULT_PASSPHRASE`, falling back to the
    /// built-in default unless the config requires an explicit one.
    pub fn resolve(config: &EncryptionConfig) -> Result<(Self, PassphraseSource)> {
        Self::resolve_from(std::env::var(PASSPHRASE_ENV).ok(), config)
    }

    /// Resolve from an already-read environment value
    pub fn resolve_from(
        env_value: Option<String>,
        config: &EncryptionConfig,
    ) -> Result<(Self, PassphraseSource)> {
        if let Some(value) = env_value {
            let value = value.trim();
            if !value.is_empty() {
                return Ok((Passphrase::new(value)?, PassphraseSource::Environment));
            }
        }

        if config.require_passphrase {
            return Err(Error::InvalidConfig(format!(
                "{} is not set and the built-in default passphrase is disabled",
                PASSPHRASE_ENV
            )));
        }

        warn!(
            "{} is not set: using the BUILT-IN DEFAULT passphrase. \
             Anyone with a copy of msgvault can decrypt this log. \
             Set {} or enable encryption.require_passphrase.",
            PASSPHRASE_ENV, PASSPHRASE_ENV
        );

        Ok((
            Passphrase::new(DEFAULT_PASSPHRASE)?,
            PassphraseSource::BuiltinDefault,
        ))
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(..)")
    }
}

/// Message store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the encrypted log file
    pub path: PathBuf,
}

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Cipher used for new writes
    #[serde(default)]
    pub scheme: CipherScheme,

    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// Per-installation salt; empty means the fixed built-in salt
    #[serde(with = "hex_serde", default)]
    pub salt: Vec<u8>,

    /// Refuse to start on the built-in default passphrase
    #[serde(default)]
    pub require_passphrase: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Open the configured log file for appending, creating its directory
    pub fn open_file(&self) -> Result<Option<File>> {
        let Some(path) = &self.file else {
            return Ok(None);
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Some(file))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Message store configuration
    pub store: StoreConfig,

    /// Encryption configuration
    pub encryption: EncryptionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("msgvault")
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_data_dir().join(DEFAULT_LOG_FILE),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            scheme: CipherScheme::Cbc,
            argon2_memory_kib: 65536, // 64 MiB
            argon2_iterations: 3,
            argon2_parallelism: 4,
            salt: Vec::new(),
            require_passphrase: false,
        }
    }
}

#[cfg(test)]
impl EncryptionConfig {
    /// Cheap Argon2 parameters for tests
    pub(crate) fn low_cost() -> Self {
        EncryptionConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            ..EncryptionConfig::default()
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Load configuration from a file (YAML or JSON), with environment
    /// variable substitution and overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// [`Config::load`] with variables looked up through `env`
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let content = Self::substitute_vars(&content, &env)?;

        let mut config: Config = if is_yaml(path_ref) {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse YAML config: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::Config(format!("Failed to parse JSON config: {}", e))
            })?
        };

        config.apply_overrides_from(&env)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise build from the environment
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Self::from_env()
        }
    }

    /// Substitute `${VAR_NAME}` with values from `env`; unknown
    /// variables are left as-is
    fn substitute_vars<F>(content: &str, env: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let result = re.replace_all(content, |cap: &regex::Captures| {
            env(&cap[1]).unwrap_or_else(|| cap[0].to_string())
        });

        Ok(result.into_owned())
    }

    /// Apply `MSGVAULT_LOG_PATH` and `MSGVAULT_CIPHER` as looked up
    /// through `env`. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env(LOG_PATH_ENV) {
            let path = path.trim();
            if !path.is_empty() {
                self.store.path = PathBuf::from(path);
            }
        }

        if let Some(scheme) = env(CIPHER_ENV) {
            if !scheme.trim().is_empty() {
                self.encryption.scheme = scheme.parse()?;
            }
        }

        Ok(())
    }

    /// Create a config from defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// [`Config::from_env`] with variables looked up through `env`
    pub fn from_env_with<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_overrides_from(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path_ref, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "store.path must not be empty".to_string(),
            ));
        }

        let enc = &self.encryption;
        if enc.argon2_memory_kib == 0 || enc.argon2_iterations == 0 || enc.argon2_parallelism == 0
        {
            return Err(Error::InvalidConfig(
                "Argon2 cost parameters must be greater than 0".to_string(),
            ));
        }

        if !enc.salt.is_empty() && enc.salt.len() < MIN_SALT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "encryption.salt must be at least {} bytes",
                MIN_SALT_SIZE
            )));
        }

        Ok(())
    }

    /// Ensure the log file's directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        if let Some(parent) = self.store.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Hex serialization for byte arrays
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
