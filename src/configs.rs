//! Configuration for the provisioning run.
//!
//! Every field has a serde default that matches the values the tool has always
//! used (`US`/`CA`/`Atlantis`/`CONFLUENT`, 3650 days, password `secret`), so an
//! empty or missing file reproduces the stock layout.

use anyhow::{anyhow, bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MIN_RSA_KEY_SIZE: u32 = 2048;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub directories: Directories,
    #[serde(default)]
    pub certificate_authority: CertificateAuthorityConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub stores: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Directories {
    #[serde(default = "default_truststore_dir")]
    pub truststore: PathBuf,
    #[serde(default = "default_keystore_dir")]
    pub keystore: PathBuf,
}

impl Default for Directories {
    fn default() -> Self {
        Self {
            truststore: default_truststore_dir(),
            keystore: default_keystore_dir(),
        }
    }
}

fn default_truststore_dir() -> PathBuf {
    PathBuf::from("truststore")
}

fn default_keystore_dir() -> PathBuf {
    PathBuf::from("keystore")
}

/// Distinguished name and key parameters of the CA. The C/ST/L/O fields are
/// also used for every host certificate subject.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CertificateAuthorityConfig {
    #[serde(default = "default_ca_common_name")]
    pub common_name: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_locality")]
    pub locality: String,
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
}

impl Default for CertificateAuthorityConfig {
    fn default() -> Self {
        Self {
            common_name: default_ca_common_name(),
            country: default_country(),
            state: default_state(),
            locality: default_locality(),
            organization: default_organization(),
            validity_days: default_validity_days(),
            key_size: default_key_size(),
        }
    }
}

fn default_ca_common_name() -> String {
    "certificate-authority".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_state() -> String {
    "CA".to_string()
}

fn default_locality() -> String {
    "Atlantis".to_string()
}

fn default_organization() -> String {
    "CONFLUENT".to_string()
}

fn default_validity_days() -> u32 {
    3650 // 10 years
}

fn default_key_size() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_key_size")]
    pub key_size: u32,
    #[serde(default)]
    pub flow: HostFlow,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            validity_days: default_validity_days(),
            key_size: default_key_size(),
            flow: HostFlow::default(),
        }
    }
}

/// Order in which the host key, CSR and keystore are produced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HostFlow {
    /// Key and CSR first; the keystore is built from an exported PKCS#12 bundle.
    #[default]
    CsrFirst,
    /// Self-signed pair created inside the keystore, CSR derived from it, signed
    /// certificate merged back in.
    KeystoreFirst,
}

impl FromStr for HostFlow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csr-first" => Ok(Self::CsrFirst),
            "keystore-first" => Ok(Self::KeystoreFirst),
            other => Err(anyhow!(
                "invalid host flow `{other}`; expected `csr-first` or `keystore-first`"
            )),
        }
    }
}

impl fmt::Display for HostFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CsrFirst => f.write_str("csr-first"),
            Self::KeystoreFirst => f.write_str("keystore-first"),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_store_password", deserialize_with = "secret_string")]
    pub truststore_password: SecretString,
    #[serde(default = "default_store_password", deserialize_with = "secret_string")]
    pub keystore_password: SecretString,
    #[serde(default = "default_truststore_alias")]
    pub truststore_alias: String,
    #[serde(default = "default_keystore_alias")]
    pub keystore_alias: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            truststore_password: default_store_password(),
            keystore_password: default_store_password(),
            truststore_alias: default_truststore_alias(),
            keystore_alias: default_keystore_alias(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("truststore_password", &"<redacted>")
            .field("keystore_password", &"<redacted>")
            .field("truststore_alias", &self.truststore_alias)
            .field("keystore_alias", &self.keystore_alias)
            .finish()
    }
}

fn default_store_password() -> SecretString {
    SecretString::from("secret".to_string())
}

fn default_truststore_alias() -> String {
    "CARoot".to_string()
}

fn default_keystore_alias() -> String {
    "localhost".to_string()
}

fn secret_string<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// What happens to host artifacts created by a run that fails part-way.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Leave everything on disk for inspection.
    #[default]
    Keep,
    /// Delete the host artifacts this run created.
    Remove,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "remove" => Ok(Self::Remove),
            other => Err(anyhow!(
                "invalid failure policy `{other}`; expected `keep` or `remove`"
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml.parse()
    }

    /// Replace both store passwords, e.g. from a command-line override.
    pub fn set_store_password(&mut self, password: String) {
        self.stores.truststore_password = SecretString::from(password.clone());
        self.stores.keystore_password = SecretString::from(password);
    }

    pub fn validate(&self) -> Result<()> {
        let ca = &self.certificate_authority;
        if ca.country.chars().count() != 2 {
            bail!(
                "certificate_authority.country must be a two-letter code, got `{}`",
                ca.country
            );
        }
        for (field, value) in [
            ("certificate_authority.common_name", &ca.common_name),
            ("certificate_authority.state", &ca.state),
            ("certificate_authority.locality", &ca.locality),
            ("certificate_authority.organization", &ca.organization),
            ("stores.truststore_alias", &self.stores.truststore_alias),
            ("stores.keystore_alias", &self.stores.keystore_alias),
        ] {
            if value.trim().is_empty() {
                bail!("{field} must not be empty");
            }
        }
        if ca.validity_days == 0 || self.host.validity_days == 0 {
            bail!("validity_days must be greater than zero");
        }
        if ca.key_size < MIN_RSA_KEY_SIZE || self.host.key_size < MIN_RSA_KEY_SIZE {
            bail!("key_size must be at least {MIN_RSA_KEY_SIZE} bits");
        }
        if self.stores.truststore_password.expose_secret().is_empty()
            || self.stores.keystore_password.expose_secret().is_empty()
        {
            bail!("store passwords must not be empty");
        }
        Ok(())
    }
}

impl FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse config file")
    }
}
