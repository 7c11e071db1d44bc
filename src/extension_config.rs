//! The `<fqdn>.cnf` extension file handed to the signing step.
//!
//! Only the two keys the signer understands are rendered or accepted:
//!
//! ```text
//! extendedKeyUsage = serverAuth, clientAuth
//! subjectAltName = DNS:broker1.example.com
//! ```

use anyhow::{anyhow, bail, Context, Result};
use openssl::x509::extension::{ExtendedKeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509Extension, X509Ref};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::artifacts::{write_new_file, FILE_MODE_PUBLIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Ip(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionConfig {
    pub extended_key_usage: Vec<String>,
    pub subject_alt_names: Vec<AltName>,
}

impl ExtensionConfig {
    /// serverAuth + clientAuth with a single DNS SAN for `fqdn`.
    pub fn for_host(fqdn: &str) -> Self {
        Self {
            extended_key_usage: vec!["serverAuth".to_string(), "clientAuth".to_string()],
            subject_alt_names: vec![AltName::Dns(fqdn.to_string())],
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.extended_key_usage.is_empty() {
            let _ = writeln!(
                out,
                "extendedKeyUsage = {}",
                self.extended_key_usage.join(", ")
            );
        }
        if !self.subject_alt_names.is_empty() {
            let names: Vec<String> = self
                .subject_alt_names
                .iter()
                .map(|name| match name {
                    AltName::Dns(dns) => format!("DNS:{dns}"),
                    AltName::Ip(ip) => format!("IP:{ip}"),
                })
                .collect();
            let _ = writeln!(out, "subjectAltName = {}", names.join(", "));
        }
        out
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self {
            extended_key_usage: Vec::new(),
            subject_alt_names: Vec::new(),
        };
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: expected `key = value`", index + 1))?;
            let values = value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty());
            match key.trim() {
                "extendedKeyUsage" => {
                    config
                        .extended_key_usage
                        .extend(values.map(str::to_string));
                }
                "subjectAltName" => {
                    for item in values {
                        let name = match item.split_once(':') {
                            Some(("DNS", dns)) if !dns.trim().is_empty() => {
                                AltName::Dns(dns.trim().to_string())
                            }
                            Some(("IP", ip)) if !ip.trim().is_empty() => {
                                AltName::Ip(ip.trim().to_string())
                            }
                            _ => bail!("line {}: unsupported subjectAltName `{}`", index + 1, item),
                        };
                        config.subject_alt_names.push(name);
                    }
                }
                other => bail!("line {}: unsupported extension `{}`", index + 1, other),
            }
        }
        Ok(config)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_new_file(path, self.render().as_bytes(), FILE_MODE_PUBLIC)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read extension config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse extension config {}", path.display()))
    }

    /// Turn the file into X.509 extensions for a certificate being issued by
    /// `issuer`.
    pub fn to_extensions(
        &self,
        builder: &X509Builder,
        issuer: &X509Ref,
    ) -> Result<Vec<X509Extension>> {
        let mut extensions = Vec::new();

        if !self.extended_key_usage.is_empty() {
            let mut eku = ExtendedKeyUsage::new();
            for usage in &self.extended_key_usage {
                match usage.as_str() {
                    "serverAuth" => eku.server_auth(),
                    "clientAuth" => eku.client_auth(),
                    "codeSigning" => eku.code_signing(),
                    "emailProtection" => eku.email_protection(),
                    "timeStamping" => eku.time_stamping(),
                    other => eku.other(other),
                };
            }
            extensions.push(
                eku.build()
                    .map_err(|e| anyhow!("Failed to build ExtendedKeyUsage: {}", e))?,
            );
        }

        if !self.subject_alt_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in &self.subject_alt_names {
                match name {
                    AltName::Dns(dns) => san.dns(dns),
                    AltName::Ip(ip) => san.ip(ip),
                };
            }
            extensions.push(
                san.build(&builder.x509v3_context(Some(issuer), None))
                    .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?,
            );
        }

        Ok(extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn host_config_renders_usage_and_san() {
        let rendered = ExtensionConfig::for_host("broker1.example.com").render();
        assert_eq!(
            rendered,
            "extendedKeyUsage = serverAuth, clientAuth\nsubjectAltName = DNS:broker1.example.com\n"
        );
    }

    #[test]
    fn parse_accepts_comments_and_multiple_names() {
        let parsed = ExtensionConfig::parse(
            "# generated\nextendedKeyUsage = serverAuth\nsubjectAltName = DNS:a.example.com, IP:10.0.0.1\n",
        )
        .unwrap();
        assert_eq!(parsed.extended_key_usage, vec!["serverAuth".to_string()]);
        assert_eq!(
            parsed.subject_alt_names,
            vec![
                AltName::Dns("a.example.com".to_string()),
                AltName::Ip("10.0.0.1".to_string())
            ]
        );
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        let err = ExtensionConfig::parse("basicConstraints = CA:TRUE\n").unwrap_err();
        assert!(err.to_string().contains("unsupported extension"));
        assert!(ExtensionConfig::parse("subjectAltName = URI:x\n").is_err());
        assert!(ExtensionConfig::parse("no equals sign\n").is_err());
    }

    #[test]
    fn written_file_reads_back() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("a.example.com.cnf");
        let config = ExtensionConfig::for_host("a.example.com");

        config.write(&path).unwrap();
        assert_eq!(ExtensionConfig::read(&path).unwrap(), config);
        assert!(config.write(&path).is_err(), "cnf must not be overwritten");
    }
}
