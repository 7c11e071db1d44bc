//! CA provisioning: create the CA once, then load it on every later run.

use anyhow::{anyhow, bail, Context, Result};
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::fs;

use crate::artifacts::{
    ensure_dir, remove_if_exists, write_new_file, CaPaths, FILE_MODE_PUBLIC, FILE_MODE_SECRET,
};
use crate::configs::CertificateAuthorityConfig;
use crate::generate_root_ca::RsaRootCABuilder;
use crate::serial::SerialFile;
use crate::subject::SubjectFields;

/// The CA signing identity loaded from (or freshly written to) the trust store
/// directory.
pub struct CertificateAuthority {
    key: PKey<Private>,
    cert: X509,
    serials: SerialFile,
}

/// Whether [`CertificateAuthority::provision`] generated new material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaOutcome {
    Created,
    Reused,
}

impl CertificateAuthority {
    /// Generate the CA key and certificate unless `ca-key.pem` already exists,
    /// in which case the existing pair is loaded unchanged.
    pub fn provision(
        paths: &CaPaths,
        config: &CertificateAuthorityConfig,
    ) -> Result<(Self, CaOutcome)> {
        ensure_dir(&paths.dir)?;

        if paths.key.exists() {
            tracing::info!(key = %paths.key.display(), "CA key present, reusing existing CA");
            return Ok((Self::load(paths)?, CaOutcome::Reused));
        }
        if paths.cert.exists() {
            bail!(
                "{} exists without {}; restore the CA key or remove the certificate",
                paths.cert.display(),
                paths.key.display()
            );
        }

        let (key, cert) = RsaRootCABuilder::new(SubjectFields::from_config(config))
            .subject_common_name(config.common_name.clone())
            .validity_days(config.validity_days)
            .key_size(config.key_size)
            .build()
            .context("Failed to generate CA")?;

        // openssl req -nodes writes an unencrypted PKCS#8 key
        let key_pem = key.private_key_to_pem_pkcs8()?;
        write_new_file(&paths.key, &key_pem, FILE_MODE_SECRET)?;
        // a key without its certificate would be picked up as an existing CA
        if let Err(err) = cert
            .to_pem()
            .map_err(anyhow::Error::from)
            .and_then(|pem| write_new_file(&paths.cert, &pem, FILE_MODE_PUBLIC))
        {
            if let Err(cleanup) = remove_if_exists(&paths.key) {
                tracing::warn!(error = %format!("{cleanup:#}"), "could not remove orphaned CA key");
            }
            return Err(err);
        }
        tracing::info!(
            cert = %paths.cert.display(),
            validity_days = config.validity_days,
            "generated CA"
        );

        Ok((
            Self {
                key,
                cert,
                serials: SerialFile::new(&paths.serial),
            },
            CaOutcome::Created,
        ))
    }

    /// Load an existing CA and check that key and certificate belong together.
    pub fn load(paths: &CaPaths) -> Result<Self> {
        let key_pem = fs::read(&paths.key)
            .with_context(|| format!("read CA private key {}", paths.key.display()))?;
        let key = PKey::private_key_from_pem(&key_pem)
            .with_context(|| format!("parse CA private key {}", paths.key.display()))?;
        let cert_pem = fs::read(&paths.cert)
            .with_context(|| format!("read CA certificate {}", paths.cert.display()))?;
        let cert = X509::from_pem(&cert_pem)
            .with_context(|| format!("parse CA certificate {}", paths.cert.display()))?;

        let cert_key = cert.public_key()?;
        if !cert_key.public_eq(&key) {
            return Err(anyhow!(
                "CA certificate {} and private key {} do not match",
                paths.cert.display(),
                paths.key.display()
            ));
        }

        Ok(Self {
            key,
            cert,
            serials: SerialFile::new(&paths.serial),
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }

    pub fn serials(&self) -> &SerialFile {
        &self.serials
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn provision_writes_key_and_certificate() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let paths = CaPaths::new(&temp_dir.path().join("truststore"));

        let (ca, outcome) = CertificateAuthority::provision(
            &paths,
            &CertificateAuthorityConfig::default(),
        )
        .expect("CA provisioning should succeed");

        assert_eq!(outcome, CaOutcome::Created);
        let key_pem = fs::read_to_string(&paths.key).unwrap();
        assert!(key_pem.contains("BEGIN PRIVATE KEY"), "key should be unencrypted PKCS#8");
        let cert_pem = fs::read_to_string(&paths.cert).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.certificate().verify(ca.private_key()).unwrap());
        assert!(!paths.serial.exists(), "serial file is created on first signing");
    }

    #[test]
    fn second_provision_reuses_existing_material() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let paths = CaPaths::new(&temp_dir.path().join("truststore"));
        let config = CertificateAuthorityConfig::default();

        CertificateAuthority::provision(&paths, &config).unwrap();
        let key_before = fs::read(&paths.key).unwrap();
        let cert_before = fs::read(&paths.cert).unwrap();

        let (_, outcome) = CertificateAuthority::provision(&paths, &config).unwrap();

        assert_eq!(outcome, CaOutcome::Reused);
        assert_eq!(fs::read(&paths.key).unwrap(), key_before);
        assert_eq!(fs::read(&paths.cert).unwrap(), cert_before);
    }

    #[test]
    fn mismatched_key_and_certificate_are_rejected() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let first = CaPaths::new(&temp_dir.path().join("first"));
        let second = CaPaths::new(&temp_dir.path().join("second"));
        let config = CertificateAuthorityConfig::default();
        CertificateAuthority::provision(&first, &config).unwrap();
        CertificateAuthority::provision(&second, &config).unwrap();

        fs::copy(&second.cert, &first.cert).unwrap();
        let err = CertificateAuthority::load(&first).err().expect("load should fail");
        assert!(err.to_string().contains("do not match"), "unexpected: {err}");
    }

    #[test]
    fn orphaned_certificate_blocks_generation() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let paths = CaPaths::new(&temp_dir.path().join("truststore"));
        fs::create_dir_all(&paths.dir).unwrap();
        fs::write(&paths.cert, "stale").unwrap();

        let err = CertificateAuthority::provision(&paths, &CertificateAuthorityConfig::default())
            .err()
            .expect("provision should fail");
        assert!(err.to_string().contains("exists without"), "unexpected: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn failed_certificate_write_leaves_no_key_behind() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let paths = CaPaths::new(&temp_dir.path().join("truststore"));
        fs::create_dir_all(&paths.dir).unwrap();
        // dangling link: not visible to exists(), but blocks create_new
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), &paths.cert).unwrap();

        let result = CertificateAuthority::provision(&paths, &CertificateAuthorityConfig::default());
        assert!(result.is_err());
        assert!(!paths.key.exists(), "orphaned CA key should be removed");

        fs::remove_file(&paths.cert).unwrap();
        let (_, outcome) =
            CertificateAuthority::provision(&paths, &CertificateAuthorityConfig::default())
                .expect("retry should generate a fresh CA");
        assert_eq!(outcome, CaOutcome::Created);
    }
}
