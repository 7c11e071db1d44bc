//! Trust store: a password-protected PKCS#12 container holding only the CA
//! certificate, stored under the trust store alias.

use anyhow::{anyhow, Context, Result};
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::path::Path;

use crate::artifacts::{write_new_file, FILE_MODE_PUBLIC};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruststoreOutcome {
    Created,
    Reused,
}

/// Write the trust store unless it already exists.
pub fn ensure_truststore(
    path: &Path,
    ca_cert: &X509,
    alias: &str,
    password: &SecretString,
) -> Result<TruststoreOutcome> {
    if path.exists() {
        tracing::info!(truststore = %path.display(), "trust store present, skipping");
        return Ok(TruststoreOutcome::Reused);
    }

    let der = Pkcs12::builder()
        .name(alias)
        .cert(ca_cert)
        .build2(password.expose_secret())
        .map_err(|e| anyhow!("Failed to build trust store: {}", e))?
        .to_der()?;
    write_new_file(path, &der, FILE_MODE_PUBLIC)?;
    tracing::info!(truststore = %path.display(), alias, "created trust store");
    Ok(TruststoreOutcome::Created)
}

/// Certificates held by a trust store.
pub fn read_truststore(path: &Path, password: &SecretString) -> Result<Vec<X509>> {
    let der =
        fs::read(path).with_context(|| format!("read trust store {}", path.display()))?;
    let parsed = Pkcs12::from_der(&der)
        .with_context(|| format!("parse trust store {}", path.display()))?
        .parse2(password.expose_secret())
        .map_err(|e| anyhow!("Failed to open trust store {}: {}", path.display(), e))?;

    let mut certs: Vec<X509> = parsed.cert.into_iter().collect();
    if let Some(ca) = parsed.ca {
        certs.extend(ca.into_iter());
    }
    Ok(certs)
}

/// The CA certificate as stored in the trust store, carrying its alias.
///
/// Keystores take the CA from here so the chain entry keeps the same alias.
pub fn trusted_ca(
    path: &Path,
    password: &SecretString,
    ca_cert: &X509,
    alias: &str,
) -> Result<X509> {
    let ca_der = ca_cert.to_der()?;
    for cert in read_truststore(path, password)? {
        if cert.to_der()? != ca_der {
            continue;
        }
        if cert.alias() != Some(alias.as_bytes()) {
            return Err(anyhow!(
                "trust store {} holds the CA under a different alias than `{}`",
                path.display(),
                alias
            ));
        }
        return Ok(cert);
    }
    Err(anyhow!(
        "trust store {} does not contain the CA certificate",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::CertificateAuthorityConfig;
    use crate::generate_root_ca::RsaRootCABuilder;
    use crate::subject::SubjectFields;
    use tempfile::tempdir;

    fn ca_cert() -> X509 {
        RsaRootCABuilder::new(SubjectFields::from_config(
            &CertificateAuthorityConfig::default(),
        ))
        .subject_common_name("certificate-authority".to_string())
        .build()
        .expect("CA generation should succeed")
        .1
    }

    #[test]
    fn truststore_holds_only_the_ca_certificate() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("truststore.jks");
        let password = SecretString::from("secret".to_string());
        let cert = ca_cert();

        let outcome = ensure_truststore(&path, &cert, "CARoot", &password).unwrap();
        assert_eq!(outcome, TruststoreOutcome::Created);

        let certs = read_truststore(&path, &password).unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].to_der().unwrap(), cert.to_der().unwrap());
        assert_eq!(certs[0].alias(), Some(&b"CARoot"[..]));
    }

    #[test]
    fn existing_truststore_is_left_untouched() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("truststore.jks");
        let password = SecretString::from("secret".to_string());

        ensure_truststore(&path, &ca_cert(), "CARoot", &password).unwrap();
        let before = fs::read(&path).unwrap();
        let outcome = ensure_truststore(&path, &ca_cert(), "CARoot", &password).unwrap();

        assert_eq!(outcome, TruststoreOutcome::Reused);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("truststore.jks");
        ensure_truststore(
            &path,
            &ca_cert(),
            "CARoot",
            &SecretString::from("secret".to_string()),
        )
        .unwrap();

        assert!(read_truststore(&path, &SecretString::from("wrong".to_string())).is_err());
    }

    #[test]
    fn trusted_ca_carries_the_alias() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("truststore.jks");
        let password = SecretString::from("secret".to_string());
        let cert = ca_cert();
        ensure_truststore(&path, &cert, "CARoot", &password).unwrap();

        let trusted = trusted_ca(&path, &password, &cert, "CARoot").unwrap();
        assert_eq!(trusted.alias(), Some(&b"CARoot"[..]));
        assert_eq!(trusted.to_der().unwrap(), cert.to_der().unwrap());

        assert!(trusted_ca(&path, &password, &cert, "OtherRoot").is_err());
        assert!(trusted_ca(&path, &password, &ca_cert(), "CARoot").is_err());
    }
}
