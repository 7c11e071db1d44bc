//! Keystore assembly.
//!
//! The final `<fqdn>-keystore.jks` is a PKCS#12 container with exactly one
//! private key entry (the keystore alias) whose certificate is the CA-signed
//! host certificate, plus the CA certificate as its chain. Two ways to get
//! there are supported:
//!
//! - **import-merge** ([`import_merge`]): the keystore already holds the key with a
//!   self-signed placeholder; the signed certificate and CA are merged in.
//! - **export-reimport** ([`export_bundle`] then [`import_bundle`]): a standalone
//!   `<fqdn>.p12` bundle is written first and the keystore is built from it.

use anyhow::{anyhow, bail, Context, Result};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::{X509VerifyResult, X509};
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use std::path::Path;

use crate::artifacts::{replace_file, write_new_file, FILE_MODE_SECRET};

/// Decoded keystore entries.
#[derive(Debug)]
pub struct KeystoreContents {
    pub private_key: Option<PKey<Private>>,
    pub certificate: Option<X509>,
    pub ca_chain: Vec<X509>,
}

impl KeystoreContents {
    fn into_key_entry(self, path: &Path) -> Result<(PKey<Private>, X509, Vec<X509>)> {
        match (self.private_key, self.certificate) {
            (Some(key), Some(cert)) => Ok((key, cert, self.ca_chain)),
            _ => bail!("{} does not contain a private key entry", path.display()),
        }
    }
}

pub fn read_keystore(path: &Path, password: &SecretString) -> Result<KeystoreContents> {
    let der = fs::read(path).with_context(|| format!("read keystore {}", path.display()))?;
    let parsed = Pkcs12::from_der(&der)
        .with_context(|| format!("parse keystore {}", path.display()))?
        .parse2(password.expose_secret())
        .map_err(|e| anyhow!("Failed to open keystore {}: {}", path.display(), e))?;

    Ok(KeystoreContents {
        private_key: parsed.pkey,
        certificate: parsed.cert,
        ca_chain: parsed
            .ca
            .map(|ca| ca.into_iter().collect())
            .unwrap_or_default(),
    })
}

fn encode(
    alias: &str,
    key: &PKey<Private>,
    cert: &X509,
    chain: &[X509],
    password: &SecretString,
) -> Result<Vec<u8>> {
    if !cert.public_key()?.public_eq(key) {
        bail!("certificate for `{alias}` does not match the private key");
    }
    let mut builder = Pkcs12::builder();
    builder.name(alias).pkey(key).cert(cert);
    if !chain.is_empty() {
        let mut stack = Stack::new()?;
        for ca in chain {
            stack.push(ca.clone())?;
        }
        builder.ca(stack);
    }
    let pkcs12 = builder
        .build2(password.expose_secret())
        .map_err(|e| anyhow!("Failed to build PKCS#12 container for `{}`: {}", alias, e))?;
    Ok(pkcs12.to_der()?)
}

fn ensure_issued_by(ca_cert: &X509, cert: &X509) -> Result<()> {
    let result = ca_cert.issued(cert);
    if result != X509VerifyResult::OK {
        bail!("certificate was not issued by the CA: {}", result);
    }
    let ca_key = ca_cert.public_key()?;
    if !cert.verify(&ca_key)? {
        bail!("certificate signature does not verify against the CA key");
    }
    Ok(())
}

/// Create a new keystore holding `key` and `cert` under `alias`.
pub fn write_key_entry(
    path: &Path,
    alias: &str,
    key: &PKey<Private>,
    cert: &X509,
    password: &SecretString,
) -> Result<()> {
    let der = encode(alias, key, cert, &[], password)?;
    write_new_file(path, &der, FILE_MODE_SECRET)?;
    tracing::info!(keystore = %path.display(), alias, "created keystore with self-signed entry");
    Ok(())
}

/// Merge the CA certificate and the CA-signed host certificate into an
/// existing keystore, replacing the placeholder certificate. Returns the
/// entry's private key so it can be exported.
pub fn import_merge(
    path: &Path,
    alias: &str,
    signed_cert: &X509,
    ca_cert: &X509,
    password: &SecretString,
) -> Result<PKey<Private>> {
    let (key, _placeholder, _) = read_keystore(path, password)?.into_key_entry(path)?;
    ensure_issued_by(ca_cert, signed_cert)?;

    let der = encode(alias, &key, signed_cert, std::slice::from_ref(ca_cert), password)?;
    replace_file(path, &der, FILE_MODE_SECRET)?;
    tracing::info!(keystore = %path.display(), alias, "merged signed certificate and CA into keystore");
    Ok(key)
}

/// Write a standalone PKCS#12 bundle of key, signed certificate and CA chain.
pub fn export_bundle(
    path: &Path,
    alias: &str,
    key: &PKey<Private>,
    signed_cert: &X509,
    ca_cert: &X509,
    password: &SecretString,
) -> Result<()> {
    ensure_issued_by(ca_cert, signed_cert)?;
    let der = encode(alias, key, signed_cert, std::slice::from_ref(ca_cert), password)?;
    write_new_file(path, &der, FILE_MODE_SECRET)?;
    tracing::info!(bundle = %path.display(), alias, "exported PKCS#12 bundle");
    Ok(())
}

/// Build the keystore at `keystore_path` from a bundle written by
/// [`export_bundle`].
pub fn import_bundle(
    bundle_path: &Path,
    bundle_password: &SecretString,
    keystore_path: &Path,
    alias: &str,
    keystore_password: &SecretString,
) -> Result<()> {
    let (key, cert, chain) =
        read_keystore(bundle_path, bundle_password)?.into_key_entry(bundle_path)?;
    if chain.is_empty() {
        bail!("{} does not carry the CA chain", bundle_path.display());
    }
    let der = encode(alias, &key, &cert, &chain, keystore_password)?;
    write_new_file(keystore_path, &der, FILE_MODE_SECRET)?;
    tracing::info!(keystore = %keystore_path.display(), alias, "imported bundle into keystore");
    Ok(())
}
