//! CA Signer: turns a host CSR into a CA-signed certificate.
//!
//! The extensions come from the `<fqdn>.cnf` file, not from the CSR, so the CA
//! decides what ends up in the certificate. The serial is reserved from
//! `ca.srl` before signing.

use anyhow::{anyhow, Result};
use openssl::hash::MessageDigest;
use openssl::x509::{X509Req, X509};

use crate::certificate_authority::CertificateAuthority;
use crate::extension_config::ExtensionConfig;
use crate::generate_root_ca::X509_VERSION_3;

pub struct HostCertificateSigner<'a> {
    ca: &'a CertificateAuthority,
    validity_days: u32,
}

impl<'a> HostCertificateSigner<'a> {
    pub fn new(ca: &'a CertificateAuthority) -> Self {
        Self {
            ca,
            validity_days: 3650,
        }
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub fn sign(&self, req: &X509Req, extensions: &ExtensionConfig) -> Result<X509> {
        let req_key = req
            .public_key()
            .map_err(|e| anyhow!("Failed to read CSR public key: {}", e))?;
        if !req
            .verify(&req_key)
            .map_err(|e| anyhow!("Failed to verify CSR signature: {}", e))?
        {
            return Err(anyhow!("CSR signature does not match its public key"));
        }

        let ca_cert = self.ca.certificate();
        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let serial = self.ca.serials().next()?;
        builder
            .set_serial_number(&serial)
            .map_err(|e| anyhow!("Failed to set serial number: {}", e))?;

        builder
            .set_subject_name(req.subject_name())
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;
        builder
            .set_issuer_name(ca_cert.subject_name())
            .map_err(|e| anyhow!("Failed to set issuer from CA: {}", e))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0)
            .map_err(|e| anyhow!("Failed to create not_before: {}", e))?;
        builder
            .set_not_before(&not_before)
            .map_err(|e| anyhow!("Failed to set not_before: {}", e))?;
        let not_after = openssl::asn1::Asn1Time::days_from_now(self.validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&req_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        for extension in extensions.to_extensions(&builder, ca_cert)? {
            builder
                .append_extension(extension)
                .map_err(|e| anyhow!("Failed to add extension: {}", e))?;
        }

        builder
            .sign(self.ca.private_key(), MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        let cert = builder.build();

        let serial_hex = serial.to_bn()?.to_hex_str()?.to_string();
        tracing::info!(
            subject = %crate::subject::common_name(cert.subject_name()).unwrap_or_default(),
            serial = %serial_hex,
            validity_days = self.validity_days,
            "signed host certificate"
        );
        Ok(cert)
    }
}
