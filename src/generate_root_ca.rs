//! CA Certificate Generation Module
//!
//! Generates the RSA key pair and self-signed certificate that every host
//! keystore chains up to. The CA is created once per trust store directory and
//! reused afterwards (see [`crate::certificate_authority`]).
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, critical
//! - **Default Key Size**: RSA 2048-bit
//! - **Default Validity**: 3650 days
//! - **Version**: X.509v3 with extensions
//!
//! # Example
//! ```rust,no_run
//! # use anyhow::Result;
//! # use keystore_gen::generate_root_ca::RsaRootCABuilder;
//! # use keystore_gen::subject::SubjectFields;
//! # fn example() -> Result<()> {
//! let (ca_key, ca_cert) = RsaRootCABuilder::new(SubjectFields {
//!     country: "US".to_string(),
//!     state: "CA".to_string(),
//!     locality: "Atlantis".to_string(),
//!     organization: "CONFLUENT".to_string(),
//! })
//! .subject_common_name("certificate-authority".to_string())
//! .validity_days(3650)
//! .build()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

// Add X.509v3 extensions
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};

use crate::subject::SubjectFields;

pub(crate) const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
pub(crate) const RSA_KEY_SIZE_DEFAULT: u32 = 2048;

/// Builder for the CA key pair and its self-signed certificate.
///
/// The subject is the C/ST/L/O fields passed to [`RsaRootCABuilder::new`] plus
/// the common name set with [`RsaRootCABuilder::subject_common_name`].
pub struct RsaRootCABuilder {
    subject_common_name: String,
    subject: SubjectFields,
    validity_days: u32,
    key_size: u32,
}

impl RsaRootCABuilder {
    pub fn new(subject: SubjectFields) -> Self {
        Self {
            subject_common_name: String::new(),
            subject,
            validity_days: 3650,
            key_size: RSA_KEY_SIZE_DEFAULT,
        }
    }

    /// Set the common name (CN) for the certificate
    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    /// Set validity period in days
    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Set the RSA modulus size in bits
    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    /// Build the RSA key pair and self-signed CA certificate
    ///
    /// # Certificate Properties
    /// - **Signature Algorithm**: SHA-256 with RSA
    /// - **Serial Number**: Random 128-bit number
    /// - **Issuer**: Same as subject (self-signed)
    ///
    /// # Errors
    /// Returns error if:
    /// - RSA key generation fails
    /// - The common name is empty or a subject field is rejected by OpenSSL
    /// - X.509 extension creation fails
    /// - Certificate signing fails
    pub fn build(self) -> Result<(PKey<Private>, X509)> {
        if self.subject_common_name.is_empty() {
            return Err(anyhow!("CA common name must not be empty"));
        }

        // Generate RSA key pair
        let rsa = openssl::rsa::Rsa::generate(self.key_size)
            .map_err(|e| anyhow!("Failed to generate RSA keypair: {}", e))?;

        let private_key =
            PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))?;

        // Build X509 certificate
        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;

        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        // Generate random 128-bit (16-byte) serial number
        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        let asn1_serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&asn1_serial)?;

        let name = self.subject.to_x509_name(&self.subject_common_name)?;

        builder
            .set_subject_name(&name)
            .map_err(|e| anyhow!("Failed to set subject: {}", e))?;

        builder
            .set_issuer_name(&name)
            .map_err(|e| anyhow!("Failed to set issuer: {}", e))?;

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

        // Set public key (extracted from private_key automatically)
        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        let extension = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(extension)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let ku_extension = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(|e| anyhow!("Failed to build KeyUsage: {}", e))?;
        builder
            .append_extension(ku_extension)
            .map_err(|e| anyhow!("Failed to add KeyUsage: {}", e))?;

        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("Failed to build SubjectKeyIdentifier: {}", e))?;
        builder
            .append_extension(ski)
            .map_err(|e| anyhow!("Failed to add SubjectKeyIdentifier: {}", e))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;
        let x509 = builder.build();
        Ok((private_key, x509))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::CertificateAuthorityConfig;
    use crate::subject::common_name;
    use openssl::x509::X509VerifyResult;

    fn stock_builder() -> RsaRootCABuilder {
        RsaRootCABuilder::new(SubjectFields::from_config(
            &CertificateAuthorityConfig::default(),
        ))
        .subject_common_name("certificate-authority".to_string())
    }

    #[test]
    fn ca_certificate_is_self_signed() {
        let (key, cert) = stock_builder().build().expect("CA generation should succeed");

        assert_eq!(cert.issued(&cert), X509VerifyResult::OK);
        assert!(cert.verify(&key).unwrap());
        assert_eq!(
            common_name(cert.subject_name()).as_deref(),
            Some("certificate-authority")
        );
        assert_eq!(
            common_name(cert.issuer_name()).as_deref(),
            Some("certificate-authority")
        );
        assert_eq!(key.bits(), 2048);
    }

    #[test]
    fn validity_follows_configured_days() {
        let (_, cert) = stock_builder()
            .validity_days(3650)
            .build()
            .expect("CA generation should succeed");

        let diff = cert.not_before().diff(cert.not_after()).unwrap();
        assert_eq!(diff.days, 3650);
    }

    #[test]
    fn empty_common_name_is_rejected() {
        let err = RsaRootCABuilder::new(SubjectFields::from_config(
            &CertificateAuthorityConfig::default(),
        ))
        .build()
        .unwrap_err();
        assert!(err.to_string().contains("common name"));
    }
}
