//! Host Key and Request Generation Module
//!
//! Produces the per-FQDN RSA key and the certificate signing request that the
//! CA signs. Two starting points are supported, matching [`crate::configs::HostFlow`]:
//!
//! - [`RsaHostRequestBuilder::build_csr`]: key and CSR directly.
//! - [`RsaHostRequestBuilder::build_self_signed`] followed by
//!   [`csr_from_certificate`]: a self-signed placeholder certificate that lives
//!   in the keystore until the signed one replaces it.
//!
//! Both carry `subjectAltName = DNS:<fqdn>`; TLS clients match host names
//! against the SAN, not the CN.

use anyhow::{anyhow, Result};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509Req, X509ReqBuilder, X509};

use crate::generate_root_ca::{RSA_KEY_SIZE_DEFAULT, X509_VERSION_3};
use crate::subject::SubjectFields;

const X509_REQ_VERSION_1: i32 = 0;

/// Builder for a host key pair plus either a CSR or a self-signed certificate.
pub struct RsaHostRequestBuilder {
    fqdn: String,
    subject: SubjectFields,
    key_size: u32,
}

impl RsaHostRequestBuilder {
    pub fn new(fqdn: &str, subject: SubjectFields) -> Self {
        Self {
            fqdn: fqdn.to_string(),
            subject,
            key_size: RSA_KEY_SIZE_DEFAULT,
        }
    }

    /// Set the RSA modulus size in bits
    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    fn generate_key(&self) -> Result<PKey<Private>> {
        let rsa = openssl::rsa::Rsa::generate(self.key_size)
            .map_err(|e| anyhow!("Failed to generate RSA keypair for {}: {}", self.fqdn, e))?;
        PKey::from_rsa(rsa).map_err(|e| anyhow!("Failed to create private key: {}", e))
    }

    /// New key and a CSR with `CN=<fqdn>` requesting `DNS:<fqdn>`.
    pub fn build_csr(self) -> Result<(PKey<Private>, X509Req)> {
        let private_key = self.generate_key()?;
        let req = build_request(&private_key, &self.subject, &self.fqdn, &[&self.fqdn])?;
        Ok((private_key, req))
    }

    /// New key and a self-signed end-entity certificate with the SAN set.
    pub fn build_self_signed(self, validity_days: u32) -> Result<(PKey<Private>, X509)> {
        let private_key = self.generate_key()?;

        let mut builder =
            X509::builder().map_err(|e| anyhow!("Failed to create X509 builder: {}", e))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(|e| anyhow!("Failed to set version: {}", e))?;

        let mut serial = BigNum::new()?;
        serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
        let asn1_serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&asn1_serial)?;

        let name = self.subject.to_x509_name(&self.fqdn)?;
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
        let not_after = openssl::asn1::Asn1Time::days_from_now(validity_days)
            .map_err(|e| anyhow!("Failed to create not_after: {}", e))?;
        builder
            .set_not_after(&not_after)
            .map_err(|e| anyhow!("Failed to set not_after: {}", e))?;

        builder
            .set_pubkey(&private_key)
            .map_err(|e| anyhow!("Failed to set public key: {}", e))?;

        // Add Basic Constraints: CA=false (end-entity certificate)
        let bc = BasicConstraints::new()
            .build()
            .map_err(|e| anyhow!("Failed to build BasicConstraints: {}", e))?;
        builder
            .append_extension(bc)
            .map_err(|e| anyhow!("Failed to add BasicConstraints: {}", e))?;

        let san = SubjectAlternativeName::new()
            .dns(&self.fqdn)
            .build(&builder.x509v3_context(None, None))
            .map_err(|e| anyhow!("Failed to build SubjectAlternativeName: {}", e))?;
        builder
            .append_extension(san)
            .map_err(|e| anyhow!("Failed to add SubjectAlternativeName: {}", e))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(|e| anyhow!("Failed to sign certificate: {}", e))?;

        Ok((private_key, builder.build()))
    }
}

/// CSR for the key and subject already held in a keystore entry. The DNS names
/// of the certificate's SAN are requested again.
pub fn csr_from_certificate(private_key: &PKey<Private>, cert: &X509) -> Result<X509Req> {
    if !cert.public_key()?.public_eq(private_key) {
        return Err(anyhow!("keystore certificate does not belong to its private key"));
    }
    let dns_names: Vec<String> = cert
        .subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let dns_refs: Vec<&str> = dns_names.iter().map(String::as_str).collect();

    let mut req =
        X509ReqBuilder::new().map_err(|e| anyhow!("Failed to create CSR builder: {}", e))?;
    req.set_version(X509_REQ_VERSION_1)
        .map_err(|e| anyhow!("Failed to set CSR version: {}", e))?;
    req.set_subject_name(cert.subject_name())
        .map_err(|e| anyhow!("Failed to set CSR subject: {}", e))?;
    finish_request(req, private_key, &dns_refs)
}

fn build_request(
    private_key: &PKey<Private>,
    subject: &SubjectFields,
    common_name: &str,
    dns_names: &[&str],
) -> Result<X509Req> {
    let name = subject.to_x509_name(common_name)?;
    let mut req =
        X509ReqBuilder::new().map_err(|e| anyhow!("Failed to create CSR builder: {}", e))?;
    req.set_version(X509_REQ_VERSION_1)
        .map_err(|e| anyhow!("Failed to set CSR version: {}", e))?;
    req.set_subject_name(&name)
        .map_err(|e| anyhow!("Failed to set CSR subject: {}", e))?;
    finish_request(req, private_key, dns_names)
}

fn finish_request(
    mut req: X509ReqBuilder,
    private_key: &PKey<Private>,
    dns_names: &[&str],
) -> Result<X509Req> {
    req.set_pubkey(private_key)
        .map_err(|e| anyhow!("Failed to set CSR public key: {}", e))?;

    if !dns_names.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for dns in dns_names {
            san.dns(dns);
        }
        let san = san
            .build(&req.x509v3_context(None))
            .map_err(|e| anyhow!("Failed to build requested SubjectAlternativeName: {}", e))?;
        let mut extensions = Stack::new()?;
        extensions.push(san)?;
        req.add_extensions(&extensions)
            .map_err(|e| anyhow!("Failed to add CSR extensions: {}", e))?;
    }

    req.sign(private_key, MessageDigest::sha256())
        .map_err(|e| anyhow!("Failed to sign CSR: {}", e))?;
    Ok(req.build())
}
