//! keystore-gen - CA, trust store and per-host keystore provisioning
//!
//! Provisions the TLS material a broker or client needs, in-process with
//! OpenSSL rather than by shelling out to `openssl`/`keytool`:
//!
//! ```text
//! truststore/
//!   ca-key.pem             CA private key (unencrypted PKCS#8)
//!   ca.crt                 CA self-signed certificate
//!   ca.srl                 last serial issued by the CA
//!   truststore.jks         PKCS#12 trust store, CA under alias CARoot
//! keystore/
//!   <fqdn>-key.pem         host private key
//!   <fqdn>-signed.crt      CA-signed host certificate
//!   <fqdn>-keystore.jks    PKCS#12 keystore: key + signed cert + CA chain
//!   <fqdn>.p12             exported bundle (csr-first flow only)
//! ```
//!
//! The CA and trust store are created on the first run and reused afterwards.
//! Host artifacts are never overwritten: a run is refused before any write if
//! one of them exists.
//!
//! # Example
//!
//! ```no_run
//! use keystore_gen::configs::AppConfig;
//! use keystore_gen::pipeline::Provisioner;
//!
//! let config = AppConfig::default();
//! let report = Provisioner::new(&config).run(Some("broker1.example.com"))?;
//! println!("keystore: {}", report.paths.host.keystore.display());
//! # Ok::<(), keystore_gen::error::ProvisionError>(())
//! ```
//!
//! # Error Handling
//!
//! Building blocks return `anyhow::Result<T>`. [`pipeline::Provisioner::run`]
//! returns [`error::ProvisionError`], which names the failed step and maps to
//! the process exit status.

pub mod artifacts;
pub mod certificate_authority;
pub mod configs;
pub mod error;
pub mod extension_config;
pub mod generate_host_request;
pub mod generate_root_ca;
pub mod keystore;
pub mod logging;
pub mod pipeline;
pub mod serial;
pub mod sign_host_certificate;
pub mod subject;
pub mod truststore;
