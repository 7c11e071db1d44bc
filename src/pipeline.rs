//! The provisioning run as an ordered list of steps.
//!
//! ```text
//! validate-inputs -> provision-ca -> build-truststore -> generate-host-request
//!   -> sign-host-certificate -> assemble-keystore -> cleanup
//! ```
//!
//! Nothing is written until `validate-inputs` passes. The first failing step
//! stops the run; the CSR and extension file are only removed on success, and
//! other host artifacts created by the failed run are kept or removed according
//! to [`FailurePolicy`].

use anyhow::{Context, Result};
use openssl::x509::X509Req;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::artifacts::{
    ensure_dir, normalize_fqdn, remove_if_exists, write_new_file, ArtifactPaths, FILE_MODE_PUBLIC,
    FILE_MODE_SECRET,
};
use crate::certificate_authority::{CaOutcome, CertificateAuthority};
use crate::configs::{AppConfig, FailurePolicy, HostFlow};
use crate::error::ProvisionError;
use crate::extension_config::ExtensionConfig;
use crate::generate_host_request::{csr_from_certificate, RsaHostRequestBuilder};
use crate::keystore;
use crate::sign_host_certificate::HostCertificateSigner;
use crate::subject::SubjectFields;
use crate::truststore::{self, ensure_truststore, TruststoreOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ValidateInputs,
    ProvisionCa,
    BuildTruststore,
    GenerateHostRequest,
    SignHostCertificate,
    AssembleKeystore,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidateInputs => "validate-inputs",
            Self::ProvisionCa => "provision-ca",
            Self::BuildTruststore => "build-truststore",
            Self::GenerateHostRequest => "generate-host-request",
            Self::SignHostCertificate => "sign-host-certificate",
            Self::AssembleKeystore => "assemble-keystore",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub fqdn: String,
    pub flow: HostFlow,
    pub ca: CaOutcome,
    pub truststore: TruststoreOutcome,
    pub paths: ArtifactPaths,
    /// Serial of the signed host certificate, upper-case hex.
    pub serial: String,
}

pub struct Provisioner<'a> {
    config: &'a AppConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self { config }
    }

    /// Provision the CA (once), the trust store (once) and a keystore for
    /// `fqdn`.
    pub fn run(&self, fqdn: Option<&str>) -> Result<ProvisionReport, ProvisionError> {
        let fqdn = normalize_fqdn(fqdn.ok_or(ProvisionError::MissingFqdn)?)?;
        self.config
            .validate()
            .map_err(ProvisionError::InvalidConfig)?;

        let flow = self.config.host.flow;
        let paths = ArtifactPaths::new(&self.config.directories, &fqdn);
        paths.ensure_host_outputs_absent(flow)?;
        tracing::info!(step = %Step::ValidateInputs, fqdn = %fqdn, flow = %flow, "inputs accepted");

        let mut created = Vec::new();
        let result = self.run_steps(&fqdn, flow, &paths, &mut created);
        if result.is_err() && self.config.pipeline.on_failure == FailurePolicy::Remove {
            remove_created(&created);
        }
        result
    }

    fn run_steps(
        &self,
        fqdn: &str,
        flow: HostFlow,
        paths: &ArtifactPaths,
        created: &mut Vec<PathBuf>,
    ) -> Result<ProvisionReport, ProvisionError> {
        let config = self.config;
        let stores = &config.stores;

        let (ca, ca_outcome) = run_step(Step::ProvisionCa, || {
            CertificateAuthority::provision(&paths.ca, &config.certificate_authority)
        })?;

        let (truststore_outcome, trusted_ca) = run_step(Step::BuildTruststore, || {
            let outcome = ensure_truststore(
                &paths.ca.truststore,
                ca.certificate(),
                &stores.truststore_alias,
                &stores.truststore_password,
            )?;
            let trusted = truststore::trusted_ca(
                &paths.ca.truststore,
                &stores.truststore_password,
                ca.certificate(),
                &stores.truststore_alias,
            )?;
            Ok((outcome, trusted))
        })?;

        let host = &paths.host;
        let host_key = run_step(Step::GenerateHostRequest, || {
            ensure_dir(&host.dir)?;
            let builder = RsaHostRequestBuilder::new(
                fqdn,
                SubjectFields::from_config(&config.certificate_authority),
            )
            .key_size(config.host.key_size);

            let (key, req) = match flow {
                HostFlow::CsrFirst => {
                    let (key, req) = builder.build_csr()?;
                    write_new_file(&host.key, &key.private_key_to_pem_pkcs8()?, FILE_MODE_SECRET)?;
                    created.push(host.key.clone());
                    (key, req)
                }
                HostFlow::KeystoreFirst => {
                    let (key, cert) = builder.build_self_signed(config.host.validity_days)?;
                    keystore::write_key_entry(
                        &host.keystore,
                        &stores.keystore_alias,
                        &key,
                        &cert,
                        &stores.keystore_password,
                    )?;
                    created.push(host.keystore.clone());
                    // the CSR is derived from what the keystore actually holds
                    let entry = keystore::read_keystore(&host.keystore, &stores.keystore_password)?;
                    let key = entry.private_key.context("keystore lost its private key")?;
                    let cert = entry.certificate.context("keystore lost its certificate")?;
                    let req = csr_from_certificate(&key, &cert)?;
                    (key, req)
                }
            };
            write_new_file(&host.csr, &req.to_pem()?, FILE_MODE_PUBLIC)?;
            created.push(host.csr.clone());
            Ok(key)
        })?;

        let signed_cert = run_step(Step::SignHostCertificate, || {
            ExtensionConfig::for_host(fqdn).write(&host.extension_config)?;
            created.push(host.extension_config.clone());

            let extensions = ExtensionConfig::read(&host.extension_config)?;
            let csr_pem = fs::read(&host.csr)
                .with_context(|| format!("read CSR {}", host.csr.display()))?;
            let req = X509Req::from_pem(&csr_pem)
                .with_context(|| format!("parse CSR {}", host.csr.display()))?;

            let cert = HostCertificateSigner::new(&ca)
                .validity_days(config.host.validity_days)
                .sign(&req, &extensions)?;
            write_new_file(&host.signed_cert, &cert.to_pem()?, FILE_MODE_PUBLIC)?;
            created.push(host.signed_cert.clone());
            Ok(cert)
        })?;

        run_step(Step::AssembleKeystore, || {
            match flow {
                HostFlow::CsrFirst => {
                    keystore::export_bundle(
                        &host.pkcs12_export,
                        &stores.keystore_alias,
                        &host_key,
                        &signed_cert,
                        &trusted_ca,
                        &stores.keystore_password,
                    )?;
                    created.push(host.pkcs12_export.clone());
                    keystore::import_bundle(
                        &host.pkcs12_export,
                        &stores.keystore_password,
                        &host.keystore,
                        &stores.keystore_alias,
                        &stores.keystore_password,
                    )?;
                    created.push(host.keystore.clone());
                }
                HostFlow::KeystoreFirst => {
                    let key = keystore::import_merge(
                        &host.keystore,
                        &stores.keystore_alias,
                        &signed_cert,
                        &trusted_ca,
                        &stores.keystore_password,
                    )?;
                    write_new_file(&host.key, &key.private_key_to_pem_pkcs8()?, FILE_MODE_SECRET)?;
                    created.push(host.key.clone());
                }
            }
            Ok(())
        })?;

        run_step(Step::Cleanup, || {
            for intermediate in host.intermediates() {
                if remove_if_exists(intermediate)? {
                    tracing::debug!(path = %intermediate.display(), "removed intermediate");
                }
            }
            Ok(())
        })?;

        let serial = signed_cert
            .serial_number()
            .to_bn()
            .and_then(|bn| bn.to_hex_str().map(|hex| hex.to_string()))
            .unwrap_or_default();
        tracing::info!(fqdn, keystore = %host.keystore.display(), "keystore ready");

        Ok(ProvisionReport {
            fqdn: fqdn.to_string(),
            flow,
            ca: ca_outcome,
            truststore: truststore_outcome,
            paths: paths.clone(),
            serial,
        })
    }
}

fn run_step<T>(step: Step, f: impl FnOnce() -> Result<T>) -> Result<T, ProvisionError> {
    let _span = tracing::info_span!("step", step = %step).entered();
    tracing::info!(step = %step, "running");
    f().map_err(|source| {
        tracing::error!(step = %step, error = %format!("{source:#}"), "step failed");
        ProvisionError::StepFailed { step, source }
    })
}

fn remove_created(created: &[PathBuf]) {
    for path in created.iter().rev() {
        match remove_if_exists(path) {
            Ok(true) => tracing::warn!(path = %path.display(), "removed partial artifact"),
            Ok(false) => {}
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not remove partial artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::Directories;
    use crate::keystore::read_keystore;
    use crate::subject::common_name;
    use crate::truststore::read_truststore;
    use openssl::x509::X509VerifyResult;
    use std::cmp::Ordering;
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(root: &Path, flow: HostFlow) -> AppConfig {
        let mut config = AppConfig {
            directories: Directories {
                truststore: root.join("truststore"),
                keystore: root.join("keystore"),
            },
            ..AppConfig::default()
        };
        config.host.flow = flow;
        config
    }

    fn assert_complete_keystore(config: &AppConfig, report: &ProvisionReport) {
        let host = &report.paths.host;
        let contents = read_keystore(&host.keystore, &config.stores.keystore_password)
            .expect("keystore should open with the store password");
        let key = contents.private_key.as_ref().expect("one private key entry");
        let cert = contents.certificate.as_ref().expect("signed certificate");
        assert_eq!(cert.alias(), Some(&b"localhost"[..]));
        assert!(cert.public_key().unwrap().public_eq(key));
        assert_eq!(
            common_name(cert.subject_name()).as_deref(),
            Some(report.fqdn.as_str())
        );
        assert_eq!(contents.ca_chain.len(), 1);
        assert_eq!(contents.ca_chain[0].alias(), Some(&b"CARoot"[..]));
        assert_eq!(contents.ca_chain[0].issued(cert), X509VerifyResult::OK);

        let key_pem = fs::read(&host.key).expect("exported key");
        let exported = openssl::pkey::PKey::private_key_from_pem(&key_pem).unwrap();
        assert!(exported.public_eq(key));
        let signed = openssl::x509::X509::from_pem(&fs::read(&host.signed_cert).unwrap()).unwrap();
        assert_eq!(signed.to_der().unwrap(), cert.to_der().unwrap());

        assert!(!host.csr.exists(), "CSR should be removed on success");
        assert!(!host.extension_config.exists(), "cnf should be removed on success");
    }

    #[test]
    fn csr_first_run_produces_full_layout() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::CsrFirst);

        let report = Provisioner::new(&config)
            .run(Some("broker1.example.com"))
            .expect("run should succeed");

        assert_eq!(report.ca, CaOutcome::Created);
        assert_eq!(report.truststore, TruststoreOutcome::Created);
        assert!(report.paths.ca.cert.exists());
        assert!(report.paths.ca.serial.exists());
        assert!(report.paths.host.pkcs12_export.exists());
        assert_complete_keystore(&config, &report);

        let trusted = read_truststore(&report.paths.ca.truststore, &config.stores.truststore_password)
            .unwrap();
        assert_eq!(trusted.len(), 1);
    }

    #[test]
    fn keystore_first_run_produces_full_layout() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::KeystoreFirst);

        let report = Provisioner::new(&config)
            .run(Some("broker2.example.com"))
            .expect("run should succeed");

        assert_complete_keystore(&config, &report);
        assert!(!report.paths.host.pkcs12_export.exists());
    }

    #[test]
    fn second_host_reuses_ca_and_advances_serial() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::CsrFirst);
        let provisioner = Provisioner::new(&config);

        let first = provisioner.run(Some("broker1.example.com")).unwrap();
        let ca_key = fs::read(&first.paths.ca.key).unwrap();
        let ca_cert = fs::read(&first.paths.ca.cert).unwrap();
        let truststore = fs::read(&first.paths.ca.truststore).unwrap();

        let second = provisioner.run(Some("broker2.example.com")).unwrap();

        assert_eq!(second.ca, CaOutcome::Reused);
        assert_eq!(second.truststore, TruststoreOutcome::Reused);
        assert_eq!(fs::read(&first.paths.ca.key).unwrap(), ca_key);
        assert_eq!(fs::read(&first.paths.ca.cert).unwrap(), ca_cert);
        assert_eq!(fs::read(&first.paths.ca.truststore).unwrap(), truststore);

        let first_serial = openssl::bn::BigNum::from_hex_str(&first.serial).unwrap();
        let second_serial = openssl::bn::BigNum::from_hex_str(&second.serial).unwrap();
        assert_eq!(first_serial.ucmp(&second_serial), Ordering::Less);
        assert_complete_keystore(&config, &second);
    }

    #[test]
    fn missing_fqdn_is_a_usage_error() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::CsrFirst);

        let err = Provisioner::new(&config).run(None).unwrap_err();

        assert!(matches!(err, ProvisionError::MissingFqdn));
        assert_eq!(err.exit_code(), 1);
        assert!(!temp_dir.path().join("truststore").exists());
    }

    #[test]
    fn existing_artifact_aborts_before_any_write() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::CsrFirst);
        let keystore_dir = temp_dir.path().join("keystore");
        fs::create_dir_all(&keystore_dir).unwrap();
        let existing = keystore_dir.join("broker1.example.com-key.pem");
        fs::write(&existing, "do not touch").unwrap();

        let err = Provisioner::new(&config)
            .run(Some("broker1.example.com"))
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ArtifactExists { ref path } if *path == existing));
        assert_eq!(fs::read_to_string(&existing).unwrap(), "do not touch");
        assert!(!temp_dir.path().join("truststore").exists());
        assert_eq!(fs::read_dir(&keystore_dir).unwrap().count(), 1);
    }

    #[test]
    fn signing_failure_keeps_intermediates_by_default() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let config = config_in(temp_dir.path(), HostFlow::CsrFirst);
        let provisioner = Provisioner::new(&config);
        let first = provisioner.run(Some("broker1.example.com")).unwrap();
        fs::write(&first.paths.ca.serial, "corrupt").unwrap();

        let err = provisioner.run(Some("broker2.example.com")).unwrap_err();

        assert_eq!(err.step(), Some(Step::SignHostCertificate));
        assert_eq!(err.exit_code(), 2);
        let host = crate::artifacts::HostPaths::new(&config.directories.keystore, "broker2.example.com");
        assert!(host.csr.exists(), "CSR stays for inspection");
        assert!(host.extension_config.exists(), "cnf stays for inspection");
        assert!(host.key.exists());
        assert!(!host.keystore.exists());
    }

    #[test]
    fn signing_failure_with_remove_policy_cleans_host_artifacts() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let mut config = config_in(temp_dir.path(), HostFlow::KeystoreFirst);
        config.pipeline.on_failure = FailurePolicy::Remove;
        let first = Provisioner::new(&config)
            .run(Some("broker1.example.com"))
            .unwrap();
        fs::write(&first.paths.ca.serial, "corrupt").unwrap();

        let err = Provisioner::new(&config)
            .run(Some("broker2.example.com"))
            .unwrap_err();

        assert_eq!(err.step(), Some(Step::SignHostCertificate));
        let host = crate::artifacts::HostPaths::new(&config.directories.keystore, "broker2.example.com");
        for path in [&host.csr, &host.extension_config, &host.keystore, &host.key] {
            assert!(!path.exists(), "{} should be removed", path.display());
        }
        assert!(first.paths.ca.key.exists(), "shared CA material is never removed");
        assert!(first.paths.host.keystore.exists());
    }

    #[test]
    fn invalid_config_is_reported_before_writing() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let mut config = config_in(temp_dir.path(), HostFlow::CsrFirst);
        config.certificate_authority.validity_days = 0;

        let err = Provisioner::new(&config)
            .run(Some("broker1.example.com"))
            .unwrap_err();

        assert!(matches!(err, ProvisionError::InvalidConfig(_)));
        assert!(!temp_dir.path().join("truststore").exists());
    }
}
