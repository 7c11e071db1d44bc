//! keystore-gen CLI
//!
//! ```bash
//! keystore-gen broker1.example.com
//! keystore-gen --flow keystore-first --config keystore-gen.toml broker2.example.com
//! ```

use anyhow::Result;
use clap::Parser;
use keystore_gen::configs::{AppConfig, FailurePolicy, HostFlow};
use keystore_gen::error::{ProvisionError, EXIT_USAGE};
use keystore_gen::logging;
use keystore_gen::pipeline::{ProvisionReport, Provisioner};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "keystore-gen",
    version,
    about = "Create a CA, a trust store and a CA-signed PKCS#12 keystore for one FQDN"
)]
struct Cli {
    /// Fully-qualified domain name the keystore is issued for.
    fqdn: Option<String>,
    /// Optional path to config TOML. Built-in defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override `[host].flow` (csr-first, keystore-first).
    #[arg(long)]
    flow: Option<HostFlow>,
    /// Override `[pipeline].on_failure` (keep, remove).
    #[arg(long)]
    on_failure: Option<FailurePolicy>,
    /// Override both store passwords.
    #[arg(long, env = "KEYSTORE_GEN_STORE_PASSWORD", hide_env_values = true)]
    store_password: Option<String>,
    /// Override log level (trace, debug, info, warn, error, off).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(flow) = cli.flow {
        config.host.flow = flow;
    }
    if let Some(policy) = cli.on_failure {
        config.pipeline.on_failure = policy;
    }
    if let Some(password) = &cli.store_password {
        config.set_store_password(password.clone());
    }
    Ok(config)
}

fn print_report(report: &ProvisionReport) {
    let ca = &report.paths.ca;
    let host = &report.paths.host;
    println!("✓ CA certificate: {}", ca.cert.display());
    println!("✓ Trust store: {}", ca.truststore.display());
    println!("✓ Host private key: {}", host.key.display());
    println!("✓ Signed certificate: {} (serial {})", host.signed_cert.display(), report.serial);
    println!("✓ Keystore: {}", host.keystore.display());
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version render through the error path with exit 0
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE as u8)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(EXIT_USAGE as u8);
        }
    };

    if let Err(err) = logging::init(&config, cli.log_level.as_deref()) {
        eprintln!("error: {err:#}");
        return ExitCode::from(EXIT_USAGE as u8);
    }

    match Provisioner::new(&config).run(cli.fqdn.as_deref()) {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            if let ProvisionError::MissingFqdn = err {
                eprintln!("usage: keystore-gen [OPTIONS] <FQDN>");
            }
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
