//! Artifact naming and the pre-flight checks that guard them.
//!
//! Every file the tool produces is derived from the two working directories and
//! the FQDN. [`ArtifactPaths::ensure_host_outputs_absent`] must pass before
//! anything is written, so an existing secret is never silently replaced.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::configs::{Directories, HostFlow};
use crate::error::ProvisionError;

pub const CA_KEY_FILE_NAME: &str = "ca-key.pem";
pub const CA_CERT_FILE_NAME: &str = "ca.crt";
pub const CA_SERIAL_FILE_NAME: &str = "ca.srl";
pub const TRUSTSTORE_FILE_NAME: &str = "truststore.jks";

const MAX_FQDN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

pub(crate) const FILE_MODE_SECRET: u32 = 0o600;
pub(crate) const FILE_MODE_PUBLIC: u32 = 0o644;

/// Files shared by every host run: CA material and the trust store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPaths {
    pub dir: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
    pub serial: PathBuf,
    pub truststore: PathBuf,
}

impl CaPaths {
    pub fn new(truststore_dir: &Path) -> Self {
        Self {
            dir: truststore_dir.to_path_buf(),
            key: truststore_dir.join(CA_KEY_FILE_NAME),
            cert: truststore_dir.join(CA_CERT_FILE_NAME),
            serial: truststore_dir.join(CA_SERIAL_FILE_NAME),
            truststore: truststore_dir.join(TRUSTSTORE_FILE_NAME),
        }
    }
}

/// Per-host files under the keystore directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub dir: PathBuf,
    pub key: PathBuf,
    pub signed_cert: PathBuf,
    pub csr: PathBuf,
    pub keystore: PathBuf,
    pub extension_config: PathBuf,
    pub pkcs12_export: PathBuf,
}

impl HostPaths {
    pub fn new(keystore_dir: &Path, fqdn: &str) -> Self {
        Self {
            dir: keystore_dir.to_path_buf(),
            key: keystore_dir.join(format!("{fqdn}-key.pem")),
            signed_cert: keystore_dir.join(format!("{fqdn}-signed.crt")),
            csr: keystore_dir.join(format!("{fqdn}.csr")),
            keystore: keystore_dir.join(format!("{fqdn}-keystore.jks")),
            extension_config: keystore_dir.join(format!("{fqdn}.cnf")),
            pkcs12_export: keystore_dir.join(format!("{fqdn}.p12")),
        }
    }

    /// Output paths a run with `flow` would create, in check order.
    pub fn outputs(&self, flow: HostFlow) -> Vec<&Path> {
        let mut outputs = vec![
            self.key.as_path(),
            self.signed_cert.as_path(),
            self.csr.as_path(),
            self.keystore.as_path(),
            self.extension_config.as_path(),
        ];
        if flow == HostFlow::CsrFirst {
            outputs.push(self.pkcs12_export.as_path());
        }
        outputs
    }

    /// Intermediates removed after a successful run.
    pub fn intermediates(&self) -> [&Path; 2] {
        [self.csr.as_path(), self.extension_config.as_path()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub fqdn: String,
    pub ca: CaPaths,
    pub host: HostPaths,
}

impl ArtifactPaths {
    pub fn new(directories: &Directories, fqdn: &str) -> Self {
        Self {
            fqdn: fqdn.to_string(),
            ca: CaPaths::new(&directories.truststore),
            host: HostPaths::new(&directories.keystore, fqdn),
        }
    }

    /// Refuse the run if any host output already exists. Reads only.
    pub fn ensure_host_outputs_absent(&self, flow: HostFlow) -> Result<(), ProvisionError> {
        match self.host.outputs(flow).into_iter().find(|path| path.exists()) {
            Some(path) => Err(ProvisionError::ArtifactExists {
                path: path.to_path_buf(),
            }),
            None => Ok(()),
        }
    }
}

/// Trim and check an FQDN so it is safe to use both as a DNS SAN and as a file
/// name component.
pub fn normalize_fqdn(raw: &str) -> Result<String, ProvisionError> {
    let fqdn = raw.trim();
    let invalid = |reason: &str| ProvisionError::InvalidFqdn {
        fqdn: raw.to_string(),
        reason: reason.to_string(),
    };

    if fqdn.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if fqdn.len() > MAX_FQDN_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    for label in fqdn.split('.') {
        if label.is_empty() {
            return Err(invalid("contains an empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid("label longer than 63 characters"));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(invalid(
                "labels may only contain ASCII letters, digits and `-`",
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("labels must not start or end with `-`"));
        }
    }
    Ok(fqdn.to_string())
}

/// Create `path` (which must not exist yet) with restricted permissions.
pub(crate) fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = create_file_with_mode(path, mode)?;
    file.write_all(contents)
        .with_context(|| format!("write file {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

/// Atomically replace an existing file through a temporary sibling.
pub(crate) fn replace_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temporary file in {}", dir.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("write temporary file for {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("sync temporary file for {}", path.display()))?;
    set_file_mode(temp.path(), mode)?;
    temp.persist(path)
        .with_context(|| format!("replace {}", path.display()))?;
    tracing::debug!(path = %path.display(), "replaced artifact");
    Ok(())
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

/// Remove `path`, treating an already-missing file as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

fn create_file_with_mode(path: &Path, mode: u32) -> Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        let mut opts = fs::OpenOptions::new();
        opts.create_new(true).write(true).mode(mode);
        opts.open(path)
            .with_context(|| format!("create file {}", path.display()))
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        let mut opts = fs::OpenOptions::new();
        opts.create_new(true).write(true);
        opts.open(path)
            .with_context(|| format!("create file {}", path.display()))
    }
}

fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
