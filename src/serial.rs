//! CA serial number state (`ca.srl`).
//!
//! The file holds the last serial issued by the CA as upper-case hex followed
//! by a newline. A missing file is seeded with a random 159-bit value; every
//! issue increments it by one, so serials from one CA never repeat.

use anyhow::{anyhow, Context, Result};
use openssl::asn1::Asn1Integer;
use openssl::bn::{BigNum, MsbOption};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::{replace_file, FILE_MODE_PUBLIC};

const SEED_SERIAL_BITS: i32 = 159;

pub struct SerialFile {
    path: PathBuf,
}

impl SerialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last serial written, or `None` if the file does not exist yet.
    pub fn current(&self) -> Result<Option<BigNum>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read CA serial file {}", self.path.display()))?;
        let hex = contents.trim();
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "CA serial file {} does not contain a hex serial",
                self.path.display()
            ));
        }
        let serial = BigNum::from_hex_str(hex)
            .map_err(|e| anyhow!("Failed to parse CA serial `{}`: {}", hex, e))?;
        Ok(Some(serial))
    }

    /// Reserve the next serial and persist it before returning.
    pub fn next(&self) -> Result<Asn1Integer> {
        let mut serial = match self.current()? {
            Some(serial) => serial,
            None => {
                let mut seed = BigNum::new()?;
                seed.rand(SEED_SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
                tracing::debug!(path = %self.path.display(), "seeding CA serial file");
                seed
            }
        };
        serial
            .add_word(1)
            .map_err(|e| anyhow!("Failed to increment CA serial: {}", e))?;

        let hex = serial.to_hex_str()?;
        replace_file(&self.path, format!("{}\n", hex).as_bytes(), FILE_MODE_PUBLIC)?;
        Ok(serial.to_asn1_integer()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use tempfile::tempdir;

    #[test]
    fn first_issue_creates_the_file() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let serials = SerialFile::new(temp_dir.path().join("ca.srl"));
        assert!(serials.current().unwrap().is_none());

        let issued = serials.next().expect("serial should be issued");
        let stored = serials.current().unwrap().expect("file should exist now");
        assert_eq!(issued.to_bn().unwrap().ucmp(&stored), Ordering::Equal);

        let contents = fs::read_to_string(serials.path()).unwrap();
        assert!(contents.ends_with('\n'));
        assert!(contents.trim().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn serials_strictly_increase() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("ca.srl");
        fs::write(&path, "0F\n").unwrap();
        let serials = SerialFile::new(&path);

        let first = serials.next().unwrap().to_bn().unwrap();
        let second = serials.next().unwrap().to_bn().unwrap();

        assert_eq!(first.to_hex_str().unwrap().to_string(), "10");
        assert_eq!(second.to_hex_str().unwrap().to_string(), "11");
        assert_eq!(first.ucmp(&second), Ordering::Less);
    }

    #[test]
    fn garbage_serial_is_an_error() {
        let temp_dir = tempdir().expect("tempdir should be created");
        let path = temp_dir.path().join("ca.srl");
        fs::write(&path, "not a serial").unwrap();

        let err = SerialFile::new(&path)
            .next()
            .err()
            .expect("garbage serial should be rejected");
        assert!(err.to_string().contains("hex serial"), "unexpected: {err}");
        assert_eq!(fs::read_to_string(&path).unwrap(), "not a serial");
    }
}
