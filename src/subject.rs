//! Distinguished names shared by the CA and host certificates.

use anyhow::{anyhow, Result};
use openssl::nid::Nid;
use openssl::x509::{X509Name, X509NameRef};

use crate::configs::CertificateAuthorityConfig;

/// The C/ST/L/O part of a subject. The common name is supplied per certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFields {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
}

impl SubjectFields {
    pub fn from_config(config: &CertificateAuthorityConfig) -> Self {
        Self {
            country: config.country.clone(),
            state: config.state.clone(),
            locality: config.locality.clone(),
            organization: config.organization.clone(),
        }
    }

    /// Build `C=.., ST=.., L=.., O=.., CN=common_name` in that order.
    pub fn to_x509_name(&self, common_name: &str) -> Result<X509Name> {
        let mut name_builder =
            X509Name::builder().map_err(|e| anyhow!("Failed to create name builder: {}", e))?;
        name_builder
            .append_entry_by_nid(Nid::COUNTRYNAME, &self.country)
            .map_err(|e| anyhow!("Failed to set country `{}`: {}", self.country, e))?;
        name_builder
            .append_entry_by_nid(Nid::STATEORPROVINCENAME, &self.state)
            .map_err(|e| anyhow!("Failed to set state/province: {}", e))?;
        name_builder
            .append_entry_by_nid(Nid::LOCALITYNAME, &self.locality)
            .map_err(|e| anyhow!("Failed to set locality: {}", e))?;
        name_builder
            .append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)
            .map_err(|e| anyhow!("Failed to set organization: {}", e))?;
        name_builder
            .append_entry_by_nid(Nid::COMMONNAME, common_name)
            .map_err(|e| anyhow!("Failed to set CN `{}`: {}", common_name, e))?;
        Ok(name_builder.build())
    }
}

/// Text of the first `nid` entry of `name`, if any.
pub fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|entry| std::str::from_utf8(entry.data().as_slice()).ok())
        .map(str::to_string)
}

/// First common name of `name`, if any.
pub fn common_name(name: &X509NameRef) -> Option<String> {
    name_entry(name, Nid::COMMONNAME)
}
