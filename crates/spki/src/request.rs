//! Wire types of the issuance service.
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use spki_certs::profile::Profile;

/// Requests a new self-signed root certificate authority.
///
/// ```json
/// {
///   "title": "Example Root",
///   "key": { "algo": "rsa", "size": 2048 },
///   "names": { "CN": "Test CA Root", "O": "Example Organization", "OU": "PKI" },
///   "expiryDays": 3650,
///   "skidPolicy": "sha256"
/// }
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub key: KeySpec,
    pub names: Names,

    #[serde(alias = "expiry")]
    pub expiry_days: u64,

    /// `hash` or `sha256`, the configured default is used if absent.
    #[serde(default, alias = "subjectKeyIdentifier")]
    pub skid_policy: Option<String>,
}

/// Requests a leaf certificate signed by a previously issued root.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeafRequest {
    #[serde(default)]
    pub title: Option<String>,

    /// The certificate ID of the issuing root.
    pub parent_id: String,
    pub key: KeySpec,
    pub names: Names,

    /// The configured default is used if absent.
    #[serde(default, alias = "expiry")]
    pub expiry_days: Option<u64>,

    #[serde(flatten)]
    pub alternative_names: AlternativeNames,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct KeySpec {
    pub algo: String,

    /// RSA modulus length or ECDSA curve size, ignored for Ed25519.
    #[serde(default)]
    pub size: u32,
}

/// The subject distinguished name.
///
/// Empty optional attributes are treated as absent.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Names {
    #[serde(rename = "CN")]
    pub common_name: String,

    #[serde(rename = "C", default)]
    pub country: Option<String>,

    #[serde(rename = "L", default)]
    pub locality: Option<String>,

    #[serde(rename = "ST", default)]
    pub province: Option<String>,

    #[serde(rename = "O", default)]
    pub organization: Option<String>,

    #[serde(rename = "OU", default)]
    pub organizational_unit: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeNames {
    #[serde(default)]
    pub dns_names: Vec<String>,

    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,

    #[serde(default)]
    pub email_addresses: Vec<String>,

    #[serde(default)]
    pub uris: Vec<String>,
}

impl Names {
    pub fn to_profile(&self, alternative_names: AlternativeNames) -> Profile {
        let AlternativeNames {
            dns_names,
            ip_addresses,
            email_addresses,
            uris,
        } = alternative_names;

        Profile::builder()
            .common_name(self.common_name.trim())
            .maybe_country(non_empty(self.country.as_deref()))
            .maybe_province(non_empty(self.province.as_deref()))
            .maybe_locality(non_empty(self.locality.as_deref()))
            .maybe_organization(non_empty(self.organization.as_deref()))
            .maybe_organizational_unit(non_empty(self.organizational_unit.as_deref()))
            .dns_names(dns_names)
            .ip_addresses(ip_addresses)
            .email_addresses(email_addresses)
            .uris(uris)
            .build()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Returned after a certificate was issued and persisted.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceResponse {
    #[serde(rename = "certificatePEM")]
    pub certificate_pem: String,
    pub certificate_id: String,
    pub key_id: String,
}
