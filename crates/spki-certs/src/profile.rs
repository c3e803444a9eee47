//! The subject profile of a certificate: its distinguished name and the
//! subject alternative names (SANs) it is issued for.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bon::Builder;
use const_oid::ObjectIdentifier;
use snafu::{ResultExt, Snafu, ensure};
use x509_cert::{
    attr::AttributeTypeAndValue,
    der::{
        Any, Tag, Tagged,
        asn1::{Ia5String, PrintableStringRef, SetOfVec, Utf8StringRef},
    },
    ext::pkix::{SubjectAltName, name::GeneralName},
    name::{Name, RdnSequence, RelativeDistinguishedName},
};

use crate::ErrorKind;

/// countryName (C)
pub const COUNTRY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
/// stateOrProvinceName (ST)
pub const STATE_OR_PROVINCE_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
/// localityName (L)
pub const LOCALITY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
/// organizationName (O)
pub const ORGANIZATION_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
/// organizationalUnitName (OU)
pub const ORGANIZATIONAL_UNIT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
/// commonName (CN)
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the common name (CN) must not be empty"))]
    EmptyCommonName,

    #[snafu(display("failed to encode {attribute} {value:?} as a subject attribute"))]
    EncodeAttribute {
        source: x509_cert::der::Error,
        attribute: &'static str,
        value: String,
    },

    #[snafu(display("failed to parse subject alternative name {name:?} as a Ia5 string"))]
    ParseSubjectAlternativeName {
        source: x509_cert::der::Error,
        name: String,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UnsupportedParameter
    }
}

/// A subject distinguished name plus the subject alternative names requested
/// for a certificate.
///
/// Only the common name is required. The profile is immutable once built.
///
/// ```
/// use spki_certs::profile::Profile;
///
/// let profile = Profile::builder()
///     .common_name("example.com")
///     .organization("Example Organization")
///     .dns_names(vec!["example.com".to_owned(), "www.example.com".to_owned()])
///     .build();
///
/// assert_eq!(profile.subject_string(), "/O=Example Organization/CN=example.com");
/// ```
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
pub struct Profile {
    #[builder(into)]
    common_name: String,

    #[builder(into)]
    country: Option<String>,

    #[builder(into)]
    province: Option<String>,

    #[builder(into)]
    locality: Option<String>,

    #[builder(into)]
    organization: Option<String>,

    #[builder(into)]
    organizational_unit: Option<String>,

    #[builder(default)]
    dns_names: Vec<String>,

    #[builder(default)]
    ip_addresses: Vec<IpAddr>,

    #[builder(default)]
    email_addresses: Vec<String>,

    #[builder(default)]
    uris: Vec<String>,
}

impl Profile {
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn province(&self) -> Option<&str> {
        self.province.as_deref()
    }

    pub fn locality(&self) -> Option<&str> {
        self.locality.as_deref()
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn organizational_unit(&self) -> Option<&str> {
        self.organizational_unit.as_deref()
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    pub fn email_addresses(&self) -> &[String] {
        &self.email_addresses
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    /// Builds the X.509 subject name in the order C, ST, L, O, OU, CN.
    ///
    /// The country is encoded as PrintableString, all other attributes as
    /// UTF8String.
    pub fn subject(&self) -> Result<Name> {
        ensure!(!self.common_name.trim().is_empty(), EmptyCommonNameSnafu);

        let mut rdns = Vec::new();
        if let Some(country) = &self.country {
            let value = PrintableStringRef::new(country)
                .and_then(|value| Any::encode_from(&value))
                .context(EncodeAttributeSnafu {
                    attribute: "country",
                    value: country,
                })?;
            rdns.push(relative_distinguished_name(COUNTRY_NAME, value, "country", country)?);
        }

        let text_attributes = [
            (STATE_OR_PROVINCE_NAME, "province", &self.province),
            (LOCALITY_NAME, "locality", &self.locality),
            (ORGANIZATION_NAME, "organization", &self.organization),
            (ORGANIZATIONAL_UNIT_NAME, "organizational unit", &self.organizational_unit),
        ];
        for (oid, attribute, value) in text_attributes {
            if let Some(value) = value {
                rdns.push(utf8_rdn(oid, attribute, value)?);
            }
        }
        rdns.push(utf8_rdn(COMMON_NAME, "common name", &self.common_name)?);

        Ok(RdnSequence(rdns))
    }

    /// Renders the subject like `/C=DE/L=Berlin/ST=Berlin/O=Org/OU=Unit/CN=name`,
    /// leaving out attributes which are not set.
    pub fn subject_string(&self) -> String {
        let fields = [
            ("/C=", self.country.as_deref()),
            ("/L=", self.locality.as_deref()),
            ("/ST=", self.province.as_deref()),
            ("/O=", self.organization.as_deref()),
            ("/OU=", self.organizational_unit.as_deref()),
            ("/CN=", Some(self.common_name.as_str())),
        ];

        fields
            .into_iter()
            .filter_map(|(prefix, value)| value.map(|value| format!("{prefix}{value}")))
            .collect()
    }

    /// Returns `true` if no subject alternative name is requested.
    pub fn has_no_alternative_names(&self) -> bool {
        self.dns_names.is_empty()
            && self.ip_addresses.is_empty()
            && self.email_addresses.is_empty()
            && self.uris.is_empty()
    }

    /// Builds the SubjectAltName extension containing DNS names, IP
    /// addresses, email addresses and URIs (in this order).
    ///
    /// Returns [`None`] if the profile doesn't request any alternative name.
    pub fn subject_alt_name(&self) -> Result<Option<SubjectAltName>> {
        if self.has_no_alternative_names() {
            return Ok(None);
        }

        let dns_names = self
            .dns_names
            .iter()
            .map(|name| ia5(name).map(GeneralName::DnsName));
        let ip_addresses = self
            .ip_addresses
            .iter()
            .copied()
            .map(GeneralName::from)
            .map(Result::Ok);
        let email_addresses = self
            .email_addresses
            .iter()
            .map(|email| ia5(email).map(GeneralName::Rfc822Name));
        let uris = self
            .uris
            .iter()
            .map(|uri| ia5(uri).map(GeneralName::UniformResourceIdentifier));

        let names = dns_names
            .chain(ip_addresses)
            .chain(email_addresses)
            .chain(uris)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(SubjectAltName(names)))
    }

    /// Reconstructs a profile from a subject name and an optional
    /// SubjectAltName extension, for example taken from a signing request.
    ///
    /// Attributes which are not part of the profile are ignored. Repeated
    /// attributes keep the last value.
    pub fn from_name(subject: &Name, subject_alt_name: Option<&SubjectAltName>) -> Self {
        let mut profile = Self::default();

        for atv in subject.0.iter().flat_map(|rdn| rdn.0.iter()) {
            let Some(value) = attribute_text(&atv.value) else {
                continue;
            };

            match atv.oid {
                COUNTRY_NAME => profile.country = Some(value),
                STATE_OR_PROVINCE_NAME => profile.province = Some(value),
                LOCALITY_NAME => profile.locality = Some(value),
                ORGANIZATION_NAME => profile.organization = Some(value),
                ORGANIZATIONAL_UNIT_NAME => profile.organizational_unit = Some(value),
                COMMON_NAME => profile.common_name = value,
                _ => {}
            }
        }

        for name in subject_alt_name.iter().flat_map(|san| san.0.iter()) {
            match name {
                GeneralName::DnsName(dns_name) => profile.dns_names.push(dns_name.to_string()),
                GeneralName::Rfc822Name(email) => profile.email_addresses.push(email.to_string()),
                GeneralName::UniformResourceIdentifier(uri) => profile.uris.push(uri.to_string()),
                GeneralName::IpAddress(ip) => {
                    if let Some(ip) = bytes_to_ip_addr(ip.as_bytes()) {
                        profile.ip_addresses.push(ip);
                    }
                }
                _ => {}
            }
        }

        profile
    }
}

fn ia5(name: &str) -> Result<Ia5String> {
    Ia5String::new(name).context(ParseSubjectAlternativeNameSnafu { name })
}

fn utf8_rdn(
    oid: ObjectIdentifier,
    attribute: &'static str,
    value: &str,
) -> Result<RelativeDistinguishedName> {
    let encoded = Utf8StringRef::new(value)
        .and_then(|utf8| Any::encode_from(&utf8))
        .context(EncodeAttributeSnafu { attribute, value })?;

    relative_distinguished_name(oid, encoded, attribute, value)
}

fn relative_distinguished_name(
    oid: ObjectIdentifier,
    value: Any,
    attribute: &'static str,
    text: &str,
) -> Result<RelativeDistinguishedName> {
    let atv = AttributeTypeAndValue { oid, value };
    let set = SetOfVec::try_from(vec![atv]).context(EncodeAttributeSnafu {
        attribute,
        value: text,
    })?;

    Ok(RelativeDistinguishedName(set))
}

fn attribute_text(value: &Any) -> Option<String> {
    match value.tag() {
        Tag::Utf8String => value.decode_as::<String>().ok(),
        Tag::PrintableString => value
            .decode_as::<PrintableStringRef<'_>>()
            .ok()
            .map(|value| value.to_string()),
        Tag::Ia5String => value
            .decode_as::<Ia5String>()
            .ok()
            .map(|value| value.to_string()),
        _ => None,
    }
}

pub(crate) fn bytes_to_ip_addr(bytes: &[u8]) -> Option<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }

    <[u8; 16]>::try_from(bytes)
        .ok()
        .map(|octets| IpAddr::V6(Ipv6Addr::from(octets)))
}
