use bon::Builder;
use const_oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, instrument, warn};
use x509_cert::{
    Certificate,
    der::asn1::OctetString,
    ext::pkix::{AuthorityKeyIdentifier, ExtendedKeyUsage, KeyUsage, KeyUsages},
};

use crate::{
    ErrorKind,
    ca::{CertificateAuthority, DEFAULT_CERTIFICATE_VALIDITY_DAYS},
    csr::{self, SigningRequest},
    skid::{self, SkidPolicy},
    template::{self, CertificateTemplate, TemplateExtension},
};

/// Defines all error variants which can occur when creating a certificate
#[derive(Debug, Snafu)]
pub enum CreateCertificateError {
    #[snafu(display("the certificate signing request failed verification right before signing"))]
    UntrustedRequest { source: csr::Error },

    #[snafu(display("the public key of the certificate signing request is not supported"))]
    UnsupportedKeyType { source: csr::Error },

    #[snafu(display("failed to read the requested subject alternative names"))]
    ReadSubjectAltName { source: csr::Error },

    #[snafu(display("the issuing CA {issuer} expired at {not_after}"))]
    CertificateAuthorityExpired { issuer: String, not_after: String },

    #[snafu(display("the issuing CA {issuer} carries no subject key identifier"))]
    MissingIssuerKeyIdentifier { issuer: String },

    #[snafu(display("failed to wrap the authority key identifier"))]
    EncodeAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to derive the subject key identifier"))]
    DeriveSubjectKeyIdentifier { source: skid::Error },

    #[snafu(display("failed to sign the certificate"))]
    SignCertificate { source: template::Error },
}

impl CreateCertificateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UntrustedRequest { .. } => ErrorKind::UntrustedRequest,
            Self::UnsupportedKeyType { .. } => ErrorKind::UnsupportedKeyType,
            Self::CertificateAuthorityExpired { .. } => ErrorKind::UnsupportedParameter,
            Self::ReadSubjectAltName { source } => source.kind(),
            Self::DeriveSubjectKeyIdentifier { source } => source.kind(),
            Self::SignCertificate { source } => source.kind(),
            Self::MissingIssuerKeyIdentifier { .. } | Self::EncodeAuthorityKeyIdentifier { .. } => {
                ErrorKind::SigningError
            }
        }
    }
}

/// This builder builds leaf certificates for certificate signing requests.
///
/// Currently you are required to specify a [`CertificateAuthority`], which
/// signs the certificate.
///
/// These leaf certificates can be used for client/server authentication,
/// because they include [`ID_KP_CLIENT_AUTH`] and [`ID_KP_SERVER_AUTH`] in the
/// extended key usage extension.
///
/// The request is verified again before anything is signed, as it may have
/// crossed a trust boundary since it was first checked. Subject and subject
/// alternative names are copied verbatim from the request. Whether the
/// requester may use these names at all has to be decided before calling
/// this builder.
///
/// A CA whose notAfter has already passed signs nothing.
///
/// This builder has a few default values, notably;
///
/// - A default validity of [`DEFAULT_CERTIFICATE_VALIDITY_DAYS`], shortened
///   to the CA's notAfter if the CA expires earlier
/// - A randomly generated 127-bit serial number
///
/// ```no_run
/// use spki_certs::{
///     ca::CertificateAuthority,
///     cert_builder::CertificateBuilder,
///     csr::SigningRequest,
///     keys::{KeyAlgorithm, KeyPair, KeyPolicy},
///     profile::Profile,
/// };
///
/// let policy = KeyPolicy::default();
/// let ca_profile = Profile::builder().common_name("Test CA Root").build();
/// let ca = CertificateAuthority::builder()
///     .profile(&ca_profile)
///     .signing_key_pair(KeyPair::generate(KeyAlgorithm::Ecdsa, 256, &policy).unwrap())
///     .build()
///     .expect("failed to build CA");
///
/// let profile = Profile::builder()
///     .common_name("example.com")
///     .dns_names(vec!["example.com".to_owned()])
///     .build();
/// let key_pair = KeyPair::generate(KeyAlgorithm::Ecdsa, 256, &policy).unwrap();
/// let request = SigningRequest::build(&profile, &key_pair).unwrap();
///
/// let certificate = CertificateBuilder::builder()
///     .request(&request)
///     .signed_by(&ca)
///     .build()
///     .expect("failed to build certificate");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateBuilder<'a> {
    /// The certificate signing request providing subject, alternative names
    /// and public key.
    request: &'a SigningRequest,

    /// Validity/lifetime of the certificate in days, must be positive.
    ///
    /// If not specified the default of [`DEFAULT_CERTIFICATE_VALIDITY_DAYS`] will be used.
    #[builder(default = DEFAULT_CERTIFICATE_VALIDITY_DAYS)]
    validity_days: u64,

    /// Mandatorily sign the certificate using the provided [`CertificateAuthority`].
    signed_by: &'a CertificateAuthority,
}

impl<S> CertificateBuilderBuilder<'_, S>
where
    S: certificate_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        self.finish_builder().build()
    }
}

impl<'a> CertificateBuilder<'a> {
    pub fn builder() -> CertificateBuilderBuilder<'a> {
        Self::start_builder()
    }

    #[instrument(
        name = "build_certificate",
        skip(self),
        fields(subject = %self.request.subject()),
    )]
    pub fn build(self) -> Result<Certificate, CreateCertificateError> {
        if let Err(err) = self.request.verify() {
            return match err.kind() {
                ErrorKind::UnsupportedKeyType => Err(err).context(UnsupportedKeyTypeSnafu),
                _ => Err(err).context(UntrustedRequestSnafu),
            };
        }

        let issuer = self.signed_by.subject_name().clone();
        let issuer_key_identifier = self.signed_by.subject_key_identifier().context(
            MissingIssuerKeyIdentifierSnafu {
                issuer: issuer.to_string(),
            },
        )?;
        let authority_key_identifier = AuthorityKeyIdentifier {
            key_identifier: Some(
                OctetString::new(issuer_key_identifier)
                    .context(EncodeAuthorityKeyIdentifierSnafu)?,
            ),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };

        let public_key_info = self.request.public_key_info().clone();
        let subject_key_identifier =
            skid::subject_key_identifier(&public_key_info, SkidPolicy::ShortHash)
                .context(DeriveSubjectKeyIdentifierSnafu)?;
        let subject_alt_name = self
            .request
            .subject_alt_name()
            .context(ReadSubjectAltNameSnafu)?;

        let mut validity =
            template::validity_from_now(self.validity_days).context(SignCertificateSnafu)?;
        let ca_not_after = self.signed_by.validity().not_after;
        ensure!(
            ca_not_after.to_unix_duration() > validity.not_before.to_unix_duration(),
            CertificateAuthorityExpiredSnafu {
                issuer: issuer.to_string(),
                not_after: ca_not_after.to_string(),
            }
        );
        if template::clamp_not_after(&mut validity, ca_not_after) {
            warn!(
                certificate.validity_days = self.validity_days,
                ca.not_after = %ca_not_after,
                "requested validity exceeds the CA, shortening it to the CA notAfter"
            );
        }
        let serial_number = template::random_serial_number().context(SignCertificateSnafu)?;

        let mut extensions = vec![
            TemplateExtension::KeyUsage(KeyUsage(
                KeyUsages::KeyEncipherment | KeyUsages::DataEncipherment,
            )),
            // The leaf certificate can be used for WWW client and server
            // authentication. This is a base requirement for TLS certs.
            TemplateExtension::ExtendedKeyUsage(ExtendedKeyUsage(vec![
                ID_KP_SERVER_AUTH,
                ID_KP_CLIENT_AUTH,
            ])),
            TemplateExtension::SubjectKeyIdentifier(subject_key_identifier),
            TemplateExtension::AuthorityKeyIdentifier(authority_key_identifier),
        ];
        if let Some(subject_alt_name) = subject_alt_name {
            extensions.push(TemplateExtension::SubjectAltName(subject_alt_name));
        }

        let subject = self.request.subject().clone();
        debug!(
            certificate.subject = %subject,
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %hex::encode_upper(serial_number.as_bytes()),
            certificate.signed_by.issuer = %issuer,
            certificate.signed_by.algorithm = %self.signed_by.key_pair().algorithm(),
            "creating and signing certificate"
        );

        let template = CertificateTemplate {
            issuer: Some(issuer),
            serial_number,
            validity,
            subject,
            public_key_info,
            extensions,
        };

        template::sign_certificate(self.signed_by.key_pair(), template)
            .context(SignCertificateSnafu)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::IpAddr,
        time::{Duration, SystemTime},
    };

    use rstest::rstest;
    use x509_cert::{
        certificate::TbsCertificateInner,
        der::{asn1::BitString, pem::LineEnding},
        ext::pkix::name::GeneralName,
        time::Time,
    };

    use super::*;
    use crate::{
        CertificateExt, CertificatePair,
        keys::{KeyAlgorithm, KeyPair, KeyPolicy},
        profile::Profile,
    };

    fn key_pair(algorithm: KeyAlgorithm, size: u32) -> KeyPair {
        KeyPair::generate(algorithm, size, &KeyPolicy { min_rsa_bits: 1024 }).unwrap()
    }

    fn ca(algorithm: KeyAlgorithm, size: u32, validity_days: u64) -> CertificateAuthority {
        let profile = Profile::builder().common_name("Test CA Root").build();
        CertificateAuthority::builder()
            .profile(&profile)
            .validity_days(validity_days)
            .signing_key_pair(key_pair(algorithm, size))
            .build()
            .expect("failed to build CA")
    }

    fn request(algorithm: KeyAlgorithm, size: u32) -> SigningRequest {
        let profile = Profile::builder()
            .common_name("trino-coordinator-default-0")
            .dns_names(vec![
                "trino-coordinator-default-0.trino-coordinator-default.default.svc.cluster.local"
                    .to_owned(),
                "trino-coordinator-default.default.svc.cluster.local".to_owned(),
            ])
            .ip_addresses(vec![
                "10.0.0.1".parse().unwrap(),
                "fe80::42".parse().unwrap(),
            ])
            .build();

        SigningRequest::build(&profile, &key_pair(algorithm, size)).unwrap()
    }

    #[test]
    fn minimal_certificate() {
        let ca = ca(KeyAlgorithm::Ecdsa, 256, 3650);
        let profile = Profile::builder().common_name("example.com").build();
        let request =
            SigningRequest::build(&profile, &key_pair(KeyAlgorithm::Ecdsa, 256)).unwrap();

        let certificate = CertificateBuilder::builder()
            .request(&request)
            .signed_by(&ca)
            .build()
            .expect("failed to build certificate");

        assert_certificate_attributes(
            &certificate.tbs_certificate,
            "CN=example.com",
            &[],
            &[],
            DEFAULT_CERTIFICATE_VALIDITY_DAYS,
        );
        assert!(certificate.subject_alt_name().is_none());
    }

    #[rstest]
    #[case(KeyAlgorithm::Rsa, 1024, KeyAlgorithm::Ecdsa, 256)]
    #[case(KeyAlgorithm::Ecdsa, 384, KeyAlgorithm::Rsa, 1024)]
    #[case(KeyAlgorithm::Ecdsa, 521, KeyAlgorithm::Ed25519, 0)]
    #[case(KeyAlgorithm::Ed25519, 0, KeyAlgorithm::Ecdsa, 384)]
    fn customized_certificate(
        #[case] ca_algorithm: KeyAlgorithm,
        #[case] ca_size: u32,
        #[case] leaf_algorithm: KeyAlgorithm,
        #[case] leaf_size: u32,
    ) {
        let ca = ca(ca_algorithm, ca_size, 3650);
        let request = request(leaf_algorithm, leaf_size);

        let certificate = CertificateBuilder::builder()
            .request(&request)
            .validity_days(30)
            .signed_by(&ca)
            .build()
            .expect("failed to build certificate");

        assert_certificate_attributes(
            &certificate.tbs_certificate,
            "CN=trino-coordinator-default-0",
            &[
                "trino-coordinator-default-0.trino-coordinator-default.default.svc.cluster.local",
                "trino-coordinator-default.default.svc.cluster.local",
            ],
            &["10.0.0.1".parse().unwrap(), "fe80::42".parse().unwrap()],
            30,
        );

        assert_eq!(certificate.tbs_certificate.issuer, *ca.subject_name());
        assert_eq!(
            certificate.tbs_certificate.subject_public_key_info,
            *request.public_key_info()
        );
        assert_eq!(
            certificate.authority_key_identifier(),
            ca.subject_key_identifier()
        );
        assert_eq!(certificate.subject_key_identifier().unwrap().len(), 20);
        assert!(!certificate.is_ca());
        assert!(certificate.basic_constraints().is_none());

        let extended_key_usage = certificate.extended_key_usage().unwrap();
        assert!(extended_key_usage.0.contains(&ID_KP_SERVER_AUTH));
        assert!(extended_key_usage.0.contains(&ID_KP_CLIENT_AUTH));

        let key_usage = certificate.key_usage().unwrap();
        assert!(key_usage.key_encipherment());
        assert!(key_usage.data_encipherment());
        assert!(!key_usage.key_cert_sign());
    }

    #[test]
    fn validity_is_clamped_to_the_ca() {
        let ca = ca(KeyAlgorithm::Ecdsa, 256, 30);
        let request = request(KeyAlgorithm::Ecdsa, 256);

        let certificate = CertificateBuilder::builder()
            .request(&request)
            .validity_days(366)
            .signed_by(&ca)
            .build()
            .expect("certificate must be issued with a shortened validity");

        assert_eq!(
            certificate.tbs_certificate.validity.not_after,
            ca.validity().not_after
        );
    }

    #[test]
    fn expired_ca_signs_nothing() {
        let ca = ca(KeyAlgorithm::Ecdsa, 256, 3650);
        let day = Duration::from_secs(24 * 60 * 60);

        // Move the CA window into the past, the key pair still matches.
        let mut certificate = ca.ca_cert().clone();
        certificate.tbs_certificate.validity.not_before =
            Time::try_from(SystemTime::now() - 10 * day).unwrap();
        certificate.tbs_certificate.validity.not_after =
            Time::try_from(SystemTime::now() - 5 * day).unwrap();
        let key_pair = KeyPair::from_pem(&ca.key_pair().to_pem(LineEnding::LF).unwrap()).unwrap();
        let expired =
            CertificateAuthority::new(CertificatePair::new(certificate, key_pair).unwrap()).unwrap();

        let err = CertificateBuilder::builder()
            .request(&request(KeyAlgorithm::Ecdsa, 256))
            .signed_by(&expired)
            .build()
            .unwrap_err();
        assert!(
            matches!(err, CreateCertificateError::CertificateAuthorityExpired { .. }),
            "{err}"
        );
        assert_eq!(err.kind(), ErrorKind::UnsupportedParameter);
    }

    #[test]
    fn tampered_request_is_untrusted() {
        let ca = ca(KeyAlgorithm::Ecdsa, 256, 3650);
        let request = request(KeyAlgorithm::Ed25519, 0);

        let mut cert_req = request.as_cert_req().clone();
        let mut signature = cert_req.signature.raw_bytes().to_vec();
        signature[0] ^= 0xff;
        cert_req.signature = BitString::from_bytes(&signature).unwrap();
        let tampered = SigningRequest::from(cert_req);

        let err = CertificateBuilder::builder()
            .request(&tampered)
            .signed_by(&ca)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UntrustedRequest);
    }

    #[test]
    fn unsupported_request_key() {
        let ca = ca(KeyAlgorithm::Ecdsa, 256, 3650);
        let request = request(KeyAlgorithm::Ed25519, 0);

        let mut cert_req = request.as_cert_req().clone();
        cert_req.info.public_key.algorithm.oid = const_oid::db::rfc8410::ID_X_25519;
        let request = SigningRequest::from(cert_req);

        let err = CertificateBuilder::builder()
            .request(&request)
            .signed_by(&ca)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKeyType);
    }

    fn assert_certificate_attributes(
        certificate: &TbsCertificateInner,
        subject: &str,
        sans: &[&str],
        san_ips: &[IpAddr],
        validity_days: u64,
    ) {
        assert_eq!(certificate.subject.to_string(), subject);

        let san_entries = certificate
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == x509_cert::ext::pkix::ID_CE_SUBJECT_ALT_NAME)
            .map(|ext| {
                <x509_cert::ext::pkix::SubjectAltName as x509_cert::der::Decode>::from_der(
                    ext.extn_value.as_bytes(),
                )
                .expect("failed to parse SAN")
                .0
            })
            .unwrap_or_default();

        let actual_sans = san_entries
            .iter()
            .filter_map(|san| match san {
                GeneralName::DnsName(dns_name) => Some(dns_name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(actual_sans, sans);

        let actual_san_ips = san_entries
            .iter()
            .filter_map(|san| match san {
                GeneralName::IpAddress(ip) => crate::profile::bytes_to_ip_addr(ip.as_bytes()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(actual_san_ips, san_ips);

        let not_before = certificate.validity.not_before.to_system_time();
        let not_after = certificate.validity.not_after.to_system_time();
        assert_eq!(
            not_after
                .duration_since(not_before)
                .expect("Failed to calculate duration between notBefore and notAfter"),
            Duration::from_secs(validity_days * 24 * 60 * 60)
        );
    }
}
