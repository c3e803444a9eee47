use bon::Builder;
use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages};

use super::CertificateAuthority;
use crate::{
    CertificatePair, ErrorKind,
    ca::DEFAULT_CA_VALIDITY_DAYS,
    keys::{self, KeyPair},
    profile::{self, Profile},
    skid::{self, SkidPolicy},
    template::{self, CertificateTemplate, TemplateExtension},
};

/// Defines all error variants which can occur when creating a CA
#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError {
    #[snafu(display("failed to build the CA subject"))]
    BuildSubject { source: profile::Error },

    #[snafu(display("failed to encode the CA public key"))]
    EncodePublicKey { source: keys::Error },

    #[snafu(display("failed to derive the subject key identifier"))]
    DeriveSubjectKeyIdentifier { source: skid::Error },

    #[snafu(display("failed to sign the CA certificate"))]
    SignCertificate { source: template::Error },
}

impl CreateCertificateAuthorityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BuildSubject { source } => source.kind(),
            Self::EncodePublicKey { source } => source.kind(),
            Self::DeriveSubjectKeyIdentifier { source } => source.kind(),
            Self::SignCertificate { source } => source.kind(),
        }
    }
}

/// This builder builds self-signed root certificate authorities of type
/// [`CertificateAuthority`].
///
/// It has many default values, notably;
///
/// - A default validity of [`DEFAULT_CA_VALIDITY_DAYS`]
/// - A default subject key identifier policy of [`SkidPolicy::FullHash`]
/// - No path length constraint
/// - A randomly generated 127-bit serial number
///
/// The CA contains the public half of the provided `signing_key_pair` and is
/// signed by the private half of said key.
///
/// ```no_run
/// use spki_certs::{
///     ca::CertificateAuthority,
///     keys::{KeyAlgorithm, KeyPair, KeyPolicy},
///     profile::Profile,
///     skid::SkidPolicy,
/// };
///
/// let profile = Profile::builder()
///     .common_name("Test CA Root")
///     .organization("Example Organization")
///     .build();
/// let key_pair = KeyPair::generate(KeyAlgorithm::Rsa, 2048, &KeyPolicy::default())
///     .expect("failed to generate key");
///
/// let ca = CertificateAuthority::builder()
///     .profile(&profile)
///     .validity_days(365)
///     .skid_policy(SkidPolicy::FullHash)
///     .signing_key_pair(key_pair)
///     .build()
///     .expect("failed to build CA");
/// ```
#[derive(Builder)]
#[builder(start_fn = start_builder, finish_fn = finish_builder)]
pub struct CertificateAuthorityBuilder<'a> {
    /// Subject of the certificate authority. Issuer and subject are equal.
    profile: &'a Profile,

    /// Validity/lifetime of the certificate in days, must be positive.
    ///
    /// If not specified the default of [`DEFAULT_CA_VALIDITY_DAYS`] will be used.
    #[builder(default = DEFAULT_CA_VALIDITY_DAYS)]
    validity_days: u64,

    /// Selects the digest of the subject (and authority) key identifier.
    #[builder(default)]
    skid_policy: SkidPolicy,

    /// Optional pathLenConstraint of the BasicConstraints extension.
    path_len_constraint: Option<u8>,

    /// Cryptographic keypair used to sign the CA itself and leaf certificates.
    signing_key_pair: KeyPair,
}

impl<S> CertificateAuthorityBuilderBuilder<'_, S>
where
    S: certificate_authority_builder_builder::IsComplete,
{
    /// Convenience function to avoid calling `builder().finish_builder().build()`
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        self.finish_builder().build()
    }
}

impl CertificateAuthorityBuilder<'_> {
    #[instrument(
        name = "build_certificate_authority",
        skip(self),
        fields(subject = %self.profile.subject_string()),
    )]
    pub fn build(self) -> Result<CertificateAuthority, CreateCertificateAuthorityError> {
        let subject = self.profile.subject().context(BuildSubjectSnafu)?;
        let validity =
            template::validity_from_now(self.validity_days).context(SignCertificateSnafu)?;
        let serial_number = template::random_serial_number().context(SignCertificateSnafu)?;

        let public_key_info = self
            .signing_key_pair
            .public_key_info()
            .context(EncodePublicKeySnafu)?;
        let subject_key_identifier =
            skid::subject_key_identifier(&public_key_info, self.skid_policy)
                .context(DeriveSubjectKeyIdentifierSnafu)?;

        // The CA is self-signed, so the authority key identifier is the
        // subject key identifier.
        let authority_key_identifier = AuthorityKeyIdentifier {
            key_identifier: Some(subject_key_identifier.0.clone()),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };

        debug!(
            ca.subject = %subject,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.serial = %hex::encode_upper(serial_number.as_bytes()),
            ca.skid_policy = %self.skid_policy,
            ca.public_key.algorithm = %self.signing_key_pair.algorithm(),
            ca.public_key.size = self.signing_key_pair.key_size(),
            "creating certificate authority"
        );

        let template = CertificateTemplate {
            issuer: None,
            serial_number,
            validity,
            subject,
            public_key_info,
            extensions: vec![
                TemplateExtension::BasicConstraints(BasicConstraints {
                    ca: true,
                    path_len_constraint: self.path_len_constraint,
                }),
                TemplateExtension::KeyUsage(KeyUsage(
                    KeyUsages::KeyCertSign | KeyUsages::CRLSign,
                )),
                TemplateExtension::SubjectKeyIdentifier(subject_key_identifier),
                TemplateExtension::AuthorityKeyIdentifier(authority_key_identifier),
            ],
        };

        let certificate = template::sign_certificate(&self.signing_key_pair, template)
            .context(SignCertificateSnafu)?;

        Ok(CertificateAuthority {
            certificate_pair: CertificatePair {
                certificate,
                key_pair: self.signing_key_pair,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use const_oid::AssociatedOid;
    use rstest::rstest;
    use x509_cert::certificate::TbsCertificateInner;

    use super::*;
    use crate::{
        CertificateExt,
        keys::{KeyAlgorithm, KeyPolicy},
    };

    fn key_pair(algorithm: KeyAlgorithm, size: u32) -> KeyPair {
        KeyPair::generate(algorithm, size, &KeyPolicy { min_rsa_bits: 1024 }).unwrap()
    }

    #[test]
    fn minimal_ca() {
        let profile = Profile::builder().common_name("Test CA Root").build();
        let ca = CertificateAuthority::builder()
            .profile(&profile)
            .signing_key_pair(key_pair(KeyAlgorithm::Ecdsa, 256))
            .build()
            .expect("failed to build CA");

        assert_ca_cert_attributes(
            &ca.ca_cert().tbs_certificate,
            "CN=Test CA Root",
            DEFAULT_CA_VALIDITY_DAYS,
        );
        assert_eq!(
            ca.subject_key_identifier().unwrap().len(),
            SkidPolicy::FullHash.digest_len()
        );
        assert!(ca.ca_cert().basic_constraints().unwrap().path_len_constraint.is_none());
    }

    #[rstest]
    #[case(KeyAlgorithm::Rsa, 1024, SkidPolicy::ShortHash)]
    #[case(KeyAlgorithm::Ecdsa, 384, SkidPolicy::FullHash)]
    #[case(KeyAlgorithm::Ecdsa, 521, SkidPolicy::ShortHash)]
    #[case(KeyAlgorithm::Ed25519, 0, SkidPolicy::FullHash)]
    fn customized_ca(
        #[case] algorithm: KeyAlgorithm,
        #[case] size: u32,
        #[case] skid_policy: SkidPolicy,
    ) {
        let profile = Profile::builder()
            .common_name("Test")
            .organization("Example Organization")
            .build();
        let ca = CertificateAuthority::builder()
            .profile(&profile)
            .validity_days(13)
            .skid_policy(skid_policy)
            .path_len_constraint(0)
            .signing_key_pair(key_pair(algorithm, size))
            .build()
            .expect("failed to build CA");

        let certificate = ca.ca_cert();
        assert_ca_cert_attributes(
            &certificate.tbs_certificate,
            "CN=Test,O=Example Organization",
            13,
        );

        let skid = certificate.subject_key_identifier().unwrap();
        assert_eq!(skid.len(), skid_policy.digest_len());
        assert_eq!(certificate.authority_key_identifier().unwrap(), skid);
        assert_eq!(
            certificate.basic_constraints().unwrap().path_len_constraint,
            Some(0)
        );
    }

    #[test]
    fn zero_validity_is_rejected() {
        let profile = Profile::builder().common_name("Test").build();
        let err = CertificateAuthority::builder()
            .profile(&profile)
            .validity_days(0)
            .signing_key_pair(key_pair(KeyAlgorithm::Ed25519, 0))
            .build()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedParameter);
    }

    #[test]
    fn consecutive_serials_differ() {
        let profile = Profile::builder().common_name("Test").build();
        let build = || {
            CertificateAuthority::builder()
                .profile(&profile)
                .signing_key_pair(key_pair(KeyAlgorithm::Ed25519, 0))
                .build()
                .unwrap()
        };

        assert_ne!(build().serial_number(), build().serial_number());
    }

    fn assert_ca_cert_attributes(ca_cert: &TbsCertificateInner, subject: &str, validity_days: u64) {
        assert_eq!(ca_cert.subject.to_string(), subject);
        assert_eq!(ca_cert.issuer, ca_cert.subject);

        let not_before = ca_cert.validity.not_before.to_system_time();
        let not_after = ca_cert.validity.not_after.to_system_time();
        assert_eq!(
            not_after
                .duration_since(not_before)
                .expect("Failed to calculate duration between notBefore and notAfter"),
            Duration::from_secs(validity_days * 24 * 60 * 60)
        );

        let key_usage = ca_cert
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == KeyUsage::OID)
            .expect("CA must carry KeyUsage");
        assert!(key_usage.critical);
    }
}
