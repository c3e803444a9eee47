//! The issuance workflow: authorize the caller, issue the certificate and
//! persist it together with its private key.
//!
//! A certificate is only returned once it is durably stored. Any failure,
//! including one after the certificate was signed, is reported as an error.
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use spki_certs::{
    CertificateExt,
    ca::{
        CertificateAuthority, CreateCertificateAuthorityError, LoadCertificateAuthorityError,
        PEM_LINE_ENDING,
    },
    cert_builder::{CertificateBuilder, CreateCertificateError},
    csr::{self, SigningRequest},
    keys::{self, KeyAlgorithm, KeyPair},
    profile::{self, Profile},
    skid::{self, SkidPolicy},
};
use spki_store::{
    CertificateRecord, CertificateState, Genre, Issuance, PrivateKeyRecord, Store, VersionRecord,
    new_id, now_millis,
};
use tracing::{info, instrument, warn};
use x509_cert::{Certificate, time::Time};

use crate::{
    access::{self, AccessCheck, Action, Grant},
    config::IssuanceConfig,
    error::ErrorCode,
    request::{AlternativeNames, IssuanceResponse, LeafRequest, RootRequest},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to check whether the caller may {action}"))]
    CheckAccess { source: access::Error, action: Action },

    #[snafu(display("user {user_id:?} is not authorized to {action}"))]
    AccessDenied { user_id: String, action: Action },

    #[snafu(display("invalid key algorithm"))]
    ParseKeyAlgorithm { source: keys::Error },

    #[snafu(display("invalid subject key identifier policy"))]
    ParseSkidPolicy { source: skid::Error },

    #[snafu(display("invalid certificate names"))]
    BuildNames { source: profile::Error },

    #[snafu(display("the validity must be at least one day"))]
    ZeroValidity,

    #[snafu(display("failed to generate the {algorithm} key"))]
    GenerateKey {
        source: keys::Error,
        algorithm: KeyAlgorithm,
    },

    #[snafu(display("failed to issue the root certificate"))]
    IssueRoot {
        source: CreateCertificateAuthorityError,
    },

    #[snafu(display("failed to build the certificate signing request"))]
    BuildRequest { source: csr::Error },

    #[snafu(display("the certificate signing request did not verify"))]
    VerifyRequest { source: csr::Error },

    #[snafu(display("failed to issue the leaf certificate"))]
    IssueLeaf { source: CreateCertificateError },

    #[snafu(display("failed to encode the certificate as PEM"))]
    EncodeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to encode the private key as PEM"))]
    EncodePrivateKey { source: keys::Error },

    #[snafu(display("failed to encode the certificate signing request as PEM"))]
    EncodeRequest { source: csr::Error },

    #[snafu(display("failed to persist the issued certificate"))]
    Persist { source: spki_store::Error },

    #[snafu(display("parent certificate {certid:?} does not exist"))]
    ParentNotFound { certid: String },

    #[snafu(display("parent certificate {certid:?} belongs to another user"))]
    ParentNotOwned { certid: String },

    #[snafu(display("parent certificate {certid:?} has no signed version"))]
    MissingParentVersion { certid: String },

    #[snafu(display("private key {keyid:?} of parent certificate {certid:?} is missing"))]
    MissingParentKey { certid: String, keyid: String },

    #[snafu(display("failed to load parent certificate {certid:?} as a certificate authority"))]
    LoadParent {
        source: LoadCertificateAuthorityError,
        certid: String,
    },
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CheckAccess { .. } | Self::AccessDenied { .. } | Self::ParentNotOwned { .. } => {
                ErrorCode::Unauthorized
            }
            Self::ParseKeyAlgorithm { source } | Self::GenerateKey { source, .. } => {
                source.kind().into()
            }
            Self::ParseSkidPolicy { source } => source.kind().into(),
            Self::BuildNames { source } => source.kind().into(),
            Self::IssueRoot { source } => source.kind().into(),
            Self::BuildRequest { source } | Self::VerifyRequest { source } => {
                source.kind().into()
            }
            Self::IssueLeaf { source } => source.kind().into(),
            Self::LoadParent { source, .. } => source.kind().into(),
            Self::ZeroValidity | Self::ParentNotFound { .. } => ErrorCode::UnsupportedParameter,
            Self::EncodeCertificate { .. }
            | Self::EncodePrivateKey { .. }
            | Self::EncodeRequest { .. } => ErrorCode::SigningError,
            Self::Persist { .. }
            | Self::MissingParentVersion { .. }
            | Self::MissingParentKey { .. } => ErrorCode::PersistenceError,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Persist { source } => source.is_transient(),
            _ => false,
        }
    }
}

/// Issues root and leaf certificates on behalf of authorized users.
pub struct IssuanceService<A> {
    store: Store,
    access: A,
    settings: IssuanceConfig,
}

impl<A: AccessCheck> IssuanceService<A> {
    pub fn new(store: Store, access: A, settings: IssuanceConfig) -> Self {
        Self {
            store,
            access,
            settings,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Issues a self-signed root CA and stores it for the authorized user.
    #[instrument(skip_all, fields(title = ?request.title, common_name = %request.names.common_name))]
    pub fn init_ca(&self, credential: &str, request: &RootRequest) -> Result<IssuanceResponse> {
        let grant = self.authorize(credential, Action::IssueRootCertificate)?;

        let (profile, ca) = build_root_ca(request, &self.settings)?;

        let record = CertificateRecord {
            certid: new_id(),
            user_id: grant.user_id.clone(),
            title: request.title.clone(),
            state: CertificateState::Valid,
            subject: profile.subject_string(),
            parent_id: None,
            pathlev: 0,
            genre: Genre::Root,
            cert_req: None,
        };
        let issuance = issuance(record, ca.ca_cert(), ca.key_pair())?;

        self.store
            .register_creator_if_absent(&grant.user_id, &grant.account_name)
            .context(PersistSnafu)?;
        self.persist(issuance)
    }

    /// Issues a leaf certificate signed by one of the user's root CAs.
    ///
    /// The leaf key is generated here and the request is built and verified
    /// from it, so the CSR stored alongside the certificate is exactly the one
    /// that was signed. Requested alternative names are copied into the
    /// certificate as they are, deciding which names a user may request is
    /// up to the [`AccessCheck`].
    #[instrument(skip_all, fields(parent_id = %request.parent_id, common_name = %request.names.common_name))]
    pub fn issue_leaf(&self, credential: &str, request: &LeafRequest) -> Result<IssuanceResponse> {
        let grant = self.authorize(credential, Action::IssueLeafCertificate)?;

        let algorithm = KeyAlgorithm::parse(&request.key.algo).context(ParseKeyAlgorithmSnafu)?;
        let profile = request
            .names
            .to_profile(request.alternative_names.clone());
        validate_names(&profile)?;
        let validity_days = request
            .expiry_days
            .unwrap_or(self.settings.leaf_validity_days);
        ensure!(validity_days > 0, ZeroValiditySnafu);

        let (parent, ca) = self.load_parent(&request.parent_id, &grant)?;

        let key_pair = KeyPair::generate(algorithm, request.key.size, &self.settings.key_policy())
            .context(GenerateKeySnafu { algorithm })?;
        let signing_request = SigningRequest::build(&profile, &key_pair).context(BuildRequestSnafu)?;
        signing_request.verify().context(VerifyRequestSnafu)?;

        let certificate = CertificateBuilder::builder()
            .request(&signing_request)
            .validity_days(validity_days)
            .signed_by(&ca)
            .build()
            .context(IssueLeafSnafu)?;

        let record = CertificateRecord {
            certid: new_id(),
            user_id: grant.user_id,
            title: request.title.clone(),
            state: CertificateState::Valid,
            subject: profile.subject_string(),
            parent_id: Some(parent.certid),
            pathlev: parent.pathlev + 1,
            genre: Genre::Leaf,
            cert_req: Some(
                signing_request
                    .to_pem(PEM_LINE_ENDING)
                    .context(EncodeRequestSnafu)?,
            ),
        };
        let issuance = issuance(record, &certificate, &key_pair)?;

        self.persist(issuance)
    }

    fn authorize(&self, credential: &str, action: Action) -> Result<Grant> {
        let grant = self
            .access
            .check(credential, action)
            .context(CheckAccessSnafu { action })?;

        if !grant.authorized {
            warn!(user.id = %grant.user_id, %action, "access denied");
            return AccessDeniedSnafu {
                user_id: grant.user_id,
                action,
            }
            .fail();
        }

        Ok(grant)
    }

    fn load_parent(
        &self,
        certid: &str,
        grant: &Grant,
    ) -> Result<(CertificateRecord, CertificateAuthority)> {
        let parent = self
            .store
            .find_certificate(certid)
            .context(PersistSnafu)?
            .context(ParentNotFoundSnafu { certid })?;
        ensure!(
            parent.user_id == grant.user_id,
            ParentNotOwnedSnafu { certid }
        );

        let version = self
            .store
            .latest_version(certid)
            .context(PersistSnafu)?
            .context(MissingParentVersionSnafu { certid })?;
        let private_key = self
            .store
            .find_private_key(&version.keyid)
            .context(PersistSnafu)?
            .context(MissingParentKeySnafu {
                certid,
                keyid: &version.keyid,
            })?;

        let ca = CertificateAuthority::from_pem(&version.cert, &private_key.private_key)
            .context(LoadParentSnafu { certid })?;

        Ok((parent, ca))
    }

    fn persist(&self, issuance: Issuance) -> Result<IssuanceResponse> {
        self.store
            .record_issuance(&issuance)
            .context(PersistSnafu)?;

        info!(
            certificate.id = %issuance.certificate.certid,
            certificate.serial = %issuance.version.serial,
            certificate.subject = %issuance.certificate.subject,
            key.id = %issuance.private_key.keyid,
            "issued certificate"
        );

        let Issuance {
            certificate,
            private_key,
            version,
        } = issuance;

        Ok(IssuanceResponse {
            certificate_pem: version.cert,
            certificate_id: certificate.certid,
            key_id: private_key.keyid,
        })
    }
}

/// Validates a root request and issues the self-signed CA it describes,
/// without persisting anything.
pub fn build_root_ca(
    request: &RootRequest,
    settings: &IssuanceConfig,
) -> Result<(Profile, CertificateAuthority)> {
    let algorithm = KeyAlgorithm::parse(&request.key.algo).context(ParseKeyAlgorithmSnafu)?;
    let skid_policy = match request.skid_policy.as_deref() {
        Some(policy) => SkidPolicy::parse(policy).context(ParseSkidPolicySnafu)?,
        None => settings.default_skid_policy,
    };
    let profile = request.names.to_profile(AlternativeNames::default());
    profile.subject().context(BuildNamesSnafu)?;
    ensure!(request.expiry_days > 0, ZeroValiditySnafu);

    let key_pair = KeyPair::generate(algorithm, request.key.size, &settings.key_policy())
        .context(GenerateKeySnafu { algorithm })?;
    let ca = CertificateAuthority::builder()
        .profile(&profile)
        .validity_days(request.expiry_days)
        .skid_policy(skid_policy)
        .signing_key_pair(key_pair)
        .build()
        .context(IssueRootSnafu)?;

    Ok((profile, ca))
}

fn validate_names(profile: &Profile) -> Result<()> {
    profile.subject().context(BuildNamesSnafu)?;
    profile.subject_alt_name().context(BuildNamesSnafu)?;
    Ok(())
}

fn issuance(
    certificate_record: CertificateRecord,
    certificate: &Certificate,
    key_pair: &KeyPair,
) -> Result<Issuance> {
    let cert = certificate
        .to_pem_string(PEM_LINE_ENDING)
        .context(EncodeCertificateSnafu)?;
    let private_key = key_pair
        .to_pem(PEM_LINE_ENDING)
        .context(EncodePrivateKeySnafu)?;
    let validity = &certificate.tbs_certificate.validity;
    let keyid = new_id();

    Ok(Issuance {
        version: VersionRecord {
            certid: certificate_record.certid.clone(),
            keyid: keyid.clone(),
            serial: certificate.serial_hex(),
            cert,
            effective_time: unix_millis(validity.not_before),
            expiration_time: unix_millis(validity.not_after),
            revocation_time: None,
            alarm: false,
        },
        private_key: PrivateKeyRecord {
            keyid,
            private_key,
            create_time: now_millis(),
        },
        certificate: certificate_record,
    })
}

fn unix_millis(time: Time) -> i64 {
    i64::try_from(time.to_unix_duration().as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use spki_certs::ErrorKind;

    use super::*;
    use crate::{
        access::StaticAccess,
        request::{KeySpec, Names},
    };

    struct Unreachable;

    impl AccessCheck for Unreachable {
        fn check(&self, _credential: &str, _action: Action) -> Result<Grant, access::Error> {
            access::UnavailableSnafu {
                message: "connection refused",
            }
            .fail()
        }
    }

    fn service<A: AccessCheck>(access: A) -> IssuanceService<A> {
        IssuanceService::new(
            Store::open_in_memory().unwrap(),
            access,
            IssuanceConfig::default(),
        )
    }

    fn root_request(algo: &str, size: u32) -> RootRequest {
        RootRequest {
            title: Some("Example Root".to_owned()),
            key: KeySpec {
                algo: algo.to_owned(),
                size,
            },
            names: Names {
                common_name: "Test CA Root".to_owned(),
                organization: Some("Example Organization".to_owned()),
                ..Names::default()
            },
            expiry_days: 365,
            skid_policy: None,
        }
    }

    fn leaf_request(parent_id: &str) -> LeafRequest {
        LeafRequest {
            title: None,
            parent_id: parent_id.to_owned(),
            key: KeySpec {
                algo: "ecdsa".to_owned(),
                size: 256,
            },
            names: Names {
                common_name: "example.com".to_owned(),
                ..Names::default()
            },
            expiry_days: Some(30),
            alternative_names: AlternativeNames {
                dns_names: vec!["example.com".to_owned()],
                ..AlternativeNames::default()
            },
        }
    }

    #[test]
    fn root_then_leaf() {
        let service = service(StaticAccess::new("user-1", "alice"));

        let root = service
            .init_ca("token", &root_request("ecdsa", 384))
            .unwrap();
        let stored_root = service
            .store()
            .find_certificate(&root.certificate_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored_root.genre, Genre::Root);
        assert_eq!(stored_root.pathlev, 0);
        assert_eq!(stored_root.subject, "/O=Example Organization/CN=Test CA Root");
        assert_eq!(
            service.store().find_creator("user-1").unwrap().unwrap().name.as_deref(),
            Some("alice")
        );

        let leaf = service
            .issue_leaf("token", &leaf_request(&root.certificate_id))
            .unwrap();
        let stored_leaf = service
            .store()
            .find_certificate(&leaf.certificate_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored_leaf.genre, Genre::Leaf);
        assert_eq!(stored_leaf.pathlev, 1);
        assert_eq!(stored_leaf.parent_id.as_deref(), Some(root.certificate_id.as_str()));
        assert!(
            stored_leaf
                .cert_req
                .unwrap()
                .starts_with("-----BEGIN CERTIFICATE REQUEST-----")
        );

        let version = service
            .store()
            .latest_version(&leaf.certificate_id)
            .unwrap()
            .unwrap();
        assert_eq!(version.cert, leaf.certificate_pem);
        assert_eq!(version.keyid, leaf.key_id);
    }

    #[test]
    fn denied_requests_generate_nothing() {
        let service = service(StaticAccess::new("user-1", "alice").with_credential("token"));

        let err = service
            .init_ca("stolen", &root_request("ed25519", 0))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert!(service.store().find_creator("user-1").unwrap().is_none());
        assert!(service.store().list_certificates("user-1").unwrap().is_empty());
    }

    #[test]
    fn unreachable_authorization_service() {
        let err = service(Unreachable)
            .init_ca("token", &root_request("ed25519", 0))
            .unwrap_err();

        assert!(matches!(err, Error::CheckAccess { .. }));
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[rstest]
    #[case("dsa", 1024, ErrorKind::UnsupportedParameter)]
    #[case("rsa", 1024, ErrorKind::UnsupportedParameter)]
    #[case("ecdsa", 224, ErrorKind::UnsupportedParameter)]
    fn unsupported_keys(#[case] algo: &str, #[case] size: u32, #[case] kind: ErrorKind) {
        let err = service(StaticAccess::new("user-1", "alice"))
            .init_ca("token", &root_request(algo, size))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::from(kind));
    }

    #[test]
    fn unknown_skid_policy() {
        let mut request = root_request("ed25519", 0);
        request.skid_policy = Some("md5".to_owned());

        let err = service(StaticAccess::new("user-1", "alice"))
            .init_ca("token", &request)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedPolicy);
    }

    #[test]
    fn zero_validity() {
        let mut request = root_request("ed25519", 0);
        request.expiry_days = 0;

        let err = service(StaticAccess::new("user-1", "alice"))
            .init_ca("token", &request)
            .unwrap_err();
        assert!(matches!(err, Error::ZeroValidity));
    }

    #[test]
    fn foreign_parent_is_unauthorized() {
        let store = Store::open_in_memory().unwrap();
        let alice = IssuanceService::new(
            store.clone(),
            StaticAccess::new("user-1", "alice"),
            IssuanceConfig::default(),
        );
        let bob = IssuanceService::new(
            store,
            StaticAccess::new("user-2", "bob"),
            IssuanceConfig::default(),
        );

        let root = alice
            .init_ca("token", &root_request("ed25519", 0))
            .unwrap();
        let err = bob
            .issue_leaf("token", &leaf_request(&root.certificate_id))
            .unwrap_err();

        assert!(matches!(err, Error::ParentNotOwned { .. }));
        assert_eq!(err.code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn missing_parent() {
        let err = service(StaticAccess::new("user-1", "alice"))
            .issue_leaf("token", &leaf_request("does-not-exist"))
            .unwrap_err();

        assert!(matches!(err, Error::ParentNotFound { .. }));
        assert_eq!(err.code(), ErrorCode::UnsupportedParameter);
    }

    #[test]
    fn leaf_parent_is_rejected() {
        let service = service(StaticAccess::new("user-1", "alice"));
        let root = service
            .init_ca("token", &root_request("ed25519", 0))
            .unwrap();
        let leaf = service
            .issue_leaf("token", &leaf_request(&root.certificate_id))
            .unwrap();

        let err = service
            .issue_leaf("token", &leaf_request(&leaf.certificate_id))
            .unwrap_err();
        assert!(matches!(err, Error::LoadParent { .. }));
    }
}
