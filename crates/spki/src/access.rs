//! The seam to the authorization service.
//!
//! Every issuance starts with an [`AccessCheck`]: the caller's bearer
//! credential is exchanged for a [`Grant`] naming the user on whose behalf
//! the certificate is issued. A denied or failed check rejects the request
//! before any key material is generated.
//!
//! Which names a user may request in a certificate is decided here as well.
//! The issuer copies requested subject alternative names verbatim.
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("the authorization service is unavailable: {message}"))]
    Unavailable { message: String },

    #[snafu(display("the credential was rejected by the authorization service"))]
    InvalidCredential,
}

/// The operations guarded by an access check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Action {
    #[strum(serialize = "spki:IssueRootCertificate")]
    IssueRootCertificate,

    #[strum(serialize = "spki:IssueLeafCertificate")]
    IssueLeafCertificate,
}

/// The answer of an access check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub authorized: bool,
    pub user_id: String,
    pub account_name: String,
}

pub trait AccessCheck {
    fn check(&self, credential: &str, action: Action) -> Result<Grant, Error>;
}

/// Grants every action to a fixed identity.
///
/// This backs the command line, where the operator running the binary is the
/// trusted caller. If a credential is configured, only that exact credential
/// is authorized.
#[derive(Clone, Debug)]
pub struct StaticAccess {
    user_id: String,
    account_name: String,
    credential: Option<String>,
}

impl StaticAccess {
    pub fn new(user_id: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            account_name: account_name.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }
}

impl AccessCheck for StaticAccess {
    fn check(&self, credential: &str, _action: Action) -> Result<Grant, Error> {
        let authorized = self
            .credential
            .as_deref()
            .is_none_or(|expected| expected == credential);

        Ok(Grant {
            authorized,
            user_id: self.user_id.clone(),
            account_name: self.account_name.clone(),
        })
    }
}

impl<T: AccessCheck + ?Sized> AccessCheck for &T {
    fn check(&self, credential: &str, action: Action) -> Result<Grant, Error> {
        (**self).check(credential, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_access_without_credential() {
        let grant = StaticAccess::new("user-1", "alice")
            .check("anything", Action::IssueRootCertificate)
            .unwrap();

        assert!(grant.authorized);
        assert_eq!(grant.user_id, "user-1");
        assert_eq!(grant.account_name, "alice");
    }

    #[test]
    fn static_access_with_credential() {
        let access = StaticAccess::new("user-1", "alice").with_credential("token");

        assert!(
            access
                .check("token", Action::IssueLeafCertificate)
                .unwrap()
                .authorized
        );
        assert!(
            !access
                .check("other", Action::IssueLeafCertificate)
                .unwrap()
                .authorized
        );
    }

    #[test]
    fn action_names() {
        assert_eq!(
            Action::IssueRootCertificate.to_string(),
            "spki:IssueRootCertificate"
        );
    }
}
