//! Stable error codes reported to callers of the issuance service.
use serde::{Serialize, Serializer};
use spki_certs::ErrorKind;

/// The failure classes callers can rely on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ErrorCode {
    /// A key algorithm, key size, validity or naming parameter was rejected.
    UnsupportedParameter,
    UnsupportedPolicy,
    SignatureInvalid,
    UntrustedRequest,
    SigningError,

    /// Writing to or reading from the credential store failed. The issued
    /// certificate was not returned.
    PersistenceError,
    UnsupportedKeyType,

    /// The authorization service denied the request or could not be reached.
    Unauthorized,
}

impl ErrorCode {
    /// The code string, like `SPKI.0102`. Every code has its own string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SigningError => "SPKI.0101",
            Self::UnsupportedParameter => "SPKI.0102",
            Self::SignatureInvalid => "SPKI.0103",
            Self::UnsupportedPolicy => "SPKI.0104",
            Self::UntrustedRequest => "SPKI.0105",
            Self::PersistenceError => "SPKI.0106",
            Self::UnsupportedKeyType => "SPKI.0107",
            Self::Unauthorized => "SPKI.0178",
        }
    }
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::UnsupportedParameter => Self::UnsupportedParameter,
            ErrorKind::UnsupportedPolicy => Self::UnsupportedPolicy,
            ErrorKind::SignatureInvalid => Self::SignatureInvalid,
            ErrorKind::UntrustedRequest => Self::UntrustedRequest,
            ErrorKind::SigningError => Self::SigningError,
            ErrorKind::UnsupportedKeyType => Self::UnsupportedKeyType,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The body returned instead of a response when an issuance fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,

    /// Whether sending the same request again may succeed.
    pub transient: bool,
}

impl From<&crate::issuance::Error> for ErrorBody {
    fn from(error: &crate::issuance::Error) -> Self {
        Self {
            code: error.code(),
            message: snafu::Report::from_error(error).to_string(),
            transient: error.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorKind::SigningError, ErrorCode::SigningError, "SPKI.0101")]
    #[case(ErrorKind::UnsupportedParameter, ErrorCode::UnsupportedParameter, "SPKI.0102")]
    #[case(ErrorKind::SignatureInvalid, ErrorCode::SignatureInvalid, "SPKI.0103")]
    #[case(ErrorKind::UnsupportedPolicy, ErrorCode::UnsupportedPolicy, "SPKI.0104")]
    #[case(ErrorKind::UntrustedRequest, ErrorCode::UntrustedRequest, "SPKI.0105")]
    #[case(ErrorKind::UnsupportedKeyType, ErrorCode::UnsupportedKeyType, "SPKI.0107")]
    fn codes(#[case] kind: ErrorKind, #[case] expected: ErrorCode, #[case] code: &str) {
        assert_eq!(ErrorCode::from(kind), expected);
        assert_eq!(expected.as_str(), code);
    }

    #[test]
    fn codes_are_distinct() {
        let all = [
            ErrorCode::UnsupportedParameter,
            ErrorCode::UnsupportedPolicy,
            ErrorCode::SignatureInvalid,
            ErrorCode::UntrustedRequest,
            ErrorCode::SigningError,
            ErrorCode::PersistenceError,
            ErrorCode::UnsupportedKeyType,
            ErrorCode::Unauthorized,
        ];

        let codes = all.map(ErrorCode::as_str).into_iter().collect::<HashSet<_>>();
        assert_eq!(codes.len(), all.len());
        assert_eq!(ErrorCode::PersistenceError.as_str(), "SPKI.0106");
        assert_eq!(ErrorCode::Unauthorized.as_str(), "SPKI.0178");
    }

    #[test]
    fn serialize_body() {
        let body = ErrorBody {
            code: ErrorCode::PersistenceError,
            message: "database is locked".to_owned(),
            transient: true,
        };

        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"code":"SPKI.0106","message":"database is locked","transient":true}"#
        );
    }
}
