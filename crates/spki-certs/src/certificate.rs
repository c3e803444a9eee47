//! Read access to the extensions and encodings of issued certificates.
use const_oid::AssociatedOid;
use x509_cert::{
    Certificate,
    der::{Decode, EncodePem, pem::LineEnding},
    ext::pkix::{
        AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAltName,
        SubjectKeyIdentifier,
    },
};

/// Convenience accessors for [`Certificate`]s.
///
/// Extensions which are absent or which fail to decode are reported as
/// [`None`].
pub trait CertificateExt {
    /// Decodes the first extension with the OID of `T`.
    fn extension<T>(&self) -> Option<T>
    where
        T: AssociatedOid + for<'a> Decode<'a>;

    /// Returns `true` if BasicConstraints marks this certificate as a CA.
    fn is_ca(&self) -> bool {
        self.extension::<BasicConstraints>()
            .is_some_and(|constraints| constraints.ca)
    }

    fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.extension()
    }

    fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        self.extension::<SubjectKeyIdentifier>()
            .map(|skid| skid.0.as_bytes().to_vec())
    }

    fn authority_key_identifier(&self) -> Option<Vec<u8>> {
        self.extension::<AuthorityKeyIdentifier>()
            .and_then(|aki| aki.key_identifier)
            .map(|key_identifier| key_identifier.as_bytes().to_vec())
    }

    fn key_usage(&self) -> Option<KeyUsage> {
        self.extension()
    }

    fn extended_key_usage(&self) -> Option<ExtendedKeyUsage> {
        self.extension()
    }

    fn subject_alt_name(&self) -> Option<SubjectAltName> {
        self.extension()
    }

    /// The serial number as upper-case hex digits.
    fn serial_hex(&self) -> String;

    fn to_pem_string(&self, line_ending: LineEnding) -> Result<String, x509_cert::der::Error>;
}

impl CertificateExt for Certificate {
    fn extension<T>(&self) -> Option<T>
    where
        T: AssociatedOid + for<'a> Decode<'a>,
    {
        self.tbs_certificate
            .extensions
            .iter()
            .flatten()
            .find(|extension| extension.extn_id == T::OID)
            .and_then(|extension| T::from_der(extension.extn_value.as_bytes()).ok())
    }

    fn serial_hex(&self) -> String {
        hex::encode_upper(self.tbs_certificate.serial_number.as_bytes())
    }

    fn to_pem_string(&self, line_ending: LineEnding) -> Result<String, x509_cert::der::Error> {
        self.to_pem(line_ending)
    }
}
