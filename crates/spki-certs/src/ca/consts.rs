use x509_cert::der::pem::LineEnding;

/// The default CA validity time span of ten years (3650 days).
pub const DEFAULT_CA_VALIDITY_DAYS: u64 = 3650;

/// The default leaf certificate validity time span of one year (365 days).
pub const DEFAULT_CERTIFICATE_VALIDITY_DAYS: u64 = 365;

/// The line ending used for all PEM output.
pub const PEM_LINE_ENDING: LineEnding = LineEnding::LF;
