//! The credential store keeps track of everything the issuance service
//! produces: the creators requesting certificates, the certificates
//! themselves, their private keys and every signed version of a certificate.
//!
//! The store is backed by SQLite and accessed through an [`r2d2`] connection
//! pool. All operations are synchronous and bounded by the configured
//! connection and busy timeouts, so a saturated pool surfaces as an
//! [`Error`] instead of blocking forever.
//!
//! ```no_run
//! use spki_store::{Store, StoreOptions};
//!
//! let store = Store::open(&StoreOptions::builder().path("/var/lib/spki/spki.db").build())
//!     .expect("failed to open the credential store");
//! let creator = store
//!     .register_creator_if_absent("2f1c9d0e6b7a4c3d8e9f0a1b2c3d4e5f", "alice")
//!     .expect("failed to register creator");
//! ```
mod error;
mod models;
mod schema;
mod store;

pub use error::*;
pub use models::*;
pub use schema::SCHEMA_VERSION;
pub use store::*;
