//! Common types shared across unistore crates.
//!
//! This crate holds the error taxonomy, the data model (addresses,
//! descriptors, checksums, secrets) and the address resolver, so that every
//! other crate speaks the same vocabulary.

pub mod address;
pub mod error;
pub mod types;

pub use address::AddressResolver;
pub use error::{AddressError, CredentialError, Error, OperationError, Result};
pub use types::{
    normalize_key, ByteRange, Checksum, ListPage, ObjectDescriptor, PresignMethod, PresignedUrl,
    ResourceAddress, Scheme, SecretString,
};
