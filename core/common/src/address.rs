//! Unified resource identifier parsing.

use std::collections::BTreeSet;

use crate::error::AddressError;
use crate::types::{ResourceAddress, Scheme};

const SCHEME_SEPARATOR: &str = "://";

/// Parses `scheme://bucket-or-host/key` identifiers into [`ResourceAddress`]es.
///
/// Only schemes in the resolver's set are accepted, so an identifier for a
/// backend without a registered adapter fails before any I/O happens.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    schemes: BTreeSet<Scheme>,
}

impl AddressResolver {
    /// Create a resolver accepting the given schemes.
    pub fn new(schemes: impl IntoIterator<Item = Scheme>) -> Self {
        Self {
            schemes: schemes.into_iter().collect(),
        }
    }

    /// Resolver accepting every known scheme.
    pub fn all() -> Self {
        Self::new(Scheme::ALL)
    }

    pub fn supports(&self, scheme: Scheme) -> bool {
        self.schemes.contains(&scheme)
    }

    /// Resolve an identifier.
    ///
    /// # Errors
    /// - `UnsupportedScheme` if the scheme is unknown or not registered
    /// - `InvalidPath` if the identifier is malformed or the key escapes
    ///   the bucket root
    pub fn resolve(&self, uri: &str) -> Result<ResourceAddress, AddressError> {
        let (scheme_name, rest) = uri.split_once(SCHEME_SEPARATOR).ok_or_else(|| {
            AddressError::InvalidPath(format!("'{}' has no scheme:// prefix", uri))
        })?;

        let scheme = Scheme::parse(scheme_name)
            .filter(|scheme| self.supports(*scheme))
            .ok_or_else(|| AddressError::UnsupportedScheme(scheme_name.to_string()))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(AddressError::InvalidPath(format!(
                "'{}' has no bucket or host",
                uri
            )));
        }

        ResourceAddress::new(scheme, bucket, key)
    }
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::all()
    }
}
