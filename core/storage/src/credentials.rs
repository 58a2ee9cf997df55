//! Per-scheme credential resolution from environment-variable slots.
//!
//! Every scheme publishes the variables it reads (see [`CredentialSpec`]).
//! For a scheme with prefix `S3`:
//! - `S3_<FIELD>` holds a field directly, e.g. `S3_ACCESS_KEY`
//! - `S3_CREDENTIALS_PATH` may point to a JSON object of field names to
//!   string values; direct variables override file entries
//! - an `expires_at` entry (RFC 3339) in that file marks the credential as
//!   expired once it lies in the past
//!
//! Nothing is cached: each call reads the environment and file again, so a
//! rotated secret is picked up by the next operation.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use zeroize::Zeroize;

use unistore_common::{CredentialError, Result, Scheme, SecretString};

const EXPIRES_AT_FIELD: &str = "expires_at";

/// Source of configuration variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|value| !value.is_empty()).cloned()
    }
}

/// Published credential contract of one scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialSpec {
    pub scheme: Scheme,
    /// Fields that must all be present.
    pub required: &'static [&'static str],
    /// At least one of these must be present (ignored when empty).
    pub one_of: &'static [&'static str],
    pub optional: &'static [&'static str],
}

const LOCAL_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::Local,
    required: &[],
    one_of: &[],
    optional: &[],
};

const S3_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::S3,
    required: &["access_key", "secret_key"],
    one_of: &[],
    optional: &["session_token", "region", "endpoint"],
};

const R2_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::R2,
    required: &["account_id", "access_key", "secret_key"],
    one_of: &[],
    optional: &["endpoint"],
};

const GCS_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::Gcs,
    required: &["access_token"],
    one_of: &[],
    optional: &["hmac_access_id", "hmac_secret"],
};

const SFTP_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::Sftp,
    required: &["username"],
    one_of: &["password", "private_key_path"],
    optional: &[],
};

const FTP_SPEC: CredentialSpec = CredentialSpec {
    scheme: Scheme::Ftp,
    required: &[],
    one_of: &[],
    optional: &["username", "password"],
};

impl CredentialSpec {
    pub fn for_scheme(scheme: Scheme) -> &'static CredentialSpec {
        match scheme {
            Scheme::Local => &LOCAL_SPEC,
            Scheme::S3 => &S3_SPEC,
            Scheme::R2 => &R2_SPEC,
            Scheme::Gcs => &GCS_SPEC,
            Scheme::Sftp => &SFTP_SPEC,
            Scheme::Ftp => &FTP_SPEC,
        }
    }

    /// Environment variable holding `field`, e.g. `S3_ACCESS_KEY`.
    pub fn variable(&self, field: &str) -> String {
        format!("{}_{}", self.scheme.env_prefix(), field.to_ascii_uppercase())
    }

    /// Environment variable holding the credentials file path.
    pub fn path_variable(&self) -> String {
        format!("{}_CREDENTIALS_PATH", self.scheme.env_prefix())
    }

    fn fields(&self) -> impl Iterator<Item = &'static str> {
        self.required
            .iter()
            .chain(self.one_of.iter())
            .chain(self.optional.iter())
            .copied()
    }
}

/// Resolved credentials for one call.
///
/// Not `Clone` and not serializable; secrets are zeroized when it drops.
pub struct Credential {
    scheme: Scheme,
    fields: BTreeMap<String, SecretString>,
    source: String,
}

impl Credential {
    /// Credential without fields (local disk, anonymous FTP).
    pub fn anonymous(scheme: Scheme) -> Self {
        Self {
            scheme,
            fields: BTreeMap::new(),
            source: "none".to_string(),
        }
    }

    /// Add a field. Used by callers that hold secrets outside the environment.
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.to_string(), SecretString::new(value.into()));
        self.source = "explicit".to_string();
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Where the fields came from (variable names, never values).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(SecretString::expose)
    }

    /// Field value, or `CredentialError::Missing` naming the variable to set.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.field(name).ok_or_else(|| {
            CredentialError::Missing {
                scheme: self.scheme,
                variable: CredentialSpec::for_scheme(self.scheme).variable(name),
            }
            .into()
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scheme", &self.scheme)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("source", &self.source)
            .finish()
    }
}

/// Resolves credentials from an [`EnvSource`] on every call.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver<E = ProcessEnv> {
    env: E,
}

impl CredentialResolver<ProcessEnv> {
    /// Resolver over the process environment.
    pub fn from_env() -> Self {
        Self { env: ProcessEnv }
    }
}

impl<E: EnvSource> CredentialResolver<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Resolve credentials for a scheme.
    ///
    /// # Errors
    /// - `Missing` if a required field is absent
    /// - `Unreadable` if the credentials file cannot be read or parsed
    /// - `Expired` if the credentials file carries a past `expires_at`
    pub fn resolve(&self, scheme: Scheme) -> std::result::Result<Credential, CredentialError> {
        let spec = CredentialSpec::for_scheme(scheme);
        let mut fields = BTreeMap::new();
        let mut sources = Vec::new();

        let path_variable = spec.path_variable();
        if let Some(path) = self.env.var(&path_variable) {
            fields = read_credentials_file(scheme, &path_variable, &path)?;
            sources.push(path_variable);
        }

        for field in spec.fields() {
            let variable = spec.variable(field);
            if let Some(value) = self.env.var(&variable) {
                fields.insert(field.to_string(), SecretString::new(value));
                sources.push(variable);
            }
        }

        for field in spec.required {
            if !fields.contains_key(*field) {
                return Err(CredentialError::Missing {
                    scheme,
                    variable: spec.variable(field),
                });
            }
        }

        if !spec.one_of.is_empty() && !spec.one_of.iter().any(|f| fields.contains_key(*f)) {
            let variables: Vec<String> = spec.one_of.iter().map(|f| spec.variable(f)).collect();
            return Err(CredentialError::Missing {
                scheme,
                variable: variables.join(" or "),
            });
        }

        tracing::debug!(
            scheme = %scheme,
            fields = fields.len(),
            "Resolved credentials"
        );

        Ok(Credential {
            scheme,
            fields,
            source: if sources.is_empty() {
                "none".to_string()
            } else {
                sources.join(",")
            },
        })
    }
}

/// Read a JSON credentials file into secret fields.
fn read_credentials_file(
    scheme: Scheme,
    variable: &str,
    path: &str,
) -> std::result::Result<BTreeMap<String, SecretString>, CredentialError> {
    let unreadable = |reason: String| CredentialError::Unreadable {
        source_name: format!("{}={}", variable, path),
        reason,
    };

    let mut contents = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let parsed: std::result::Result<BTreeMap<String, String>, _> = serde_json::from_str(&contents);
    contents.zeroize();
    let mut raw = parsed.map_err(|e| unreadable(e.to_string()))?;

    if let Some(expires_at) = raw.remove(EXPIRES_AT_FIELD) {
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| unreadable(format!("invalid {}: {}", EXPIRES_AT_FIELD, e)))?;
        if expires_at.with_timezone(&Utc) <= Utc::now() {
            return Err(CredentialError::Expired { scheme });
        }
    }

    Ok(raw
        .into_iter()
        .map(|(name, value)| (name, SecretString::new(value)))
        .collect())
}
