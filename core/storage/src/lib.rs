//! Storage adapters for unistore.
//!
//! This crate provides the [`StorageAdapter`] trait, one implementation per
//! provider (local filesystem, S3, R2, GCS, SFTP, FTP), the credential
//! resolver and the tables that map native failures into the common error
//! taxonomy.
//!
//! # Design Principles
//! - Provider isolation: nothing outside an adapter knows its wire protocol
//! - Async operations: all I/O operations are async
//! - Streaming support: objects are read and written in chunks
//! - Unified error semantics: every native failure is classified through a table

pub mod adapter;
pub mod credentials;
pub mod gcs;
pub mod http;
pub mod local;
pub mod memory;
pub mod normalize;
pub mod registry;
pub mod s3;
pub mod session;
pub mod sign;

#[cfg(test)]
mod testing;

pub use adapter::{
    collect_bytes, stream_from_chunks, ByteStream, Capabilities, Capability, ObjectWriter,
    Rechunker, StorageAdapter, DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE,
};
pub use credentials::{Credential, CredentialResolver, CredentialSpec, EnvSource, ProcessEnv};
pub use gcs::{GcsAdapter, GcsConfig};
pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use normalize::{normalize, ErrorClass, NativeError};
pub use registry::{create_default_registry, AdapterConfig, AdapterRegistry, RegistryError};
pub use s3::{S3Adapter, S3Config};
pub use session::{
    MemoryFileServer, ProtocolError, RemoteEntry, RemoteSession, SessionAdapter, SessionConnector,
    DEFAULT_MAX_SESSIONS,
};
