//! Request engine for file systems whose contents are served by an external
//! provider.
//!
//! Every operation on a [`ProvidedFileSystem`] becomes an asynchronous request
//! tracked by a [`RequestManager`] until the provider replies, the caller
//! aborts it, its deadline passes or the mount is torn down. Whatever happens
//! first completes the request, exactly once.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
mod fs;
mod handle;
mod id;
pub mod meta;
pub mod request;
mod responder;

pub use config::{MountConfig, PrettyDuration, ProvidedFileSystemInfo};
pub use fs::ProvidedFileSystem;
pub use handle::{FileHandle, FileHandleTable, OpenFileMode};
pub use id::{FileHandleId, IdAllocator, RequestId};
pub use meta::{Cursor, DirEntry, DirectoryPage, EntryMetadata, ProviderRequest, Response};
pub use request::{
    AbortHandle, RequestKind, RequestManager, RequestObserver, RequestOutcome,
    WeakRequestManager,
};
pub use responder::{MessageRequest, MessageResponse, ReplyDriver, Responder};

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Error codes a provider may report for a failed operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    Failed,
    InUse,
    Exists,
    NotFound,
    AccessDenied,
    TooManyOpened,
    NoMemory,
    NoSpace,
    NotADirectory,
    InvalidOperation,
    Security,
    Abort,
    NotAFile,
    NotEmpty,
    InvalidUrl,
    Io,
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderErrorCode::Failed => "failed",
            ProviderErrorCode::InUse => "in use",
            ProviderErrorCode::Exists => "exists",
            ProviderErrorCode::NotFound => "not found",
            ProviderErrorCode::AccessDenied => "access denied",
            ProviderErrorCode::TooManyOpened => "too many opened",
            ProviderErrorCode::NoMemory => "no memory",
            ProviderErrorCode::NoSpace => "no space",
            ProviderErrorCode::NotADirectory => "not a directory",
            ProviderErrorCode::InvalidOperation => "invalid operation",
            ProviderErrorCode::Security => "security",
            ProviderErrorCode::Abort => "abort",
            ProviderErrorCode::NotAFile => "not a file",
            ProviderErrorCode::NotEmpty => "not empty",
            ProviderErrorCode::InvalidUrl => "invalid url",
            ProviderErrorCode::Io => "io",
        };
        f.write_str(name)
    }
}

/// An error reported by the provider, passed through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error type for external users
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The file handle or request id is not known (or no longer known)
    #[error("entity not found")]
    NotFound,
    /// The provider failed the operation
    #[error("provider error ({0})")]
    Provider(ProviderError),
    /// The operation was cancelled by its caller
    #[error("operation aborted")]
    Aborted,
    /// The provider did not answer before the deadline
    #[error("time out")]
    TimedOut,
    /// The file system was unmounted while the operation was outstanding
    #[error("file system shut down")]
    Shutdown,
    /// Caller was not allowed to perform this operation
    #[error("permission denied")]
    PermissionDenied,
    /// The provided data is invalid
    #[error("invalid input")]
    InvalidInput,
    /// The provider answered with a reply that does not fit the request
    #[error("invalid internal data")]
    InvalidData,
    /// The provider could not be reached
    #[error("connection aborted")]
    ConnectionAborted,
}

impl From<ProviderError> for FsError {
    fn from(err: ProviderError) -> Self {
        FsError::Provider(err)
    }
}

#[cfg(test)]
pub(crate) mod test_util;
