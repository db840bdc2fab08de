//! Messages exchanged with the provider.

use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::handle::OpenFileMode;
use crate::id::RequestId;
use crate::request::RequestKind;

/// Opaque token the provider hands back so a directory listing can resume
/// where the previous page stopped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modification_time: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

/// One page of a directory listing. A `cursor` means more entries are
/// available through another `read_directory` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPage {
    pub entries: Vec<DirEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

/// An operation the provider is asked to perform.
///
/// Handle based operations name the file by the id of the request that
/// opened it, since that is the only correlation key the provider knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderRequest {
    Unmount,
    GetMetadata {
        path: PathBuf,
    },
    ReadDirectory {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
    },
    OpenFile {
        path: PathBuf,
        mode: OpenFileMode,
    },
    CloseFile {
        open_request_id: RequestId,
    },
    ReadFile {
        open_request_id: RequestId,
        offset: u64,
        length: u64,
    },
    WriteFile {
        open_request_id: RequestId,
        offset: u64,
        data: Bytes,
    },
    CreateDirectory {
        path: PathBuf,
        exclusive: bool,
        recursive: bool,
    },
    CreateFile {
        path: PathBuf,
    },
    DeleteEntry {
        path: PathBuf,
        recursive: bool,
    },
    CopyEntry {
        source: PathBuf,
        target: PathBuf,
    },
    MoveEntry {
        source: PathBuf,
        target: PathBuf,
    },
    Truncate {
        path: PathBuf,
        length: u64,
    },
}

impl ProviderRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            ProviderRequest::Unmount => RequestKind::Unmount,
            ProviderRequest::GetMetadata { .. } => RequestKind::GetMetadata,
            ProviderRequest::ReadDirectory { .. } => RequestKind::ReadDirectory,
            ProviderRequest::OpenFile { .. } => RequestKind::OpenFile,
            ProviderRequest::CloseFile { .. } => RequestKind::CloseFile,
            ProviderRequest::ReadFile { .. } => RequestKind::ReadFile,
            ProviderRequest::WriteFile { .. } => RequestKind::WriteFile,
            ProviderRequest::CreateDirectory { .. } => RequestKind::CreateDirectory,
            ProviderRequest::CreateFile { .. } => RequestKind::CreateFile,
            ProviderRequest::DeleteEntry { .. } => RequestKind::DeleteEntry,
            ProviderRequest::CopyEntry { .. } => RequestKind::CopyEntry,
            ProviderRequest::MoveEntry { .. } => RequestKind::MoveEntry,
            ProviderRequest::Truncate { .. } => RequestKind::Truncate,
        }
    }
}

/// A successful reply (or one chunk of a streamed reply) from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The operation succeeded and has nothing to report.
    None,
    Metadata(EntryMetadata),
    Entries(DirectoryPage),
    Data { data: Bytes },
}
