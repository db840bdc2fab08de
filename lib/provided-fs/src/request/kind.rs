use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The operation a request performs. The request manager only uses it for
/// bookkeeping and logs; interpreting replies is up to the caller.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[display("unmount")]
    Unmount,
    #[display("get_metadata")]
    GetMetadata,
    #[display("read_directory")]
    ReadDirectory,
    #[display("open_file")]
    OpenFile,
    #[display("close_file")]
    CloseFile,
    #[display("read_file")]
    ReadFile,
    #[display("write_file")]
    WriteFile,
    #[display("create_directory")]
    CreateDirectory,
    #[display("create_file")]
    CreateFile,
    #[display("delete_entry")]
    DeleteEntry,
    #[display("copy_entry")]
    CopyEntry,
    #[display("move_entry")]
    MoveEntry,
    #[display("truncate")]
    Truncate,
}

impl RequestKind {
    /// Whether the operation changes the contents of the file system.
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            RequestKind::WriteFile
                | RequestKind::CreateDirectory
                | RequestKind::CreateFile
                | RequestKind::DeleteEntry
                | RequestKind::CopyEntry
                | RequestKind::MoveEntry
                | RequestKind::Truncate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_display_as_snake_case() {
        assert_eq!(RequestKind::GetMetadata.to_string(), "get_metadata");
        assert_eq!(RequestKind::Truncate.to_string(), "truncate");
        assert_eq!(
            serde_json::to_string(&RequestKind::ReadDirectory).unwrap(),
            "\"read_directory\""
        );
    }

    #[test]
    fn mutations() {
        assert!(RequestKind::WriteFile.is_mutation());
        assert!(RequestKind::MoveEntry.is_mutation());
        assert!(!RequestKind::ReadFile.is_mutation());
        assert!(!RequestKind::OpenFile.is_mutation());
    }
}
