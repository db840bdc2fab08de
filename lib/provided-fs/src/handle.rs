use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::id::{FileHandleId, IdAllocator, RequestId};
use crate::{FsError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenFileMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenFileMode {
    pub const fn can_read(self) -> bool {
        matches!(self, OpenFileMode::Read | OpenFileMode::ReadWrite)
    }

    pub const fn can_write(self) -> bool {
        matches!(self, OpenFileMode::Write | OpenFileMode::ReadWrite)
    }
}

/// A file the provider has opened for us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub handle_id: FileHandleId,
    pub path: PathBuf,
    pub mode: OpenFileMode,
    /// The request that opened the file; the provider refers to the file by it.
    pub open_request_id: RequestId,
    pub opened_at: SystemTime,
    closing: bool,
    /// Whether this handle keeps `open_request_id` reserved.
    holds_open_request_id: bool,
}

impl FileHandle {
    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

/// Files currently open on one mount.
///
/// The id of the request that opened a file stays reserved in the shared
/// allocator while the file is open, so no later request can be mistaken for
/// it by the provider.
///
/// Reads and writes against the same handle are not serialized here; the
/// provider decides the order in which they become visible.
#[derive(Debug)]
pub struct FileHandleTable {
    ids: IdAllocator,
    handles: HashMap<FileHandleId, FileHandle>,
}

impl FileHandleTable {
    pub fn new(ids: IdAllocator) -> Self {
        Self {
            ids,
            handles: HashMap::new(),
        }
    }

    /// Records a successfully opened file.
    pub fn register(
        &mut self,
        path: impl AsRef<Path>,
        mode: OpenFileMode,
        open_request_id: RequestId,
    ) -> FileHandleId {
        let handle_id = FileHandleId(self.ids.next_id());
        let holds_open_request_id = self.ids.reserve(open_request_id.0);
        self.handles.insert(
            handle_id,
            FileHandle {
                handle_id,
                path: path.as_ref().to_path_buf(),
                mode,
                open_request_id,
                opened_at: SystemTime::now(),
                closing: false,
                holds_open_request_id,
            },
        );
        handle_id
    }

    pub fn lookup(&self, handle_id: FileHandleId) -> Result<&FileHandle> {
        self.handles.get(&handle_id).ok_or(FsError::NotFound)
    }

    /// Looks up a handle that is usable for I/O, i.e. present and not being
    /// closed.
    pub fn lookup_open(&self, handle_id: FileHandleId) -> Result<&FileHandle> {
        match self.handles.get(&handle_id) {
            Some(handle) if !handle.closing => Ok(handle),
            _ => Err(FsError::NotFound),
        }
    }

    /// Marks the handle as being closed so it can no longer be used. Fails if
    /// the handle is unknown or already being closed.
    pub fn begin_close(&mut self, handle_id: FileHandleId) -> Result<FileHandle> {
        match self.handles.get_mut(&handle_id) {
            Some(handle) if !handle.closing => {
                handle.closing = true;
                Ok(handle.clone())
            }
            _ => Err(FsError::NotFound),
        }
    }

    /// Reverts [`FileHandleTable::begin_close`] after a close that did not
    /// go through.
    pub fn cancel_close(&mut self, handle_id: FileHandleId) -> bool {
        match self.handles.get_mut(&handle_id) {
            Some(handle) => std::mem::replace(&mut handle.closing, false),
            None => false,
        }
    }

    pub fn unregister(&mut self, handle_id: FileHandleId) -> Result<FileHandle> {
        let handle = self.handles.remove(&handle_id).ok_or(FsError::NotFound)?;
        self.release_ids(&handle);
        Ok(handle)
    }

    fn release_ids(&self, handle: &FileHandle) {
        self.ids.release(handle.handle_id.0);
        if handle.holds_open_request_id {
            self.ids.release(handle.open_request_id.0);
        }
    }

    /// Forgets every handle, e.g. because the mount went away.
    pub fn clear(&mut self) -> Vec<FileHandle> {
        let mut handles: Vec<_> = self.handles.drain().map(|(_, handle)| handle).collect();
        handles.sort_by_key(|handle| handle.handle_id);
        for handle in handles.iter() {
            self.release_ids(handle);
        }
        handles
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FileHandleTable {
        FileHandleTable::new(IdAllocator::new())
    }

    #[test]
    fn register_then_lookup() {
        let mut handles = table();
        let id = handles.register("/x", OpenFileMode::Read, RequestId(9));

        let handle = handles.lookup(id).unwrap();
        assert_eq!(handle.path, Path::new("/x"));
        assert_eq!(handle.mode, OpenFileMode::Read);
        assert_eq!(handle.open_request_id, RequestId(9));
        assert!(!handle.is_closing());
    }

    #[test]
    fn unknown_handles_are_not_found() {
        let mut handles = table();
        assert_eq!(handles.lookup(FileHandleId(3)), Err(FsError::NotFound));
        assert_eq!(handles.unregister(FileHandleId(3)), Err(FsError::NotFound));
        assert_eq!(handles.begin_close(FileHandleId(3)), Err(FsError::NotFound));
        assert!(!handles.cancel_close(FileHandleId(3)));
    }

    #[test]
    fn closing_handles_cannot_be_used_or_closed_again() {
        let mut handles = table();
        let id = handles.register("/x", OpenFileMode::ReadWrite, RequestId(100));

        handles.begin_close(id).unwrap();
        assert_eq!(handles.lookup_open(id), Err(FsError::NotFound));
        assert_eq!(handles.begin_close(id), Err(FsError::NotFound));
        assert!(handles.lookup(id).unwrap().is_closing());

        assert!(handles.cancel_close(id));
        assert!(handles.lookup_open(id).is_ok());
    }

    #[test]
    fn open_request_id_stays_reserved_while_open() {
        let ids = IdAllocator::new();
        let mut handles = FileHandleTable::new(ids.clone());
        let id = handles.register("/x", OpenFileMode::Write, RequestId(100));
        assert!(ids.is_live(id.0));
        assert!(ids.is_live(100));

        handles.unregister(id).unwrap();
        assert!(!ids.is_live(id.0));
        assert!(!ids.is_live(100));
        assert!(handles.is_empty());
    }

    #[test]
    fn clear_returns_every_handle_in_id_order() {
        let mut handles = table();
        let a = handles.register("/a", OpenFileMode::Read, RequestId(100));
        let b = handles.register("/b", OpenFileMode::Read, RequestId(101));

        let cleared: Vec<_> = handles.clear().into_iter().map(|h| h.handle_id).collect();
        assert_eq!(cleared, vec![a, b]);
        assert_eq!(handles.len(), 0);
    }

    #[test]
    fn open_modes() {
        assert!(OpenFileMode::Read.can_read());
        assert!(!OpenFileMode::Read.can_write());
        assert!(OpenFileMode::Write.can_write());
        assert!(!OpenFileMode::Write.can_read());
        assert!(OpenFileMode::ReadWrite.can_read() && OpenFileMode::ReadWrite.can_write());
    }
}
