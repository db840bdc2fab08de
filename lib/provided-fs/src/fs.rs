use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::config::{MountConfig, ProvidedFileSystemInfo};
use crate::handle::{FileHandle, FileHandleTable, OpenFileMode};
use crate::id::{FileHandleId, IdAllocator, RequestId};
use crate::meta::{Cursor, DirectoryPage, EntryMetadata, ProviderRequest, Response};
use crate::request::{AbortHandle, RequestKind, RequestManager, RequestObserver, RequestOutcome};
use crate::responder::{ChannelResponder, MessageRequest, MessageResponse, ReplyDriver, Responder};
use crate::{FsError, Result};

#[derive(Debug)]
struct FsInner {
    info: ProvidedFileSystemInfo,
    request_timeout: Option<Duration>,
    requests: RequestManager,
    handles: Mutex<FileHandleTable>,
    responder: Arc<dyn Responder>,
    mounted: AtomicBool,
}

impl FsInner {
    fn handles(&self) -> MutexGuard<'_, FileHandleTable> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_handle(
        &self,
        path: &Path,
        mode: OpenFileMode,
        open_request_id: RequestId,
    ) -> Result<FileHandleId> {
        let mut handles = self.handles();
        // Checked under the lock so a concurrent shutdown cannot miss the
        // new handle.
        if !self.mounted.load(Ordering::SeqCst) {
            warn!(
                %open_request_id,
                path = %path.display(),
                "file opened after shutdown, the provider keeps it open"
            );
            return Err(FsError::Shutdown);
        }
        Ok(handles.register(path, mode, open_request_id))
    }

    fn shutdown(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        let aborted = self.requests.shutdown();
        let closed = self.handles().clear().len();
        info!(
            file_system_id = %self.info.file_system_id,
            aborted,
            closed,
            "provided file system shut down"
        );
    }
}

impl Drop for FsInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tells the provider about requests nobody waits for anymore.
#[derive(Debug)]
struct CancelForwarder {
    responder: Arc<dyn Responder>,
}

impl RequestObserver for CancelForwarder {
    fn on_request_finished(
        &self,
        request_id: RequestId,
        _kind: RequestKind,
        outcome: RequestOutcome,
    ) {
        if !matches!(outcome, RequestOutcome::Aborted | RequestOutcome::TimedOut) {
            return;
        }
        if let Err(err) = self.responder.cancel(request_id) {
            debug!(%request_id, %err, "provider could not be told about the cancellation");
        }
    }
}

/// The caller's completion callback, shared by the success and the error
/// path of one request. Only the first result reaches the caller.
struct Completion<F>(Arc<Mutex<Option<F>>>);

impl<F> Clone for Completion<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<F> Completion<F> {
    fn new(callback: F) -> Self {
        Self(Arc::new(Mutex::new(Some(callback))))
    }

    fn finish<T>(&self, result: Result<T>)
    where
        F: FnOnce(Result<T>),
    {
        let callback = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

/// Splits `callback` into the pair of callbacks the request manager wants.
/// `map` turns the provider's reply into the caller's result.
fn completion<T, F, M>(
    callback: F,
    map: M,
) -> (
    impl FnOnce(RequestId, Response) + Send + 'static,
    impl FnOnce(RequestId, FsError) + Send + 'static,
)
where
    T: 'static,
    F: FnOnce(Result<T>) + Send + 'static,
    M: FnOnce(RequestId, Response) -> Result<T> + Send + 'static,
{
    let done = Completion::new(callback);
    let on_error = {
        let done = done.clone();
        move |_: RequestId, err: FsError| done.finish::<T>(Err(err))
    };
    let on_success =
        move |request_id: RequestId, response: Response| done.finish(map(request_id, response));
    (on_success, on_error)
}

fn expect_none(response: Response) -> Result<()> {
    match response {
        Response::None => Ok(()),
        _ => Err(FsError::InvalidData),
    }
}

fn append_entries(page: &mut DirectoryPage, response: Response) -> Result<()> {
    match response {
        Response::Entries(chunk) => {
            page.entries.extend(chunk.entries);
            page.cursor = chunk.cursor;
            Ok(())
        }
        _ => Err(FsError::InvalidData),
    }
}

fn append_data(buf: &mut BytesMut, response: Response) -> Result<()> {
    match response {
        Response::Data { data } => {
            buf.extend_from_slice(&data);
            Ok(())
        }
        _ => Err(FsError::InvalidData),
    }
}

/// Collects the chunks of a streamed reply. A chunk that does not fit spoils
/// the whole reply.
struct Chunks<T> {
    state: Arc<Mutex<Result<T>>>,
    append: fn(&mut T, Response) -> Result<()>,
}

impl<T> Clone for Chunks<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            append: self.append,
        }
    }
}

impl<T: Default> Chunks<T> {
    fn new(append: fn(&mut T, Response) -> Result<()>) -> Self {
        Self {
            state: Arc::new(Mutex::new(Ok(T::default()))),
            append,
        }
    }

    fn push(&self, chunk: Response) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match state.as_mut() {
            Ok(value) => (self.append)(value, chunk),
            Err(_) => return,
        };
        if let Err(err) = result {
            *state = Err(err);
        }
    }

    fn finish(&self, last: Response) -> Result<T> {
        let collected = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            Ok(T::default()),
        );
        let mut value = collected?;
        (self.append)(&mut value, last)?;
        Ok(value)
    }
}

/// A file system whose contents are served by an external provider.
///
/// Every operation is turned into a request to the provider and returns an
/// [`AbortHandle`] right away. The callback passed to the operation is
/// invoked exactly once, when the provider replies, the request is aborted,
/// its deadline passes or the file system shuts down. When an operation
/// returns an error instead, no request was created and the callback is
/// never invoked.
///
/// Operations on the same path are not ordered against each other; the
/// provider decides how overlapping requests interleave.
///
/// This type can be cloned, it's a light copy of the shared state. The file
/// system shuts down once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ProvidedFileSystem {
    inner: Arc<FsInner>,
}

impl ProvidedFileSystem {
    pub fn new(config: MountConfig, responder: Arc<dyn Responder>) -> Self {
        let ids = IdAllocator::new();
        let requests = RequestManager::with_allocator(ids.clone());
        requests.add_observer(Arc::new(CancelForwarder {
            responder: responder.clone(),
        }));

        info!(
            provider_id = %config.info.provider_id,
            file_system_id = %config.info.file_system_id,
            writable = config.info.writable,
            "provided file system mounted"
        );
        Self {
            inner: Arc::new(FsInner {
                request_timeout: config.request_timeout(),
                info: config.info,
                requests,
                handles: Mutex::new(FileHandleTable::new(ids)),
                responder,
                mounted: AtomicBool::new(true),
            }),
        }
    }

    /// Mounts a file system that talks to its provider over channels.
    ///
    /// The returned [`ReplyDriver`] must be polled (usually spawned) for
    /// replies to reach their requests. When the provider drops its end of
    /// `rx`, the file system shuts down.
    pub fn new_from_mpsc(
        config: MountConfig,
        tx: mpsc::UnboundedSender<MessageRequest>,
        rx: mpsc::Receiver<MessageResponse>,
    ) -> (Self, ReplyDriver) {
        let fs = Self::new(config, Arc::new(ChannelResponder::new(tx)));
        let weak = Arc::downgrade(&fs.inner);
        let driver = ReplyDriver::new(fs.inner.requests.downgrade(), rx, move || {
            if let Some(inner) = weak.upgrade() {
                warn!(
                    file_system_id = %inner.info.file_system_id,
                    "provider went away"
                );
                inner.shutdown();
            }
        });
        (fs, driver)
    }

    pub fn info(&self) -> &ProvidedFileSystemInfo {
        &self.inner.info
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.inner.request_timeout
    }

    /// The manager tracking this mount's requests. Transports route the
    /// provider's replies into it.
    pub fn request_manager(&self) -> &RequestManager {
        &self.inner.requests
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.len()
    }

    /// Currently open files, in handle order.
    pub fn open_handles(&self) -> Vec<FileHandle> {
        let mut handles: Vec<_> = self.inner.handles().iter().cloned().collect();
        handles.sort_by_key(|handle| handle.handle_id);
        handles
    }

    pub fn handle(&self, handle_id: FileHandleId) -> Result<FileHandle> {
        self.inner.handles().lookup(handle_id).cloned()
    }

    /// Fails every outstanding request with [`FsError::Shutdown`] and forgets
    /// every open file, without asking the provider. Later operations fail
    /// right away.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    fn weak(&self) -> Weak<FsInner> {
        Arc::downgrade(&self.inner)
    }

    /// Checks that a request of `kind` may be sent right now.
    fn admit(&self, kind: RequestKind) -> Result<()> {
        if !self.is_mounted() {
            return Err(FsError::Shutdown);
        }
        if kind.is_mutation() {
            self.ensure_writable()?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.inner.info.writable {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn dispatch<S, E>(
        &self,
        request: ProviderRequest,
        on_success: S,
        on_error: E,
    ) -> Result<AbortHandle>
    where
        S: FnOnce(RequestId, Response) + Send + 'static,
        E: FnOnce(RequestId, FsError) + Send + 'static,
    {
        self.admit(request.kind())?;
        let (request_id, abort) = self.inner.requests.create_request(
            request.kind(),
            on_success,
            on_error,
            self.inner.request_timeout,
        );
        self.deliver(request_id, request);
        Ok(abort)
    }

    fn dispatch_streaming<T>(
        &self,
        request: ProviderRequest,
        chunks: Chunks<T>,
        callback: impl FnOnce(Result<T>) + Send + 'static,
    ) -> Result<AbortHandle>
    where
        T: Default + Send + 'static,
    {
        self.admit(request.kind())?;
        let progress = chunks.clone();
        let (on_success, on_error) =
            completion(callback, move |_, response| chunks.finish(response));
        let (request_id, abort) = self.inner.requests.create_streaming_request(
            request.kind(),
            move |_, chunk| progress.push(chunk),
            on_success,
            on_error,
            self.inner.request_timeout,
        );
        self.deliver(request_id, request);
        Ok(abort)
    }

    fn deliver(&self, request_id: RequestId, request: ProviderRequest) {
        match self.inner.responder.deliver(request_id, request) {
            Ok(()) => {
                self.inner.requests.mark_delivered(request_id);
            }
            Err(err) => {
                warn!(%request_id, %err, "could not hand the request to the provider");
                self.inner.requests.deliver_error(request_id, err);
            }
        }
    }

    /// Dispatches an operation whose successful reply carries nothing.
    fn dispatch_unit(
        &self,
        request: ProviderRequest,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        let (on_success, on_error) = completion(callback, |_, response| expect_none(response));
        self.dispatch(request, on_success, on_error)
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn get_metadata(
        &self,
        path: impl AsRef<Path>,
        callback: impl FnOnce(Result<EntryMetadata>) + Send + 'static,
    ) -> Result<AbortHandle> {
        let (on_success, on_error) = completion(callback, |_, response| match response {
            Response::Metadata(metadata) => Ok(metadata),
            _ => Err(FsError::InvalidData),
        });
        self.dispatch(
            ProviderRequest::GetMetadata {
                path: path.as_ref().to_path_buf(),
            },
            on_success,
            on_error,
        )
    }

    /// Lists a directory. The provider may answer in several chunks; the
    /// callback receives all of them as one page. A `cursor` from an earlier
    /// page resumes the listing, if the mount supports that.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), cursor = ?cursor))]
    pub fn read_directory(
        &self,
        path: impl AsRef<Path>,
        cursor: Option<Cursor>,
        callback: impl FnOnce(Result<DirectoryPage>) + Send + 'static,
    ) -> Result<AbortHandle> {
        if cursor.is_some() && !self.inner.info.supports_continuation {
            return Err(FsError::InvalidInput);
        }
        self.dispatch_streaming(
            ProviderRequest::ReadDirectory {
                path: path.as_ref().to_path_buf(),
                cursor,
            },
            Chunks::new(append_entries),
            callback,
        )
    }

    /// Opens a file. On success the callback receives the handle to use for
    /// reads, writes and the final close.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), ?mode))]
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        mode: OpenFileMode,
        callback: impl FnOnce(Result<FileHandleId>) + Send + 'static,
    ) -> Result<AbortHandle> {
        if mode.can_write() {
            self.ensure_writable()?;
        }
        let path = path.as_ref().to_path_buf();
        let weak = self.weak();
        let (on_success, on_error) = completion(callback, {
            let path = path.clone();
            move |request_id, response| {
                expect_none(response)?;
                let Some(inner) = weak.upgrade() else {
                    warn!(
                        open_request_id = %request_id,
                        path = %path.display(),
                        "file opened after the file system was dropped, the provider keeps it open"
                    );
                    return Err(FsError::Shutdown);
                };
                inner.register_handle(&path, mode, request_id)
            }
        });
        self.dispatch(ProviderRequest::OpenFile { path, mode }, on_success, on_error)
    }

    /// Closes a file. The handle cannot be used while the close is pending,
    /// and becomes usable again if the close fails.
    #[instrument(level = "debug", skip_all, fields(%handle_id))]
    pub fn close_file(
        &self,
        handle_id: FileHandleId,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.admit(RequestKind::CloseFile)?;
        let handle = self.inner.handles().begin_close(handle_id)?;

        let on_closed = {
            let weak = self.weak();
            move |result: Result<()>| {
                if let Some(inner) = weak.upgrade() {
                    let mut handles = inner.handles();
                    match result {
                        Ok(()) => {
                            handles.unregister(handle_id).ok();
                        }
                        Err(_) => {
                            handles.cancel_close(handle_id);
                        }
                    }
                }
                callback(result)
            }
        };
        let (on_success, on_error) = completion(on_closed, |_, response| expect_none(response));
        let dispatched = self.dispatch(
            ProviderRequest::CloseFile {
                open_request_id: handle.open_request_id,
            },
            on_success,
            on_error,
        );
        if dispatched.is_err() {
            self.inner.handles().cancel_close(handle_id);
        }
        dispatched
    }

    /// Reads up to `length` bytes at `offset`. Chunked replies are joined.
    #[instrument(level = "debug", skip_all, fields(%handle_id, offset, length))]
    pub fn read_file(
        &self,
        handle_id: FileHandleId,
        offset: u64,
        length: u64,
        callback: impl FnOnce(Result<Bytes>) + Send + 'static,
    ) -> Result<AbortHandle> {
        let open_request_id = {
            let handles = self.inner.handles();
            let handle = handles.lookup_open(handle_id)?;
            if !handle.mode.can_read() {
                return Err(FsError::PermissionDenied);
            }
            handle.open_request_id
        };
        self.dispatch_streaming(
            ProviderRequest::ReadFile {
                open_request_id,
                offset,
                length,
            },
            Chunks::new(append_data),
            move |result: Result<BytesMut>| callback(result.map(BytesMut::freeze)),
        )
    }

    #[instrument(level = "debug", skip_all, fields(%handle_id, offset, len = data.as_ref().len()))]
    pub fn write_file(
        &self,
        handle_id: FileHandleId,
        offset: u64,
        data: impl Into<Bytes> + AsRef<[u8]>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        let open_request_id = {
            let handles = self.inner.handles();
            let handle = handles.lookup_open(handle_id)?;
            if !handle.mode.can_write() {
                return Err(FsError::PermissionDenied);
            }
            handle.open_request_id
        };
        self.dispatch_unit(
            ProviderRequest::WriteFile {
                open_request_id,
                offset,
                data: data.into(),
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), exclusive, recursive))]
    pub fn create_directory(
        &self,
        path: impl AsRef<Path>,
        exclusive: bool,
        recursive: bool,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::CreateDirectory {
                path: path.as_ref().to_path_buf(),
                exclusive,
                recursive,
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn create_file(
        &self,
        path: impl AsRef<Path>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::CreateFile {
                path: path.as_ref().to_path_buf(),
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), recursive))]
    pub fn delete_entry(
        &self,
        path: impl AsRef<Path>,
        recursive: bool,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::DeleteEntry {
                path: path.as_ref().to_path_buf(),
                recursive,
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.as_ref().display(), target = %target.as_ref().display()))]
    pub fn copy_entry(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::CopyEntry {
                source: source.as_ref().to_path_buf(),
                target: target.as_ref().to_path_buf(),
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(source = %source.as_ref().display(), target = %target.as_ref().display()))]
    pub fn move_entry(
        &self,
        source: impl AsRef<Path>,
        target: impl AsRef<Path>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::MoveEntry {
                source: source.as_ref().to_path_buf(),
                target: target.as_ref().to_path_buf(),
            },
            callback,
        )
    }

    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display(), length))]
    pub fn truncate(
        &self,
        path: impl AsRef<Path>,
        length: u64,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        self.dispatch_unit(
            ProviderRequest::Truncate {
                path: path.as_ref().to_path_buf(),
                length,
            },
            callback,
        )
    }

    /// Asks the provider to unmount. Once it agrees the file system shuts
    /// down, and only then is the callback invoked.
    #[instrument(level = "debug", skip_all)]
    pub fn unmount(
        &self,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<AbortHandle> {
        let weak = self.weak();
        let (on_success, on_error) = completion(callback, move |_, response| {
            expect_none(response)?;
            if let Some(inner) = weak.upgrade() {
                inner.shutdown();
            }
            Ok(())
        });
        self.dispatch(ProviderRequest::Unmount, on_success, on_error)
    }
}
