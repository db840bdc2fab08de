use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::table::{Callbacks, Request, RequestTable};
use super::{RequestKind, RequestObserver, RequestOutcome, RequestState};
use crate::id::{IdAllocator, RequestId};
use crate::meta::Response;
use crate::{FsError, Result};

struct ManagerInner {
    table: Mutex<RequestTable>,
    observers: RwLock<Vec<Arc<dyn RequestObserver>>>,
}

impl fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerInner")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Owns every outstanding request of a mount and completes each one exactly
/// once.
///
/// A request is completed by whichever of these happens first: a reply from
/// the provider ([`RequestManager::deliver_success`],
/// [`RequestManager::deliver_error`]), an [`RequestManager::abort`], its
/// deadline, or [`RequestManager::shutdown`]. Completing removes the entry
/// from the table before the stored callback runs, so anything arriving later
/// for the same id finds nothing and is dropped.
///
/// This type can be cloned, it's a light copy of the shared state.
#[derive(Debug, Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

/// A non-owning reference to a [`RequestManager`].
#[derive(Debug, Clone)]
pub struct WeakRequestManager {
    inner: Weak<ManagerInner>,
}

impl WeakRequestManager {
    pub fn upgrade(&self) -> Option<RequestManager> {
        self.inner.upgrade().map(|inner| RequestManager { inner })
    }
}

/// Lets the creator of a request cancel it.
///
/// Aborting after the request already finished does nothing and reports
/// [`FsError::NotFound`].
#[derive(Debug, Clone)]
pub struct AbortHandle {
    request_id: RequestId,
    serial: u64,
    manager: WeakRequestManager,
}

impl AbortHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn abort(&self) -> Result<()> {
        let manager = self.manager.upgrade().ok_or(FsError::NotFound)?;
        manager.abort_exact(self.request_id, self.serial)
    }

    /// Whether the request this handle was issued for is still outstanding.
    pub fn is_pending(&self) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager
                .lock()
                .get_mut_exact(self.request_id, self.serial)
                .is_some(),
            None => false,
        }
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManager {
    pub fn new() -> Self {
        Self::with_allocator(IdAllocator::new())
    }

    /// Creates a manager that draws request ids from `ids`, which may be
    /// shared with other tables of the same mount.
    pub fn with_allocator(ids: IdAllocator) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                table: Mutex::new(RequestTable::new(ids)),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakRequestManager {
        WeakRequestManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn RequestObserver>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, RequestTable> {
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> Vec<Arc<dyn RequestObserver>> {
        self.inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a new request and returns its id, which the caller uses as
    /// the correlation key when handing the request to the provider.
    ///
    /// With a `timeout`, the request fails with [`FsError::TimedOut`] unless
    /// it is completed within that time. Deadlines need a Tokio runtime; when
    /// called outside of one the request simply has none.
    pub fn create_request<S, E>(
        &self,
        kind: RequestKind,
        on_success: S,
        on_error: E,
        timeout: Option<Duration>,
    ) -> (RequestId, AbortHandle)
    where
        S: FnOnce(RequestId, Response) + Send + 'static,
        E: FnOnce(RequestId, FsError) + Send + 'static,
    {
        self.create(
            kind,
            Callbacks {
                on_success: Box::new(on_success),
                on_error: Box::new(on_error),
                on_progress: None,
            },
            timeout,
        )
    }

    /// Like [`RequestManager::create_request`], for requests whose reply may
    /// arrive in several chunks through [`RequestManager::deliver_progress`].
    pub fn create_streaming_request<P, S, E>(
        &self,
        kind: RequestKind,
        on_progress: P,
        on_success: S,
        on_error: E,
        timeout: Option<Duration>,
    ) -> (RequestId, AbortHandle)
    where
        P: FnMut(RequestId, Response) + Send + 'static,
        S: FnOnce(RequestId, Response) + Send + 'static,
        E: FnOnce(RequestId, FsError) + Send + 'static,
    {
        self.create(
            kind,
            Callbacks {
                on_success: Box::new(on_success),
                on_error: Box::new(on_error),
                on_progress: Some(Box::new(on_progress)),
            },
            timeout,
        )
    }

    fn create(
        &self,
        kind: RequestKind,
        callbacks: Callbacks,
        timeout: Option<Duration>,
    ) -> (RequestId, AbortHandle) {
        let (request_id, serial, deadline) = {
            let mut table = self.lock();
            let (request_id, serial) = table.insert(kind, callbacks, timeout);
            let deadline = table.get_mut(request_id).and_then(|r| r.deadline);
            (request_id, serial, deadline)
        };
        debug!(%request_id, %kind, ?timeout, "request created");
        if timeout.is_some() && deadline.is_none() {
            warn!(%request_id, ?timeout, "timeout is too large to schedule, request has no deadline");
        }

        if let Some(deadline) = deadline {
            self.arm_timer(request_id, serial, deadline);
        }
        for observer in self.observers() {
            observer.on_request_created(request_id, kind);
        }

        let abort = AbortHandle {
            request_id,
            serial,
            manager: self.downgrade(),
        };
        (request_id, abort)
    }

    fn arm_timer(&self, request_id: RequestId, serial: u64, deadline: Instant) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(%request_id, "no tokio runtime available, request has no deadline");
                return;
            }
        };

        let manager = self.downgrade();
        let timer = runtime
            .spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(manager) = manager.upgrade() {
                    manager.expire(request_id, serial);
                }
            })
            .abort_handle();

        let mut table = self.lock();
        match table.get_mut_exact(request_id, serial) {
            Some(request) => {
                if let Some(previous) = request.timer.replace(timer) {
                    previous.abort();
                }
            }
            // Finished while the timer was being spawned.
            None => timer.abort(),
        }
    }

    /// Records that the provider accepted the request.
    pub fn mark_delivered(&self, request_id: RequestId) -> bool {
        {
            let mut table = self.lock();
            match table.get_mut(request_id) {
                Some(request) => request.state = RequestState::Delivered,
                None => return false,
            }
        }
        for observer in self.observers() {
            observer.on_request_delivered(request_id);
        }
        true
    }

    /// Completes the request with the provider's reply. Returns false, and
    /// does nothing else, if the request is no longer outstanding.
    pub fn deliver_success(&self, request_id: RequestId, response: Response) -> bool {
        let Some(request) = self.lock().remove(request_id) else {
            warn!(%request_id, "dropping reply for a request that is not outstanding");
            return false;
        };
        self.finish(request_id, request, Ok(response), RequestOutcome::Completed);
        true
    }

    /// Fails the request with `error`. Returns false, and does nothing else,
    /// if the request is no longer outstanding.
    pub fn deliver_error(&self, request_id: RequestId, error: impl Into<FsError>) -> bool {
        let error = error.into();
        let Some(request) = self.lock().remove(request_id) else {
            warn!(%request_id, %error, "dropping error for a request that is not outstanding");
            return false;
        };
        self.finish(request_id, request, Err(error), RequestOutcome::Rejected);
        true
    }

    /// Hands one chunk of a streamed reply to the request's progress
    /// callback. The request stays outstanding and its deadline starts over.
    pub fn deliver_progress(&self, request_id: RequestId, response: Response) -> bool {
        let (on_progress, serial, deadline) = {
            let mut table = self.lock();
            let Some(request) = table.get_mut(request_id) else {
                warn!(%request_id, "dropping progress for a request that is not outstanding");
                return false;
            };
            let deadline = request
                .timeout
                .and_then(|timeout| Instant::now().checked_add(timeout));
            if deadline.is_some() {
                request.deadline = deadline;
                request.stop_timer();
            }
            (request.callbacks.on_progress.take(), request.serial, deadline)
        };

        if let Some(deadline) = deadline {
            self.arm_timer(request_id, serial, deadline);
        }
        for observer in self.observers() {
            observer.on_request_progress(request_id);
        }

        match on_progress {
            Some(mut on_progress) => {
                trace!(%request_id, "progress");
                on_progress(request_id, response);
                if let Some(request) = self.lock().get_mut_exact(request_id, serial) {
                    request.callbacks.on_progress = Some(on_progress);
                }
            }
            None => {
                warn!(%request_id, "request does not accept progress, chunk dropped");
            }
        }
        true
    }

    /// Cancels the request, failing it with [`FsError::Aborted`]. The
    /// request is finished locally right away; telling the provider is left
    /// to observers.
    pub fn abort(&self, request_id: RequestId) -> Result<()> {
        let request = self.lock().remove(request_id).ok_or(FsError::NotFound)?;
        self.finish(
            request_id,
            request,
            Err(FsError::Aborted),
            RequestOutcome::Aborted,
        );
        Ok(())
    }

    fn abort_exact(&self, request_id: RequestId, serial: u64) -> Result<()> {
        let request = self
            .lock()
            .remove_exact(request_id, serial)
            .ok_or(FsError::NotFound)?;
        self.finish(
            request_id,
            request,
            Err(FsError::Aborted),
            RequestOutcome::Aborted,
        );
        Ok(())
    }

    /// Fails the request with [`FsError::TimedOut`]. This is what the
    /// deadline timer does once it fires.
    pub fn on_timeout(&self, request_id: RequestId) -> bool {
        let Some(request) = self.lock().remove(request_id) else {
            return false;
        };
        self.time_out(request_id, request);
        true
    }

    fn expire(&self, request_id: RequestId, serial: u64) {
        let Some(request) = self.lock().remove_exact(request_id, serial) else {
            return;
        };
        self.time_out(request_id, request);
    }

    fn time_out(&self, request_id: RequestId, request: Request) {
        warn!(
            %request_id,
            kind = %request.kind,
            elapsed = ?request.created_at.elapsed(),
            "request timed out"
        );
        self.finish(
            request_id,
            request,
            Err(FsError::TimedOut),
            RequestOutcome::TimedOut,
        );
    }

    /// Fails every outstanding request with [`FsError::Shutdown`] and returns
    /// how many there were.
    pub fn shutdown(&self) -> usize {
        let drained = self.lock().drain();
        let count = drained.len();
        if count > 0 {
            debug!(count, "shutting down outstanding requests");
        }
        for (request_id, request) in drained {
            self.finish(
                request_id,
                request,
                Err(FsError::Shutdown),
                RequestOutcome::Shutdown,
            );
        }
        count
    }

    fn finish(
        &self,
        request_id: RequestId,
        mut request: Request,
        result: Result<Response>,
        outcome: RequestOutcome,
    ) {
        request.stop_timer();
        let kind = request.kind;
        debug!(
            %request_id,
            %kind,
            %outcome,
            elapsed = ?request.created_at.elapsed(),
            "request finished"
        );

        let callbacks = request.callbacks;
        match result {
            Ok(response) => (callbacks.on_success)(request_id, response),
            Err(error) => (callbacks.on_error)(request_id, error),
        }
        for observer in self.observers() {
            observer.on_request_finished(request_id, kind, outcome);
        }
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.lock().contains(request_id)
    }

    pub fn state(&self, request_id: RequestId) -> Option<RequestState> {
        self.lock().state(request_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
