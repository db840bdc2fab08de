use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::{ErrorCallback, ProgressCallback, RequestKind, SuccessCallback};
use crate::id::{IdAllocator, RequestId};

/// Where an outstanding request is in its life cycle. Finished requests are
/// not in the table at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Registered, not yet accepted by the provider.
    Created,
    /// Handed to the provider, waiting for a reply.
    Delivered,
}

pub(crate) struct Callbacks {
    pub(crate) on_success: SuccessCallback,
    pub(crate) on_error: ErrorCallback,
    pub(crate) on_progress: Option<ProgressCallback>,
}

pub(crate) struct Request {
    pub(crate) kind: RequestKind,
    /// Distinguishes this entry from any later request that reuses its id.
    pub(crate) serial: u64,
    pub(crate) state: RequestState,
    pub(crate) created_at: Instant,
    pub(crate) timeout: Option<Duration>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) timer: Option<tokio::task::AbortHandle>,
    pub(crate) callbacks: Callbacks,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("serial", &self.serial)
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub(crate) fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Outstanding requests keyed by id. An id is in the table exactly as long
/// as its request is outstanding.
#[derive(Debug)]
pub(crate) struct RequestTable {
    ids: IdAllocator,
    next_serial: u64,
    entries: HashMap<RequestId, Request>,
}

impl RequestTable {
    pub(crate) fn new(ids: IdAllocator) -> Self {
        Self {
            ids,
            next_serial: 1,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(
        &mut self,
        kind: RequestKind,
        callbacks: Callbacks,
        timeout: Option<Duration>,
    ) -> (RequestId, u64) {
        let id = RequestId(self.ids.next_id());
        let serial = self.next_serial;
        self.next_serial += 1;

        let created_at = Instant::now();
        self.entries.insert(
            id,
            Request {
                kind,
                serial,
                state: RequestState::Created,
                created_at,
                timeout,
                deadline: timeout.and_then(|timeout| created_at.checked_add(timeout)),
                timer: None,
                callbacks,
            },
        );
        (id, serial)
    }

    pub(crate) fn get_mut(&mut self, id: RequestId) -> Option<&mut Request> {
        self.entries.get_mut(&id)
    }

    /// Like [`RequestTable::get_mut`] but only if the entry is the one that
    /// was handed `serial`.
    pub(crate) fn get_mut_exact(&mut self, id: RequestId, serial: u64) -> Option<&mut Request> {
        self.entries
            .get_mut(&id)
            .filter(|request| request.serial == serial)
    }

    pub(crate) fn state(&self, id: RequestId) -> Option<RequestState> {
        self.entries.get(&id).map(|request| request.state)
    }

    pub(crate) fn remove(&mut self, id: RequestId) -> Option<Request> {
        let request = self.entries.remove(&id)?;
        self.ids.release(id.0);
        Some(request)
    }

    pub(crate) fn remove_exact(&mut self, id: RequestId, serial: u64) -> Option<Request> {
        match self.entries.get(&id) {
            Some(request) if request.serial == serial => self.remove(id),
            _ => None,
        }
    }

    /// Empties the table, oldest request first.
    pub(crate) fn drain(&mut self) -> Vec<(RequestId, Request)> {
        let mut drained: Vec<_> = self.entries.drain().collect();
        drained.sort_by_key(|(_, request)| request.serial);
        for (id, _) in drained.iter() {
            self.ids.release(id.0);
        }
        drained
    }

    pub(crate) fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
