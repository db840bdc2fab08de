use std::sync::{Arc, Mutex};

use crate::id::RequestId;
use crate::meta::{ProviderRequest, Response};
use crate::responder::Responder;
use crate::{FsError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Success(RequestId, Response),
    Error(RequestId, FsError),
}

/// Collects what the request manager hands to completion callbacks.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub(crate) fn callbacks(
        &self,
    ) -> (
        impl FnOnce(RequestId, Response) + Send + use<>,
        impl FnOnce(RequestId, FsError) + Send + use<>,
    ) {
        let on_success = {
            let events = self.events.clone();
            move |id, response| events.lock().unwrap().push(Event::Success(id, response))
        };
        let on_error = {
            let events = self.events.clone();
            move |id, error| events.lock().unwrap().push(Event::Error(id, error))
        };
        (on_success, on_error)
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

/// Stands in for a provider: remembers what it was asked and never answers
/// on its own.
#[derive(Debug, Default)]
pub(crate) struct RecordingResponder {
    delivered: Mutex<Vec<(RequestId, ProviderRequest)>>,
    cancelled: Mutex<Vec<RequestId>>,
    unreachable: Mutex<bool>,
}

impl RecordingResponder {
    pub(crate) fn delivered(&self) -> Vec<(RequestId, ProviderRequest)> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn last(&self) -> (RequestId, ProviderRequest) {
        self.delivered
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("nothing was delivered")
    }

    pub(crate) fn cancelled(&self) -> Vec<RequestId> {
        self.cancelled.lock().unwrap().clone()
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }
}

impl Responder for RecordingResponder {
    fn deliver(&self, request_id: RequestId, request: ProviderRequest) -> Result<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(FsError::ConnectionAborted);
        }
        self.delivered.lock().unwrap().push((request_id, request));
        Ok(())
    }

    fn cancel(&self, request_id: RequestId) -> Result<()> {
        self.cancelled.lock().unwrap().push(request_id);
        Ok(())
    }
}
