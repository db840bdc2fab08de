use derive_more::Display;

use super::RequestKind;
use crate::id::RequestId;

/// How a request left the request table.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// The provider replied with success.
    #[display("completed")]
    Completed,
    /// The provider, or the transport, replied with an error.
    #[display("rejected")]
    Rejected,
    /// The caller aborted the request.
    #[display("aborted")]
    Aborted,
    /// The deadline passed without a reply.
    #[display("timed out")]
    TimedOut,
    /// The request manager was shut down.
    #[display("shut down")]
    Shutdown,
}

/// Watches the life cycle of requests.
///
/// Hooks are called after the table has been updated and without any lock
/// held, so an observer may freely call back into the request manager.
pub trait RequestObserver: Send + Sync {
    fn on_request_created(&self, _request_id: RequestId, _kind: RequestKind) {}

    fn on_request_delivered(&self, _request_id: RequestId) {}

    fn on_request_progress(&self, _request_id: RequestId) {}

    fn on_request_finished(
        &self,
        _request_id: RequestId,
        _kind: RequestKind,
        _outcome: RequestOutcome,
    ) {
    }
}
