//! Tracking of outstanding provider requests.

mod kind;
mod manager;
mod observer;
mod table;

pub use kind::RequestKind;
pub use manager::{AbortHandle, RequestManager, WeakRequestManager};
pub use observer::{RequestObserver, RequestOutcome};
pub use table::RequestState;

use crate::id::RequestId;
use crate::meta::Response;
use crate::FsError;

/// Invoked once with the provider's reply when a request succeeds.
pub type SuccessCallback = Box<dyn FnOnce(RequestId, Response) + Send + 'static>;
/// Invoked once when a request fails, is aborted, times out or is shut down.
pub type ErrorCallback = Box<dyn FnOnce(RequestId, FsError) + Send + 'static>;
/// Invoked for every intermediate chunk of a streamed reply.
pub type ProgressCallback = Box<dyn FnMut(RequestId, Response) + Send + 'static>;
