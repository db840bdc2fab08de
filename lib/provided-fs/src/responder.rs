use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::id::RequestId;
use crate::meta::{ProviderRequest, Response};
use crate::request::WeakRequestManager;
use crate::{FsError, ProviderError, Result};

/// The provider, as seen from the file system.
///
/// Both methods must return promptly; the reply to a delivered request comes
/// back later through the [`crate::RequestManager`] under the same id.
pub trait Responder: fmt::Debug + Send + Sync + 'static {
    /// Hands a request to the provider.
    fn deliver(&self, request_id: RequestId, request: ProviderRequest) -> Result<()>;

    /// Tells the provider that nobody is waiting for `request_id` anymore.
    /// The request has already been finished locally.
    fn cancel(&self, _request_id: RequestId) -> Result<()> {
        Ok(())
    }
}

/// Message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRequest {
    Operation {
        request_id: RequestId,
        request: ProviderRequest,
    },
    Cancel {
        request_id: RequestId,
    },
}

/// Message sent back by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageResponse {
    /// One chunk of a reply, more will follow.
    Progress {
        request_id: RequestId,
        response: Response,
    },
    Success {
        request_id: RequestId,
        response: Response,
    },
    Error {
        request_id: RequestId,
        error: ProviderError,
    },
}

impl MessageResponse {
    pub fn request_id(&self) -> RequestId {
        match self {
            MessageResponse::Progress { request_id, .. }
            | MessageResponse::Success { request_id, .. }
            | MessageResponse::Error { request_id, .. } => *request_id,
        }
    }
}

/// A [`Responder`] that forwards requests over a channel.
#[derive(Debug, Clone)]
pub(crate) struct ChannelResponder {
    tx: mpsc::UnboundedSender<MessageRequest>,
}

impl ChannelResponder {
    pub(crate) fn new(tx: mpsc::UnboundedSender<MessageRequest>) -> Self {
        Self { tx }
    }
}

impl Responder for ChannelResponder {
    fn deliver(&self, request_id: RequestId, request: ProviderRequest) -> Result<()> {
        self.tx
            .send(MessageRequest::Operation {
                request_id,
                request,
            })
            .map_err(|_| FsError::ConnectionAborted)
    }

    fn cancel(&self, request_id: RequestId) -> Result<()> {
        self.tx
            .send(MessageRequest::Cancel { request_id })
            .map_err(|_| FsError::ConnectionAborted)
    }
}

/// Routes the provider's replies to the requests waiting for them.
///
/// All replies are applied from the task polling this future, one at a
/// time. It resolves once the provider hangs up, after shutting the file
/// system down, or once the file system is gone.
pub struct ReplyDriver {
    requests: WeakRequestManager,
    rx: mpsc::Receiver<MessageResponse>,
    on_disconnect: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl fmt::Debug for ReplyDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyDriver")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

impl ReplyDriver {
    pub(crate) fn new(
        requests: WeakRequestManager,
        rx: mpsc::Receiver<MessageResponse>,
        on_disconnect: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            requests,
            rx,
            on_disconnect: Some(Box::new(on_disconnect)),
        }
    }
}

impl Future for ReplyDriver {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            let msg = match self.rx.poll_recv(cx) {
                Poll::Ready(Some(msg)) => msg,
                Poll::Ready(None) => {
                    debug!("provider hung up");
                    if let Some(on_disconnect) = self.on_disconnect.take() {
                        on_disconnect();
                    }
                    return Poll::Ready(());
                }
                Poll::Pending => return Poll::Pending,
            };

            let Some(requests) = self.requests.upgrade() else {
                debug!("file system is gone, no more replies to route");
                return Poll::Ready(());
            };
            trace!(request_id = %msg.request_id(), "routing reply");
            match msg {
                MessageResponse::Progress {
                    request_id,
                    response,
                } => {
                    requests.deliver_progress(request_id, response);
                }
                MessageResponse::Success {
                    request_id,
                    response,
                } => {
                    requests.deliver_success(request_id, response);
                }
                MessageResponse::Error { request_id, error } => {
                    requests.deliver_error(request_id, error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::request::{RequestKind, RequestManager};
    use crate::test_util::{Event, Recorder};
    use crate::ProviderErrorCode;

    #[tokio::test]
    async fn channel_responder_reports_a_closed_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let responder = ChannelResponder::new(tx);

        responder
            .deliver(RequestId(1), ProviderRequest::Unmount)
            .unwrap();
        responder.cancel(RequestId(1)).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(MessageRequest::Operation {
                request_id: RequestId(1),
                request: ProviderRequest::Unmount,
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(MessageRequest::Cancel {
                request_id: RequestId(1)
            })
        );

        drop(rx);
        assert_eq!(
            responder.deliver(RequestId(2), ProviderRequest::Unmount),
            Err(FsError::ConnectionAborted)
        );
    }

    #[tokio::test]
    async fn driver_routes_replies_and_reports_hang_up() {
        let manager = RequestManager::new();
        let recorder = Recorder::default();
        let (on_success, on_error) = recorder.callbacks();
        let (ok, _) = manager.create_request(RequestKind::CreateFile, on_success, on_error, None);
        let (on_success, on_error) = recorder.callbacks();
        let (failed, _) =
            manager.create_request(RequestKind::CreateFile, on_success, on_error, None);

        let (tx, rx) = mpsc::channel(8);
        let (hung_up_tx, hung_up_rx) = tokio::sync::oneshot::channel();
        let driver = ReplyDriver::new(manager.downgrade(), rx, move || {
            hung_up_tx.send(()).ok();
        });
        let driver = tokio::spawn(driver);

        let error = ProviderError::new(ProviderErrorCode::Exists, "already there");
        tx.send(MessageResponse::Success {
            request_id: ok,
            response: Response::None,
        })
        .await
        .unwrap();
        tx.send(MessageResponse::Error {
            request_id: failed,
            error: error.clone(),
        })
        .await
        .unwrap();
        // Duplicate, must be ignored.
        tx.send(MessageResponse::Success {
            request_id: ok,
            response: Response::None,
        })
        .await
        .unwrap();
        drop(tx);

        driver.await.unwrap();
        hung_up_rx.await.unwrap();
        assert_eq!(
            recorder.events(),
            vec![
                Event::Success(ok, Response::None),
                Event::Error(failed, FsError::Provider(error)),
            ]
        );
    }
}
