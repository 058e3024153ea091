use std::time::Duration;

use raconteur_value::MessageEntry;

use crate::error::Result;

/// Completion callback for an asynchronous request.
///
/// Invoked exactly once, with the response, a timeout or a disconnect error.
pub type ResponseHandler = Box<dyn FnOnce(Result<MessageEntry>) + Send + 'static>;

/// Work scheduled on an endpoint's dispatch context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receives entries dispatched by an [`Endpoint`].
///
/// `endpoint` is the local id of the endpoint that received the entry.
pub trait MessageHandler: Send + Sync {
    /// Handle a one-way entry such as a packet or a close notice.
    fn handle_message(&self, endpoint: u32, entry: MessageEntry);

    /// Handle a request and produce its response.
    ///
    /// Failures are reported in the response's error slot.
    fn handle_request(&self, endpoint: u32, entry: MessageEntry) -> MessageEntry;

    /// The endpoint lost its peer. No more entries will be dispatched.
    fn handle_disconnect(&self, endpoint: u32) {
        let _ = endpoint;
    }
}

/// One side of a message link.
///
/// Entries sent from one side are dispatched to the other side's handler in
/// send order. Requests are matched to responses by the request id the
/// endpoint assigns.
pub trait Endpoint: Send + Sync {
    /// Process-unique id of this endpoint.
    fn local_id(&self) -> u32;

    fn is_connected(&self) -> bool;

    /// Install the handler that receives entries from the peer.
    ///
    /// The endpoint keeps only a weak reference.
    fn set_handler(&self, handler: std::sync::Weak<dyn MessageHandler>);

    /// Send a one-way entry.
    fn send_message(&self, entry: MessageEntry) -> Result<()>;

    /// Send a request and block until its response arrives.
    fn process_request(
        &self,
        entry: MessageEntry,
        timeout: Option<Duration>,
    ) -> Result<MessageEntry>;

    /// Send a request and return immediately.
    ///
    /// `handler` runs on the endpoint's dispatch context, before any entry the
    /// peer sent after the response is dispatched.
    fn async_process_request(
        &self,
        entry: MessageEntry,
        timeout: Option<Duration>,
        handler: ResponseHandler,
    );

    /// Run `task` on this endpoint's dispatch context.
    ///
    /// When called while a request is being handled, the task runs after the
    /// response has been sent.
    fn defer(&self, task: Task) -> Result<()>;

    /// Drop the link. Pending requests on both sides fail with
    /// [`TransportError::Disconnected`](crate::TransportError::Disconnected).
    fn close(&self);
}
