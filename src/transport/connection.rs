//! Duplex JSON-RPC connection.
//!
//! A [`Connection`] moves through `Created → Running → Closing → Closed`. While
//! running, a single loop reads frames in wire order and dispatches them:
//!
//! - requests are decoded through the [`MessageRegistry`] and handed to the
//!   [`MessageHandler`] on their own task, so the loop never waits for a handler;
//! - notifications are awaited inline, which keeps document notifications ordered;
//!   `$/cancelRequest` is consumed here and flips the target request's token;
//! - responses resolve the matching outgoing request, unknown ids are dropped.
//!
//! All writes go through one writer task, so outgoing messages are framed in the
//! order they were issued.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lsp_types::CancelParams;
use lsp_types::notification::{Cancel, Notification};
use lsp_types::request::Request;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::protocol::{
    IncomingNotification, IncomingRequest, Message, MessageRegistry, RequestId, Response,
    ResponseError,
};
use crate::transport::cancellation::InFlightRequests;
use crate::transport::codec::{CodecError, FrameReader, FrameWriter};
use crate::transport::correlation::{Outcome, PendingRequests};
use crate::transport::error::{ConnectionError, RequestError};

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Running,
    Closing,
    Closed,
}

/// Receiver of decoded inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one request on its own task.
    ///
    /// `cancel` fires when the peer sends `$/cancelRequest` for this request or the
    /// connection closes. If it has fired by the time the handler returns, the
    /// peer receives a `RequestCancelled` error instead of the returned outcome.
    async fn handle_request(
        &self,
        request: IncomingRequest,
        cancel: CancellationToken,
    ) -> Result<Value, ResponseError>;

    /// Handles one notification; the dispatch loop waits for it to return.
    async fn handle_notification(&self, notification: IncomingNotification);
}

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Cheaply clonable handle to a JSON-RPC connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<MessageRegistry>,
    state: watch::Sender<ConnectionState>,
    writer_tx: mpsc::UnboundedSender<WriterCommand>,
    writer_rx: Mutex<Option<mpsc::UnboundedReceiver<WriterCommand>>>,
    pending: Mutex<PendingRequests>,
    in_flight: Mutex<InFlightRequests>,
    next_id: AtomicI32,
    close_requested: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Connection {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Created);
        Self {
            inner: Arc::new(Inner {
                registry,
                state,
                writer_tx,
                writer_rx: Mutex::new(Some(writer_rx)),
                pending: Mutex::new(PendingRequests::default()),
                in_flight: Mutex::new(InFlightRequests::default()),
                next_id: AtomicI32::new(1),
                close_requested: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.inner.registry
    }

    /// Number of outgoing requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Number of inbound requests whose handlers are still running
    pub fn in_flight_requests(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Resolves once the connection has reached `Closed`
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Asks the dispatch loop to stop. Messages queued before this call are
    /// still written.
    pub fn close(&self) {
        self.inner.close_requested.cancel();
    }

    /// Runs the dispatch loop until the input ends, a framing error occurs or
    /// [`Connection::close`] is called.
    pub async fn serve<I, O>(
        &self,
        input: I,
        output: O,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ConnectionError>
    where
        I: AsyncRead + Unpin + Send,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let Some(writer_rx) = lock(&self.inner.writer_rx).take() else {
            return Err(ConnectionError::AlreadyStarted);
        };
        self.inner.state.send_replace(ConnectionState::Running);
        debug!("Connection running");

        let writer = tokio::spawn(write_loop(
            FrameWriter::new(output),
            writer_rx,
            self.inner.close_requested.clone(),
        ));
        let mut reader = FrameReader::new(input);

        let result = loop {
            let frame = tokio::select! {
                biased;
                _ = self.inner.close_requested.cancelled() => None,
                frame = reader.read_frame() => Some(frame),
            };
            let Some(frame) = frame else {
                debug!("Connection close requested");
                break Ok(());
            };

            match frame {
                Ok(Some(body)) => self.dispatch(&body, &handler).await,
                Ok(None) => {
                    info!("Input stream closed");
                    break Ok(());
                }
                Err(e) => {
                    warn!("Failed to read message: {}", e);
                    break Err(ConnectionError::from(e));
                }
            }
        };

        self.shut_down(writer).await;
        result
    }

    /// Sends a notification to the peer
    pub fn send_notification<N: Notification>(&self, params: N::Params) -> Result<(), RequestError> {
        let message = Message::notification::<N>(&params)
            .map_err(|e| RequestError::Serialize(e.to_string()))?;
        self.enqueue(&message)
    }

    /// Sends a request to the peer. The returned handle resolves exactly once
    /// with the response, an error, or [`RequestError::ConnectionClosed`].
    pub fn send_request<R: Request>(&self, params: R::Params) -> PendingResponse<R> {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let pending = PendingResponse {
            id: id.clone(),
            rx,
            connection: self.clone(),
            _request: PhantomData,
        };

        let message = match Message::request::<R>(id.clone(), &params) {
            Ok(message) => message,
            Err(e) => {
                let _ = tx.send(Err(RequestError::Serialize(e.to_string())));
                return pending;
            }
        };

        if let Err(tx) = lock(&self.inner.pending).insert(id.clone(), tx) {
            let _ = tx.send(Err(RequestError::ConnectionClosed));
            return pending;
        }

        trace!("Sending request {} ({})", R::METHOD, id);
        if let Err(e) = self.enqueue(&message) {
            if let Some(tx) = lock(&self.inner.pending).remove(&id) {
                let _ = tx.send(Err(e));
            }
        }
        pending
    }

    /// Drops the continuation of an outgoing request and tells the peer to stop
    /// working on it. Returns false if the request was already resolved.
    fn cancel_outgoing(&self, id: &RequestId) -> bool {
        if lock(&self.inner.pending).remove(id).is_none() {
            return false;
        }
        let params = CancelParams {
            id: id.clone().into(),
        };
        if let Err(e) = self.send_notification::<Cancel>(params) {
            debug!("Could not send cancellation for request {}: {}", id, e);
        }
        true
    }

    fn enqueue(&self, message: &Message) -> Result<(), RequestError> {
        if matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return Err(RequestError::ConnectionClosed);
        }
        self.inner
            .writer_tx
            .send(WriterCommand::Send(message.to_value()))
            .map_err(|_| RequestError::ConnectionClosed)
    }

    fn reply(&self, response: Response) {
        let id = response.id.clone();
        if let Err(e) = self.enqueue(&Message::Response(response)) {
            debug!("Could not send response for request {:?}: {}", id, e);
        }
    }

    async fn dispatch(&self, body: &[u8], handler: &Arc<dyn MessageHandler>) {
        let value = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(e) => {
                warn!("Received a message that is not valid JSON: {}", e);
                self.reply(Response::error(None, ResponseError::parse_error(e)));
                return;
            }
        };

        let message = match Message::from_value(value) {
            Ok(message) => message,
            Err(malformed) => {
                warn!("{}", malformed);
                self.reply(Response::error(malformed.id, malformed.error));
                return;
            }
        };

        match message {
            Message::Request { id, method, params } => {
                self.dispatch_request(id, &method, params, handler)
            }
            Message::Notification { method, params } => {
                self.dispatch_notification(&method, params, handler).await
            }
            Message::Response(response) => self.dispatch_response(response),
        }
    }

    fn dispatch_request(
        &self,
        id: RequestId,
        method: &str,
        params: Value,
        handler: &Arc<dyn MessageHandler>,
    ) {
        trace!("Received request {} ({})", method, id);

        let request = match self.inner.registry.decode_request(id.clone(), method, params) {
            Ok(request) => request,
            Err(error) => {
                debug!("Rejecting request {} ({}): {}", method, id, error.message);
                self.reply(Response::error(Some(id), error));
                return;
            }
        };

        let Some(cancel) = lock(&self.inner.in_flight).begin(id.clone()) else {
            let error =
                ResponseError::invalid_request(format!("request id {} is already in flight", id));
            self.reply(Response::error(Some(id), error));
            return;
        };

        let connection = self.clone();
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            let outcome = handler.handle_request(request, cancel.clone()).await;
            let outcome = if cancel.is_cancelled() {
                Err(ResponseError::request_cancelled())
            } else {
                outcome
            };
            connection.complete_request(id, outcome);
        });
    }

    fn complete_request(&self, id: RequestId, outcome: Result<Value, ResponseError>) {
        if !lock(&self.inner.in_flight).finish(&id) {
            debug!("Dropping response to request {}: connection is closing", id);
            return;
        }
        self.reply(Response {
            id: Some(id),
            outcome,
        });
    }

    async fn dispatch_notification(
        &self,
        method: &str,
        params: Value,
        handler: &Arc<dyn MessageHandler>,
    ) {
        trace!("Received notification {}", method);

        let notification = match self.inner.registry.decode_notification(method, params) {
            Ok(notification) => notification,
            Err(error) if method.starts_with("$/") => {
                debug!("Ignoring optional notification {}: {}", method, error.message);
                return;
            }
            Err(error) => {
                warn!("Ignoring notification {}: {}", method, error.message);
                return;
            }
        };

        match notification.extract::<Cancel>() {
            Ok(params) => self.cancel_inbound(RequestId::from(params.id)),
            Err(notification) => handler.handle_notification(notification).await,
        }
    }

    fn cancel_inbound(&self, id: RequestId) {
        if lock(&self.inner.in_flight).cancel(&id) {
            debug!("Cancelled request {}", id);
        } else {
            debug!("Ignoring cancellation of unknown request {}", id);
        }
    }

    fn dispatch_response(&self, response: Response) {
        let Some(id) = response.id else {
            warn!(
                "Received a response without an id: {:?}",
                response.outcome.err()
            );
            return;
        };

        let outcome = response.outcome.map_err(RequestError::Remote);
        if !lock(&self.inner.pending).resolve(&id, outcome) {
            warn!("Dropping response for unknown request {}", id);
        }
    }

    async fn shut_down(&self, writer: JoinHandle<Result<(), CodecError>>) {
        self.inner.state.send_replace(ConnectionState::Closing);

        let failed = lock(&self.inner.pending).close();
        let cancelled = lock(&self.inner.in_flight).close();
        debug!(
            "Closing connection: failed {} pending requests, cancelled {} in-flight requests",
            failed, cancelled
        );

        let _ = self.inner.writer_tx.send(WriterCommand::Shutdown);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Writer stopped with error: {}", e),
            Err(e) => warn!("Writer task failed: {}", e),
        }

        self.inner.state.send_replace(ConnectionState::Closed);
        info!("Connection closed");
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    close_requested: CancellationToken,
) -> Result<(), CodecError> {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Send(message) => {
                if let Err(e) = writer.write_message(&message).await {
                    warn!("Failed to write message: {}", e);
                    close_requested.cancel();
                    return Err(e);
                }
            }
            WriterCommand::Shutdown => break,
        }
    }
    Ok(())
}

/// Handle to an outgoing request awaiting its response.
///
/// Dropping the handle before the response arrives abandons the request:
/// its correlation entry is removed and `$/cancelRequest` is sent.
#[must_use = "a pending response does nothing unless awaited or cancelled"]
pub struct PendingResponse<R: Request> {
    id: RequestId,
    rx: oneshot::Receiver<Outcome>,
    connection: Connection,
    _request: PhantomData<fn() -> R>,
}

impl<R: Request> PendingResponse<R> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Waits for the response
    pub async fn response(mut self) -> Result<R::Result, RequestError> {
        decode_outcome::<R>((&mut self.rx).await)
    }

    /// Waits for the response unless `cancel` fires first, in which case
    /// `$/cancelRequest` is sent and the handle fails with
    /// [`RequestError::Cancelled`]. A reply arriving later is dropped.
    pub async fn response_or_cancel(
        mut self,
        cancel: CancellationToken,
    ) -> Result<R::Result, RequestError> {
        tokio::select! {
            biased;
            outcome = &mut self.rx => decode_outcome::<R>(outcome),
            _ = cancel.cancelled() => {
                self.connection.cancel_outgoing(&self.id);
                Err(RequestError::Cancelled)
            }
        }
    }

    /// Abandons the request and sends `$/cancelRequest` if it is still pending
    pub fn cancel(self) -> bool {
        self.connection.cancel_outgoing(&self.id)
    }
}

impl<R: Request> Drop for PendingResponse<R> {
    fn drop(&mut self) {
        // No-op once the entry was resolved, cancelled or failed on close
        if self.connection.cancel_outgoing(&self.id) {
            debug!("Abandoned request {}", self.id);
        }
    }
}

fn decode_outcome<R: Request>(
    outcome: Result<Outcome, oneshot::error::RecvError>,
) -> Result<R::Result, RequestError> {
    let value = outcome.unwrap_or(Err(RequestError::ConnectionClosed))?;
    serde_json::from_value(value).map_err(|e| RequestError::InvalidResponse(e.to_string()))
}
