//! Client side of a message pipe.
//!
//! Calls are correlated by request id, so responses may arrive in any
//! order. One reader task per proxy routes each response to its caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{read_message, write_message, ApplicationError};
use crate::bindings::{Message, MessageHeader, WireStruct};
use crate::error::{CapwireError, Result};
use crate::system::MessagePipeHandle;

type ResponseSender = oneshot::Sender<Result<Message>>;

#[derive(Default)]
struct PendingCalls {
    next_id: u64,
    calls: HashMap<u64, ResponseSender>,
    /// Ids whose caller stopped waiting; their late responses are dropped.
    abandoned: HashSet<u64>,
    /// Set once the reader has stopped; later calls fail with it.
    closed: Option<CapwireError>,
}

impl PendingCalls {
    /// Next id that is neither 0 nor outstanding.
    fn allocate_id(&mut self) -> u64 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0
                && !self.calls.contains_key(&self.next_id)
                && !self.abandoned.contains(&self.next_id)
            {
                return self.next_id;
            }
        }
    }

    fn fail_all(&mut self, err: &CapwireError) {
        self.closed = Some(err.clone());
        self.abandoned.clear();
        for (_, sender) in self.calls.drain() {
            let _ = sender.send(Err(err.clone()));
        }
    }
}

/// Removes a call's entry if the caller stops waiting. A request that
/// already went out leaves its id behind as abandoned.
struct CallGuard<'a> {
    pending: &'a Mutex<PendingCalls>,
    id: u64,
    sent: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.calls.remove(&self.id).is_some() && self.sent {
            pending.abandoned.insert(self.id);
        }
    }
}

/// Sends requests over a pipe and awaits their responses.
///
/// Must be created inside a tokio runtime. Dropping the proxy stops its
/// reader and closes the pipe.
pub struct Proxy {
    pipe: Arc<MessagePipeHandle>,
    pending: Arc<Mutex<PendingCalls>>,
    reader: JoinHandle<()>,
}

impl Proxy {
    pub fn new(pipe: MessagePipeHandle) -> Self {
        let pipe = Arc::new(pipe);
        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        let reader = tokio::spawn(run_reader(pipe.clone(), pending.clone()));
        Self {
            pipe,
            pending,
            reader,
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// An error-flagged response comes back as
    /// [`CapwireError::Application`]. If the pipe is torn down first, every
    /// outstanding call fails with the reason.
    pub async fn call<Req, Resp>(&self, ordinal: u32, request: Req) -> Result<Resp>
    where
        Req: WireStruct,
        Resp: WireStruct,
    {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.lock();
            if let Some(err) = &pending.closed {
                return Err(err.clone());
            }
            let id = pending.allocate_id();
            pending.calls.insert(id, tx);
            id
        };
        let mut guard = CallGuard {
            pending: &self.pending,
            id,
            sent: false,
        };

        write_message(&self.pipe, Message::encode(&MessageHeader::request(ordinal, id), request))?;
        guard.sent = true;
        let response = rx.await.map_err(|_| CapwireError::Cancelled)??;
        drop(guard);

        if response.header()?.is_error() {
            let err: ApplicationError = response.decode_payload()?;
            return Err(err.into());
        }
        Ok(response.decode_payload()?)
    }

    /// Sends a one-way message.
    pub fn send<Req: WireStruct>(&self, ordinal: u32, request: Req) -> Result<()> {
        write_message(&self.pipe, Message::encode(&MessageHeader::new(ordinal), request))
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().calls.len()
    }

    /// True once the reader has stopped.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed.is_some()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("pipe", &self.pipe.raw())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

async fn run_reader(pipe: Arc<MessagePipeHandle>, pending: Arc<Mutex<PendingCalls>>) {
    let err = loop {
        let message = match read_message(&pipe).await {
            Ok(message) => message,
            Err(err) => break err,
        };
        let header = match message.header() {
            Ok(header) => header,
            Err(err) => break err.into(),
        };
        if !header.is_response() {
            warn!(ordinal = header.ordinal, "proxy received a non-response message");
            break CapwireError::UnexpectedRequest(header.ordinal);
        }
        let mut calls = pending.lock();
        if let Some(sender) = calls.calls.remove(&header.request_id) {
            drop(calls);
            let _ = sender.send(Ok(message));
        } else if calls.abandoned.remove(&header.request_id) {
            debug!(request_id = header.request_id, "dropping response for abandoned call");
        } else {
            warn!(request_id = header.request_id, "response for unknown request id");
            break CapwireError::UnknownRequestId(header.request_id);
        }
    };

    pending.lock().fail_all(&err);
    if err.is_benign_close() {
        debug!(pipe = pipe.raw(), reason = %err, "proxy reader stopped");
    } else {
        error!(pipe = pipe.raw(), error = %err, "proxy torn down");
        // Protocol violation: the peer gets a closed pipe.
        let _ = pipe.core().close(pipe.raw());
    }
}
