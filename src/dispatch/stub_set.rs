//! A set of stubs served on their own tasks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::stub::Stub;
use crate::error::Result;
use crate::system::{Core, RawHandle};

struct ServedStub {
    core: Core,
    pipe: RawHandle,
    task: JoinHandle<Result<()>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    stubs: HashMap<u64, ServedStub>,
}

/// Live served stubs. Each stub leaves the set when its loop ends.
#[derive(Clone, Default)]
pub struct StubSet {
    inner: Arc<Mutex<Inner>>,
}

impl StubSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts serving `stub` on a new task.
    pub fn spawn(&self, stub: Stub) {
        let core = stub.pipe().core().clone();
        let pipe = stub.pipe_raw();
        let set = Arc::downgrade(&self.inner);

        // Insert before the task can try to remove itself.
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let task = tokio::spawn(async move {
            let result = stub.serve().await;
            if let Some(set) = set.upgrade() {
                set.lock().stubs.remove(&id);
            }
            result
        });
        inner.stubs.insert(id, ServedStub { core, pipe, task });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().stubs.is_empty()
    }

    /// Closes every served pipe and waits for the loops to finish.
    ///
    /// Returns each loop's result. Closing a pipe ends its loop with `Ok`
    /// unless the loop had already failed.
    pub async fn close_all(&self) -> Vec<Result<()>> {
        let served: Vec<ServedStub> = self.inner.lock().stubs.drain().map(|(_, s)| s).collect();
        debug!(count = served.len(), "closing served stubs");

        for stub in &served {
            // Already gone if the loop ended on its own.
            let _ = stub.core.close(stub.pipe);
        }

        let mut results = Vec::with_capacity(served.len());
        for stub in served {
            match stub.task.await {
                Ok(result) => results.push(result),
                Err(err) => error!(error = %err, "stub task did not complete"),
            }
        }
        results
    }
}

impl std::fmt::Debug for StubSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{Message, MessageHeader, StructDecoder, StructEncoder, WireStruct};
    use crate::dispatch::{read_message, write_message, StubBuilder};
    use crate::error::ValidationError;

    struct Empty;

    impl WireStruct for Empty {
        const VERSIONS: &'static [(u32, u32)] = &[(0, 8)];

        fn encode_fields(self, _fields: &mut StructEncoder<'_>) {}

        fn decode_fields(_fields: &mut StructDecoder<'_>) -> std::result::Result<Self, ValidationError> {
            Ok(Empty)
        }
    }

    fn empty_stub(pipe: crate::system::MessagePipeHandle) -> Stub {
        StubBuilder::new()
            .method(0, |_: Empty| async { Ok(Empty) })
            .build(pipe)
    }

    #[tokio::test]
    async fn test_close_all_cancels_loops() {
        let core = Core::new();
        let set = StubSet::new();
        let mut clients = Vec::new();
        for _ in 0..3 {
            let (client, server) = core.create_message_pipe().unwrap();
            set.spawn(empty_stub(server));
            clients.push(client);
        }
        assert_eq!(set.len(), 3);

        // The stubs answer while served.
        write_message(&clients[0], Message::encode(&MessageHeader::request(0, 1), Empty)).unwrap();
        let reply = read_message(&clients[0]).await.unwrap();
        assert!(reply.header().unwrap().is_response());

        let results = set.close_all().await;
        assert_eq!(results, vec![Ok(()), Ok(()), Ok(())]);
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_stub_leaves_set_when_peer_closes() {
        let core = Core::new();
        let set = StubSet::new();
        let (client, server) = core.create_message_pipe().unwrap();
        set.spawn(empty_stub(server));
        drop(client);

        for _ in 0..100 {
            if set.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(set.is_empty());
        assert!(set.close_all().await.is_empty());
    }
}
