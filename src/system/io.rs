//! Tokio IO adapters over data pipe handles.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use super::awakable::{Registration, WakerSlot};
use super::data_pipe::{ReadDataFlags, WriteDataFlags};
use super::handle::{DataPipeConsumerHandle, DataPipeProducerHandle, Handle};
use crate::error::SystemError;

fn io_error(err: SystemError) -> io::Error {
    let kind = match err {
        SystemError::InvalidArgument => io::ErrorKind::InvalidInput,
        SystemError::FailedPrecondition => io::ErrorKind::BrokenPipe,
        SystemError::Cancelled => io::ErrorKind::ConnectionAborted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}

/// Keeps a waker registered on one handle until dropped.
#[derive(Default)]
struct Wakeup {
    slot: Arc<WakerSlot>,
    registration: Option<Registration>,
}

impl Wakeup {
    fn arm(&mut self, handle: &Handle, cx: &Context<'_>) -> io::Result<()> {
        if self.registration.is_none() {
            let dispatcher = handle.core().dispatcher(handle.raw()).map_err(io_error)?;
            self.registration = Some(Registration::new(&[dispatcher], self.slot.clone()));
        }
        self.slot.register(cx.waker());
        Ok(())
    }

    fn disarm(&mut self) {
        self.registration = None;
    }
}

/// [`AsyncRead`] over a data pipe consumer with one-byte elements.
///
/// Reports EOF once the producer is closed and the buffer is drained.
pub struct DataPipeReader {
    consumer: DataPipeConsumerHandle,
    wakeup: Wakeup,
}

impl DataPipeReader {
    pub fn new(consumer: DataPipeConsumerHandle) -> Self {
        Self {
            consumer,
            wakeup: Wakeup::default(),
        }
    }

    pub fn into_inner(mut self) -> DataPipeConsumerHandle {
        self.wakeup.disarm();
        self.consumer
    }
}

impl AsyncRead for DataPipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut armed = false;
        loop {
            match this
                .consumer
                .read_data(buf.initialize_unfilled(), ReadDataFlags::empty())
            {
                Ok(n) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Err(SystemError::FailedPrecondition) => return Poll::Ready(Ok(())),
                Err(SystemError::ShouldWait) if !armed => {
                    // Register first, then look again so a write racing the
                    // registration is not missed.
                    this.wakeup.arm(&this.consumer, cx)?;
                    armed = true;
                }
                Err(SystemError::ShouldWait) => return Poll::Pending,
                Err(err) => return Poll::Ready(Err(io_error(err))),
            }
        }
    }
}

/// [`AsyncWrite`] over a data pipe producer with one-byte elements.
///
/// Shutdown closes the producer, which the reader sees as EOF.
pub struct DataPipeWriter {
    producer: Option<DataPipeProducerHandle>,
    wakeup: Wakeup,
}

impl DataPipeWriter {
    pub fn new(producer: DataPipeProducerHandle) -> Self {
        Self {
            producer: Some(producer),
            wakeup: Wakeup::default(),
        }
    }
}

impl AsyncWrite for DataPipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(producer) = this.producer.as_ref() else {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };

        let mut armed = false;
        loop {
            match producer.write_data(buf, WriteDataFlags::empty()) {
                Ok(n) => return Poll::Ready(Ok(n)),
                Err(SystemError::ShouldWait) if !armed => {
                    this.wakeup.arm(producer, cx)?;
                    armed = true;
                }
                Err(SystemError::ShouldWait) => return Poll::Pending,
                Err(err) => return Poll::Ready(Err(io_error(err))),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.wakeup.disarm();
        if let Some(producer) = this.producer.take() {
            producer.close().map_err(io_error)?;
        }
        Poll::Ready(Ok(()))
    }
}

/// Reads `consumer` until the producer closes and returns everything read.
pub async fn drain_data_pipe(consumer: DataPipeConsumerHandle) -> io::Result<Vec<u8>> {
    let mut reader = DataPipeReader::new(consumer);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    Ok(out)
}
