//! Owned handles.
//!
//! A [`Handle`] owns one kernel resource and closes it on drop. The typed
//! wrappers add the operations that make sense for each object kind and
//! deref to [`Handle`] for the common ones.

use std::fmt;
use std::mem;
use std::ops::Deref;

use super::core::Core;
use super::data_pipe::{ReadDataFlags, WriteDataFlags};
use super::handle_table::{RawHandle, INVALID_HANDLE};
use super::shared_buffer::BufferMapping;
use super::signals::{HandleSignals, HandleSignalsState};
use super::wait::{Deadline, WaitError};
use crate::error::{SystemError, SystemResult};

/// An owned, untyped handle.
pub struct Handle {
    core: Core,
    raw: RawHandle,
}

impl Handle {
    /// Takes ownership of `raw` in `core`.
    pub fn from_raw(core: Core, raw: RawHandle) -> Self {
        Self { core, raw }
    }

    /// Raw value in the owning core's table.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Core that owns this handle.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// False once ownership was given up with [`Handle::into_raw`].
    pub fn is_valid(&self) -> bool {
        self.raw != INVALID_HANDLE
    }

    /// Gives up ownership without closing.
    pub fn into_raw(mut self) -> RawHandle {
        mem::replace(&mut self.raw, INVALID_HANDLE)
    }

    /// Closes the handle and reports the kernel's result.
    pub fn close(mut self) -> SystemResult<()> {
        let raw = mem::replace(&mut self.raw, INVALID_HANDLE);
        self.core.close(raw)
    }

    /// Current signal state; fails if the handle is no longer valid.
    pub fn signals_state(&self) -> SystemResult<HandleSignalsState> {
        self.core.query_signals_state(self.raw)
    }

    /// Blocks the current thread; see [`Core::wait`].
    pub fn wait(
        &self,
        signals: HandleSignals,
        deadline: Deadline,
    ) -> Result<HandleSignalsState, WaitError> {
        self.core.wait(self.raw, signals, deadline)
    }

    /// See [`Core::wait_async`].
    pub async fn wait_async(&self, signals: HandleSignals) -> Result<HandleSignalsState, WaitError> {
        self.core.wait_async(self.raw, signals).await
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.raw != INVALID_HANDLE {
            // Already invalid if the peer core went away or it was transferred.
            let _ = self.core.close(self.raw);
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.raw).finish()
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(Handle);

        impl $name {
            /// Wraps `handle` without checking its kind. Operations on the
            /// wrong kind fail with `InvalidArgument`.
            pub fn from_untyped(handle: Handle) -> Self {
                Self(handle)
            }

            pub fn into_untyped(self) -> Handle {
                self.0
            }

            pub fn into_raw(self) -> RawHandle {
                self.0.into_raw()
            }

            pub fn close(self) -> SystemResult<()> {
                self.0.close()
            }
        }

        impl Deref for $name {
            type Target = Handle;

            fn deref(&self) -> &Handle {
                &self.0
            }
        }

        impl From<Handle> for $name {
            fn from(handle: Handle) -> Self {
                Self(handle)
            }
        }

        impl From<$name> for Handle {
            fn from(handle: $name) -> Handle {
                handle.0
            }
        }
    };
}

typed_handle! {
    /// One end of a message pipe.
    MessagePipeHandle
}

typed_handle! {
    /// Writing end of a data pipe.
    DataPipeProducerHandle
}

typed_handle! {
    /// Reading end of a data pipe.
    DataPipeConsumerHandle
}

typed_handle! {
    /// Handle to a shared buffer.
    SharedBufferHandle
}

impl MessagePipeHandle {
    /// Sends `bytes` with `handles` attached.
    ///
    /// The handles are consumed either way: transferred on success, closed
    /// on failure.
    pub fn write_message(&self, bytes: &[u8], handles: Vec<Handle>) -> SystemResult<()> {
        if handles.iter().any(|h| !h.core.same_core(&self.core)) {
            return Err(SystemError::InvalidArgument);
        }
        let raws: Vec<RawHandle> = handles.iter().map(Handle::raw).collect();
        self.core.write_message(self.raw, bytes, &raws)?;
        for handle in handles {
            handle.into_raw();
        }
        Ok(())
    }

    pub fn read_message(&self) -> SystemResult<(Vec<u8>, Vec<Handle>)> {
        self.core.read_message(self.raw)
    }
}

impl DataPipeProducerHandle {
    pub fn write_data(&self, data: &[u8], flags: WriteDataFlags) -> SystemResult<usize> {
        self.core.write_data(self.raw, data, flags)
    }
}

impl DataPipeConsumerHandle {
    pub fn read_data(&self, buf: &mut [u8], flags: ReadDataFlags) -> SystemResult<usize> {
        self.core.read_data(self.raw, buf, flags)
    }

    /// Number of bytes ready to read.
    pub fn available(&self) -> SystemResult<usize> {
        self.core.read_data(self.raw, &mut [], ReadDataFlags::QUERY)
    }
}

impl SharedBufferHandle {
    pub fn duplicate(&self) -> SystemResult<SharedBufferHandle> {
        self.core.duplicate_buffer_handle(self.raw)
    }

    pub fn map(&self, offset: usize, num_bytes: usize) -> SystemResult<BufferMapping> {
        self.core.map_buffer(self.raw, offset, num_bytes)
    }
}
