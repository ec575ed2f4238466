use std::marker::PhantomData;
use std::sync::Arc;

use log::trace;

use crate::errors::Result;

/// A host VM the engine's library build may be loaded into. Threads that
/// call into the host must be attached first and detached before they end;
/// the host side of both operations is opaque to this crate.
pub trait HostRuntime: Send + Sync {
    fn attach_current_thread(&self) -> Result<()>;
    fn detach_current_thread(&self);
}

/// Scoped attachment of the current thread to a [`HostRuntime`].
///
/// Acquire at the top of any thread that calls into the host; release
/// happens either through [`detach`](Self::detach) or on drop, whichever
/// comes first, and exactly once. The guard owns all per-thread state and
/// deliberately stays on the thread that acquired it.
pub struct ThreadAttachment {
    runtime: Arc<dyn HostRuntime>,
    released: bool,
    // attachment is a property of the current thread
    _not_send: PhantomData<*const ()>,
}

impl ThreadAttachment {
    pub fn acquire(runtime: Arc<dyn HostRuntime>) -> Result<Self> {
        runtime.attach_current_thread()?;
        trace!("thread attached to host runtime");
        Ok(ThreadAttachment {
            runtime,
            released: false,
            _not_send: PhantomData,
        })
    }

    /// Detach eagerly instead of waiting for scope end.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.runtime.detach_current_thread();
            trace!("thread detached from host runtime");
        }
    }
}

impl Drop for ThreadAttachment {
    fn drop(&mut self) {
        self.release();
    }
}
