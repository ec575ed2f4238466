use std::sync::Arc;

use may::sync::Mutex;

use crate::errors::{Error, Result};

// Event names are stable strings; consumers match on them verbatim.
pub const NN_CONNECT_EVENT: &str = "NN::connect";
pub const NN_READ_EVENT: &str = "NN::read";
pub const NN_WRITE_EVENT: &str = "NN::write";
pub const NN_PRE_RPC_RETRY_EVENT: &str = "NN::rpc::get_retry_action";
pub const DN_READ_EVENT: &str = "DN::read";
pub const DN_WRITE_EVENT: &str = "DN::write";

/// What an event sink tells the engine to do with the step it observed.
///
/// Returning `Error` makes the engine treat the step as having failed with
/// that error, which is how tests inject faults at exact points of the
/// retry state machine.
#[derive(Debug, Clone)]
pub enum EventResponse {
    Ok,
    Error(Error),
}

/// User-installed lifecycle callback: `(event_name, cluster_tag, value)`.
pub type EventCallback = Arc<dyn Fn(&str, &str, i64) -> EventResponse + Send + Sync>;

/// Holder for the (optional) event sink, shared by the engine and every
/// connection it creates. Installing a new sink replaces the old one.
pub struct EventHandlers {
    callback: Mutex<Option<EventCallback>>,
}

impl Default for EventHandlers {
    fn default() -> Self {
        EventHandlers::new()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        EventHandlers {
            callback: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: EventCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Fire one event. The sink runs outside the internal lock and must
    /// not block.
    pub fn call(&self, event: &str, cluster: &str, value: i64) -> EventResponse {
        let callback = self.callback.lock().unwrap().clone();
        match callback {
            Some(cb) => cb(event, cluster, value),
            None => EventResponse::Ok,
        }
    }

    /// Fire one event and turn a sink override into an `Err`.
    pub fn check(&self, event: &str, cluster: &str, value: i64) -> Result<()> {
        match self.call(event, cluster, value) {
            EventResponse::Ok => Ok(()),
            EventResponse::Error(e) => Err(e),
        }
    }
}
