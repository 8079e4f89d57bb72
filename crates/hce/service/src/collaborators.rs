//! Interfaces to the world outside the engine.
//!
//! All of these are called with the dispatch lock held, so implementations
//! must return promptly and must not call back into the service. Anything
//! slow (binding a process, showing UI) is started here and reported back
//! later as an event.

use async_trait::async_trait;
use hce_dispatch::{BindPurpose, ChannelId, DeviceState, HandlerMessage};
use hce_types::{Aid, Category, HandlerInfo, HandlerRef, UserId};

use crate::error::ServiceResult;

/// Source of installed handlers.
#[async_trait]
pub trait HandlerDirectory: Send + Sync {
    /// Every handler installed for `user`, enabled or not.
    async fn list_handlers(&self, user: UserId) -> ServiceResult<Vec<HandlerInfo>>;
}

/// Connections to handler processes.
pub trait HandlerTransport: Send + Sync {
    /// Start binding; completion arrives as a connected event.
    fn bind(&self, handler: &HandlerRef, purpose: BindPurpose);

    fn unbind(&self, handler: &HandlerRef, purpose: BindPurpose);

    fn send(&self, channel: ChannelId, handler: &HandlerRef, message: &HandlerMessage);
}

/// The reader on the other side of the field.
pub trait ReaderLink: Send + Sync {
    fn send_to_reader(&self, data: &[u8]);

    /// Let one transaction through while observe mode is on.
    fn allow_one_transaction(&self);
}

/// User-facing prompts. Fire and forget; a choice comes back as a next-tap preference.
pub trait DisambiguationUi: Send + Sync {
    fn prompt(&self, candidates: &[HandlerRef], failed: Option<&HandlerRef>, category: Category);

    fn prompt_unlock(&self, handler: &HandlerRef, category: Category);
}

pub trait DeviceStateProvider: Send + Sync {
    fn device_state(&self) -> DeviceState;
}

/// Notifications for the controller-enablement layer and diagnostics.
pub trait EngineListener: Send + Sync {
    /// No candidate default route fits. Called once per distinct overflow.
    fn on_routing_overflow(&self, required: usize, capacity: usize);

    fn on_unroutable_aid(&self, aid: &Aid);
}

/// Listener that only logs.
pub struct LoggingListener;

impl EngineListener for LoggingListener {
    fn on_routing_overflow(&self, required: usize, capacity: usize) {
        tracing::warn!(required, capacity, "Routing table overflow");
    }

    fn on_unroutable_aid(&self, aid: &Aid) {
        tracing::debug!(aid = %aid, "Unroutable AID");
    }
}
