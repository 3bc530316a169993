//! Application event bus.
//!
//! Components publish [`AppEvent`]s; any number of listeners may subscribe.
//! Publishing never blocks and never fails when nobody is listening.

use crate::map::SemanticMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub enum AppEvent {
    MapUpdated { map: Arc<SemanticMap> },
    MapRefreshFailed { message: String },
    WorkbookChanged { sheet: String },
    BackendWaking { attempt: u32, max_attempts: u32 },
    BackendReady,
    BackendUnreachable,
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::MapUpdated { .. } => "columnMap:updated",
            AppEvent::MapRefreshFailed { .. } => "columnMap:refreshFailed",
            AppEvent::WorkbookChanged { .. } => "workbook:changed",
            AppEvent::BackendWaking { .. } => "backend:waking",
            AppEvent::BackendReady => "backend:ready",
            AppEvent::BackendUnreachable => "backend:error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AppEvent) {
        let name = event.name();
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!(event = name, receivers, "event emitted");
    }
}
