//! Shared service bundle.
//!
//! Transport adapters hold one `ChatServices` and call into the domain
//! through it, so they never touch the ports directly.

use std::sync::Arc;

use crate::domain::{
    ChatPorts, ContentFilterService, FilterPolicy, HistoryService, MessagePipeline,
    ModerationService, PresenceService, RoomService,
};

/// Every chat service, wired to one set of ports.
#[derive(Clone)]
pub struct ChatServices {
    pub rooms: RoomService,
    pub presence: PresenceService,
    pub history: HistoryService,
    pub moderation: ModerationService,
    pub filter: ContentFilterService,
    pub messages: MessagePipeline,
}

impl ChatServices {
    /// Construct every service from a ports bundle and a filter policy.
    pub fn new(ports: ChatPorts, policy: Arc<FilterPolicy>) -> Self {
        Self {
            rooms: RoomService::new(ports.clone()),
            presence: PresenceService::new(ports.clone()),
            history: HistoryService::new(ports.clone()),
            moderation: ModerationService::new(ports.clone()),
            filter: ContentFilterService::new(ports.clone(), policy.clone()),
            messages: MessagePipeline::new(ports, policy),
        }
    }
}
