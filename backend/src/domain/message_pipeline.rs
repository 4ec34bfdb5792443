//! Message send pipeline.
//!
//! Validation, sanitising, filtering, and rate limiting run before anything
//! is written. The write itself (message row plus the sender's presence
//! refresh) is one unit of work, followed by invalidation and broadcast in
//! that order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::domain::cache::keys;
use crate::domain::ports::{WriteBatch, WriteOp};
use crate::domain::service_support::{ChatPorts, ensure_can_post, map_store_error};
use crate::domain::text::{mention_handles, render, resolve_mentions, sanitize};
use crate::domain::{
    ChatEvent, ContentFilterService, Error, FilterPolicy, MESSAGE_BODY_MAX, Mention, Message,
    MessageKind, NewMessage, PresenceChange, RateLimiter, RoomId, UserId,
};

/// A stored message and the users it mentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    /// The row as stored, with mentions already rendered into the body.
    pub message: Message,
    /// Resolved mentions in order of first appearance.
    pub mentions: Vec<Mention>,
}

/// Send path for chat and system-styled messages.
#[derive(Clone)]
pub struct MessagePipeline {
    ports: ChatPorts,
    filter: ContentFilterService,
    limiter: RateLimiter,
}

impl MessagePipeline {
    /// Build the pipeline with its own filter and rate limiter over `ports`.
    #[must_use]
    pub fn new(ports: ChatPorts, policy: Arc<FilterPolicy>) -> Self {
        let filter = ContentFilterService::new(ports.clone(), policy);
        let limiter = RateLimiter::new(ports.cache.store().clone(), ports.clock.clone());
        Self {
            ports,
            filter,
            limiter,
        }
    }

    /// Validate, filter, and store a message, then announce it to the room.
    pub async fn send(
        &self,
        room_id: RoomId,
        user_id: UserId,
        raw_body: &str,
        kind: MessageKind,
    ) -> Result<SentMessage, Error> {
        let room = self.ports.require_active_room(room_id).await?;
        let membership = self.ports.require_membership(room.id, user_id).await?;
        let now = self.ports.now();
        ensure_can_post(&membership, now)?;

        let trimmed = raw_body.trim();
        check_length(trimmed)?;
        let mut body = sanitize(trimmed);
        check_length(&body)?;

        if kind == MessageKind::Text {
            let verdict = self.filter.evaluate(&body, user_id, room.id).await?;
            if !verdict.allowed {
                return Err(verdict.to_error());
            }
            body = verdict.filtered_body;
        }

        let decision = self
            .limiter
            .check(
                &keys::message_rate(user_id, room.id),
                self.ports.config.pipeline.rate_limit,
                self.ports.config.pipeline.rate_window,
            )
            .await;
        if !decision.allowed {
            info!(
                room_id = %room.id,
                user_id = %user_id,
                attempts = decision.attempts,
                "message rate limit exceeded"
            );
            return Err(decision.to_error(now));
        }

        let handles = mention_handles(&body);
        let mentions = if handles.is_empty() {
            Vec::new()
        } else {
            let users = self
                .ports
                .store
                .find_users_by_username(&handles)
                .await
                .map_err(map_store_error)?;
            resolve_mentions(&handles, &users)
        };
        let rendered = render(&body, &mentions);

        let receipt = self
            .ports
            .commit_presence(
                WriteBatch::new()
                    .with(WriteOp::InsertMessage(NewMessage {
                        room_id: room.id,
                        user_id,
                        body: rendered,
                        kind,
                        created_at: now,
                    }))
                    .with(WriteOp::UpdatePresence {
                        room_id: room.id,
                        user_id,
                        change: PresenceChange::Posted(now),
                    }),
                room.id,
                user_id,
                ensure_can_post,
            )
            .await?;
        let message = receipt
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("message insert returned no row"))?;

        self.ports.cache.invalidate_room_views(room.id).await;
        self.ports.cache.forget(&keys::presence(room.id, user_id)).await;
        debug!(
            room_id = %room.id,
            message_id = %message.id,
            mentions = mentions.len(),
            "message stored"
        );
        self.ports
            .broadcast(ChatEvent::MessageSent {
                message: message.clone(),
            })
            .await;
        Ok(SentMessage { message, mentions })
    }
}

fn check_length(body: &str) -> Result<(), Error> {
    let length = body.chars().count();
    if length == 0 {
        return Err(Error::invalid_request("message must not be empty")
            .with_details(json!({ "reason": "empty_message" })));
    }
    if length > MESSAGE_BODY_MAX {
        return Err(Error::invalid_request(format!(
            "message must be at most {MESSAGE_BODY_MAX} characters"
        ))
        .with_details(json!({ "reason": "message_too_long", "length": length })));
    }
    Ok(())
}

#[cfg(test)]
#[path = "message_pipeline_tests.rs"]
mod tests;
