//! Keyset pagination and search over room history.
//!
//! Rows are ordered by `(created_at, id)`, so every page boundary is exact
//! even when timestamps collide. Pages are cached under the room's history
//! generation; bumping the generation on every write retires all cached
//! pages at once, even on backends that cannot delete by prefix.

use pagination::{Direction, PageLimit, Paginated, split_lookahead};
use tracing::debug;

use crate::domain::cache::keys;
use crate::domain::ports::MessageQuery;
use crate::domain::service_support::{ChatPorts, map_store_error};
use crate::domain::{Error, Message, MessageId, MessageKey, Room, RoomId};

/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;
/// Search results returned when the caller names no limit.
pub const DEFAULT_SEARCH_SIZE: usize = 20;
/// Most search results a caller may request.
pub const MAX_SEARCH_SIZE: usize = 50;

/// Cursor-paginated reads of a room's messages.
#[derive(Clone)]
pub struct HistoryService {
    ports: ChatPorts,
}

impl HistoryService {
    /// History reads over `ports`, cached through `ports.cache`.
    #[must_use]
    pub fn new(ports: ChatPorts) -> Self {
        Self { ports }
    }

    /// One page of messages strictly before or after `cursor`.
    ///
    /// Without a cursor, `Before` returns the newest messages in
    /// chronological order; `After` returns the oldest. A malformed cursor
    /// is treated as absent.
    pub async fn page(
        &self,
        room_id: RoomId,
        cursor: Option<&str>,
        limit: Option<usize>,
        direction: Direction,
    ) -> Result<Paginated<Message>, Error> {
        let room = self.require_room(room_id).await?;
        let limit = PageLimit::clamped(limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let anchor = MessageKey::decode(cursor);
        if cursor.is_some() && anchor.is_none() {
            debug!(room_id = %room.id, "ignoring malformed history cursor");
        }

        let Some(generation) = self.ports.cache.history_generation(room.id).await else {
            return self.fetch_page(room.id, anchor, limit, direction).await;
        };
        let anchor_token = anchor.and_then(MessageKey::encode);
        let key = keys::history_page(
            room.id,
            generation,
            direction,
            anchor_token.as_deref(),
            limit.get(),
        );
        let ttl = self.ports.cache.ttls().history_page;
        self.ports
            .cache
            .remember(&key, ttl, || {
                self.fetch_page(room.id, anchor, limit, direction)
            })
            .await
    }

    /// Messages newer than `message_id`, oldest first. Used by clients to
    /// catch up after a reconnect.
    pub async fn after(
        &self,
        room_id: RoomId,
        message_id: MessageId,
        limit: Option<usize>,
    ) -> Result<Paginated<Message>, Error> {
        let reference = self
            .ports
            .store
            .find_message(message_id)
            .await
            .map_err(map_store_error)?
            .filter(|message| message.room_id == room_id)
            .ok_or_else(|| Error::not_found("message not found in this room"))?;
        let cursor = reference.cursor();
        self.page(room_id, cursor.as_deref(), limit, Direction::After)
            .await
    }

    /// Text messages containing `query`, ignoring case, newest first.
    /// Results are not cached.
    pub async fn search(
        &self,
        room_id: RoomId,
        query: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Paginated<Message>, Error> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_request("search query must not be empty"));
        }
        let room = self.require_room(room_id).await?;
        let limit = PageLimit::clamped(limit, DEFAULT_SEARCH_SIZE, MAX_SEARCH_SIZE);
        let rows = self
            .ports
            .store
            .list_messages(&MessageQuery {
                room_id: room.id,
                anchor: MessageKey::decode(cursor),
                direction: Direction::Before,
                limit: limit.fetch_size(),
                text_only: true,
                contains: Some(query.to_owned()),
            })
            .await
            .map_err(map_store_error)?;
        let (items, has_more) = split_lookahead(rows, limit);
        Ok(envelope(items, limit, has_more))
    }

    async fn fetch_page(
        &self,
        room_id: RoomId,
        anchor: Option<MessageKey>,
        limit: PageLimit,
        direction: Direction,
    ) -> Result<Paginated<Message>, Error> {
        let rows = self
            .ports
            .store
            .list_messages(&MessageQuery {
                room_id,
                anchor,
                direction,
                limit: limit.fetch_size(),
                text_only: false,
                contains: None,
            })
            .await
            .map_err(map_store_error)?;
        let (mut items, has_more) = split_lookahead(rows, limit);
        if direction == Direction::Before && anchor.is_none() {
            items.reverse();
        }
        Ok(envelope(items, limit, has_more))
    }

    async fn require_room(&self, room_id: RoomId) -> Result<Room, Error> {
        self.ports
            .store
            .find_room(room_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| Error::not_found("room not found"))
    }
}

/// Wrap rows with chronological cursors: `prev` at the oldest row, `next`
/// at the newest.
fn envelope(items: Vec<Message>, limit: PageLimit, has_more: bool) -> Paginated<Message> {
    let oldest = items.iter().map(Message::key).min();
    let newest = items.iter().map(Message::key).max();
    Paginated::new(items, limit, has_more).with_cursors(
        newest.and_then(MessageKey::encode),
        oldest.and_then(MessageKey::encode),
    )
}

#[cfg(test)]
#[path = "history_service_tests.rs"]
mod tests;
