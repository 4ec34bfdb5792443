//! Room lifecycle: creation, deactivation, and the cached room list.

use serde_json::json;
use tracing::info;

use crate::domain::cache::keys;
use crate::domain::ports::{WriteBatch, WriteOp};
use crate::domain::service_support::{ChatPorts, map_store_error};
use crate::domain::{Error, NewRoom, Room, RoomId, RoomValidationError, UserId};

#[derive(Clone)]
pub struct RoomService {
    ports: ChatPorts,
}

impl RoomService {
    pub fn new(ports: ChatPorts) -> Self {
        Self { ports }
    }

    /// Create a room and join its creator to it.
    ///
    /// Names are unique among active rooms, ignoring case.
    pub async fn create_room(
        &self,
        creator_id: UserId,
        name: &str,
        description: Option<&str>,
    ) -> Result<Room, Error> {
        let creator = self.ports.require_user(creator_id).await?;
        let new_room = NewRoom::try_new(name, description, creator.id, self.ports.now())
            .map_err(validation_error)?;
        let taken = self
            .ports
            .store
            .find_active_room_by_name(&new_room.name)
            .await
            .map_err(map_store_error)?;
        if taken.is_some() {
            return Err(Error::conflict("a room with this name already exists")
                .with_details(json!({ "name": new_room.name })));
        }

        let receipt = self
            .ports
            .commit(WriteBatch::new().with(WriteOp::CreateRoom(new_room)))
            .await?;
        let room = receipt
            .rooms
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("room insert returned no row"))?;

        self.ports.cache.invalidate_room_list().await;
        info!(room_id = %room.id, creator_id = %creator.id, name = %room.name, "room created");
        Ok(room)
    }

    /// Deactivate a room. Refused while anyone besides the actor is online.
    pub async fn delete_room(&self, room_id: RoomId, actor_id: UserId) -> Result<Room, Error> {
        let mut room = self.ports.require_active_room(room_id).await?;
        self.ports.require_moderator(&room, actor_id).await?;
        let online_others = self
            .ports
            .store
            .list_memberships(room.id)
            .await
            .map_err(map_store_error)?
            .iter()
            .filter(|membership| membership.online && membership.user_id != actor_id)
            .count();
        if online_others > 0 {
            return Err(Error::conflict("room still has online members")
                .with_details(json!({ "onlineMembers": online_others })));
        }

        room.active = false;
        self.ports
            .commit(WriteBatch::new().with(WriteOp::UpdateRoom(room.clone())))
            .await?;
        self.ports.cache.invalidate_room_list().await;
        self.ports.cache.invalidate_room_views(room.id).await;
        info!(room_id = %room.id, actor_id = %actor_id, "room deactivated");
        Ok(room)
    }

    /// Active rooms, oldest first.
    pub async fn list_rooms(&self) -> Result<Vec<Room>, Error> {
        let store = self.ports.store.clone();
        self.ports
            .cache
            .remember(&keys::room_list(), self.ports.cache.ttls().room_list, || async move {
                store.list_active_rooms().await.map_err(map_store_error)
            })
            .await
    }
}

fn validation_error(err: RoomValidationError) -> Error {
    let field = match err {
        RoomValidationError::EmptyName | RoomValidationError::NameTooLong { .. } => "name",
        RoomValidationError::DescriptionTooLong { .. } => "description",
    };
    Error::invalid_request(err.to_string()).with_details(json!({ "field": field }))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::ErrorCode;
    use crate::domain::ports::ChatStore;
    use crate::test_support::TestChat;

    #[rstest]
    #[tokio::test]
    async fn creating_a_room_joins_the_creator() {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");
        let rooms = RoomService::new(chat.ports());

        let room = rooms
            .create_room(owner.id, "  General  ", Some("chit chat"))
            .await
            .expect("create");

        assert_eq!(room.name, "General");
        assert!(room.active);
        let membership = chat
            .store
            .find_membership(room.id, owner.id)
            .await
            .expect("lookup")
            .expect("creator membership");
        assert!(membership.online);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[tokio::test]
    async fn blank_names_are_rejected(#[case] name: &str) {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");

        let err = RoomService::new(chat.ports())
            .create_room(owner.id, name, None)
            .await
            .expect_err("blank");

        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert_eq!(err.detail("field"), Some(&json!("name")));
    }

    #[rstest]
    #[tokio::test]
    async fn names_are_unique_ignoring_case() {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");
        let rooms = RoomService::new(chat.ports());
        rooms.create_room(owner.id, "Lobby", None).await.expect("first");

        let err = rooms
            .create_room(owner.id, "LOBBY", None)
            .await
            .expect_err("duplicate");

        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[rstest]
    #[tokio::test]
    async fn deleted_names_can_be_reused() {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");
        let rooms = RoomService::new(chat.ports());
        let first = rooms.create_room(owner.id, "lobby", None).await.expect("first");
        rooms.delete_room(first.id, owner.id).await.expect("delete");

        let second = rooms.create_room(owner.id, "lobby", None).await.expect("second");

        assert_ne!(first.id, second.id);
    }

    #[rstest]
    #[tokio::test]
    async fn deletion_waits_for_other_members_to_leave() {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");
        let alice = chat.user(2, "alice");
        let room = chat.room(&owner, "lobby").await;
        chat.member(&room, &alice).await;
        let rooms = RoomService::new(chat.ports());

        let err = rooms
            .delete_room(room.id, owner.id)
            .await
            .expect_err("alice is online");
        assert_eq!(err.code(), ErrorCode::Conflict);

        let err = rooms
            .delete_room(room.id, alice.id)
            .await
            .expect_err("alice cannot delete");
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }

    #[rstest]
    #[tokio::test]
    async fn room_list_is_cached_until_a_room_changes() {
        let chat = TestChat::new();
        let owner = chat.user(1, "owner");
        let rooms = RoomService::new(chat.ports());
        rooms.create_room(owner.id, "alpha", None).await.expect("alpha");
        assert_eq!(rooms.list_rooms().await.expect("list").len(), 1);

        chat.room(&owner, "hidden").await;
        assert_eq!(rooms.list_rooms().await.expect("cached").len(), 1);

        rooms.create_room(owner.id, "beta", None).await.expect("beta");
        let names: Vec<String> = rooms
            .list_rooms()
            .await
            .expect("fresh")
            .into_iter()
            .map(|room| room.name)
            .collect();
        assert_eq!(names, ["alpha", "hidden", "beta"]);
    }
}
