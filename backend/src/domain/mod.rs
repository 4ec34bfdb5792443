//! Chat domain: entities, policies, and the services built on the ports.
//!
//! Services receive their collaborators through [`ChatPorts`] and never
//! reach for ambient state. Every operation returns `Result<_, Error>`;
//! expected refusals (validation, authorization, policy, conflict) are
//! ordinary error values with stable codes.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod history_service;
pub mod ids;
pub mod message;
pub mod message_pipeline;
pub mod moderation;
pub mod moderation_service;
pub mod ports;
pub mod presence_service;
pub mod rate_limit;
pub mod room;
pub mod room_service;
pub mod service_support;
pub mod text;
pub mod user;

pub use self::cache::CacheLayer;
pub use self::config::{
    CacheTtls, ChatConfig, ModerationConfig, PipelineConfig, PresenceConfig, SpamThresholds,
};
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::events::{ChatEvent, ModerationNotice, room_channel};
pub use self::filter::{
    ContentFilterService, FilterPolicy, FilterPolicyError, FilterPolicyTables, FilterVerdict,
    Severity, Violation, ViolationKind, WordRule,
};
pub use self::history_service::HistoryService;
pub use self::ids::{Actor, MessageId, ModerationActionId, ReportId, RoomId, UserId};
pub use self::message::{MESSAGE_BODY_MAX, Message, MessageKey, MessageKind, NewMessage};
pub use self::message_pipeline::{MessagePipeline, SentMessage};
pub use self::moderation::{
    HistoryPage, ModerationAction, ModerationActionFilter, ModerationActionKind,
    NewModerationAction, NewReport, PageRequest, Report, ReportFilter, ReportKind,
    ReportKindParseError, ReportStatus, ReviewDecision,
};
pub use self::moderation_service::{
    ModerationService, ReportOutcome, ReviewOutcome, ReviewRequest,
};
pub use self::presence_service::{
    OnlineUser, PresenceService, PresenceSnapshot, RoomStats, SweepReport,
};
pub use self::rate_limit::{RateLimitDecision, RateLimiter};
pub use self::room::{
    Membership, NewRoom, PresenceChange, PresenceRefusal, RestrictionChange, Room,
    RoomValidationError,
};
pub use self::room_service::RoomService;
pub use self::service_support::ChatPorts;
pub use self::text::Mention;
pub use self::user::User;
