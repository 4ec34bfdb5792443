//! Room-scoped chat core: messaging, presence, filtering, and moderation.

pub mod domain;
pub mod outbound;
pub mod settings;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use settings::ChatSettings;
pub use state::ChatServices;
