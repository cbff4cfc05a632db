/// Ban check and per-event bookkeeping
pub mod access;
mod broadcast;
/// Cancellable deletion of delivered videos
pub mod cleanup;
/// Command definitions
pub mod commands;
/// Teloxide update handlers
pub mod handlers;
mod library;
mod moderation;
/// Throttle for repeated "banned" notices
pub mod notice_cache;
/// Event routing
pub mod router;
/// Conversation state and dialogue management
pub mod state;
/// Keyboards, captions and texts
pub mod views;

pub use access::{Access, AccessGate};
pub use cleanup::MessageCleanup;
pub use commands::Command;
pub use notice_cache::DeniedNoticeCache;
pub use router::{Actor, DispatchRouter, InboundEvent, Outcome};
pub use state::{ConversationState, ConversationStore};
