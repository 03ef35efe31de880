mod builder;
mod controller;
mod event;
mod handle;
pub mod reconcile;
mod turn;

pub use builder::ChatControllerBuilder;
pub use controller::{ChatController, ChatResponse, open_conversation};
pub use event::ChatEvent;
pub use handle::TurnHandle;
pub use reconcile::{HistoryEntry, reconcile, strip_echo};
