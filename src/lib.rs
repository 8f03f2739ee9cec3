pub mod api;
pub mod engine;
pub mod error;
pub mod events;
pub mod managers;
pub mod notify;
pub mod realtime;
pub mod render;
pub mod sched;
pub mod settings;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use events::{UiBus, UiEvent};
