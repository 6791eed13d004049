//! Shared state and messaging between the coordinator and its workers
//!
//! The prediction worker reports through [`RecognizerEvent`] messages and
//! records its outcome in [`RuntimeState`] for whoever polls it.

pub mod messages;
pub mod state;

pub use messages::RecognizerEvent;
pub use state::RuntimeState;
