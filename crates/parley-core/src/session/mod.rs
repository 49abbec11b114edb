//! The session state machine: the single consumer of the event router.

mod machine;
mod state;

pub use machine::{ChatAccepted, SessionMachine, SessionSettings};
pub use state::SessionState;
