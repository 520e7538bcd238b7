//! The voice agent: session lifecycle, turn state machine and the pipeline
//! that turns user speech into a spoken reply.

pub mod actor;
pub mod connection;
pub mod history;
pub mod interruption;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod state;

pub use registry::{CreateSession, SessionRegistry};
pub use session::SessionSnapshot;
