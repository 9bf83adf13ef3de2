//! Transport boundary: message classification and per-connection dispatch

pub mod protocol;
pub mod session;

pub use protocol::{Label, Message};
pub use session::{MessageOutcome, SceneSession, SessionObserver, SessionStats};
