//! Hotel listener and the per-connection proxy session.

pub mod listener;
pub mod session;

pub use listener::{CdrTarget, Server, ServerConfig};
pub use session::{Session, SessionConfig, SessionEnd, SessionError, Side};
