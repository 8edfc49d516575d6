//! The Ranging Service session engine. Sessions tie a transport to the
//! service instance registered locally and the one discovered on the peer;
//! observers learn when sessions attach, detach, or become ready.

pub mod characteristics;
pub mod database;
pub mod engine;
pub mod error;
pub mod observers;
pub mod server;
pub mod session;

pub use engine::RasEngine;
pub use error::RasError;
pub use session::RasSession;
