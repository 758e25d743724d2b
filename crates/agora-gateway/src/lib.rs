pub mod chat;
pub mod connection;
pub mod protocol;
pub mod registry;

pub use chat::ChatService;
pub use protocol::{ProtocolHandler, Session, SessionState};
pub use registry::{ConnectionId, Room, SessionRegistry};
