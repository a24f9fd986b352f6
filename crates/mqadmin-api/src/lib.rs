// mqadmin-api: transport contract and admin message envelopes for broker administration

pub mod error;
pub mod loopback;
pub mod message;
pub mod transport;

pub use error::Error;
pub use loopback::{LoopbackPeer, LoopbackTransport, PeerMessage, ReplySender};
pub use message::{AdminOp, Reply, ReplyStatus, Request};
pub use transport::Transport;
