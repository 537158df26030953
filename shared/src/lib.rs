//! Wire protocol spoken between the remote-control server and its clients.
//!
//! Text messages are a tag and a payload separated by [`DELIMITER`]. Nothing
//! terminates a message on the wire: one socket read carries one message.
//! File exports are prefixed by a binary [`TransferHeader`] laid out the way a
//! Qt `QDataStream` writes it, so existing clients can keep decoding it.

pub mod codec;
pub mod key;

pub use codec::{FrameError, Message, Tag, TransferHeader};
pub use key::SharedKey;

/// Port the remote-control listener binds when none is configured.
pub const DEFAULT_PORT: u16 = 7777;

/// Field separator of text messages.
pub const DELIMITER: u8 = b'|';

/// Status label reported while the game server process runs.
pub const STATUS_RUNNING: &str = "Minecraft Server: Running";

/// Status label reported while the game server process is stopped.
pub const STATUS_STOPPED: &str = "Minecraft Server: Stopped";
