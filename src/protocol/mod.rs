/// Wire protocol between senders and receivers
///
/// This module defines the frames exchanged over a connection and the
/// length-prefixed binary codec used by socket transports. In-process
/// delivery passes the same frames without encoding them.
mod codec;
mod message;

pub use codec::{decode, encode, read_frame, write_frame, MAX_FRAME_LEN};
pub use message::{Downstream, Upstream};
