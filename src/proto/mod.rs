//! Wire protocol: length-delimited frames carrying UTF-8 text payloads.

mod frame;
mod request;
mod reply;

pub use frame::{write_frame, FrameBuffer, FrameError, FrameReader, HEADER_LEN, MAX_FRAME_LEN};
pub use reply::{Reply, Status};
pub use request::{Operation, Request, RequestError};

/// Field delimiter inside request and reply payloads (ASCII unit
/// separator, so it never collides with user text).
pub const FIELD_SEP: char = '\u{1f}';
