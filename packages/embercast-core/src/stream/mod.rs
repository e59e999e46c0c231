//! Streaming machinery: codec framing, ICY metadata, and the per-listener
//! session state machine.

pub mod icy;
pub mod mp3;
pub mod session;

pub use icy::{format_metadata_block, IcyInterleaver};
pub use mp3::{parse_frame_header, FrameHeader};
pub use session::{session_stream, SessionParams};
