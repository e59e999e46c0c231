//! ICY (Shoutcast/Icecast) in-band metadata.
//!
//! When a listener sends `Icy-MetaData: 1`, the response body is audio with
//! a metadata block inserted after every `ICY_METAINT` bytes of audio. This
//! module formats the blocks and owns the per-listener interleaving state.

use bytes::{Bytes, BytesMut};

use crate::protocol_constants::{ICY_MAX_PAYLOAD, ICY_METAINT};

/// Formats a stream title into a full ICY metadata block.
///
/// The first byte is the payload length in 16-byte units; the payload is
/// `StreamTitle='<title>';` zero-padded to that length. Single quotes in
/// the title are escaped as `\'` and control characters are replaced with
/// spaces. Titles too long for the one-byte length prefix are truncated.
pub fn format_metadata_block(title: &str) -> Vec<u8> {
    let mut escaped = String::with_capacity(title.len() + 8);
    for ch in title.chars() {
        if ch == '\'' {
            escaped.push_str("\\'");
        } else if ch.is_control() {
            escaped.push(' ');
        } else {
            escaped.push(ch);
        }
    }

    let max_title = ICY_MAX_PAYLOAD - "StreamTitle='';".len();
    if escaped.len() > max_title {
        let mut cut = max_title;
        while !escaped.is_char_boundary(cut) {
            cut -= 1;
        }
        escaped.truncate(cut);
    }

    let payload = format!("StreamTitle='{}';", escaped);
    let num_blocks = payload.len().div_ceil(16);
    let padded_len = num_blocks * 16;

    let mut block = Vec::with_capacity(padded_len + 1);
    block.push(num_blocks as u8);
    block.extend_from_slice(payload.as_bytes());
    block.resize(padded_len + 1, 0);
    block
}

/// Stateful per-listener ICY interleaver.
///
/// Tracks the audio-byte countdown to the next metadata point and the last
/// title actually sent, so unchanged titles collapse to the single-byte
/// `k = 0` block. Audio and metadata are batched into one output buffer per
/// input chunk to avoid small writes on the hot path.
///
/// One instance per listener session.
pub struct IcyInterleaver {
    /// Audio bytes remaining until the next metadata block.
    countdown: usize,
    /// Title carried by the last non-empty block, for change detection.
    last_title_sent: Option<String>,
    /// Scratch buffer reused across calls; `split()` hands out the content
    /// and leaves the buffer empty for the next chunk.
    out: BytesMut,
}

impl IcyInterleaver {
    /// Creates an interleaver with a full countdown and no title sent yet.
    pub fn new() -> Self {
        Self {
            countdown: ICY_METAINT,
            last_title_sent: None,
            out: BytesMut::new(),
        }
    }

    /// Restarts the countdown at a full interval.
    ///
    /// Called after a skip-to-live so the byte alignment the client counts
    /// from stays correct despite the position jump.
    pub fn reset_countdown(&mut self) {
        self.countdown = ICY_METAINT;
    }

    /// Current countdown value.
    pub fn countdown(&self) -> usize {
        self.countdown
    }

    /// Interleaves metadata blocks into an audio chunk.
    ///
    /// Emits `audio[..countdown]`, then either the single `0` byte (title
    /// unchanged) or a full metadata block, then continues until the chunk
    /// is consumed.
    pub fn interleave(&mut self, chunk: &[u8], current_title: &str) -> Bytes {
        self.out.reserve(chunk.len() + 64);

        let mut remaining = chunk;
        while !remaining.is_empty() {
            if remaining.len() < self.countdown {
                self.out.extend_from_slice(remaining);
                self.countdown -= remaining.len();
                break;
            }

            let (audio, rest) = remaining.split_at(self.countdown);
            self.out.extend_from_slice(audio);
            self.push_metadata(current_title);
            self.countdown = ICY_METAINT;
            remaining = rest;
        }

        self.out.split().freeze()
    }

    fn push_metadata(&mut self, current_title: &str) {
        if self.last_title_sent.as_deref() == Some(current_title) {
            self.out.extend_from_slice(&[0]);
            return;
        }
        let block = format_metadata_block(current_title);
        self.out.extend_from_slice(&block);
        self.last_title_sent = Some(current_title.to_string());
    }
}

impl Default for IcyInterleaver {
    fn default() -> Self {
        Self::new()
    }
}
