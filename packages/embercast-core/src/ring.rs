//! Per-mount ring buffer.
//!
//! A fixed-capacity byte store addressed by *absolute* positions: the
//! writer advances a monotonically increasing `write_pos` (total bytes ever
//! written) and readers copy out of the window
//! `[write_pos - capacity, write_pos)`. One writer, many readers; readers
//! never block the writer and hold no exclusive lock.
//!
//! Capability split: [`RingWriter`] is handed to the source task by
//! `Mount::attach_source` and is the only way to append;
//! [`RingReader`] is a cheap clone handed to every listener task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::LAP_SAFETY_MARGIN;
use crate::stream::mp3;

/// Result of a [`RingReader::read_from`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes copied into the destination.
    pub len: usize,
    /// The reader's next position (`repositioned start + len`).
    pub new_pos: u64,
    /// Bytes skipped because the writer lapped the reader. Zero on the
    /// normal path; the source of truth for "the listener was too slow here".
    pub skipped: u64,
}

/// Outcome of waiting for new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// `write_pos` advanced past the waited position.
    Ready,
    /// The deadline elapsed first.
    TimedOut,
    /// The cancellation token fired first.
    Cancelled,
}

/// Codec awareness for sync-point searches.
///
/// Only MP3 framing is searchable; other codecs stream from an arbitrary
/// byte without a snap (Ogg pages and ADTS resync are left to the client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// No sync search; `find_sync_point` is the identity.
    None,
    /// MPEG audio frame-header search.
    Mp3,
}

impl SyncMode {
    /// Picks the sync mode for a mount content type.
    pub fn for_content_type(content_type: &str) -> Self {
        match content_type {
            "audio/mpeg" | "audio/mp3" => Self::Mp3,
            _ => Self::None,
        }
    }
}

struct RingInner {
    capacity: usize,
    storage: RwLock<Box<[u8]>>,
    /// Total bytes ever written. Updated under the storage write lock with
    /// Release ordering; readers load it under the read lock.
    write_pos: AtomicU64,
    notify: Notify,
}

impl RingInner {
    /// Absolute-position byte access. Caller must hold the storage lock and
    /// guarantee `pos` is inside the retrievable window.
    #[inline]
    fn byte_at(&self, storage: &[u8], pos: u64) -> u8 {
        storage[(pos % self.capacity as u64) as usize]
    }
}

/// A per-mount circular byte store shared between one writer and many readers.
pub struct RingBuffer {
    inner: Arc<RingInner>,
}

impl RingBuffer {
    /// Creates a buffer holding the last `capacity` bytes written.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > LAP_SAFETY_MARGIN, "ring capacity too small");
        Self {
            inner: Arc::new(RingInner {
                capacity,
                storage: RwLock::new(vec![0u8; capacity].into_boxed_slice()),
                write_pos: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Total bytes ever written.
    pub fn write_pos(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Acquire)
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Creates a read handle. Cheap; one per listener.
    pub fn reader(&self) -> RingReader {
        RingReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Creates the write handle for a newly attached source.
    ///
    /// Exclusivity is the mount's invariant (at most one active source),
    /// not the type system's: the mount only constructs a writer inside
    /// `attach_source`.
    pub(crate) fn writer(&self) -> RingWriter {
        RingWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Exclusive append capability held by the active source task.
pub struct RingWriter {
    inner: Arc<RingInner>,
}

impl RingWriter {
    /// Appends `bytes`, advancing `write_pos` and waking all waiting
    /// readers. Never blocks on readers.
    ///
    /// Writes larger than the capacity keep only the trailing `capacity`
    /// bytes (the rest would be unreadable anyway).
    pub fn write(&self, bytes: &[u8]) {
        let total = bytes.len();
        if total == 0 {
            return;
        }
        let capacity = self.inner.capacity;
        let tail = if total > capacity {
            &bytes[total - capacity..]
        } else {
            bytes
        };

        {
            let mut storage = self.inner.storage.write();
            let pos = self.inner.write_pos.load(Ordering::Relaxed);
            // Oversized writes land as if the skipped prefix had been
            // written: position still advances by the full input length.
            let start = pos + (total - tail.len()) as u64;
            let offset = (start % capacity as u64) as usize;
            let first = tail.len().min(capacity - offset);
            storage[offset..offset + first].copy_from_slice(&tail[..first]);
            if first < tail.len() {
                storage[..tail.len() - first].copy_from_slice(&tail[first..]);
            }
            self.inner
                .write_pos
                .store(pos + total as u64, Ordering::Release);
        }

        self.inner.notify.notify_waiters();
    }

    /// Total bytes ever written.
    pub fn write_pos(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Acquire)
    }
}

/// Shared read capability. Cloned into every listener task.
#[derive(Clone)]
pub struct RingReader {
    inner: Arc<RingInner>,
}

impl RingReader {
    /// Total bytes ever written.
    pub fn write_pos(&self) -> u64 {
        self.inner.write_pos.load(Ordering::Acquire)
    }

    /// Fixed capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Copies up to `dst.len()` bytes starting at absolute position `pos`.
    ///
    /// If the writer lapped the reader (`write_pos - pos > capacity`), the
    /// read repositions to `write_pos - capacity + LAP_SAFETY_MARGIN` and
    /// reports the gap in [`ReadOutcome::skipped`]. A read at or past
    /// `write_pos` returns zero bytes and leaves the position unchanged.
    pub fn read_from(&self, pos: u64, dst: &mut [u8]) -> ReadOutcome {
        let storage = self.inner.storage.read();
        let write_pos = self.inner.write_pos.load(Ordering::Acquire);

        if pos >= write_pos {
            return ReadOutcome {
                len: 0,
                new_pos: pos,
                skipped: 0,
            };
        }

        let capacity = self.inner.capacity as u64;
        let (start, skipped) = if write_pos - pos > capacity {
            let start = write_pos - capacity + LAP_SAFETY_MARGIN as u64;
            (start, start - pos)
        } else {
            (pos, 0)
        };

        let available = (write_pos - start) as usize;
        let len = dst.len().min(available);
        let offset = (start % capacity) as usize;
        let first = len.min(self.inner.capacity - offset);
        dst[..first].copy_from_slice(&storage[offset..offset + first]);
        if first < len {
            dst[first..len].copy_from_slice(&storage[..len - first]);
        }

        ReadOutcome {
            len,
            new_pos: start + len as u64,
            skipped,
        }
    }

    /// Scans forward from `max(pos, write_pos - capacity)` for the first
    /// byte that begins a valid codec frame. Returns `pos` unchanged when
    /// the mode has no framing or no header exists in the window.
    pub fn find_sync_point(&self, pos: u64, mode: SyncMode) -> u64 {
        if mode == SyncMode::None {
            return pos;
        }
        let storage = self.inner.storage.read();
        let write_pos = self.inner.write_pos.load(Ordering::Acquire);
        let low = pos.max(write_pos.saturating_sub(self.inner.capacity as u64));

        if write_pos < mp3::FRAME_HEADER_LEN as u64 {
            return pos;
        }
        let mut candidate = low;
        while candidate + mp3::FRAME_HEADER_LEN as u64 <= write_pos {
            let header = [
                self.inner.byte_at(&storage, candidate),
                self.inner.byte_at(&storage, candidate + 1),
                self.inner.byte_at(&storage, candidate + 2),
                self.inner.byte_at(&storage, candidate + 3),
            ];
            if mp3::is_frame_header(&header) {
                return candidate;
            }
            candidate += 1;
        }
        pos
    }

    /// Blocks until `write_pos > pos`, the deadline elapses, or the token
    /// is cancelled. Event-driven: the wakeup comes from the writer's
    /// notify, never from a poll loop.
    pub async fn wait_for_data(
        &self,
        pos: u64,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        loop {
            // Register interest before re-checking the condition so a write
            // between the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.inner.write_pos.load(Ordering::Acquire) > pos {
                return WaitOutcome::Ready;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CAP: usize = 64 * 1024;

    fn ring_with_writer() -> (RingBuffer, RingWriter) {
        let ring = RingBuffer::new(CAP);
        let writer = ring.writer();
        (ring, writer)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn write_advances_position_monotonically() {
        let (ring, writer) = ring_with_writer();
        assert_eq!(ring.write_pos(), 0);
        writer.write(&[1, 2, 3]);
        assert_eq!(ring.write_pos(), 3);
        writer.write(&[4]);
        assert_eq!(ring.write_pos(), 4);
        writer.write(&[]);
        assert_eq!(ring.write_pos(), 4);
    }

    #[test]
    fn read_returns_written_bytes_in_order() {
        let (ring, writer) = ring_with_writer();
        let data = patterned(1000);
        writer.write(&data);

        let reader = ring.reader();
        let mut dst = vec![0u8; 1000];
        let outcome = reader.read_from(0, &mut dst);
        assert_eq!(outcome.len, 1000);
        assert_eq!(outcome.new_pos, 1000);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(dst, data);
    }

    #[test]
    fn read_at_head_returns_nothing() {
        let (ring, writer) = ring_with_writer();
        writer.write(&patterned(10));
        let reader = ring.reader();
        let mut dst = [0u8; 16];
        let outcome = reader.read_from(10, &mut dst);
        assert_eq!(outcome.len, 0);
        assert_eq!(outcome.new_pos, 10);
        let outcome = reader.read_from(99, &mut dst);
        assert_eq!(outcome.len, 0);
        assert_eq!(outcome.new_pos, 99);
    }

    #[test]
    fn read_is_clamped_to_available_bytes() {
        let (ring, writer) = ring_with_writer();
        writer.write(&patterned(100));
        let reader = ring.reader();
        let mut dst = vec![0u8; 200];
        let outcome = reader.read_from(40, &mut dst);
        assert_eq!(outcome.len, 60);
        assert_eq!(outcome.new_pos, 100);
        assert_eq!(&dst[..60], &patterned(100)[40..]);
    }

    #[test]
    fn wraparound_preserves_byte_order() {
        let (ring, writer) = ring_with_writer();
        // Fill almost to capacity, then write across the wrap boundary.
        let fill = patterned(CAP - 10);
        writer.write(&fill);
        let cross: Vec<u8> = (0..64u8).collect();
        writer.write(&cross);

        let reader = ring.reader();
        let mut dst = vec![0u8; 64];
        let outcome = reader.read_from((CAP - 10) as u64, &mut dst);
        assert_eq!(outcome.len, 64);
        assert_eq!(dst, cross);
    }

    #[test]
    fn lapped_reader_is_repositioned_with_skip_accounting() {
        let (ring, writer) = ring_with_writer();
        // Write 3x capacity so position 0 is long gone.
        for _ in 0..3 {
            writer.write(&patterned(CAP));
        }
        let write_pos = ring.write_pos();

        let reader = ring.reader();
        let mut dst = vec![0u8; 512];
        let outcome = reader.read_from(0, &mut dst);

        assert!(outcome.skipped > 0);
        let expected_start = write_pos - CAP as u64 + LAP_SAFETY_MARGIN as u64;
        assert_eq!(outcome.skipped, expected_start);
        assert_eq!(outcome.new_pos, expected_start + outcome.len as u64);
        // Lap safety: after repositioning the reader is back inside the window.
        assert!(write_pos - outcome.new_pos <= CAP as u64);
    }

    #[test]
    fn oversized_write_keeps_trailing_capacity_bytes() {
        let (ring, writer) = ring_with_writer();
        let big = patterned(CAP * 2 + 17);
        writer.write(&big);
        assert_eq!(ring.write_pos(), big.len() as u64);

        let reader = ring.reader();
        let tail_start = big.len() - 1024;
        let mut dst = vec![0u8; 1024];
        let outcome = reader.read_from(tail_start as u64, &mut dst);
        assert_eq!(outcome.len, 1024);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(&dst[..], &big[tail_start..]);
    }

    #[test]
    fn sync_mode_none_is_identity() {
        let (ring, writer) = ring_with_writer();
        writer.write(&[0u8; 128]);
        let reader = ring.reader();
        assert_eq!(reader.find_sync_point(5, SyncMode::None), 5);
    }

    #[test]
    fn find_sync_point_locates_mp3_header() {
        let (ring, writer) = ring_with_writer();
        let mut data = vec![0u8; 300];
        // Valid MPEG1 Layer III header: 0xFF 0xFB 0x90 0x64 (128kbps, 44.1kHz).
        data[200] = 0xFF;
        data[201] = 0xFB;
        data[202] = 0x90;
        data[203] = 0x64;
        writer.write(&data);

        let reader = ring.reader();
        assert_eq!(reader.find_sync_point(0, SyncMode::Mp3), 200);
        assert_eq!(reader.find_sync_point(150, SyncMode::Mp3), 200);
        // Past the header: nothing found, position unchanged.
        assert_eq!(reader.find_sync_point(204, SyncMode::Mp3), 204);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_data_times_out_without_writes() {
        let (ring, _writer) = ring_with_writer();
        let reader = ring.reader();
        let cancel = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        assert_eq!(
            reader.wait_for_data(0, deadline, &cancel).await,
            WaitOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn wait_for_data_wakes_on_write() {
        let (ring, writer) = ring_with_writer();
        let reader = ring.reader();
        let cancel = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

        let waiter = tokio::spawn(async move { reader.wait_for_data(0, deadline, &cancel).await });
        tokio::task::yield_now().await;
        writer.write(&[1, 2, 3]);

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn wait_for_data_observes_cancellation() {
        let (ring, _writer) = ring_with_writer();
        let reader = ring.reader();
        let cancel = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

        let token = cancel.clone();
        let waiter = tokio::spawn(async move { reader.wait_for_data(0, deadline, &token).await });
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_data_already_present() {
        let (ring, writer) = ring_with_writer();
        writer.write(&[9; 10]);
        let reader = ring.reader();
        let cancel = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(1);
        assert_eq!(
            reader.wait_for_data(0, deadline, &cancel).await,
            WaitOutcome::Ready
        );
    }
}
