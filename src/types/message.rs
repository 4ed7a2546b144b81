//! Growable receive buffer for one client message

use crate::{LineLogError, Result};
use bytes::Bytes;

/// Bytes received from one client, not yet appended to the log.
///
/// The buffer starts at a fixed capacity and doubles whenever it is full.
/// Growth uses fallible allocation so an oversized message can be discarded
/// instead of aborting the process.
#[derive(Debug)]
pub struct PendingMessage {
    buf: Vec<u8>,
    filled: usize,
    growths: u32,
}

impl PendingMessage {
    /// Allocate a buffer with the given initial capacity
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|e| {
            LineLogError::ResourceExhausted(format!(
                "cannot allocate {} byte receive buffer: {}",
                capacity, e
            ))
        })?;
        buf.resize(capacity, 0);

        Ok(Self {
            buf,
            filled: 0,
            growths: 0,
        })
    }

    /// Current capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes received so far
    pub fn len(&self) -> usize {
        self.filled
    }

    /// True when nothing has been received
    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True when the next read needs more room
    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// How many times the buffer doubled
    pub fn growths(&self) -> u32 {
        self.growths
    }

    /// Double the capacity
    pub fn grow(&mut self) -> Result<()> {
        let current = self.capacity();
        let target = current.checked_mul(2).ok_or_else(|| {
            LineLogError::ResourceExhausted(format!("receive buffer of {} bytes cannot double", current))
        })?;

        self.buf.try_reserve_exact(target - current).map_err(|e| {
            LineLogError::ResourceExhausted(format!(
                "cannot grow receive buffer to {} bytes: {}",
                target, e
            ))
        })?;
        self.buf.resize(target, 0);
        self.growths += 1;
        Ok(())
    }

    /// Free space following the received bytes
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` more bytes as received
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.filled + n <= self.buf.len(),
            "advance past end of receive buffer"
        );
        self.filled += n;
    }

    /// The message is complete once the last received byte is a newline
    pub fn ends_with_newline(&self) -> bool {
        self.as_bytes().last() == Some(&b'\n')
    }

    /// Received bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Consume the buffer, keeping only the received bytes
    pub fn into_bytes(mut self) -> Bytes {
        self.buf.truncate(self.filled);
        Bytes::from(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(message: &mut PendingMessage, data: &[u8]) {
        let room = message.unfilled_mut();
        room[..data.len()].copy_from_slice(data);
        message.advance(data.len());
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let message = PendingMessage::with_capacity(32).unwrap();

        assert_eq!(message.capacity(), 32);
        assert!(message.is_empty());
        assert!(!message.is_full());
        assert!(!message.ends_with_newline());
        assert_eq!(message.growths(), 0);
    }

    #[test]
    fn test_grow_doubles_and_keeps_contents() {
        let mut message = PendingMessage::with_capacity(4).unwrap();
        fill(&mut message, b"abcd");
        assert!(message.is_full());

        message.grow().unwrap();
        assert_eq!(message.capacity(), 8);
        assert_eq!(message.as_bytes(), b"abcd");
        assert_eq!(message.unfilled_mut().len(), 4);

        fill(&mut message, b"ef\n");
        message.grow().unwrap();
        assert_eq!(message.capacity(), 16);
        assert_eq!(message.growths(), 2);
        assert!(message.ends_with_newline());
        assert_eq!(&message.into_bytes()[..], b"abcdef\n");
    }

    #[test]
    fn test_exact_capacity_without_newline_is_full() {
        let mut message = PendingMessage::with_capacity(32).unwrap();
        fill(&mut message, &[b'a'; 32]);

        assert!(message.is_full());
        assert!(!message.ends_with_newline());
    }

    #[test]
    fn test_zero_capacity_is_bumped_to_one() {
        let message = PendingMessage::with_capacity(0).unwrap();
        assert_eq!(message.capacity(), 1);
    }

    #[test]
    #[should_panic(expected = "advance past end")]
    fn test_advance_past_capacity_panics() {
        let mut message = PendingMessage::with_capacity(2).unwrap();
        message.advance(3);
    }
}
