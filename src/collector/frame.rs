//! Reply framing over an unstructured byte stream.
//!
//! Reads may split a reply across chunks or carry several replies at once.
//! The decoder buffers bytes until a [`REPLY_OK`] marker completes a reply
//! and keeps whatever follows the last marker for the next chunk.

use super::CollectError;
use super::protocol::{REPLY_ERROR, REPLY_OK};

/// Stateful splitter of the reply stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every reply it completes, in arrival order.
    ///
    /// Returned replies exclude the marker. An error marker anywhere in the
    /// buffered data fails with the bytes preceding it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, CollectError> {
        self.buf.extend_from_slice(chunk);

        if let Some(idx) = find(&self.buf, REPLY_ERROR) {
            let prefix = String::from_utf8_lossy(&self.buf[..idx]).into_owned();
            return Err(CollectError::Remote(prefix));
        }

        let mut replies = Vec::new();
        while let Some(idx) = find(&self.buf, REPLY_OK) {
            let mut reply: Vec<u8> = self.buf.drain(..idx + REPLY_OK.len()).collect();
            reply.truncate(idx);
            replies.push(reply);
        }
        Ok(replies)
    }

    /// Bytes received after the last complete reply.
    pub fn remainder(&self) -> &[u8] {
        &self.buf
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
