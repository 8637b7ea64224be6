//! Incremental UTF-8 decoding of a chunked response body.
//!
//! Chunk boundaries fall wherever the transport puts them, including inside a
//! multi-byte character. The decoder keeps the incomplete tail of one chunk
//! and completes it with the next, so every decoded piece is valid text.

use encoding_rs::{CoderResult, Decoder, UTF_8};

pub struct ChunkDecoder {
    inner: Decoder,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            inner: UTF_8.new_decoder(),
        }
    }

    /// Decode one chunk. Bytes of a character cut at the end of the chunk are
    /// held back until the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.run(chunk, false)
    }

    /// Flush held-back bytes at end of stream. A dangling partial character
    /// becomes U+FFFD.
    pub fn finish(mut self) -> String {
        self.run(&[], true)
    }

    fn run(&mut self, chunk: &[u8], last: bool) -> String {
        let capacity = self
            .inner
            .max_utf8_buffer_length(chunk.len())
            .unwrap_or(chunk.len() * 3 + 4);
        let mut out = String::with_capacity(capacity);
        let (result, _, _) = self.inner.decode_to_string(chunk, &mut out, last);
        // Capacity covers the worst case, so the whole chunk is consumed.
        debug_assert_eq!(result, CoderResult::InputEmpty);
        out
    }
}
