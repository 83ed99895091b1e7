//! ICY (Shoutcast/Icecast) in-band metadata formatting and injection.

use bytes::{Bytes, BytesMut};

use crate::metadata::StreamMetadata;
use crate::protocol_constants::ICY_BLOCK_SIZE;

/// Stateless ICY metadata block formatting.
pub struct IcyFormatter;

impl IcyFormatter {
    /// Formats metadata into an ICY metadata block: a single length byte
    /// (`k`, meaning `k * 16` bytes follow) and, unless the block is empty,
    /// a `StreamTitle='...';` payload padded to the next 16-byte boundary.
    #[must_use]
    pub fn format_metadata(metadata: &StreamMetadata) -> Vec<u8> {
        let title = match (&metadata.artist, &metadata.title) {
            (Some(a), Some(t)) => format!("{} - {}", a, t),
            (None, Some(t)) => t.clone(),
            (Some(a), None) => a.clone(),
            (None, None) => return vec![0],
        };

        if title.is_empty() {
            return vec![0];
        }

        // ICY uses single quotes as delimiters; substitute the Unicode
        // right single quotation mark rather than backslash-escaping so
        // players that don't unescape still render it correctly.
        let title = title.replace('\'', "\u{2019}");
        let meta_str = format!("StreamTitle='{}';", title);
        let meta_bytes = meta_str.as_bytes();

        let num_blocks = meta_bytes.len().div_ceil(ICY_BLOCK_SIZE);
        let padded_len = num_blocks * ICY_BLOCK_SIZE;

        let mut result = Vec::with_capacity(padded_len + 1);
        result.push(num_blocks as u8);
        result.extend_from_slice(meta_bytes);
        result.resize(padded_len + 1, 0);
        result
    }
}

/// Stateful per-listener injector: tracks bytes since the last metadata
/// frame and interleaves a frame every `metaint` bytes. Caches the
/// formatted block so an unchanged title costs no reformatting, and reuses
/// a scratch buffer so steady-state playback does no per-chunk allocation.
pub struct IcyMetadataInjector {
    metaint: usize,
    bytes_since_meta: usize,
    cached_metadata: Vec<u8>,
    last_artist: Option<String>,
    last_title: Option<String>,
    output_buffer: BytesMut,
}

impl IcyMetadataInjector {
    #[must_use]
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            bytes_since_meta: 0,
            cached_metadata: vec![0],
            last_artist: None,
            last_title: None,
            output_buffer: BytesMut::new(),
        }
    }

    fn update_metadata_cache(&mut self, metadata: &StreamMetadata) -> usize {
        if self.last_artist != metadata.artist || self.last_title != metadata.title {
            self.cached_metadata = IcyFormatter::format_metadata(metadata);
            self.last_artist = metadata.artist.clone();
            self.last_title = metadata.title.clone();
        }
        self.cached_metadata.len()
    }

    /// Interleaves ICY metadata frames into `chunk` at `metaint` boundaries,
    /// returning the combined audio+metadata bytes to write to the socket.
    pub fn inject(&mut self, chunk: &[u8], metadata: &StreamMetadata) -> Bytes {
        let meta_len = self.update_metadata_cache(metadata);

        let total_bytes = self.bytes_since_meta + chunk.len();
        let num_insertions = total_bytes / self.metaint;
        self.output_buffer
            .reserve(chunk.len() + num_insertions * meta_len);

        let mut remaining = chunk;
        while !remaining.is_empty() {
            let bytes_to_meta = self.metaint - self.bytes_since_meta;
            if remaining.len() < bytes_to_meta {
                self.output_buffer.extend_from_slice(remaining);
                self.bytes_since_meta += remaining.len();
                break;
            }
            self.output_buffer
                .extend_from_slice(&remaining[..bytes_to_meta]);
            self.output_buffer.extend_from_slice(&self.cached_metadata);
            remaining = &remaining[bytes_to_meta..];
            self.bytes_since_meta = 0;
        }

        self.output_buffer.split().freeze()
    }

    #[must_use]
    pub fn bytes_since_meta(&self) -> usize {
        self.bytes_since_meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: Option<&str>, artist: Option<&str>) -> StreamMetadata {
        StreamMetadata {
            title: title.map(String::from),
            artist: artist.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn empty_metadata_returns_zero_byte() {
        assert_eq!(IcyFormatter::format_metadata(&meta(None, None)), vec![0]);
    }

    #[test]
    fn title_only_pads_to_sixteen_byte_boundary() {
        let result = IcyFormatter::format_metadata(&meta(Some("Test Song"), None));
        assert_eq!(result[0], 2); // "StreamTitle='Test Song';" -> 2 blocks
        assert_eq!(result.len(), 33);
    }

    #[test]
    fn artist_and_title_join_with_separator() {
        let result = IcyFormatter::format_metadata(&meta(Some("Song"), Some("Artist")));
        let content = String::from_utf8_lossy(&result[1..]);
        assert!(content.contains("Artist - Song"));
    }

    #[test]
    fn ascii_apostrophe_becomes_unicode_quote() {
        let result = IcyFormatter::format_metadata(&meta(Some("It's a Test"), None));
        let content = String::from_utf8_lossy(&result[1..]);
        assert!(content.contains("It\u{2019}s a Test"));
        assert!(!content.contains("It's a Test"));
    }

    #[test]
    fn injector_inserts_frame_at_exact_boundary() {
        let mut injector = IcyMetadataInjector::new(16_000);
        let chunk = vec![0u8; 16_000];
        let result = injector.inject(&chunk, &StreamMetadata::default());
        assert_eq!(result.len(), 16_001);
        assert_eq!(result[16_000], 0);
        assert_eq!(injector.bytes_since_meta(), 0);
    }

    #[test]
    fn injector_handles_multiple_boundaries_in_one_chunk() {
        let mut injector = IcyMetadataInjector::new(1000);
        let chunk = vec![0u8; 2500];
        let result = injector.inject(&chunk, &StreamMetadata::default());
        assert_eq!(result.len(), 2500 + 2);
        assert_eq!(injector.bytes_since_meta(), 500);
    }

    #[test]
    fn changed_title_changes_the_block() {
        let mut injector = IcyMetadataInjector::new(1000);
        let chunk = vec![0u8; 1000];
        let first = injector.inject(&chunk, &meta(Some("Song A"), None));
        let block_a = first[1000..].to_vec();
        let second = injector.inject(&chunk, &meta(Some("Song B"), None));
        let block_b = second[1000..].to_vec();
        assert_ne!(block_a, block_b);
    }
}
