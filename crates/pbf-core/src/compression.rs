use std::io::Read;

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression as ZlibLevel;

use crate::error::Result;
use crate::memory_buffer::MemoryBuffer;

/// Scratch window used for each streaming inflate/deflate chunk, matching
/// the source's fixed 32 KiB window.
const SCRATCH_WINDOW: usize = 32 * 1024;

/// Streams `src` through zlib inflate, accumulating 32 KiB segments and
/// flattening them into one contiguous [`MemoryBuffer`] on success. Partial
/// segments are simply dropped on any terminal error. `max_output_bytes`
/// bounds the final flattening allocation — zlib's compression ratio means
/// a small `src` can expand far beyond any bound on the input, so this is
/// checked against the accumulated total before the last allocation rather
/// than derived from `src.len()`.
pub fn inflate(src: &[u8], max_output_bytes: u64) -> Result<MemoryBuffer> {
    let mut decoder = ZlibDecoder::new(src);
    let segments = read_in_segments(&mut decoder)?;
    flatten(segments, max_output_bytes)
}

/// Streams `src` through zlib deflate at the default compression level.
pub fn deflate(src: &[u8], max_output_bytes: u64) -> Result<MemoryBuffer> {
    let mut encoder = ZlibEncoder::new(src, ZlibLevel::default());
    let segments = read_in_segments(&mut encoder)?;
    flatten(segments, max_output_bytes)
}

fn read_in_segments(reader: &mut impl Read) -> Result<Vec<Vec<u8>>> {
    let mut segments = Vec::new();
    loop {
        let mut chunk = vec![0u8; SCRATCH_WINDOW];
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        chunk.truncate(n);
        segments.push(chunk);
    }
    Ok(segments)
}

fn flatten(segments: Vec<Vec<u8>>, max_output_bytes: u64) -> Result<MemoryBuffer> {
    let total: usize = segments.iter().map(Vec::len).sum();
    let mut buffer = MemoryBuffer::new_checked(total, max_output_bytes)?;
    let mut cursor = 0;
    for segment in &segments {
        buffer.copy_from_at(cursor, segment)?;
        cursor += segment.len();
    }
    Ok(buffer)
}
