//! Whole-chunk compression of the block and edge chunks.
//!
//! The format does not record compressed lengths. A compressed chunk spans the
//! bytes up to the next chunk (or the end of the file), and the stream itself must
//! know where it ends.

use std::io::{self, BufRead, Read, Write};

use flate2::write::ZlibEncoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::{AlcovError, AlcovErrorKind};

/// How much zlib output is reserved at a time.
const ZLIB_OUTPUT_STEP: usize = 64 * 1024;

/// A byte-stream transform applied to compressed chunks.
pub trait Compressor {
    /// Compresses a whole chunk.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, AlcovError>;

    /// Decompresses a whole chunk.
    ///
    /// `expected_len` is the number of decompressed bytes the caller needs, when it
    /// is known. Decompression stops as soon as the stream yields more than that,
    /// and the result is never longer.
    ///
    /// A stream that ends before it is complete is reported as
    /// [`AlcovErrorKind::TruncatedInput`].
    fn decompress(&self, data: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, AlcovError>;
}

/// Compressed input that remembers whether the decoder read past its end.
struct ChunkReader<'a> {
    data: &'a [u8],
    exhausted: bool,
}

impl<'a> ChunkReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            exhausted: false,
        }
    }
}

impl Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() && !buf.is_empty() {
            self.exhausted = true;
        }
        self.data.read(buf)
    }
}

impl BufRead for ChunkReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.data.is_empty() {
            self.exhausted = true;
        }
        Ok(self.data)
    }

    fn consume(&mut self, amt: usize) {
        self.data.consume(amt);
    }
}

/// Decompressed output that refuses to grow past `limit` bytes.
struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl BoundedWriter {
    fn new(limit: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            limit: limit.unwrap_or(usize::MAX),
            overflowed: false,
        }
    }

    /// Classifies the outcome of a decoder run.
    ///
    /// Going past the limit ends decoding early and is not an error. Otherwise a
    /// decoder that failed after running out of input saw a truncated stream.
    fn finish(
        self,
        result: Result<(), lzma_rs::error::Error>,
        reader: &ChunkReader<'_>,
    ) -> Result<Vec<u8>, AlcovError> {
        match result {
            Ok(()) => Ok(self.buf),
            Err(_) if self.overflowed => Ok(self.buf),
            Err(e) if reader.exhausted => {
                Err(AlcovError::new(AlcovErrorKind::TruncatedInput, e))
            }
            Err(e) => Err(AlcovError::new(AlcovErrorKind::CompressionFailure, e)),
        }
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.buf.len();
        if room == 0 && !data.is_empty() {
            self.overflowed = true;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "decompressed chunk is longer than needed",
            ));
        }
        let len = data.len().min(room);
        self.buf.extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// LZMA2 streams, the compression named by the format.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lzma2;

impl Compressor for Lzma2 {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, AlcovError> {
        let mut input = data;
        let mut output = Vec::new();
        lzma_rs::lzma2_compress(&mut input, &mut output)
            .map_err(|e| AlcovError::new(AlcovErrorKind::CompressionFailure, e))?;
        Ok(output)
    }

    fn decompress(&self, data: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, AlcovError> {
        let mut reader = ChunkReader::new(data);
        let mut writer = BoundedWriter::new(expected_len);
        let result = lzma_rs::lzma2_decompress(&mut reader, &mut writer);
        writer.finish(result, &reader)
    }
}

/// Zlib streams.
///
/// Files written with this compressor can only be read back with it.
#[derive(Clone, Copy, Debug)]
pub struct Zlib {
    level: u32,
}

impl Zlib {
    /// Creates a zlib compressor with the given level from `0` to `9`.
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for Zlib {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for Zlib {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, AlcovError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| AlcovError::new(AlcovErrorKind::CompressionFailure, e))?;
        encoder
            .finish()
            .map_err(|e| AlcovError::new(AlcovErrorKind::CompressionFailure, e))
    }

    fn decompress(&self, data: &[u8], expected_len: Option<usize>) -> Result<Vec<u8>, AlcovError> {
        let limit = expected_len.unwrap_or(usize::MAX);
        let mut inflater = Decompress::new(true);
        let mut output = Vec::new();

        // `read::ZlibDecoder` reports a stream cut short as a clean end, so the
        // inflater is driven directly to tell the two apart.
        loop {
            output.reserve((limit - output.len()).clamp(1, ZLIB_OUTPUT_STEP));

            let (total_in, total_out) = (inflater.total_in(), inflater.total_out());
            let input = data.get(total_in as usize..).unwrap_or_default();
            let flush = if input.is_empty() {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let status = inflater
                .decompress_vec(input, &mut output, flush)
                .map_err(|e| AlcovError::new(AlcovErrorKind::CompressionFailure, e))?;

            if status == Status::StreamEnd || output.len() > limit {
                output.truncate(limit);
                return Ok(output);
            }
            if inflater.total_in() == total_in && inflater.total_out() == total_out {
                let kind = if input.is_empty() {
                    AlcovErrorKind::TruncatedInput
                } else {
                    AlcovErrorKind::CompressionFailure
                };
                return Err(kind.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..4096u32).flat_map(|i| (i % 7).to_le_bytes()).collect()
    }

    #[test]
    fn test_lzma2() {
        let data = sample();
        let compressed = Lzma2.compress(&data).unwrap();
        assert_eq!(Lzma2.decompress(&compressed, None).unwrap(), data);
    }

    #[test]
    fn test_lzma2_empty() {
        let compressed = Lzma2.compress(&[]).unwrap();
        assert!(Lzma2.decompress(&compressed, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_zlib() {
        let data = sample();
        let compressed = Zlib::default().compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(Zlib::default().decompress(&compressed, None).unwrap(), data);
        assert_eq!(
            Zlib::default().decompress(&compressed, Some(16)).unwrap(),
            &data[..16]
        );
    }

    #[test]
    fn test_garbage() {
        let err = Zlib::default().decompress(b"not zlib", None).unwrap_err();
        assert_eq!(err.kind(), AlcovErrorKind::CompressionFailure);

        // 0x7f is not a valid LZMA2 control byte
        let err = Lzma2.decompress(&[0x7f, 0, 0], None).unwrap_err();
        assert_eq!(err.kind(), AlcovErrorKind::CompressionFailure);
    }

    #[test]
    fn test_bounded_output() {
        let data = vec![0; 1 << 20];

        let compressed = Lzma2.compress(&data).unwrap();
        assert_eq!(Lzma2.decompress(&compressed, Some(40)).unwrap(), &data[..40]);
        assert!(Lzma2.decompress(&compressed, Some(0)).unwrap().is_empty());

        let compressed = Zlib::default().compress(&data).unwrap();
        assert_eq!(
            Zlib::default().decompress(&compressed, Some(40)).unwrap(),
            &data[..40]
        );
        assert!(Zlib::default()
            .decompress(&compressed, Some(0))
            .unwrap()
            .is_empty());

        // asking for more than the stream holds is not an error
        let compressed = Lzma2.compress(&data[..100]).unwrap();
        assert_eq!(Lzma2.decompress(&compressed, Some(4096)).unwrap().len(), 100);
    }

    #[test]
    fn test_truncated_stream() {
        let data = sample();

        let compressed = Lzma2.compress(&data).unwrap();
        for len in 0..compressed.len() {
            let err = Lzma2.decompress(&compressed[..len], None).unwrap_err();
            assert_eq!(err.kind(), AlcovErrorKind::TruncatedInput, "lzma2 length {len}");
        }

        let compressed = Zlib::default().compress(&data).unwrap();
        for len in 0..compressed.len() {
            let err = Zlib::default()
                .decompress(&compressed[..len], None)
                .unwrap_err();
            assert_eq!(err.kind(), AlcovErrorKind::TruncatedInput, "zlib length {len}");
        }
    }
}
