//! Whole-blob compression applied to a batch before it is written.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

/// Compression applied to flushed objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionFormat {
    #[default]
    Uncompressed,
    Gzip,
}

impl CompressionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::Uncompressed => "UNCOMPRESSED",
            CompressionFormat::Gzip => "GZIP",
        }
    }

    /// Encode a concatenated batch.
    pub fn encode(&self, blob: Bytes) -> std::io::Result<Bytes> {
        match self {
            CompressionFormat::Uncompressed => Ok(blob),
            CompressionFormat::Gzip => {
                let mut encoder = GzEncoder::new(Vec::with_capacity(blob.len() / 2), Compression::default());
                encoder.write_all(&blob)?;
                Ok(Bytes::from(encoder.finish()?))
            }
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNCOMPRESSED" => Ok(CompressionFormat::Uncompressed),
            "GZIP" => Ok(CompressionFormat::Gzip),
            other => Err(format!("unsupported CompressionFormat: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_encodes_whole_blob() {
        let blob = Bytes::from_static(b"{\"a\":1}{\"a\":2}");
        let encoded = CompressionFormat::Gzip.encode(blob.clone()).unwrap();
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);

        let mut decoded = Vec::new();
        GzDecoder::new(&encoded[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, blob.as_ref());
    }

    #[test]
    fn test_uncompressed_passes_through() {
        let blob = Bytes::from_static(b"raw");
        assert_eq!(CompressionFormat::Uncompressed.encode(blob.clone()).unwrap(), blob);
    }

    #[test]
    fn test_parse_rejects_unsupported_formats() {
        assert_eq!("GZIP".parse::<CompressionFormat>().unwrap(), CompressionFormat::Gzip);
        assert!("Snappy".parse::<CompressionFormat>().is_err());
        assert!("ZIP".parse::<CompressionFormat>().is_err());
    }
}
