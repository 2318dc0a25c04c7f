//! Decompression and manifest extraction for ACI byte streams.
//!
//! An image arrives either as a plain tar or gzip-compressed; the content
//! key is always derived from the decompressed bytes.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;

use crate::manifest::ImageManifest;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub(crate) enum ImageReader<R: Read> {
    Plain(R),
    Gzip(GzDecoder<R>),
}

impl<R: Read> Read for ImageReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

/// Sniff the stream for the gzip magic and wrap it in the matching
/// decompressor, rewound to the start.
pub(crate) fn decompressed_reader<R: Read + Seek>(mut r: R) -> Result<ImageReader<R>> {
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = r
            .read(&mut magic[filled..])
            .context("failed to sniff image stream")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    r.seek(SeekFrom::Start(0))
        .context("failed to rewind image stream")?;
    if filled == magic.len() && magic == GZIP_MAGIC {
        Ok(ImageReader::Gzip(GzDecoder::new(r)))
    } else {
        Ok(ImageReader::Plain(r))
    }
}

/// Read the `manifest` entry out of an uncompressed tar image.
pub(crate) fn manifest_from_image<R: Read>(r: R) -> Result<ImageManifest> {
    let mut archive = tar::Archive::new(r);
    for entry in archive.entries().context("failed to read image tar")? {
        let mut entry = entry.context("failed to read image tar entry")?;
        let is_manifest = {
            let path = entry.path().context("bad path in image tar")?;
            path.strip_prefix("./").unwrap_or(&path) == Path::new("manifest")
        };
        if !is_manifest {
            continue;
        }
        let mut buf = String::new();
        entry
            .read_to_string(&mut buf)
            .context("failed to read image manifest entry")?;
        return serde_json::from_str(&buf).context("failed to parse image manifest");
    }
    bail!("image contains no manifest")
}
