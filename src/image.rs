//! LC-3 object image format.
//!
//! An image is a sequence of big-endian 16-bit words:
//! - word 0: origin address
//! - words 1..: contents, placed at origin, origin + 1, ...

use std::path::{Path, PathBuf};
use thiserror::Error;

/// A loaded object image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Address of the first word.
    pub origin: u16,
    /// Words to place at `origin` onwards.
    pub words: Vec<u16>,
}

impl Image {
    /// Create an image from an origin and its words.
    pub fn new(origin: u16, words: Vec<u16>) -> Self {
        Self { origin, words }
    }

    /// Parse an image from raw file bytes.
    ///
    /// Returns `None` if there is no origin word. A trailing odd byte is
    /// ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut chunks = bytes.chunks_exact(2);

        let origin = be_word(chunks.next()?);
        let words: Vec<u16> = chunks.by_ref().map(be_word).collect();
        if !chunks.remainder().is_empty() {
            tracing::warn!(origin = origin, "image has a trailing odd byte; ignored");
        }

        Some(Self { origin, words })
    }

    /// Serialize back to the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        std::iter::once(self.origin)
            .chain(self.words.iter().copied())
            .flat_map(u16::to_be_bytes)
            .collect()
    }

    /// Number of content words (the origin is not counted).
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn be_word(pair: &[u8]) -> u16 {
    u16::from_be_bytes([pair[0], pair[1]])
}

/// Load an image file from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<Image, ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let image = Image::from_bytes(&bytes).ok_or_else(|| ImageError::MissingOrigin {
        path: path.to_path_buf(),
        len: bytes.len(),
    })?;

    tracing::info!(
        path = %path.display(),
        words = image.len(),
        "loaded image at {:#06x}",
        image.origin
    );
    Ok(image)
}

/// Load every image in order, stopping at the first failure.
///
/// Nothing is returned unless all of them load.
pub fn load_images<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Image>, ImageError> {
    paths.iter().map(load_image).collect()
}

/// Errors that can occur while loading an image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to load image {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load image {}: {len} bytes is too short for an origin word", path.display())]
    MissingOrigin { path: PathBuf, len: usize },
}
