//! Image decoding for uploaded bytes.
//!
//! Decodes in memory first. Blobs the in-memory path rejects are written to a
//! uniquely named temporary file and decoded from disk, where header-less
//! formats are tried explicitly. The temporary file is removed on every exit
//! path.

use image::error::ImageFormatHint;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, RgbImage};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const TEMP_FILE_PREFIX: &str = "facereg-";
const TEMP_FILE_SUFFIX: &str = ".img";

/// Formats with no magic bytes; content sniffing never recognizes them.
const HEADERLESS_FORMATS: [ImageFormat; 1] = [ImageFormat::Tga];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image data")]
    Empty,
    #[error("failed to decode image: {0}")]
    Undecodable(String),
}

/// Turns uploaded bytes into an RGB raster.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    temp_dir: PathBuf,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ImageDecoder {
    /// Create a decoder whose fallback path writes into `temp_dir`.
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Decode `bytes` into an RGB8 image.
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        match decode_from_memory(bytes) {
            Ok(image) => return Ok(image.to_rgb8()),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "in-memory decode failed; falling back to file decode");
            }
        }

        let image = self.decode_via_temp_file(bytes)?;
        Ok(image.to_rgb8())
    }

    fn decode_via_temp_file(&self, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        let temp = stage_temp_file(&self.temp_dir, bytes).map_err(|e| {
            tracing::warn!(error = %e, dir = %self.temp_dir.display(), "could not stage image for file decode");
            DecodeError::Undecodable(format!("temp file: {e}"))
        })?;

        decode_from_disk(temp.path()).map_err(|e| {
            tracing::warn!(error = %e, "file decode failed");
            DecodeError::Undecodable(e.to_string())
        })
    }
}

fn decode_from_memory(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    image::load_from_memory(bytes)
}

/// Decode a file, trying the sniffed format first and then each header-less
/// format in turn.
fn decode_from_disk(path: &Path) -> Result<DynamicImage, ImageError> {
    let sniffed = ImageReader::open(path)?.with_guessed_format()?;
    let mut last_err = match sniffed.format() {
        Some(_) => match sniffed.decode() {
            Ok(image) => return Ok(image),
            Err(e) => e,
        },
        None => ImageError::Unsupported(ImageFormatHint::Unknown.into()),
    };

    for format in HEADERLESS_FORMATS {
        let mut reader = ImageReader::open(path)?;
        reader.set_format(format);
        match reader.decode() {
            Ok(image) => {
                tracing::debug!(?format, "decoded header-less image from disk");
                return Ok(image);
            }
            Err(e) => last_err = e,
        }
    }

    Err(last_err)
}

/// Stage `bytes` in a uniquely named file under `dir`. The file is removed
/// when the returned handle drops.
fn stage_temp_file(dir: &Path, bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(TEMP_FILE_SUFFIX)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
