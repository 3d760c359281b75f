//! Image input: URI normalization and decoding into a [`PixelBuffer`].

use crate::types::{InputFault, PixelBuffer};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("image file is empty: {0}")]
    Empty(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("decoded image has no pixels: {0}")]
    ZeroSized(PathBuf),
}

impl ImageError {
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p) | Self::NotAFile(p) | Self::Empty(p) | Self::ZeroSized(p) => p,
            Self::Decode { path, .. } => path,
        }
    }

    pub fn into_fault(self) -> InputFault {
        InputFault::Unreadable {
            path: self.path().to_path_buf(),
            reason: self.to_string(),
        }
    }
}

/// Turn a caller-supplied location into a local path.
///
/// Accepts plain paths as well as `file://` URIs (`file:///abs/x.jpg`,
/// `file://localhost/abs/x.jpg`, percent-encoded). Anything that is not a
/// usable `file` URI is treated as a plain path.
pub fn resolve_path(location: &str) -> PathBuf {
    let trimmed = location.trim();
    let is_file_uri = trimmed
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("file://"));
    if is_file_uri {
        if let Ok(url) = url::Url::parse(trimmed) {
            if let Ok(path) = url.to_file_path() {
                return path;
            }
        }
        tracing::warn!(location = trimmed, "unusable file URI, treating as plain path");
    }
    PathBuf::from(trimmed)
}

/// Decode an image file into an RGB pixel buffer.
pub fn decode(path: &Path) -> Result<PixelBuffer, ImageError> {
    let meta = std::fs::metadata(path).map_err(|_| ImageError::NotFound(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(ImageError::NotAFile(path.to_path_buf()));
    }
    if meta.len() == 0 {
        return Err(ImageError::Empty(path.to_path_buf()));
    }

    let img = image::open(path).map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let buffer =
        PixelBuffer::from_image(&img).ok_or_else(|| ImageError::ZeroSized(path.to_path_buf()))?;
    tracing::debug!(
        path = %path.display(),
        width = buffer.width(),
        height = buffer.height(),
        "decoded image"
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "facegate-image-io-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_resolve_plain_path() {
        assert_eq!(resolve_path("/tmp/a.jpg"), PathBuf::from("/tmp/a.jpg"));
        assert_eq!(resolve_path("relative/a.jpg"), PathBuf::from("relative/a.jpg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_file_uri() {
        assert_eq!(resolve_path("file:///tmp/a.jpg"), PathBuf::from("/tmp/a.jpg"));
        assert_eq!(
            resolve_path("file://localhost/tmp/a.jpg"),
            PathBuf::from("/tmp/a.jpg")
        );
        assert_eq!(
            resolve_path("FILE:///tmp/with%20space.png"),
            PathBuf::from("/tmp/with space.png")
        );
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[test]
    fn test_decode_rejects_empty_and_corrupt() {
        let dir = temp_dir("bad");
        let empty = dir.join("empty.png");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(decode(&empty).unwrap_err(), ImageError::Empty(_)));

        let corrupt = dir.join("corrupt.png");
        std::fs::write(&corrupt, b"not really a png").unwrap();
        let err = decode(&corrupt).unwrap_err();
        assert!(matches!(err, ImageError::Decode { .. }));
        assert!(matches!(err.into_fault(), InputFault::Unreadable { .. }));

        assert!(matches!(decode(&dir).unwrap_err(), ImageError::NotAFile(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_decode_png_to_rgb() {
        let dir = temp_dir("png");
        let path = dir.join("gray.png");
        image::GrayImage::from_pixel(4, 3, image::Luma([77])).save(&path).unwrap();

        let buffer = decode(&path).unwrap();
        assert_eq!((buffer.width(), buffer.height(), buffer.channels()), (4, 3, 3));
        assert!(buffer.data().iter().all(|&v| v == 77));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
