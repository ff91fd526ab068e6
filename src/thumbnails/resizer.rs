/// Opaque decode/resize primitive used by the thumbnail generator.
///
/// Implementations run on a blocking thread and may be CPU heavy.
pub trait ImageResizer: Send + Sync {
    fn resize(&self, source: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ResizeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResizeError {
    #[error("not a decodable image")]
    NotAnImage,

    #[error("{0}")]
    Failed(String),
}

/// Resizer that validates the source is an image and stores it as-is.
///
/// It does not scale: every requested size gets the original cover bytes.
/// Pixel resampling is left to a pluggable [`ImageResizer`].
#[derive(Debug, Default, Clone)]
pub struct PassthroughResizer;

impl ImageResizer for PassthroughResizer {
    fn resize(&self, source: &[u8], _width: u32, _height: u32) -> Result<Vec<u8>, ResizeError> {
        #[cfg(feature = "slow_resize")]
        std::thread::sleep(std::time::Duration::from_millis(500));

        match infer::get(source) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(source.to_vec()),
            _ => Err(ResizeError::NotAnImage),
        }
    }
}
