use bytes::Bytes;

/// Samples per pixel. Frames are packed 8-bit BGR, the layout ffmpeg emits
/// for `-pix_fmt bgr24`.
pub const CHANNELS: usize = 3;

/// A decoded video frame: `height × width × 3` 8-bit samples, row-major.
///
/// The pixel buffer is immutable once constructed. Cloning is cheap and the
/// clone cannot observe later changes to any other frame, so a clone handed
/// out of a shared slot is already an independent copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap a packed BGR pixel buffer, checking that its length matches the
    /// declared geometry.
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let data = data.into();
        let expected = Self::byte_len_for(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// A frame with every sample set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Result<Self, FrameError> {
        let len = if width == 0 || height == 0 {
            0
        } else {
            Self::byte_len_for(width, height)
        };
        Self::new(vec![value; len], width, height)
    }

    /// Number of bytes a frame of the given geometry occupies.
    pub fn byte_len_for(width: u32, height: u32) -> usize {
        width as usize * height as usize * CHANNELS
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// True when both frames share width and height.
    pub fn same_geometry(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
    #[error("frame {width}x{height} needs {expected} bytes, got {got}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_buffer() {
        let frame = Frame::new(vec![7u8; 4 * 2 * 3], 4, 2).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.byte_len(), 24);
        assert!(frame.data().iter().all(|&b| b == 7));
    }

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::new(vec![0u8; 10], 4, 2).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SizeMismatch {
                expected: 24,
                got: 10,
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_dimension() {
        assert!(matches!(
            Frame::filled(0, 10, 0),
            Err(FrameError::ZeroDimension { .. })
        ));
    }

    #[test]
    fn clones_compare_equal_and_share_geometry() {
        let a = Frame::filled(8, 8, 3).unwrap();
        let b = a.clone();
        assert_eq!(a, b);
        assert!(a.same_geometry(&b));
        assert!(!a.same_geometry(&Frame::filled(8, 4, 3).unwrap()));
    }
}
