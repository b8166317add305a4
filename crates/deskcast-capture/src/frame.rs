//! Raw frame types.

use bytes::Bytes;

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit blue/green/red/alpha, tightly packed (4 bytes per pixel).
    Bgra,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra => 4,
        }
    }
}

/// One captured frame, overwritten every capture cycle.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Tightly packed pixel data.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Pixel layout of `data`.
    pub format: PixelFormat,
}

impl RawFrame {
    /// Expected buffer size for the given dimensions and format.
    pub fn buffer_size(width: u32, height: u32, format: PixelFormat) -> usize {
        (width as usize) * (height as usize) * format.bytes_per_pixel()
    }

    /// Validate that the frame data matches its declared dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::buffer_size(self.width, self.height, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_buffer_size() {
        assert_eq!(RawFrame::buffer_size(1920, 1080, PixelFormat::Bgra), 1920 * 1080 * 4);
    }

    #[test]
    fn frame_validation() {
        let frame = RawFrame {
            data: Bytes::from(vec![0u8; 2 * 2 * 4]),
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
        };
        assert!(frame.is_valid());

        let short = RawFrame {
            data: Bytes::from(vec![0u8; 3]),
            width: 2,
            height: 2,
            format: PixelFormat::Bgra,
        };
        assert!(!short.is_valid());
    }
}
