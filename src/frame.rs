/// Frame buffer shared by the stacking, alignment and gap filling stages.
/// A frame is an H x W x 3 block of 16-bit samples in interleaved RGB order.
use image::{GrayImage, ImageBuffer, Rgb};

use crate::error::{StackError, StackResult};

/// Number of color channels in every frame
pub const CHANNELS: usize = 3;

/// Largest representable sample value
pub const MAX_SAMPLE: f32 = 65535.0;

/// 16-bit RGB image buffer owned by image crate
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// One decoded exposure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>, // Interleaved RGB, row-major
}

impl Frame {
    /// Wrap an interleaved RGB sample buffer, checking its length
    pub fn new(width: usize, height: usize, data: Vec<u16>) -> StackResult<Self> {
        let expected = width * height * CHANNELS;
        if data.len() != expected {
            return Err(StackError::InvalidFrame {
                width,
                height,
                len: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Frame with every sample set to `value`
    pub fn filled(width: usize, height: usize, value: u16) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height * CHANNELS],
        }
    }

    /// Build a frame from three equally sized single-channel planes
    pub fn from_planes(width: usize, height: usize, planes: [&[u16]; CHANNELS]) -> StackResult<Self> {
        let pixels = width * height;
        for plane in planes.iter() {
            if plane.len() != pixels {
                return Err(StackError::InvalidFrame {
                    width,
                    height,
                    len: plane.len() * CHANNELS,
                    expected: pixels * CHANNELS,
                });
            }
        }

        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for i in 0..pixels {
            data.extend(planes.iter().map(|plane| plane[i]));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Replicate a monochrome plane into all three channels
    pub fn from_mono(width: usize, height: usize, mono: &[u16]) -> StackResult<Self> {
        Self::from_planes(width, height, [mono, mono, mono])
    }

    /// (height, width, channels), numpy-style
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, CHANNELS)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Error unless `other` has the same dimensions
    pub fn ensure_same_shape(&self, other: &Frame) -> StackResult<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(StackError::ShapeMismatch {
                width: self.width,
                height: self.height,
                got_width: other.width,
                got_height: other.height,
            })
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u16; CHANNELS] {
        let i = (y * self.width + x) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgb: [u16; CHANNELS]) {
        let i = (y * self.width + x) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// Copy one color channel out as a row-major plane
    pub fn channel(&self, c: usize) -> Vec<u16> {
        self.data.iter().skip(c).step_by(CHANNELS).copied().collect()
    }

    /// Overwrite one color channel from a row-major plane
    pub fn set_channel(&mut self, c: usize, plane: &[u16]) {
        for (dst, &src) in self.data.iter_mut().skip(c).step_by(CHANNELS).zip(plane) {
            *dst = src;
        }
    }

    /// Apply `f` to each channel plane independently
    pub fn map_channels<F>(&self, mut f: F) -> Frame
    where
        F: FnMut(&[u16]) -> Vec<u16>,
    {
        let mut out = self.clone();
        for c in 0..CHANNELS {
            let plane = self.channel(c);
            out.set_channel(c, &f(&plane));
        }
        out
    }

    /// Widen samples to f32 for arithmetic
    pub fn to_f32(&self) -> Vec<f32> {
        self.data.iter().map(|&v| v as f32).collect()
    }

    /// Narrow f32 samples back to a frame, rounding and clipping to [0, 65535]
    pub fn from_f32(width: usize, height: usize, samples: &[f32]) -> Self {
        Self {
            width,
            height,
            data: samples.iter().map(|&v| clip_to_u16(v)).collect(),
        }
    }

    /// Grayscale 8-bit view used for feature detection.
    /// 16-bit samples are scaled down with `>> 8` before the luma conversion.
    pub fn to_gray8(&self) -> GrayImage {
        let rgb8: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_raw(
            self.width as u32,
            self.height as u32,
            self.data.iter().map(|&v| (v >> 8) as u8).collect(),
        )
        .unwrap_or_else(|| ImageBuffer::new(self.width as u32, self.height as u32));
        image::imageops::grayscale(&rgb8)
    }

    /// Per-pixel mean of the three channels, as f32
    pub fn luminance(&self) -> Vec<f32> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| px.iter().map(|&v| v as f32).sum::<f32>() / CHANNELS as f32)
            .collect()
    }

    pub fn into_image(self) -> Rgb16Image {
        let (w, h) = (self.width as u32, self.height as u32);
        ImageBuffer::from_raw(w, h, self.data).unwrap_or_else(|| ImageBuffer::new(w, h))
    }

    pub fn to_image(&self) -> Rgb16Image {
        self.clone().into_image()
    }

    pub fn from_image(image: Rgb16Image) -> Self {
        let (w, h) = image.dimensions();
        Self {
            width: w as usize,
            height: h as usize,
            data: image.into_raw(),
        }
    }
}

/// Round and clip an f32 sample into the 16-bit range.
///
/// Rounds half away from zero rather than truncating, so every blend that
/// narrows through here (average, comet, smoothing, gap filling) lands on
/// the nearest sample: the mean of 1 and 2 is stored as 2, not 1.
#[inline]
pub fn clip_to_u16(value: f32) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, MAX_SAMPLE) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Frame::new(4, 4, vec![0; 48]).is_ok());
        let err = Frame::new(4, 4, vec![0; 47]).unwrap_err();
        assert!(matches!(err, StackError::InvalidFrame { expected: 48, .. }));
    }

    #[test]
    fn test_channel_roundtrip() {
        let mut frame = Frame::filled(3, 2, 0);
        frame.set_pixel(1, 1, [10, 20, 30]);
        assert_eq!(frame.channel(1)[4], 20);

        let plane = vec![7u16; 6];
        frame.set_channel(2, &plane);
        assert_eq!(frame.pixel(1, 1), [10, 20, 7]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 7]);
    }

    #[test]
    fn test_from_planes_interleaves() {
        let r = [1u16, 2];
        let g = [3u16, 4];
        let b = [5u16, 6];
        let frame = Frame::from_planes(2, 1, [&r, &g, &b]).unwrap();
        assert_eq!(frame.data, vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn test_clip_to_u16() {
        assert_eq!(clip_to_u16(-5.0), 0);
        assert_eq!(clip_to_u16(70000.0), 65535);
        assert_eq!(clip_to_u16(149.6), 150);
        assert_eq!(clip_to_u16(f32::NAN), 0);
    }

    #[test]
    fn test_clip_rounds_instead_of_truncating() {
        assert_eq!(clip_to_u16(1.5), 2);
        assert_eq!(clip_to_u16(1.49), 1);
        assert_eq!(clip_to_u16(65534.5), 65535);
        let mean = Frame::from_f32(1, 1, &[1.5, 1.5, 0.4]);
        assert_eq!(mean.pixel(0, 0), [2, 2, 0]);
    }

    #[test]
    fn test_to_gray8_scales_down() {
        let frame = Frame::filled(2, 2, 0xFF00);
        let gray = frame.to_gray8();
        assert_eq!(gray.dimensions(), (2, 2));
        assert!(gray.pixels().all(|p| p.0[0] >= 254));
    }

    #[test]
    fn test_image_roundtrip_keeps_samples() {
        let mut frame = Frame::filled(5, 3, 1000);
        frame.set_pixel(4, 2, [1, 2, 3]);
        let back = Frame::from_image(frame.to_image());
        assert_eq!(back, frame);
    }
}
