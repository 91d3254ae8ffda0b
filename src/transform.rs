/// 2D affine transforms and frame warping
use imageproc::geometric_transformations::Projection;
use serde::Serialize;

use crate::frame::{clip_to_u16, Frame, CHANNELS};

/// Source coordinates this far outside the frame still count as inside
const EDGE_TOLERANCE: f64 = 1e-6;

/// 2x3 affine matrix mapping (x, y) to (a*x + b*y + tx, c*x + d*y + ty)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            matrix: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// Rotation by `angle` radians and uniform `scale`, then translation
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::from_similarity_params(scale * cos, scale * sin, tx, ty)
    }

    /// Partial affine parameterization: x' = a*x - b*y + tx, y' = b*x + a*y + ty
    pub fn from_similarity_params(a: f64, b: f64, tx: f64, ty: f64) -> Self {
        Self {
            matrix: [[a, -b, tx], [b, a, ty]],
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Translation component (tx, ty)
    pub fn translation_components(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    pub fn translation_magnitude(&self) -> f64 {
        let (tx, ty) = self.translation_components();
        tx.hypot(ty)
    }

    /// Uniform scale of a similarity transform
    pub fn scale(&self) -> f64 {
        self.matrix[0][0].hypot(self.matrix[1][0])
    }

    /// Rotation angle in radians
    pub fn rotation(&self) -> f64 {
        self.matrix[1][0].atan2(self.matrix[0][0])
    }

    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        let det = a * d - b * c;
        if det.abs() < 1e-12 {
            return None;
        }
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Self {
            matrix: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }

    /// Same transform as an imageproc projection
    pub fn to_projection(&self) -> Option<Projection> {
        let m = &self.matrix;
        Projection::from_matrix([
            m[0][0] as f32,
            m[0][1] as f32,
            m[0][2] as f32,
            m[1][0] as f32,
            m[1][1] as f32,
            m[1][2] as f32,
            0.0,
            0.0,
            1.0,
        ])
    }
}

/// How pixels uncovered by a warp are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Fill with zero
    Constant,
    /// Repeat the nearest edge pixel
    Replicate,
}

/// Move `frame` through `transform` (source to destination coordinates) with
/// bilinear sampling. The output keeps the input dimensions. Neighbors past
/// the last row or column reuse the edge sample, so the identity warp returns
/// the frame unchanged.
pub fn warp_frame(frame: &Frame, transform: &AffineTransform, border: BorderMode) -> Frame {
    let (width, height) = (frame.width, frame.height);
    let Some(inverse) = transform.inverse() else {
        return frame.clone();
    };
    if width == 0 || height == 0 {
        return frame.clone();
    }

    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let mut data = vec![0u16; frame.data.len()];

    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = inverse.apply(x as f64, y as f64);
            if border == BorderMode::Constant
                && (sx < -EDGE_TOLERANCE
                    || sy < -EDGE_TOLERANCE
                    || sx > max_x + EDGE_TOLERANCE
                    || sy > max_y + EDGE_TOLERANCE)
            {
                continue;
            }
            let rgb = sample_bilinear(frame, sx.clamp(0.0, max_x), sy.clamp(0.0, max_y));
            let i = (y * width + x) * CHANNELS;
            data[i..i + CHANNELS].copy_from_slice(&rgb);
        }
    }

    Frame {
        width,
        height,
        data,
    }
}

/// Bilinear sample at an in-bounds position, neighbor indices clamped
fn sample_bilinear(frame: &Frame, x: f64, y: f64) -> [u16; CHANNELS] {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(frame.width - 1);
    let y1 = (y0 + 1).min(frame.height - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let at = |xx: usize, yy: usize, c: usize| frame.data[(yy * frame.width + xx) * CHANNELS + c] as f32;
    let mut out = [0u16; CHANNELS];
    for (c, value) in out.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - fx) + at(x1, y0, c) * fx;
        let bottom = at(x0, y1, c) * (1.0 - fx) + at(x1, y1, c) * fx;
        *value = clip_to_u16(top * (1.0 - fy) + bottom * fy);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_roundtrip() {
        let t = AffineTransform::similarity(1.02, 0.05, 4.0, -3.0);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(10.0, 20.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 10.0).abs() < 1e-9);
        assert!((by - 20.0).abs() < 1e-9);
        assert!((t.scale() - 1.02).abs() < 1e-9);
        assert!((t.rotation() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_translation_magnitude() {
        let t = AffineTransform::translation(3.0, 4.0);
        assert_eq!(t.translation_magnitude(), 5.0);
        assert_eq!(t.translation_components(), (3.0, 4.0));
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = AffineTransform {
            matrix: [[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        };
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_warp_integer_translation() {
        let mut frame = Frame::filled(12, 10, 0);
        frame.set_pixel(4, 4, [1000, 2000, 3000]);

        let moved = warp_frame(&frame, &AffineTransform::translation(2.0, 1.0), BorderMode::Constant);
        assert_eq!(moved.pixel(6, 5), [1000, 2000, 3000]);
        assert_eq!(moved.pixel(4, 4), [0, 0, 0]);
    }

    #[test]
    fn test_warp_replicate_fills_border() {
        let frame = Frame::filled(8, 8, 500);
        let moved = warp_frame(&frame, &AffineTransform::translation(3.0, 0.0), BorderMode::Replicate);
        assert_eq!(moved.pixel(0, 0), [500, 500, 500]);

        let constant = warp_frame(&frame, &AffineTransform::translation(3.0, 0.0), BorderMode::Constant);
        assert_eq!(constant.pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn test_identity_warp_keeps_every_pixel() {
        let mut frame = Frame::filled(8, 8, 500);
        frame.set_pixel(7, 7, [9, 99, 999]);
        frame.set_pixel(7, 0, [1, 2, 3]);
        for border in [BorderMode::Constant, BorderMode::Replicate] {
            let warped = warp_frame(&frame, &AffineTransform::identity(), border);
            assert_eq!(warped, frame, "{:?}", border);
        }
    }

    #[test]
    fn test_translation_keeps_far_edge() {
        let mut frame = Frame::filled(10, 6, 0);
        for y in 0..6 {
            frame.set_pixel(9, y, [4000, 4000, 4000]);
        }
        // Content moves left by one; the old last column lands on x = 8
        let moved = warp_frame(&frame, &AffineTransform::translation(-1.0, 0.0), BorderMode::Constant);
        assert!((0..6).all(|y| moved.pixel(8, y) == [4000, 4000, 4000]));
        assert!((0..6).all(|y| moved.pixel(9, y) == [0, 0, 0]));

        let replicated = warp_frame(&frame, &AffineTransform::translation(-1.0, 0.0), BorderMode::Replicate);
        assert!((0..6).all(|y| replicated.pixel(9, y) == [4000, 4000, 4000]));
    }

    #[test]
    fn test_projection_matches_apply() {
        let t = AffineTransform::similarity(1.0, 0.1, 2.0, -1.0);
        let (px, py) = t.to_projection().unwrap() * (3.0f32, 4.0f32);
        let (x, y) = t.apply(3.0, 4.0);
        assert!((px as f64 - x).abs() < 1e-4 && (py as f64 - y).abs() < 1e-4);
    }
}
