/// Dark frame calibration: removes the thermal signal and hot pixels a
/// capped exposure records, before frames reach the stacker.
use crate::error::StackResult;
use crate::frame::Frame;
use crate::stacking::median_stack;

pub struct DarkFrameSubtractor {
    dark: Frame,
}

impl DarkFrameSubtractor {
    pub fn new(dark: Frame) -> Self {
        Self { dark }
    }

    /// Master dark as the per-sample median of several dark exposures
    pub fn from_darks(darks: &[Frame]) -> StackResult<Self> {
        let master = median_stack(darks)?;
        tracing::info!(
            "Built master dark from {} frames ({}x{})",
            darks.len(),
            master.width,
            master.height
        );
        Ok(Self::new(master))
    }

    pub fn dark(&self) -> &Frame {
        &self.dark
    }

    /// `frame - dark`, clipped at zero. Frames must match the dark's size.
    pub fn subtract(&self, frame: &Frame) -> StackResult<Frame> {
        self.dark.ensure_same_shape(frame)?;
        let data = frame
            .data
            .iter()
            .zip(&self.dark.data)
            .map(|(&v, &d)| v.saturating_sub(d))
            .collect();
        Frame::new(frame.width, frame.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;

    #[test]
    fn test_subtract_clips_at_zero() {
        let mut dark = Frame::filled(4, 4, 100);
        dark.set_pixel(1, 1, [5000, 5000, 5000]);
        let subtractor = DarkFrameSubtractor::new(dark);

        let light = Frame::filled(4, 4, 1000);
        let calibrated = subtractor.subtract(&light).unwrap();
        assert_eq!(calibrated.pixel(0, 0), [900, 900, 900]);
        assert_eq!(calibrated.pixel(1, 1), [0, 0, 0]);
    }

    #[test]
    fn test_subtract_rejects_other_sizes() {
        let subtractor = DarkFrameSubtractor::new(Frame::filled(4, 4, 0));
        let err = subtractor.subtract(&Frame::filled(5, 4, 0)).unwrap_err();
        assert!(matches!(err, StackError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_master_dark_is_median() {
        let darks = vec![
            Frame::filled(3, 3, 10),
            Frame::filled(3, 3, 900),
            Frame::filled(3, 3, 12),
        ];
        let subtractor = DarkFrameSubtractor::from_darks(&darks).unwrap();
        assert_eq!(subtractor.dark(), &Frame::filled(3, 3, 12));
        assert!(DarkFrameSubtractor::from_darks(&[]).is_err());
    }
}
