pub mod dark_subtract;
pub mod detect_shift;
pub mod fill_gaps;
pub mod smooth;
pub mod stack;

pub use dark_subtract::subtract_dark;
pub use detect_shift::detect_shift;
pub use fill_gaps::fill_gaps_in_image;
pub use smooth::smooth_image;
pub use stack::{stack_frames, StackOptions};
