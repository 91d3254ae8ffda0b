use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "star-trail")]
#[command(about = "Stack night sky exposures into star trail composites", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stack frames (files or directories) into one composite
    Stack {
        /// Input frames; directories are expanded and sorted by name
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output image (16-bit PNG or TIFF; JPEG is written as 8-bit)
        #[arg(short, long)]
        output: PathBuf,

        /// JSON stacking configuration; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Blending mode (lighten, darken, average, addition, comet, median)
        #[arg(short, long)]
        mode: Option<String>,

        /// Comet fade factor in [0, 1]
        #[arg(long, conflicts_with = "tail")]
        fade: Option<f64>,

        /// Comet tail preset (short, medium, long)
        #[arg(long)]
        tail: Option<String>,

        /// Dark frames; several are combined into a median master dark
        #[arg(long)]
        dark: Vec<PathBuf>,

        /// Write an 8-bit stretched preview of the result here
        #[arg(long)]
        preview: Option<PathBuf>,

        /// Write running previews into this directory while stacking
        #[arg(long)]
        preview_dir: Option<PathBuf>,

        /// Frames between running previews
        #[arg(long, default_value = "3")]
        preview_interval: usize,

        /// Report format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        #[command(flatten)]
        align_options: AlignmentOptions,

        #[command(flatten)]
        gap_options: GapFillOptions,
    },

    /// Bridge short gaps between trail segments in a single image
    FillGaps {
        input: PathBuf,
        output: PathBuf,

        /// Fill method (linear, morphological, directional, motion_blur)
        #[arg(short, long, default_value = "morphological")]
        method: String,

        /// Largest gap to bridge, in pixels
        #[arg(short, long, default_value = "3")]
        gap_size: usize,

        /// Relative brightness a pixel needs to count as trail (linear only)
        #[arg(short, long, default_value = "0.1")]
        threshold: f64,

        /// Pick the gap size from [min-gap, max-gap] instead of --gap-size
        #[arg(long)]
        adaptive: bool,

        #[arg(long, default_value = "1", requires = "adaptive")]
        min_gap: usize,

        #[arg(long, default_value = "5", requires = "adaptive")]
        max_gap: usize,
    },

    /// Smooth trails with an along-trail Gaussian blur
    Smooth {
        input: PathBuf,
        output: PathBuf,

        /// Largest kernel radius
        #[arg(short, long, default_value = "5")]
        window: usize,

        /// Blur strength
        #[arg(short, long, default_value = "1.0")]
        sigma: f64,

        /// Run this many fill-and-smooth continuity passes instead
        #[arg(long)]
        continuity: Option<usize>,
    },

    /// Measure the offset of an image against a reference
    DetectShift {
        image: PathBuf,
        reference: PathBuf,

        /// Feature detector preset (fast, balanced, accurate)
        #[arg(short, long, default_value = "fast")]
        detector: String,

        /// Largest accepted shift, in pixels
        #[arg(long, default_value = "50.0")]
        max_shift: f64,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Subtract a dark frame from a light frame
    DarkSubtract {
        input: PathBuf,
        dark: PathBuf,
        output: PathBuf,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct AlignmentOptions {
    /// Register every frame against the first before blending
    #[arg(long)]
    pub align: bool,

    /// Feature detector preset (fast, balanced, accurate)
    #[arg(long, requires = "align")]
    pub detector: Option<String>,

    /// Largest accepted shift, in pixels
    #[arg(long, requires = "align")]
    pub max_shift: Option<f64>,

    /// Seed for RANSAC sampling
    #[arg(long, requires = "align")]
    pub seed: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
pub struct GapFillOptions {
    /// Fill method applied to the final composite
    #[arg(long)]
    pub gap_fill: Option<String>,

    /// Largest gap to bridge, in pixels
    #[arg(long, requires = "gap_fill")]
    pub gap_size: Option<usize>,

    /// Relative brightness threshold for the linear method
    #[arg(long, requires = "gap_fill")]
    pub gap_threshold: Option<f64>,
}
