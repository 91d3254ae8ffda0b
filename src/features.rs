/// Keypoint detection, binary descriptors and descriptor matching for frame
/// registration.
///
/// Detectors find FAST corners, keep the strongest after non-maximum
/// suppression and describe each one with a 256-bit intensity comparison
/// pattern sampled from a smoothed patch. The oriented variant steers the
/// pattern by the patch's intensity centroid so that descriptors survive
/// field rotation.
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StackError;

/// Radius of the descriptor sampling disk
pub const PATCH_RADIUS: i32 = 15;

/// Number of intensity comparisons per descriptor
pub const DESCRIPTOR_BITS: usize = 256;

const PATTERN_SEED: u64 = 0x5717_A11E;

/// Detector/descriptor preset, trading speed for robustness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Unoriented descriptors on the strongest few hundred corners
    #[default]
    Fast,
    /// Oriented descriptors, more corners
    Balanced,
    /// Oriented descriptors on a low threshold, most corners
    Accurate,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [DetectorKind::Fast, DetectorKind::Balanced, DetectorKind::Accurate];

    pub fn as_str(self) -> &'static str {
        match self {
            DetectorKind::Fast => "fast",
            DetectorKind::Balanced => "balanced",
            DetectorKind::Accurate => "accurate",
        }
    }

    pub fn params(self) -> DetectorParams {
        match self {
            DetectorKind::Fast => DetectorParams {
                fast_threshold: 20,
                max_features: 500,
                nms_radius: 3,
                blur_sigma: 2.0,
                oriented: false,
            },
            DetectorKind::Balanced => DetectorParams {
                fast_threshold: 12,
                max_features: 1000,
                nms_radius: 2,
                blur_sigma: 2.0,
                oriented: true,
            },
            DetectorKind::Accurate => DetectorParams {
                fast_threshold: 6,
                max_features: 2000,
                nms_radius: 1,
                blur_sigma: 1.5,
                oriented: true,
            },
        }
    }

    /// Build a fresh detector for this preset. Each registration builds its
    /// own and drops it when done.
    pub fn create(self) -> Box<dyn FeatureDetector> {
        Box::new(BriefDetector::new(self.params()))
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorKind {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" | "orb" => Ok(DetectorKind::Fast),
            "balanced" | "akaze" => Ok(DetectorKind::Balanced),
            "accurate" | "sift" => Ok(DetectorKind::Accurate),
            _ => Err(StackError::UnknownDetector(s.to_string())),
        }
    }
}

/// Tuning for one detector preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub fast_threshold: u8,
    pub max_features: usize,
    pub nms_radius: u32,
    pub blur_sigma: f32,
    pub oriented: bool,
}

/// Detected corner position, strength and patch orientation (radians)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    pub angle: f32,
}

/// 256-bit binary descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    fn set_bit(&mut self, bit: usize) {
        self.0[bit / 64] |= 1u64 << (bit % 64);
    }
}

/// Keypoints with descriptors, index aligned
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Interchangeable keypoint detector and descriptor extractor
pub trait FeatureDetector {
    fn detect_and_describe(&self, image: &GrayImage) -> Features;
}

/// FAST corners described by a BRIEF-style comparison pattern,
/// optionally steered by patch orientation
pub struct BriefDetector {
    params: DetectorParams,
    pattern: Vec<[(i32, i32); 2]>,
}

impl BriefDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            pattern: sampling_pattern(),
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    fn detect(&self, image: &GrayImage) -> Vec<Corner> {
        let (width, height) = image.dimensions();
        let margin = PATCH_RADIUS as u32 + 1;
        if width <= 2 * margin || height <= 2 * margin {
            return Vec::new();
        }

        let corners: Vec<Corner> = corners_fast9(image, self.params.fast_threshold)
            .into_iter()
            .filter(|c| c.x >= margin && c.x < width - margin && c.y >= margin && c.y < height - margin)
            .collect();

        let mut corners = local_maxima(&corners, self.params.nms_radius);
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(self.params.max_features);
        corners
    }

    fn describe(&self, smoothed: &GrayImage, x: i32, y: i32, angle: f32) -> Descriptor {
        let (sin, cos) = if self.params.oriented {
            angle.sin_cos()
        } else {
            (0.0, 1.0)
        };
        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (cos * dx as f32 - sin * dy as f32).round() as i32;
            let ry = (sin * dx as f32 + cos * dy as f32).round() as i32;
            smoothed.get_pixel((x + rx) as u32, (y + ry) as u32).0[0]
        };

        let mut descriptor = Descriptor([0; 4]);
        for (bit, [p, q]) in self.pattern.iter().enumerate() {
            if sample(p.0, p.1) < sample(q.0, q.1) {
                descriptor.set_bit(bit);
            }
        }
        descriptor
    }
}

impl FeatureDetector for BriefDetector {
    fn detect_and_describe(&self, image: &GrayImage) -> Features {
        let corners = self.detect(image);
        if corners.is_empty() {
            return Features::default();
        }

        let smoothed = gaussian_blur_f32(image, self.params.blur_sigma);
        let mut features = Features::default();
        for corner in corners {
            let (x, y) = (corner.x as i32, corner.y as i32);
            let angle = if self.params.oriented {
                intensity_centroid_angle(&smoothed, x, y)
            } else {
                0.0
            };
            features.descriptors.push(self.describe(&smoothed, x, y, angle));
            features.keypoints.push(Keypoint {
                x: corner.x as f32,
                y: corner.y as f32,
                score: corner.score,
                angle,
            });
        }
        features
    }
}

/// Fixed comparison pairs inside the sampling disk. The seed is constant so
/// descriptors from different calls are comparable.
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let mut point = || loop {
        let dx = rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS);
        let dy = rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS);
        if dx * dx + dy * dy <= PATCH_RADIUS * PATCH_RADIUS {
            return (dx, dy);
        }
    };
    (0..DESCRIPTOR_BITS).map(|_| [point(), point()]).collect()
}

/// Orientation of the vector from the corner to the patch intensity centroid
fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32) -> f32 {
    let r2 = PATCH_RADIUS * PATCH_RADIUS;
    let mut m10 = 0.0f32;
    let mut m01 = 0.0f32;
    for dy in -PATCH_RADIUS..=PATCH_RADIUS {
        for dx in -PATCH_RADIUS..=PATCH_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = image.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as f32;
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

/// Descriptor correspondence between two feature sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    /// Index into the query set
    pub query: usize,
    /// Index into the train set
    pub train: usize,
    pub distance: u32,
}

/// Brute-force Hamming matching with cross-check: a pair is kept only when
/// each descriptor is the other's nearest neighbor.
pub fn match_cross_checked(query: &[Descriptor], train: &[Descriptor]) -> Vec<FeatureMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let nearest = |d: &Descriptor, set: &[Descriptor]| -> (usize, u32) {
        set.iter()
            .enumerate()
            .map(|(i, other)| (i, d.hamming(other)))
            .min_by_key(|&(i, dist)| (dist, i))
            .unwrap_or((0, u32::MAX))
    };

    let train_best: Vec<usize> = train.iter().map(|d| nearest(d, query).0).collect();

    query
        .iter()
        .enumerate()
        .filter_map(|(qi, d)| {
            let (ti, distance) = nearest(d, train);
            (train_best[ti] == qi).then_some(FeatureMatch {
                query: qi,
                train: ti,
                distance,
            })
        })
        .collect()
}
