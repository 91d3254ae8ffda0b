/// Reading and writing frames on disk.
///
/// FITS goes through fitrs, everything else through the image crate. All
/// inputs end up as 16-bit interleaved RGB.
use anyhow::{Context, Result};
use fitrs::{Fits, FitsData, FitsDataArray, HeaderValue};
use std::path::{Path, PathBuf};

use crate::error::FrameDecodeError;
use crate::frame::{clip_to_u16, Frame, MAX_SAMPLE};
use crate::pipeline::FrameSource;
use crate::stretch::auto_stretch;

const FITS_EXTENSIONS: [&str; 3] = ["fit", "fits", "fts"];
const RASTER_EXTENSIONS: [&str; 5] = ["png", "tif", "tiff", "jpg", "jpeg"];

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_fits(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| FITS_EXTENSIONS.contains(&e.as_str()))
}

/// Whether `path` has an extension the loader understands
pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| {
        FITS_EXTENSIONS.contains(&e.as_str()) || RASTER_EXTENSIONS.contains(&e.as_str())
    })
}

/// Load any supported file as a 16-bit RGB frame
pub fn load_frame(path: &Path) -> Result<Frame> {
    if is_fits(path) {
        return load_fits(path);
    }

    let image = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?;
    Ok(Frame::from_image(image.into_rgb16()))
}

fn header_int(hdu: &fitrs::Hdu, key: &str) -> Result<usize> {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(n)) if *n >= 0 => Ok(*n as usize),
        Some(_) => Err(anyhow::anyhow!("{} is not a non-negative integer", key)),
        None => Err(anyhow::anyhow!("Missing {} header", key)),
    }
}

fn header_float(hdu: &fitrs::Hdu, key: &str, default: f64) -> f64 {
    match hdu.value(key) {
        Some(HeaderValue::IntegerNumber(n)) => *n as f64,
        Some(HeaderValue::RealFloatingNumber(f)) => *f,
        _ => default,
    }
}

/// Primary HDU as a frame. Mono data is copied into all three channels,
/// NAXIS3 = 3 is read as planar RGB.
fn load_fits(path: &Path) -> Result<Frame> {
    let fits = Fits::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
    let hdu = fits
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No primary HDU found in FITS file"))?;

    let naxis = header_int(&hdu, "NAXIS")?;
    if naxis < 2 {
        return Err(anyhow::anyhow!(
            "FITS file does not contain 2D image data (NAXIS={})",
            naxis
        ));
    }
    let width = header_int(&hdu, "NAXIS1")?;
    let height = header_int(&hdu, "NAXIS2")?;
    let planes = if naxis >= 3 { header_int(&hdu, "NAXIS3")? } else { 1 };
    if planes != 1 && planes != 3 {
        return Err(anyhow::anyhow!("Unsupported plane count NAXIS3={}", planes));
    }

    let bzero = header_float(&hdu, "BZERO", 0.0);
    let bscale = header_float(&hdu, "BSCALE", 1.0);

    let (values, floating): (Vec<f64>, bool) = match hdu.read_data() {
        FitsData::Characters(_) => {
            return Err(anyhow::anyhow!("FITS file contains character data, not image data"));
        }
        FitsData::IntegersI32(FitsDataArray { data, .. }) => (
            data.iter()
                .map(|x| x.unwrap_or(0) as f64 * bscale + bzero)
                .collect(),
            false,
        ),
        FitsData::IntegersU32(FitsDataArray { data, .. }) => (
            data.iter()
                .map(|x| x.unwrap_or(0) as f64 * bscale + bzero)
                .collect(),
            false,
        ),
        FitsData::FloatingPoint32(FitsDataArray { data, .. }) => (
            data.iter().map(|&v| v as f64 * bscale + bzero).collect(),
            true,
        ),
        FitsData::FloatingPoint64(FitsDataArray { data, .. }) => (
            data.iter().map(|&v| v * bscale + bzero).collect(),
            true,
        ),
    };

    let expected = width * height * planes;
    if values.len() < expected {
        return Err(anyhow::anyhow!(
            "Data size mismatch: expected {} samples, got {}",
            expected,
            values.len()
        ));
    }

    let samples = fits_samples_to_u16(&values[..expected], floating);
    let plane_len = width * height;
    let frame = if planes == 3 {
        Frame::from_planes(
            width,
            height,
            [
                &samples[..plane_len],
                &samples[plane_len..2 * plane_len],
                &samples[2 * plane_len..],
            ],
        )?
    } else {
        Frame::from_mono(width, height, &samples)?
    };

    tracing::debug!(
        "Loaded FITS {} ({}x{}, {} plane(s))",
        path.display(),
        width,
        height,
        planes
    );
    Ok(frame)
}

/// Physical FITS values to 16-bit samples. Floating data normalized to at
/// most 1.0 is scaled up to the full range first.
fn fits_samples_to_u16(values: &[f64], floating: bool) -> Vec<u16> {
    let normalized = floating
        && values
            .iter()
            .filter(|v| v.is_finite())
            .all(|&v| v <= 1.0);
    let gain = if normalized { MAX_SAMPLE as f64 } else { 1.0 };
    values
        .iter()
        .map(|&v| clip_to_u16((v * gain) as f32))
        .collect()
}

/// Write a frame. PNG and TIFF keep 16 bits, JPEG is narrowed to 8.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let image = frame.to_image();
    match extension_of(path).as_deref() {
        Some("jpg") | Some("jpeg") => {
            let narrowed = image::DynamicImage::ImageRgb16(image).into_rgb8();
            narrowed
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        _ => {
            image
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }
    tracing::info!("Wrote {}x{} frame to {}", frame.width, frame.height, path.display());
    Ok(())
}

/// Write an 8-bit percentile-stretched preview of a frame
pub fn save_preview(frame: &Frame, path: &Path) -> Result<()> {
    auto_stretch(frame)
        .save(path)
        .with_context(|| format!("Failed to write preview {}", path.display()))
}

/// Files on disk, decoded lazily in the order given
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    paths: Vec<PathBuf>,
}

impl FileFrameSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Directories are expanded to their supported files, sorted by name.
    /// Plain file arguments keep their command-line order.
    pub fn from_paths(inputs: &[PathBuf]) -> Result<Self> {
        let mut paths = Vec::new();
        for input in inputs {
            if input.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
                    .with_context(|| format!("Failed to read directory {}", input.display()))?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && is_supported(p))
                    .collect();
                entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
                tracing::debug!("{}: {} frame file(s)", input.display(), entries.len());
                paths.extend(entries);
            } else {
                paths.push(input.clone());
            }
        }
        Ok(Self::new(paths))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl FrameSource for FileFrameSource {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn label(&self, index: usize) -> String {
        self.paths
            .get(index)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("frame {}", index))
    }

    fn decode(&self, index: usize) -> Result<Frame, FrameDecodeError> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| FrameDecodeError::new(self.label(index), "index out of range"))?;
        load_frame(path).map_err(|err| FrameDecodeError::new(self.label(index), format!("{:#}", err)))
    }
}
