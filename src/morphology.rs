/// Grayscale morphology on single-channel 16-bit planes.
/// Pixels outside the image are ignored, so borders never pull values in.

/// Set of (dx, dy) offsets relative to the element center
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    offsets: Vec<(i32, i32)>,
}

impl StructuringElement {
    pub fn from_offsets(offsets: Vec<(i32, i32)>) -> Self {
        Self { offsets }
    }

    pub fn offsets(&self) -> &[(i32, i32)] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Elliptical element spanning [-r, r] in both directions, stretched
    /// horizontally: (x / 1.5r)^2 + (y / r)^2 <= 1
    pub fn ellipse(radius: usize) -> Self {
        let r = radius as i32;
        let rx = 1.5 * radius as f64;
        let ry = radius as f64;
        let mut offsets = Vec::new();
        for y in -r..=r {
            for x in -r..=r {
                let fx = x as f64 / rx;
                let fy = y as f64 / ry;
                if fx * fx + fy * fy <= 1.0 {
                    offsets.push((x, y));
                }
            }
        }
        Self { offsets }
    }

    /// Thickened line through the center at `angle_deg`, reaching 2r pixels
    /// each way, inside a (4r + 1) square
    pub fn line(radius: usize, angle_deg: f64) -> Self {
        let size = 4 * radius + 1;
        let center = (2 * radius) as f64;
        let (sin, cos) = angle_deg.to_radians().sin_cos();

        let mut mask = vec![false; size * size];
        let reach = 2 * radius as i32;
        for i in -reach..=reach {
            let x = (center + i as f64 * cos) as i32;
            let y = (center + i as f64 * sin) as i32;
            if (0..size as i32).contains(&x) && (0..size as i32).contains(&y) {
                mask[y as usize * size + x as usize] = true;
            }
        }

        // Thicken by one pixel with a 3x3 cross
        let thin = mask.clone();
        for y in 0..size {
            for x in 0..size {
                if !thin[y * size + x] {
                    continue;
                }
                if x > 0 {
                    mask[y * size + x - 1] = true;
                }
                if x + 1 < size {
                    mask[y * size + x + 1] = true;
                }
                if y > 0 {
                    mask[(y - 1) * size + x] = true;
                }
                if y + 1 < size {
                    mask[(y + 1) * size + x] = true;
                }
            }
        }

        let c = 2 * radius as i32;
        let offsets = mask
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(i, _)| ((i % size) as i32 - c, (i / size) as i32 - c))
            .collect();
        Self { offsets }
    }
}

/// Morphology processor bound to one structuring element
pub struct Morphology {
    element: StructuringElement,
}

impl Morphology {
    pub fn new(element: StructuringElement) -> Self {
        Self { element }
    }

    /// Elliptical kernel, used for closing round gaps
    pub fn new_ellipse(radius: usize) -> Self {
        Self::new(StructuringElement::ellipse(radius))
    }

    /// Line kernel, used for closing gaps along one trail direction
    pub fn new_line(radius: usize, angle_deg: f64) -> Self {
        Self::new(StructuringElement::line(radius, angle_deg))
    }

    pub fn element(&self) -> &StructuringElement {
        &self.element
    }

    /// Grayscale dilation: maximum over the reflected element
    pub fn dilate(&self, image: &[u16], width: usize, height: usize) -> Vec<u16> {
        self.rank_filter(image, width, height, -1, u16::max, 0)
    }

    /// Grayscale erosion: minimum over the element
    pub fn erode(&self, image: &[u16], width: usize, height: usize) -> Vec<u16> {
        self.rank_filter(image, width, height, 1, u16::min, u16::MAX)
    }

    /// Dilation followed by erosion. Fills dark gaps narrower than the
    /// element without growing bright regions.
    pub fn closing_in_place(&self, image: &mut [u16], width: usize, height: usize) {
        let dilated = self.dilate(image, width, height);
        let closed = self.erode(&dilated, width, height);
        image.copy_from_slice(&closed);
    }

    pub fn closing(&self, image: &[u16], width: usize, height: usize) -> Vec<u16> {
        let mut out = image.to_vec();
        self.closing_in_place(&mut out, width, height);
        out
    }

    fn rank_filter(
        &self,
        image: &[u16],
        width: usize,
        height: usize,
        sign: i32,
        pick: fn(u16, u16) -> u16,
        identity: u16,
    ) -> Vec<u16> {
        let mut result = vec![0u16; width * height];
        let (w, h) = (width as i32, height as i32);

        for y in 0..h {
            for x in 0..w {
                let mut acc = identity;
                let mut touched = false;
                for &(dx, dy) in &self.element.offsets {
                    let nx = x + sign * dx;
                    let ny = y + sign * dy;
                    if nx >= 0 && nx < w && ny >= 0 && ny < h {
                        acc = pick(acc, image[(ny * w + nx) as usize]);
                        touched = true;
                    }
                }
                let idx = (y * w + x) as usize;
                result[idx] = if touched { acc } else { image[idx] };
            }
        }

        result
    }
}
