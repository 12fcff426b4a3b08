//! Connected-component extraction and the correlation classifier.
//!
//! This is the stage that turns a page raster into classified glyphs: Lutz
//! single-pass labelling (8-connectivity) finds the components, then each
//! component is matched against the existing templates by centroid-aligned
//! normalized correlation. The classifier state mirrors what the downstream
//! coders need: the template array, the per-component class assignment, page
//! index, bounding box and the running `base_index` marking where each page's
//! components start.

use crate::jbig2sym::{BitImage, Rect};
use crate::Jbig2Error;
use log::debug;
use rustc_hash::FxHashMap;

/// Classifier threshold bounds (normalized correlation score).
pub const THRESHOLD_MIN: f32 = 0.4;
/// Upper bound for the classifier threshold.
pub const THRESHOLD_MAX: f32 = 0.97;
/// Default classifier threshold.
pub const THRESHOLD_DEF: f32 = 0.92;
/// Lower bound for the ink-density weight.
pub const WEIGHT_MIN: f32 = 0.1;
/// Upper bound for the ink-density weight.
pub const WEIGHT_MAX: f32 = 0.9;
/// Default ink-density weight.
pub const WEIGHT_DEF: f32 = 0.5;

/// Candidate templates may differ from a component by this much per axis.
const SIZE_SLACK: i32 = 2;

/// One extracted connected component.
pub struct ConnComp {
    /// Bounding box in page coordinates.
    pub bounds: Rect,
    /// Cropped bitmap of the component.
    pub bitmap: BitImage,
    /// Centroid in page coordinates.
    pub centroid: (f32, f32),
}

/// Finds 8-connected components of a page, with bounding boxes, cropped
/// bitmaps and centroids.
pub fn find_components(page: &BitImage) -> Vec<ConnComp> {
    let mut comps = Vec::new();
    for pixels in lutz::lutz::<_, Vec<lutz::Pixel>>(page) {
        if let Some(comp) = build_component(&pixels) {
            comps.push(comp);
        }
    }
    comps
}

fn build_component(pixels: &[lutz::Pixel]) -> Option<ConnComp> {
    if pixels.is_empty() {
        return None;
    }
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut sum_x = 0u64;
    let mut sum_y = 0u64;
    for p in pixels {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
        sum_x += p.x as u64;
        sum_y += p.y as u64;
    }
    let bounds = Rect {
        x: min_x,
        y: min_y,
        width: max_x - min_x + 1,
        height: max_y - min_y + 1,
    };
    let mut bitmap = BitImage::new(bounds.width as usize, bounds.height as usize).ok()?;
    for p in pixels {
        bitmap.set((p.x - min_x) as usize, (p.y - min_y) as usize, true);
    }
    let n = pixels.len() as f32;
    Some(ConnComp {
        bounds,
        bitmap,
        centroid: (sum_x as f32 / n, sum_y as f32 / n),
    })
}

/// Incremental glyph classifier across pages.
pub struct Classifier {
    thresh: f32,
    weight: f32,
    /// Class exemplars (pixat).
    pub(crate) templates: Vec<BitImage>,
    /// Exemplar centroids, local to the template bitmap.
    pub(crate) template_centroids: Vec<(f32, f32)>,
    /// Exemplar ink counts.
    pub(crate) template_areas: Vec<u32>,
    /// Components assigned per class.
    pub(crate) refcounts: Vec<u32>,
    /// Per-component class id (naclass).
    pub(crate) assignments: Vec<usize>,
    /// Per-component page index (napage).
    pub(crate) comp_pages: Vec<usize>,
    /// Per-component bounding box, aligned against its class exemplar.
    pub(crate) comp_boxes: Vec<Rect>,
    /// Per-component centroid in page coordinates.
    pub(crate) comp_centroids: Vec<(f32, f32)>,
    /// Component count at the start of the most recent page.
    pub(crate) base_index: usize,
    /// Pages seen so far.
    pub(crate) npages: usize,
    /// Exact-duplicate fast path, content key -> template ids.
    exact: FxHashMap<u64, Vec<usize>>,
}

impl Classifier {
    /// Creates a classifier; `thresh` and `weight` are validated against
    /// their documented ranges.
    pub fn new(thresh: f32, weight: f32) -> Result<Self, Jbig2Error> {
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&thresh) {
            return Err(Jbig2Error::InvalidValue {
                name: "threshold",
                value: thresh as f64,
                min: THRESHOLD_MIN as f64,
                max: THRESHOLD_MAX as f64,
            });
        }
        if !(WEIGHT_MIN..=WEIGHT_MAX).contains(&weight) {
            return Err(Jbig2Error::InvalidValue {
                name: "weight",
                value: weight as f64,
                min: WEIGHT_MIN as f64,
                max: WEIGHT_MAX as f64,
            });
        }
        Ok(Self {
            thresh,
            weight,
            templates: Vec::new(),
            template_centroids: Vec::new(),
            template_areas: Vec::new(),
            refcounts: Vec::new(),
            assignments: Vec::new(),
            comp_pages: Vec::new(),
            comp_boxes: Vec::new(),
            comp_centroids: Vec::new(),
            base_index: 0,
            npages: 0,
            exact: FxHashMap::default(),
        })
    }

    /// Number of templates.
    pub fn num_templates(&self) -> usize {
        self.templates.len()
    }

    /// Number of classified components.
    pub fn num_components(&self) -> usize {
        self.assignments.len()
    }

    /// Extracts and classifies every component of a page.
    pub fn add_page(&mut self, page: &BitImage) {
        self.base_index = self.assignments.len();
        let page_no = self.npages;

        let comps = find_components(page);
        for comp in comps {
            let class = self.classify(&comp);
            let bounds = self.align_box(&comp, class);
            self.assignments.push(class);
            self.comp_pages.push(page_no);
            self.comp_boxes.push(bounds);
            self.comp_centroids.push(comp.centroid);
        }
        self.npages += 1;

        debug!(
            "page {}: {} components, {} templates so far",
            page_no,
            self.assignments.len() - self.base_index,
            self.templates.len()
        );
    }

    /// Matches a component against the templates, creating a new class when
    /// nothing scores above the weighted threshold.
    fn classify(&mut self, comp: &ConnComp) -> usize {
        // Exact pixel match first; common for clean digital input.
        let key = comp.bitmap.content_key();
        if let Some(bucket) = self.exact.get(&key) {
            for &t in bucket {
                if self.templates[t] == comp.bitmap {
                    self.refcounts[t] += 1;
                    return t;
                }
            }
        }

        let cw = comp.bitmap.width as i32;
        let ch = comp.bitmap.height as i32;
        let local_centroid = (
            comp.centroid.0 - comp.bounds.x as f32,
            comp.centroid.1 - comp.bounds.y as f32,
        );
        let comp_area = comp.bitmap.count_ones() as u32;

        for t in 0..self.templates.len() {
            let tpl = &self.templates[t];
            if (tpl.width as i32 - cw).abs() > SIZE_SLACK
                || (tpl.height as i32 - ch).abs() > SIZE_SLACK
            {
                continue;
            }
            let score = correlation(
                &comp.bitmap,
                local_centroid,
                comp_area,
                tpl,
                self.template_centroids[t],
                self.template_areas[t],
            );
            // Dense glyphs correlate highly even when different, so the
            // threshold climbs with the template's ink fraction.
            let density =
                self.template_areas[t] as f32 / (tpl.width as f32 * tpl.height as f32);
            let threshold = self.thresh + (1.0 - self.thresh) * self.weight * density;
            if score >= threshold {
                self.refcounts[t] += 1;
                return t;
            }
        }

        let t = self.templates.len();
        self.templates.push(comp.bitmap.clone());
        self.template_centroids.push(local_centroid);
        self.template_areas.push(comp_area);
        self.refcounts.push(1);
        self.exact.entry(key).or_default().push(t);
        t
    }

    /// Refines the component's box over the 3x3 neighbourhood so the class
    /// exemplar lands where it best covers the component's ink. The
    /// classifier records boxes of the source components, not of the chosen
    /// exemplar, so a one-pixel correction is common.
    fn align_box(&self, comp: &ConnComp, class: usize) -> Rect {
        let tpl = &self.templates[class];
        if *tpl == comp.bitmap {
            return comp.bounds;
        }
        let mut best = (u32::MAX, 0i32, 0i32);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let d = hamming_shifted(&comp.bitmap, tpl, dx, dy);
                if d < best.0 {
                    best = (d, dx, dy);
                }
            }
        }
        Rect {
            x: (comp.bounds.x as i32 + best.1).max(0) as u32,
            y: (comp.bounds.y as i32 + best.2).max(0) as u32,
            width: comp.bounds.width,
            height: comp.bounds.height,
        }
    }
}

/// Centroid-aligned normalized correlation: `AND^2 / (area_a * area_b)`.
fn correlation(
    a: &BitImage,
    a_centroid: (f32, f32),
    a_area: u32,
    b: &BitImage,
    b_centroid: (f32, f32),
    b_area: u32,
) -> f32 {
    if a_area == 0 || b_area == 0 {
        return 0.0;
    }
    let dx = (b_centroid.0 - a_centroid.0).round() as i32;
    let dy = (b_centroid.1 - a_centroid.1).round() as i32;

    let mut and = 0u32;
    for y in 0..a.height {
        for x in 0..a.width {
            if a.get(x, y) && b.get_signed(x as i32 + dx, y as i32 + dy) {
                and += 1;
            }
        }
    }
    (and as f32 * and as f32) / (a_area as f32 * b_area as f32)
}

/// Mismatch count between `a` and `b` with `b` shifted by (dx, dy), over the
/// union of both extents.
fn hamming_shifted(a: &BitImage, b: &BitImage, dx: i32, dy: i32) -> u32 {
    let x0 = 0.min(dx);
    let y0 = 0.min(dy);
    let x1 = (a.width as i32).max(b.width as i32 + dx);
    let y1 = (a.height as i32).max(b.height as i32 + dy);

    let mut err = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            if a.get_signed(x, y) != b.get_signed(x - dx, y - dy) {
                err += 1;
            }
        }
    }
    err
}

/// Number of 4-connected components of a template's background, the `holes`
/// term of the unification bucket hash.
pub fn count_background_regions(image: &BitImage) -> u32 {
    let w = image.width;
    let h = image.height;
    let mut visited = vec![false; w * h];
    let mut stack = Vec::new();
    let mut regions = 0u32;

    for start in 0..w * h {
        if visited[start] || image.get(start % w, start / w) {
            continue;
        }
        regions += 1;
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            let mut push = |nx: usize, ny: usize, stack: &mut Vec<usize>| {
                let nidx = ny * w + nx;
                if !visited[nidx] && !image.get(nx, ny) {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            if x > 0 {
                push(x - 1, y, &mut stack);
            }
            if x + 1 < w {
                push(x + 1, y, &mut stack);
            }
            if y > 0 {
                push(x, y - 1, &mut stack);
            }
            if y + 1 < h {
                push(x, y + 1, &mut stack);
            }
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(rows: &[&str]) -> BitImage {
        let mut img = BitImage::new(rows[0].len(), rows.len()).unwrap();
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if ch == '1' {
                    img.set(x, y, true);
                }
            }
        }
        img
    }

    #[test]
    fn identical_components_share_a_class() {
        let mut page = BitImage::new(20, 8).unwrap();
        for y in 1..7 {
            for x in 1..4 {
                page.set(x, y, true);
                page.set(x + 10, y, true);
            }
        }
        let mut classifier = Classifier::new(THRESHOLD_DEF, WEIGHT_DEF).unwrap();
        classifier.add_page(&page);
        assert_eq!(classifier.num_components(), 2);
        assert_eq!(classifier.num_templates(), 1);
        assert_eq!(classifier.refcounts[0], 2);
    }

    #[test]
    fn dissimilar_components_split_classes() {
        let mut page = BitImage::new(20, 8).unwrap();
        // A solid block and an L shape of roughly the same size.
        for y in 1..7 {
            for x in 1..5 {
                page.set(x, y, true);
            }
        }
        for y in 1..7 {
            page.set(12, y, true);
        }
        for x in 12..16 {
            page.set(x, 6, true);
        }
        let mut classifier = Classifier::new(THRESHOLD_DEF, WEIGHT_DEF).unwrap();
        classifier.add_page(&page);
        assert_eq!(classifier.num_components(), 2);
        assert_eq!(classifier.num_templates(), 2);
    }

    #[test]
    fn background_regions_count_holes() {
        // A closed box whose border fills the bitmap: the enclosed hole is
        // the only background region.
        let ring = glyph(&[
            "11111",
            "10001",
            "10001",
            "11111",
        ]);
        assert_eq!(count_background_regions(&ring), 1);

        // Fully inked template has no background at all.
        let solid = glyph(&["111", "111"]);
        assert_eq!(count_background_regions(&solid), 0);

        // An open shape keeps the surrounding background connected and adds
        // nothing for the missing wall.
        let cup = glyph(&[
            "10001",
            "10001",
            "11111",
        ]);
        assert_eq!(count_background_regions(&cup), 1);
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(Classifier::new(0.2, 0.5).is_err());
        assert!(Classifier::new(0.92, 0.95).is_err());
    }
}
