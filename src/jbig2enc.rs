//! Multi-page encoder orchestration.
//!
//! [`Jbig2Ctx`] owns the classifier state across pages and turns it into the
//! segment stream: a global symbol dictionary shared by every page, an
//! optional per-page dictionary for symbols used on a single page, and one
//! text region per page. [`encode_generic`] is the lossless single-region
//! alternative for non-symbol input.

use crate::jbig2arith::{Jbig2ArithCoder, DEFAULT_AT};
use crate::jbig2classify::{
    count_background_regions, Classifier, THRESHOLD_DEF, WEIGHT_DEF,
};
use crate::jbig2comparator::are_equivalent;
use crate::jbig2structs::{
    FileHeader, GenericRegionParams, PageInfo, Segment, SegmentType, SymbolDictParams,
    TextRegionParams,
};
use crate::jbig2sym::{array_to_bitimage, encode_symbol_table, encode_text_region, BitImage, Rect};
use crate::Jbig2Error;
use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info};
use ndarray::Array2;
use rustc_hash::FxHashMap;

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct Jbig2Config {
    /// Use symbol classification and text regions instead of one generic
    /// region per page.
    pub symbol_mode: bool,
    /// Enable TPGD (typical prediction) in generic region coding.
    pub duplicate_line_removal: bool,
    /// Merge visually equivalent templates after classification.
    pub auto_thresh: bool,
    /// Bucket templates by shape hash before comparing them.
    pub hash: bool,
    /// Classifier correlation threshold.
    pub threshold: f32,
    /// Classifier ink-density weight.
    pub weight: f32,
    /// Text region strip height, one of {1, 2, 4, 8}.
    pub sbstrips: u32,
    /// Resolution written into page headers, 0 if unknown.
    pub dpi: u32,
    /// Emit the file header and trailer segments.
    pub want_full_headers: bool,
}

impl Default for Jbig2Config {
    fn default() -> Self {
        Self {
            symbol_mode: false,
            duplicate_line_removal: false,
            auto_thresh: false,
            hash: true,
            threshold: THRESHOLD_DEF,
            weight: WEIGHT_DEF,
            sbstrips: 1,
            dpi: 0,
            want_full_headers: true,
        }
    }
}

impl Jbig2Config {
    /// Configuration for symbol-mode encoding.
    pub fn symbol() -> Self {
        Self {
            symbol_mode: true,
            ..Self::default()
        }
    }
}

/// Number of bits needed to code one of `v` symbol ids.
fn log2up(v: usize) -> u32 {
    if v <= 1 {
        return 0;
    }
    usize::BITS - (v - 1).leading_zeros()
}

/// Unification bucket hash: glyphs can only be equivalent when their size
/// and background topology agree.
fn template_hash(template: &BitImage) -> u32 {
    let holes = count_background_regions(template);
    ((holes as u64 + 10 * template.height as u64 + 10_000 * template.width as u64) % 10_000_000)
        as u32
}

/// Multi-page symbol-mode encoder context.
///
/// Lifecycle: [`new`](Self::new) once, [`add_page`](Self::add_page) per page,
/// [`pages_complete`](Self::pages_complete) to emit the global dictionary,
/// then [`produce_page`](Self::produce_page) for each page in order.
pub struct Jbig2Ctx {
    config: Jbig2Config,
    classifier: Classifier,
    full_headers: bool,
    /// In PDF mode every page stream claims page 1.
    pdf_page_numbering: bool,
    segnum: u32,
    symtab_segment: u32,
    /// Per page, the component indices belonging to it.
    pagecomps: Vec<Vec<usize>>,
    /// Per page, the classes used only on that page (and only once).
    single_use_symbols: Vec<Vec<usize>>,
    num_global_symbols: usize,
    /// Template id -> index in the global dictionary.
    symmap: FxHashMap<usize, usize>,
    page_width: Vec<u32>,
    page_height: Vec<u32>,
    page_xres: Vec<u32>,
    page_yres: Vec<u32>,
}

impl Jbig2Ctx {
    /// Creates a context, validating the classifier parameters.
    pub fn new(config: Jbig2Config) -> Result<Self, Jbig2Error> {
        let classifier = Classifier::new(config.threshold, config.weight)?;
        let full_headers = config.want_full_headers;
        Ok(Self {
            config,
            classifier,
            full_headers,
            pdf_page_numbering: !full_headers,
            segnum: 0,
            symtab_segment: 0,
            pagecomps: Vec::new(),
            single_use_symbols: Vec::new(),
            num_global_symbols: 0,
            symmap: FxHashMap::default(),
            page_width: Vec::new(),
            page_height: Vec::new(),
            page_xres: Vec::new(),
            page_yres: Vec::new(),
        })
    }

    /// Number of pages added so far.
    pub fn num_pages(&self) -> usize {
        self.classifier.npages
    }

    /// Classifies a page into the shared symbol state.
    pub fn add_page(&mut self, image: &BitImage) -> Result<(), Jbig2Error> {
        if image.width > BitImage::MAX_DIMENSION || image.height > BitImage::MAX_DIMENSION {
            return Err(Jbig2Error::ResourceExceeded(format!(
                "page {}x{} exceeds the encoder limit",
                image.width, image.height
            )));
        }
        self.classifier.add_page(image);
        self.page_width.push(image.width as u32);
        self.page_height.push(image.height as u32);
        self.page_xres.push(self.config.dpi);
        self.page_yres.push(self.config.dpi);
        Ok(())
    }

    /// [`add_page`](Self::add_page) for `Array2<u8>` input (nonzero = black).
    pub fn add_page_array(&mut self, page: &Array2<u8>) -> Result<(), Jbig2Error> {
        let image = array_to_bitimage(page)?;
        self.add_page(&image)
    }

    /// Merges template `b` into template `a` (requires `a < b`): the
    /// assignment array is reindexed, reference counts accumulate, and the
    /// last template is swapped into the vacated slot.
    fn unite_templates(&mut self, a: usize, b: usize) {
        debug_assert!(a < b && b < self.classifier.templates.len());

        for class in self.classifier.assignments.iter_mut() {
            if *class == b {
                *class = a;
            }
        }
        self.classifier.refcounts[a] += self.classifier.refcounts[b];

        // Swap-remove: the former last template takes index b.
        let last = self.classifier.templates.len() - 1;
        if b != last {
            for class in self.classifier.assignments.iter_mut() {
                if *class == last {
                    *class = b;
                }
            }
        }
        self.classifier.templates.swap_remove(b);
        self.classifier.template_centroids.swap_remove(b);
        self.classifier.template_areas.swap_remove(b);
        self.classifier.refcounts.swap_remove(b);
    }

    /// Exhaustive unification: every template pair is tested for visual
    /// equivalence.
    pub fn auto_threshold(&mut self) {
        let mut i = 0;
        while i < self.classifier.templates.len() {
            let mut j = i + 1;
            while j < self.classifier.templates.len() {
                if are_equivalent(&self.classifier.templates[i], &self.classifier.templates[j]) {
                    self.unite_templates(i, j);
                    // slot j now holds a yet-untested template
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    /// Hashed unification: pairs are only compared when their shape hash
    /// (hole count and dimensions) matches, which prunes almost every pair
    /// on large dictionaries.
    pub fn auto_threshold_using_hash(&mut self) {
        let mut hashes: Vec<u32> = self.classifier.templates.iter().map(template_hash).collect();
        let mut i = 0;
        while i < self.classifier.templates.len() {
            let mut j = i + 1;
            while j < self.classifier.templates.len() {
                if hashes[i] == hashes[j]
                    && are_equivalent(&self.classifier.templates[i], &self.classifier.templates[j])
                {
                    self.unite_templates(i, j);
                    hashes.swap_remove(j);
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    /// Finishes classification and emits the global symbol dictionary
    /// (preceded by the file header when full headers are requested).
    ///
    /// Symbols used on more than one page, or all symbols of a single-page
    /// document, go into the global dictionary; the rest are deferred to
    /// per-page dictionaries because some PDF readers decode the global
    /// dictionary for every page.
    pub fn pages_complete(&mut self) -> Result<Vec<u8>, Jbig2Error> {
        let npages = self.classifier.npages;
        if npages == 0 {
            return Err(Jbig2Error::InvalidInput("no pages added".into()));
        }

        if self.config.auto_thresh {
            if self.config.hash {
                self.auto_threshold_using_hash();
            } else {
                self.auto_threshold();
            }
        }

        let ntemplates = self.classifier.templates.len();
        let mut used = vec![0u32; ntemplates];
        for &class in &self.classifier.assignments {
            used[class] += 1;
        }
        if used.iter().any(|&u| u == 0) {
            return Err(Jbig2Error::CodingError(
                "template with no assigned components".into(),
            ));
        }

        let single_page = npages == 1;
        let multiuse: Vec<usize> = (0..ntemplates)
            .filter(|&t| used[t] > 1 || single_page)
            .collect();

        self.pagecomps = vec![Vec::new(); npages];
        self.single_use_symbols = vec![Vec::new(); npages];
        for comp in 0..self.classifier.assignments.len() {
            let page = self.classifier.comp_pages[comp];
            self.pagecomps[page].push(comp);
            let class = self.classifier.assignments[comp];
            if used[class] == 1 && !single_page {
                self.single_use_symbols[page].push(class);
            }
        }

        let mut coder = Jbig2ArithCoder::new();
        self.symmap.clear();
        let n_global = encode_symbol_table(
            &mut coder,
            &self.classifier.templates,
            &multiuse,
            &mut self.symmap,
        )?;
        self.num_global_symbols = n_global;

        info!(
            "symbol classification complete: pages:{} symbols:{} global:{}",
            npages, ntemplates, n_global
        );

        let params = SymbolDictParams {
            sd_template: 0,
            at: DEFAULT_AT,
            exsyms: n_global as u32,
            newsyms: n_global as u32,
        };
        let param_bytes = params.to_bytes();

        self.symtab_segment = self.segnum;
        let seg = Segment {
            number: self.segnum,
            seg_type: SegmentType::SymbolDictionary,
            retain_bits: 1,
            referred_to: Vec::new(),
            page: 0,
            len: (param_bytes.len() + coder.datasize()) as u32,
        };
        self.segnum += 1;

        let mut out = Vec::new();
        if self.full_headers {
            out.extend(FileHeader {
                n_pages: npages as u32,
            }
            .to_bytes());
        }
        seg.write_into(&mut out)?;
        out.extend_from_slice(&param_bytes);
        out.extend_from_slice(coder.as_bytes());
        Ok(out)
    }

    /// Emits one page: page information, an optional page-local symbol
    /// dictionary, the text region, end-of-page, and the end-of-file
    /// trailer after the last page of a full file.
    pub fn produce_page(&mut self, page_no: usize) -> Result<Vec<u8>, Jbig2Error> {
        let npages = self.classifier.npages;
        if page_no >= npages || self.pagecomps.len() != npages {
            return Err(Jbig2Error::InvalidInput(format!(
                "page {} not available (pages: {}, flushed: {})",
                page_no,
                npages,
                self.pagecomps.len() == npages
            )));
        }
        let last_page = page_no + 1 == npages;
        let include_trailer = last_page && self.full_headers;
        let page_assoc = if self.pdf_page_numbering {
            1
        } else {
            1 + page_no as u32
        };

        let mut out = Vec::new();

        // Page information.
        let pageinfo = PageInfo {
            width: self.page_width[page_no],
            height: self.page_height[page_no],
            xres: self.page_xres[page_no],
            yres: self.page_yres[page_no],
            is_lossless: false,
            ..Default::default()
        };
        let pageinfo_bytes = pageinfo.to_bytes();
        let seg = Segment {
            number: self.segnum,
            seg_type: SegmentType::PageInformation,
            retain_bits: 0,
            referred_to: Vec::new(),
            page: page_assoc,
            len: pageinfo_bytes.len() as u32,
        };
        self.segnum += 1;
        seg.write_into(&mut out)?;
        out.extend_from_slice(&pageinfo_bytes);

        // Page-local dictionary for single-use symbols.
        let mut second_map = FxHashMap::default();
        let mut n_local = 0usize;
        let mut local_dict_segment = None;
        if !self.single_use_symbols[page_no].is_empty() {
            let mut dict_coder = Jbig2ArithCoder::new();
            n_local = encode_symbol_table(
                &mut dict_coder,
                &self.classifier.templates,
                &self.single_use_symbols[page_no],
                &mut second_map,
            )?;
            let params = SymbolDictParams {
                sd_template: 0,
                at: DEFAULT_AT,
                exsyms: n_local as u32,
                newsyms: n_local as u32,
            };
            let param_bytes = params.to_bytes();
            let symseg = Segment {
                number: self.segnum,
                seg_type: SegmentType::SymbolDictionary,
                retain_bits: 0,
                referred_to: Vec::new(),
                page: page_assoc,
                len: (param_bytes.len() + dict_coder.datasize()) as u32,
            };
            self.segnum += 1;
            symseg.write_into(&mut out)?;
            out.extend_from_slice(&param_bytes);
            out.extend_from_slice(dict_coder.as_bytes());
            local_dict_segment = Some(symseg.number);
        }

        // The text region sees the referred dictionaries as one symbol
        // list: global entries first, then the page-local ones.
        let mut dict_index = self.symmap.clone();
        for (&class, &idx) in &second_map {
            dict_index.insert(class, self.num_global_symbols + idx);
        }
        let numsyms = self.num_global_symbols + n_local;
        let symbits = log2up(numsyms);

        let comps = &self.pagecomps[page_no];
        let boxes: Vec<Rect> = comps
            .iter()
            .map(|&c| self.classifier.comp_boxes[c])
            .collect();

        let mut text_coder = Jbig2ArithCoder::new();
        encode_text_region(
            &mut text_coder,
            comps,
            &boxes,
            &self.classifier.templates,
            &self.classifier.assignments,
            &dict_index,
            numsyms,
            self.config.sbstrips,
            symbits,
        )?;

        let textreg = TextRegionParams {
            width: self.page_width[page_no],
            height: self.page_height[page_no],
            x: 0,
            y: 0,
            comb_operator: 0,
            log_strips: self.config.sbstrips.trailing_zeros() as u8,
            ref_corner: 0,
            transposed: false,
            comb_op: 0,
            ds_offset: 0,
        };
        let textreg_bytes = textreg.to_bytes();

        let mut referred = vec![self.symtab_segment];
        if let Some(num) = local_dict_segment {
            referred.push(num);
        }
        let segr = Segment {
            number: self.segnum,
            seg_type: SegmentType::ImmTextRegion,
            retain_bits: 2,
            referred_to: referred,
            page: page_assoc,
            len: (textreg_bytes.len() + 4 + text_coder.datasize()) as u32,
        };
        self.segnum += 1;
        segr.write_into(&mut out)?;
        out.extend_from_slice(&textreg_bytes);
        out.write_u32::<BigEndian>(comps.len() as u32)?;
        out.extend_from_slice(text_coder.as_bytes());

        debug!(
            "page {}: {} instances, {} local symbols, {} bytes",
            page_no,
            comps.len(),
            n_local,
            out.len()
        );

        if self.full_headers {
            let endseg = Segment {
                number: self.segnum,
                seg_type: SegmentType::EndOfPage,
                retain_bits: 0,
                referred_to: Vec::new(),
                page: page_assoc,
                len: 0,
            };
            self.segnum += 1;
            endseg.write_into(&mut out)?;
        }
        if include_trailer {
            let trailer = Segment {
                number: self.segnum,
                seg_type: SegmentType::EndOfFile,
                retain_bits: 0,
                referred_to: Vec::new(),
                page: 0,
                len: 0,
            };
            self.segnum += 1;
            trailer.write_into(&mut out)?;
        }

        Ok(out)
    }
}

/// Encodes one page as a single lossless generic region.
///
/// With `full_headers` the output is a complete file: header, page
/// information, immediate generic region, end-of-page and end-of-file.
/// `xres`/`yres` go into the page header as given (0 = unknown).
pub fn encode_generic(
    image: &BitImage,
    full_headers: bool,
    xres: u32,
    yres: u32,
    tpgd: bool,
) -> Result<Vec<u8>, Jbig2Error> {
    let mut coder = Jbig2ArithCoder::new();
    coder.encode_bitimage(image, &DEFAULT_AT, tpgd)?;
    coder.finish();

    let pageinfo = PageInfo {
        width: image.width as u32,
        height: image.height as u32,
        xres,
        yres,
        is_lossless: true,
        ..Default::default()
    };
    let pageinfo_bytes = pageinfo.to_bytes();

    let genreg = GenericRegionParams {
        width: image.width as u32,
        height: image.height as u32,
        x: 0,
        y: 0,
        comb_operator: 0,
        mmr: false,
        template: 0,
        tpgdon: tpgd,
        at: DEFAULT_AT,
    };
    let genreg_bytes = genreg.to_bytes();

    let mut out = Vec::new();
    if full_headers {
        out.extend(FileHeader { n_pages: 1 }.to_bytes());
    }

    let seg = Segment {
        number: 0,
        seg_type: SegmentType::PageInformation,
        retain_bits: 0,
        referred_to: Vec::new(),
        page: 1,
        len: pageinfo_bytes.len() as u32,
    };
    seg.write_into(&mut out)?;
    out.extend_from_slice(&pageinfo_bytes);

    let seg2 = Segment {
        number: 1,
        seg_type: SegmentType::ImmGenericRegion,
        retain_bits: 0,
        referred_to: Vec::new(),
        page: 1,
        len: (genreg_bytes.len() + coder.datasize()) as u32,
    };
    seg2.write_into(&mut out)?;
    out.extend_from_slice(&genreg_bytes);
    out.extend_from_slice(coder.as_bytes());

    if full_headers {
        let endseg = Segment {
            number: 2,
            seg_type: SegmentType::EndOfPage,
            retain_bits: 0,
            referred_to: Vec::new(),
            page: 1,
            len: 0,
        };
        endseg.write_into(&mut out)?;
        let trailer = Segment {
            number: 3,
            seg_type: SegmentType::EndOfFile,
            retain_bits: 0,
            referred_to: Vec::new(),
            page: 0,
            len: 0,
        };
        trailer.write_into(&mut out)?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2up_matches_symbol_code_lengths() {
        assert_eq!(log2up(0), 0);
        assert_eq!(log2up(1), 0);
        assert_eq!(log2up(2), 1);
        assert_eq!(log2up(3), 2);
        assert_eq!(log2up(4), 2);
        assert_eq!(log2up(5), 3);
        assert_eq!(log2up(256), 8);
        assert_eq!(log2up(257), 9);
    }

    #[test]
    fn template_hash_depends_on_shape() {
        let a = BitImage::new(8, 12).unwrap();
        let b = BitImage::new(8, 13).unwrap();
        assert_ne!(template_hash(&a), template_hash(&b));
        let mut ring = BitImage::new(8, 12).unwrap();
        for x in 1..7 {
            ring.set(x, 1, true);
            ring.set(x, 10, true);
        }
        for y in 1..11 {
            ring.set(1, y, true);
            ring.set(6, y, true);
        }
        // Same size, different hole count.
        assert_ne!(template_hash(&a), template_hash(&ring));
    }
}
