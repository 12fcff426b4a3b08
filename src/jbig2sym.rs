//! Bitmap primitives and the symbol-side bitstream coders.
//!
//! [`BitImage`] is the 1-bpp raster every stage works on, MSB-first within
//! each byte as JBIG2 requires. The two functions at the bottom produce the
//! arithmetic payload of symbol-dictionary and text-region segments; their
//! emission order (height classes, strip walk) is what decoders reconstruct,
//! so it is fixed here and nowhere else.

use crate::jbig2arith::{IntProc, Jbig2ArithCoder, DEFAULT_AT};
use crate::Jbig2Error;
use bitvec::order::Msb0;
use bitvec::prelude::*;
use log::debug;
use ndarray::Array2;
use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// A bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Bottom row of the box, the text-region sort key.
    pub fn bottom(&self) -> u32 {
        self.y + self.height - 1
    }
}

/// A 1-bpp bitmap with MSB-first bit order.
#[derive(Debug, Clone)]
pub struct BitImage {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    bits: BitVec<u8, Msb0>,
    packed: OnceCell<Vec<u32>>,
}

impl PartialEq for BitImage {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.bits == other.bits
    }
}

impl Eq for BitImage {}

impl BitImage {
    /// Largest supported dimension on either axis.
    pub const MAX_DIMENSION: usize = 1 << 24;

    /// Creates an all-white bitmap.
    pub fn new(width: usize, height: usize) -> Result<Self, Jbig2Error> {
        if width == 0 || height == 0 {
            return Err(Jbig2Error::InvalidInput(format!(
                "empty bitmap {}x{}",
                width, height
            )));
        }
        if width > Self::MAX_DIMENSION || height > Self::MAX_DIMENSION {
            return Err(Jbig2Error::ResourceExceeded(format!(
                "bitmap {}x{} exceeds {} on one axis",
                width,
                height,
                Self::MAX_DIMENSION
            )));
        }
        let mut bits = BitVec::with_capacity(width * height);
        bits.resize(width * height, false);
        Ok(Self {
            width,
            height,
            bits,
            packed: OnceCell::new(),
        })
    }

    /// Pixel at (x, y); out-of-bounds reads are white.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[y * self.width + x]
    }

    /// Signed-coordinate variant of [`get`](Self::get).
    #[inline]
    pub fn get_signed(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && self.get(x as usize, y as usize)
    }

    /// Sets the pixel at (x, y). Out-of-bounds writes are ignored.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.width && y < self.height {
            self.bits.set(y * self.width + x, value);
            self.packed.take();
        }
    }

    /// Count of ON pixels.
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Row-padded packed words, 32 pixels per word MSB-first, pad bits zero.
    /// Cached; any [`set`](Self::set) invalidates the cache.
    pub fn packed_words(&self) -> &[u32] {
        self.packed.get_or_init(|| {
            let wpr = (self.width + 31) / 32;
            let mut out = vec![0u32; wpr * self.height];
            for y in 0..self.height {
                for x in 0..self.width {
                    if self.bits[y * self.width + x] {
                        out[y * wpr + (x >> 5)] |= 1 << (31 - (x & 31));
                    }
                }
            }
            out
        })
    }

    /// XOR of two same-size bitmaps.
    pub fn xor(&self, other: &Self) -> Result<BitImage, Jbig2Error> {
        if self.width != other.width || self.height != other.height {
            return Err(Jbig2Error::InvalidInput(
                "xor of differently sized bitmaps".into(),
            ));
        }
        let mut out = self.clone();
        out.packed.take();
        // Both bitmaps share the same layout and keep their tail bits zero,
        // so a byte-wise XOR over the backing storage is exact.
        for (dst, src) in out
            .bits
            .as_raw_mut_slice()
            .iter_mut()
            .zip(other.bits.as_raw_slice())
        {
            *dst ^= src;
        }
        Ok(out)
    }

    /// Content hash covering dimensions and pixels, for exact-duplicate
    /// detection.
    pub fn content_key(&self) -> u64 {
        let mut seed = Vec::with_capacity(16 + self.bits.as_raw_slice().len());
        seed.extend_from_slice(&(self.width as u64).to_be_bytes());
        seed.extend_from_slice(&(self.height as u64).to_be_bytes());
        seed.extend_from_slice(self.bits.as_raw_slice());
        xxh3_64(&seed)
    }
}

impl lutz::Image for BitImage {
    fn width(&self) -> u32 {
        self.width as u32
    }

    fn height(&self) -> u32 {
        self.height as u32
    }

    fn has_pixel(&self, x: u32, y: u32) -> bool {
        self.get(x as usize, y as usize)
    }
}

/// Converts an `Array2<u8>` page (row-major, nonzero = black) to a bitmap.
pub fn array_to_bitimage(array: &Array2<u8>) -> Result<BitImage, Jbig2Error> {
    let (height, width) = array.dim();
    let mut image = BitImage::new(width, height)?;
    for ((y, x), &pixel) in array.indexed_iter() {
        if pixel > 0 {
            image.set(x, y, true);
        }
    }
    Ok(image)
}

/// Loads a raw PBM (P4) file. PBM and JBIG2 agree that a set bit is black.
pub fn load_pbm(path: &Path) -> Result<BitImage, Jbig2Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "P4" {
        return Err(Jbig2Error::InvalidInput(format!(
            "{}: not a raw PBM (P4) file",
            path.display()
        )));
    }

    loop {
        line.clear();
        reader.read_line(&mut line)?;
        let trimmed = line.trim();
        if !trimmed.starts_with('#') && !trimmed.is_empty() {
            break;
        }
    }
    let dims: Vec<usize> = line
        .split_whitespace()
        .map(|s| s.parse())
        .collect::<Result<_, _>>()
        .map_err(|_| Jbig2Error::InvalidInput(format!("{}: bad PBM header", path.display())))?;
    if dims.len() != 2 {
        return Err(Jbig2Error::InvalidInput(format!(
            "{}: bad PBM dimensions",
            path.display()
        )));
    }
    let (width, height) = (dims[0], dims[1]);

    let stride = (width + 7) / 8;
    let mut data = vec![0u8; stride * height];
    reader.read_exact(&mut data)?;

    let mut image = BitImage::new(width, height)?;
    for y in 0..height {
        for x in 0..width {
            if data[y * stride + x / 8] & (0x80 >> (x % 8)) != 0 {
                image.set(x, y, true);
            }
        }
    }
    Ok(image)
}

/// Orders a subset of templates for dictionary emission: height ascending,
/// width ascending within each height class.
pub fn sort_for_dictionary(templates: &[BitImage], subset: &[usize]) -> Vec<usize> {
    let mut order = subset.to_vec();
    order.sort_by_key(|&t| (templates[t].height, templates[t].width));
    order
}

/// Encodes a symbol dictionary payload: per height class an IADH delta, then
/// IADW deltas each followed by the raw bitmap through the shared generic
/// contexts, OOB closing the class; after all classes the export runs
/// IAEX(0), IAEX(n). Records `template id -> dictionary index` in `symmap`
/// and returns the number of symbols written (exact duplicates collapse onto
/// one entry).
pub fn encode_symbol_table(
    coder: &mut Jbig2ArithCoder,
    templates: &[BitImage],
    subset: &[usize],
    symmap: &mut FxHashMap<usize, usize>,
) -> Result<usize, Jbig2Error> {
    // Collapse exact duplicates before forming height classes. An empty
    // subset still produces a well-formed dictionary exporting nothing.
    let mut seen: FxHashMap<u64, usize> = FxHashMap::default();
    let mut uniques = Vec::with_capacity(subset.len());
    let mut aliases: Vec<(usize, usize)> = Vec::new();
    for &t in subset {
        match seen.entry(templates[t].content_key()) {
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(t);
                uniques.push(t);
            }
            std::collections::hash_map::Entry::Occupied(e) => {
                aliases.push((t, *e.get()));
            }
        }
    }

    let order = sort_for_dictionary(templates, &uniques);
    let mut number = 0usize;
    let mut hcheight = 0i32;
    let mut i = 0;
    while i < order.len() {
        let height = templates[order[i]].height;
        let mut j = i;
        while j < order.len() && templates[order[j]].height == height {
            j += 1;
        }
        coder.encode_int(IntProc::Iadh, height as i32 - hcheight)?;
        hcheight = height as i32;

        let mut symwidth = 0i32;
        for &t in &order[i..j] {
            let tpl = &templates[t];
            coder.encode_int(IntProc::Iadw, tpl.width as i32 - symwidth)?;
            symwidth = tpl.width as i32;
            coder.encode_bitimage(tpl, &DEFAULT_AT, false)?;
            symmap.insert(t, number);
            number += 1;
        }
        coder.encode_oob(IntProc::Iadw);
        i = j;
    }

    for (alias, original) in aliases {
        let idx = symmap[&original];
        symmap.insert(alias, idx);
    }

    coder.encode_int(IntProc::Iaex, 0)?;
    coder.encode_int(IntProc::Iaex, number as i32)?;
    coder.finish();

    debug!("symbol table: {} symbols, {} bytes", number, coder.datasize());
    Ok(number)
}

/// Encodes a text region payload: instances sorted by the bottom line of
/// their box, grouped into strips `sbstrips` pixels high, left-to-right
/// within a strip. Coordinates go out as IADT/IAFS/IADS deltas (IAIT per
/// instance when strips are taller than one line), the symbol id through the
/// IAID tree, and OOB on IADS closes each strip.
///
/// `comps` are global component indices, `boxes` their (already aligned)
/// bounding boxes in the same order, `assignments` maps components to
/// template ids, and `dict_index` maps template ids to positions in the
/// referred dictionaries.
#[allow(clippy::too_many_arguments)]
pub fn encode_text_region(
    coder: &mut Jbig2ArithCoder,
    comps: &[usize],
    boxes: &[Rect],
    templates: &[BitImage],
    assignments: &[usize],
    dict_index: &FxHashMap<usize, usize>,
    num_dict_symbols: usize,
    sbstrips: u32,
    symbits: u32,
) -> Result<(), Jbig2Error> {
    if !matches!(sbstrips, 1 | 2 | 4 | 8) {
        return Err(Jbig2Error::InvalidValue {
            name: "sbstrips",
            value: sbstrips as f64,
            min: 1.0,
            max: 8.0,
        });
    }
    debug_assert_eq!(comps.len(), boxes.len());

    // Sort instance slots by the bottom line of their box.
    let mut order: Vec<usize> = (0..comps.len()).collect();
    order.sort_by_key(|&slot| boxes[slot].bottom());

    coder.encode_int(IntProc::Iadt, 0)?;

    let sbstrips = sbstrips as i32;
    let mut stript = 0i32;
    let mut firsts = 0i32;
    let mut i = 0;
    while i < order.len() {
        let strip_top = (boxes[order[i]].bottom() as i32 / sbstrips) * sbstrips;
        let mut j = i;
        while j < order.len() && (boxes[order[j]].bottom() as i32) < strip_top + sbstrips {
            j += 1;
        }
        let mut strip: Vec<usize> = order[i..j].to_vec();
        strip.sort_by_key(|&slot| boxes[slot].x);

        coder.encode_int(IntProc::Iadt, (strip_top - stript) / sbstrips)?;
        stript = strip_top;

        let mut curs = 0i32;
        let mut first = true;
        for &slot in &strip {
            let b = &boxes[slot];
            if first {
                let deltafs = b.x as i32 - firsts;
                coder.encode_int(IntProc::Iafs, deltafs)?;
                firsts += deltafs;
                curs = firsts;
                first = false;
            } else {
                let deltas = b.x as i32 - curs;
                coder.encode_int(IntProc::Iads, deltas)?;
                curs += deltas;
            }
            if sbstrips > 1 {
                coder.encode_int(IntProc::Iait, b.bottom() as i32 - stript)?;
            }

            let class = assignments[comps[slot]];
            let id = *dict_index.get(&class).ok_or_else(|| {
                Jbig2Error::CodingError(format!(
                    "component class {} missing from referred dictionaries",
                    class
                ))
            })?;
            if id >= num_dict_symbols {
                return Err(Jbig2Error::CodingError(format!(
                    "symbol id {} out of range (dictionary exports {})",
                    id, num_dict_symbols
                )));
            }
            coder.encode_iaid(symbits, id as u32);
            curs += templates[class].width as i32 - 1;
        }
        coder.encode_oob(IntProc::Iads);
        i = j;
    }

    coder.finish();
    Ok(())
}
