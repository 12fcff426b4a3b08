//! Context-adaptive arithmetic coder for JBIG2.
//!
//! Implements the MQ coder of ITU-T T.88 Annex E together with the three
//! coding procedures the rest of the encoder drives through it: the IA*
//! integer coder (Annex A), the IAID symbol-id coder and the template-0
//! generic-region coder with adaptive-template pixels and typical prediction
//! (TPGD).

use crate::jbig2sym::BitImage;
use crate::Jbig2Error;
use lazy_static::lazy_static;
use log::debug;

/// Number of packed generic-region contexts (16-bit neighbourhood).
const GENERIC_CTX_SIZE: usize = 1 << 16;

/// Context used for the per-row typical-prediction bit.
const TPGD_CTX: usize = 0x9B25;

/// Default adaptive-template offsets written into every region header.
pub const DEFAULT_AT: [(i8, i8); 4] = [(3, -1), (-3, -1), (2, -2), (-2, -2)];

/// One probability-estimation state (ITU-T T.88 Table E.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct State {
    /// LPS probability estimate.
    pub qe: u16,
    /// Next state after coding an MPS.
    pub nmps: u8,
    /// Next state after coding an LPS.
    pub nlps: u8,
    /// Toggle the MPS sense after coding an LPS.
    pub switch: bool,
}

macro_rules! s {
    ($qe:expr, $nmps:expr, $nlps:expr, $sw:expr) => {
        State {
            qe: $qe,
            nmps: $nmps,
            nlps: $nlps,
            switch: $sw != 0,
        }
    };
}

/// Table E.1, indices 0..=46 (the MPS = 0 half).
#[rustfmt::skip]
pub const BASE: [State; 47] = [
    s!(0x5601,  1,  1, 1),
    s!(0x3401,  2,  6, 0),
    s!(0x1801,  3,  9, 0),
    s!(0x0AC1,  4, 12, 0),
    s!(0x0521,  5, 29, 0),
    s!(0x0221, 38, 33, 0),
    s!(0x5601,  7,  6, 1),
    s!(0x5401,  8, 14, 0),
    s!(0x4801,  9, 14, 0),
    s!(0x3801, 10, 14, 0),
    s!(0x3001, 11, 17, 0),
    s!(0x2401, 12, 18, 0),
    s!(0x1C01, 13, 20, 0),
    s!(0x1601, 29, 21, 0),
    s!(0x5601, 15, 14, 1),
    s!(0x5401, 16, 14, 0),
    s!(0x5101, 17, 15, 0),
    s!(0x4801, 18, 16, 0),
    s!(0x3801, 19, 17, 0),
    s!(0x3401, 20, 18, 0),
    s!(0x3001, 21, 19, 0),
    s!(0x2801, 22, 19, 0),
    s!(0x2401, 23, 20, 0),
    s!(0x2201, 24, 21, 0),
    s!(0x1C01, 25, 22, 0),
    s!(0x1801, 26, 23, 0),
    s!(0x1601, 27, 24, 0),
    s!(0x1401, 28, 25, 0),
    s!(0x1201, 29, 26, 0),
    s!(0x1101, 30, 27, 0),
    s!(0x0AC1, 31, 28, 0),
    s!(0x09C1, 32, 29, 0),
    s!(0x08A1, 33, 30, 0),
    s!(0x0521, 34, 31, 0),
    s!(0x0441, 35, 32, 0),
    s!(0x02A1, 36, 33, 0),
    s!(0x0221, 37, 34, 0),
    s!(0x0141, 38, 35, 0),
    s!(0x0111, 39, 36, 0),
    s!(0x0085, 40, 37, 0),
    s!(0x0049, 41, 38, 0),
    s!(0x0025, 42, 39, 0),
    s!(0x0015, 43, 40, 0),
    s!(0x0009, 44, 41, 0),
    s!(0x0005, 45, 42, 0),
    s!(0x0001, 45, 43, 0),
    s!(0x5601, 46, 46, 0), // terminal state
];

lazy_static! {
    /// The 94-state table: indices 0..47 carry MPS = 0, 47..94 carry MPS = 1.
    /// A context cell stores one index into this table, so the MPS sense
    /// never needs a separate bit.
    static ref FULL: [State; 94] = {
        let mut t = [BASE[0]; 94];
        for i in 0..47 {
            let s = BASE[i];
            t[i] = State {
                qe: s.qe,
                nmps: s.nmps,
                nlps: if s.switch { s.nlps + 47 } else { s.nlps },
                switch: s.switch,
            };
            t[i + 47] = State {
                qe: s.qe,
                nmps: s.nmps + 47,
                nlps: if s.switch { s.nlps } else { s.nlps + 47 },
                switch: s.switch,
            };
        }
        t
    };
}

/// Identities of the IA* integer coding procedures, each with its own
/// 512-entry context array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum IntProc {
    /// Number of symbol instances in a text region.
    Iaai = 0,
    /// Height-class delta in a symbol dictionary.
    Iadh,
    /// S-coordinate delta within a strip.
    Iads,
    /// Strip T-coordinate delta.
    Iadt,
    /// Width delta within a height class.
    Iadw,
    /// Export run lengths.
    Iaex,
    /// First S-coordinate of a strip.
    Iafs,
    /// T-offset of an instance within a strip.
    Iait,
    /// Refinement height delta (reserved; refinement is not emitted).
    Iardh,
    /// Refinement width delta (reserved).
    Iardw,
    /// Refinement X offset (reserved).
    Iardx,
    /// Refinement Y offset (reserved).
    Iardy,
    /// Refinement flag (reserved).
    Iari,
}

const NUM_INT_PROCS: usize = 13;

/// One row of the Annex A integer coding table: values in `bot..=top` are
/// coded as the `bits`-wide prefix literal `data` (sign bit first, then the
/// range selector) followed by `intbits` magnitude bits of `|v| - delta`.
struct IntEncRange {
    bot: i32,
    top: i32,
    data: u8,
    bits: u8,
    delta: u32,
    intbits: u8,
}

const fn r(bot: i32, top: i32, data: u8, bits: u8, delta: u32, intbits: u8) -> IntEncRange {
    IntEncRange {
        bot,
        top,
        data,
        bits,
        delta,
        intbits,
    }
}

/// T.88 Annex A, Table A.1 as seen by an encoder. The `-1` and `-3..=-2`
/// rows fold their magnitude bits into the prefix literal.
const INT_ENC_RANGE: [IntEncRange; 13] = [
    r(0, 3, 0b00, 2, 0, 2),
    r(-1, -1, 0b1001, 4, 0, 0),
    r(-3, -2, 0b101, 3, 2, 1),
    r(4, 19, 0b010, 3, 4, 4),
    r(-19, -4, 0b110, 3, 4, 4),
    r(20, 83, 0b0110, 4, 20, 6),
    r(-83, -20, 0b1110, 4, 20, 6),
    r(84, 339, 0b01110, 5, 84, 8),
    r(-339, -84, 0b11110, 5, 84, 8),
    r(340, 4435, 0b011110, 6, 340, 12),
    r(-4435, -340, 0b111110, 6, 340, 12),
    r(4436, 2_000_000_000, 0b011111, 6, 4436, 32),
    r(-2_000_000_000, -4436, 0b111111, 6, 4436, 32),
];

/// Advance the PREV register of the integer coder by one coded bit.
#[inline]
fn next_prev(prev: usize, bit: bool) -> usize {
    if prev < 256 {
        (prev << 1) | bit as usize
    } else {
        (((prev << 1) | bit as usize) & 511) | 256
    }
}

/// The MQ arithmetic encoder together with its context tables.
///
/// Registers follow T.88 Annex E: interval `a`, code `c`, bit counter `ct`,
/// pending byte `b` and emitted-byte position `bp` (starts at -1 so the first
/// byteout primes `b` without emitting anything). Carries propagate into the
/// single pending byte; the stuff-byte discipline keeps any byte following an
/// `0xFF` below `0x80`.
pub struct Jbig2ArithCoder {
    a: u16,
    c: u32,
    ct: i32,
    b: u8,
    bp: isize,
    data: Vec<u8>,
    /// Generic-region contexts, indexed by the packed 16-bit neighbourhood.
    context: Box<[u8]>,
    /// One 512-entry context array per IA* procedure.
    int_ctx: [[u8; 512]; NUM_INT_PROCS],
    /// IAID tree contexts, sized 1 << (symbits + 1) once symbits is known.
    iaid_ctx: Vec<u8>,
}

impl Default for Jbig2ArithCoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Jbig2ArithCoder {
    /// Creates a coder in the initial state with all contexts zeroed.
    pub fn new() -> Self {
        let mut coder = Self {
            a: 0,
            c: 0,
            ct: 0,
            b: 0,
            bp: -1,
            data: Vec::new(),
            context: vec![0u8; GENERIC_CTX_SIZE].into_boxed_slice(),
            int_ctx: [[0; 512]; NUM_INT_PROCS],
            iaid_ctx: Vec::new(),
        };
        coder.reset();
        coder
    }

    /// Resets the registers and output buffer to the initial coding state.
    ///
    /// Context tables are deliberately kept; regions that share coding state
    /// rely on this. Use [`clear_contexts`](Self::clear_contexts) between
    /// unrelated documents.
    pub fn reset(&mut self) {
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        self.b = 0;
        self.bp = -1;
        self.data.clear();
    }

    /// Zeroes every context table.
    pub fn clear_contexts(&mut self) {
        self.context.fill(0);
        for ctx in self.int_ctx.iter_mut() {
            ctx.fill(0);
        }
        self.iaid_ctx.fill(0);
    }

    /// Number of output bytes produced so far.
    pub fn datasize(&self) -> usize {
        self.data.len()
    }

    /// The output buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the coder and returns the output buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Codes one decision under a context cell, returning the updated cell.
    fn encode_cell(&mut self, cell: u8, d: bool) -> u8 {
        let st = FULL[cell as usize];
        let qe = st.qe;
        let mps = cell >= 47;
        let next;

        if d == mps {
            // CODEMPS with conditional exchange.
            self.a = self.a.wrapping_sub(qe);
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c = self.c.wrapping_add(qe as u32);
                }
                next = st.nmps;
                self.renorm();
            } else {
                self.c = self.c.wrapping_add(qe as u32);
                next = cell;
            }
        } else {
            // CODELPS with conditional exchange.
            self.a = self.a.wrapping_sub(qe);
            if self.a < qe {
                self.c = self.c.wrapping_add(qe as u32);
            } else {
                self.a = qe;
            }
            next = st.nlps;
            self.renorm();
        }

        debug_assert!(self.a & 0x8000 != 0, "interval register left unnormalized");
        next
    }

    /// Encodes bit `d` under the generic context `cx`.
    pub fn encode_bit(&mut self, cx: usize, d: bool) {
        let cell = self.context[cx];
        self.context[cx] = self.encode_cell(cell, d);
    }

    #[inline]
    fn encode_int_bit(&mut self, proc: IntProc, prev: usize, d: bool) {
        let cell = self.int_ctx[proc as usize][prev & 0x1FF];
        self.int_ctx[proc as usize][prev & 0x1FF] = self.encode_cell(cell, d);
    }

    /// Encodes a signed integer under the given IA* procedure.
    pub fn encode_int(&mut self, proc: IntProc, value: i32) -> Result<(), Jbig2Error> {
        let range = INT_ENC_RANGE
            .iter()
            .find(|r| r.bot <= value && value <= r.top)
            .ok_or(Jbig2Error::InvalidValue {
                name: "integer",
                value: value as f64,
                min: -2_000_000_000.0,
                max: 2_000_000_000.0,
            })?;

        let mut prev = 1usize;
        for i in (0..range.bits).rev() {
            let bit = (range.data >> i) & 1 != 0;
            self.encode_int_bit(proc, prev, bit);
            prev = next_prev(prev, bit);
        }

        let mag = value.unsigned_abs() - range.delta;
        for i in (0..range.intbits).rev() {
            let bit = (mag >> i) & 1 != 0;
            self.encode_int_bit(proc, prev, bit);
            prev = next_prev(prev, bit);
        }
        Ok(())
    }

    /// Encodes the out-of-band marker ("negative zero") that terminates a
    /// run under the given procedure.
    pub fn encode_oob(&mut self, proc: IntProc) {
        let mut prev = 1usize;
        for &bit in &[true, false, false, false] {
            self.encode_int_bit(proc, prev, bit);
            prev = next_prev(prev, bit);
        }
    }

    /// Encodes an unsigned symbol id of exactly `symbits` bits through the
    /// IAID context tree.
    pub fn encode_iaid(&mut self, symbits: u32, id: u32) {
        let want = 1usize << (symbits + 1);
        if self.iaid_ctx.len() < want {
            self.iaid_ctx.resize(want, 0);
        }
        let mut prev = 1usize;
        for i in (0..symbits).rev() {
            let bit = (id >> i) & 1 != 0;
            let cell = self.iaid_ctx[prev];
            self.iaid_ctx[prev] = self.encode_cell(cell, bit);
            prev = (prev << 1) | bit as usize;
        }
    }

    /// Encodes a raster as a template-0 generic region.
    ///
    /// `at` carries the four adaptive-template offsets (the same values must
    /// be written into the region header); `tpgd` enables the per-row
    /// typical-prediction shortcut. The context is the jbig2enc 16-bit
    /// packing: four pixels of the current row, a five-pixel window of the
    /// previous row, a three-pixel window two rows up, and the four AT
    /// pixels interleaved at bits 4, 10, 11 and 15.
    pub fn encode_bitimage(
        &mut self,
        image: &BitImage,
        at: &[(i8, i8); 4],
        tpgd: bool,
    ) -> Result<(), Jbig2Error> {
        if image.width > BitImage::MAX_DIMENSION || image.height > BitImage::MAX_DIMENSION {
            return Err(Jbig2Error::ResourceExceeded(format!(
                "raster {}x{} exceeds the generic-region limit",
                image.width, image.height
            )));
        }

        let words = image.packed_words();
        let wpr = (image.width + 31) >> 5;
        let w = image.width as i32;
        let h = image.height as i32;

        #[inline(always)]
        fn sample(words: &[u32], wpr: usize, w: i32, h: i32, x: i32, y: i32) -> u32 {
            if x < 0 || y < 0 || x >= w || y >= h {
                return 0;
            }
            let word = words[y as usize * wpr + (x as usize >> 5)];
            (word >> (31 - (x as usize & 31))) & 1
        }

        let mut ltp = false;
        for y in 0..h {
            if tpgd {
                // A row is typical when it equals the previous row; row 0 is
                // compared against an implicit all-zero row.
                let row = &words[y as usize * wpr..(y as usize + 1) * wpr];
                let typical = if y == 0 {
                    row.iter().all(|&word| word == 0)
                } else {
                    row == &words[(y as usize - 1) * wpr..y as usize * wpr]
                };
                self.encode_bit(TPGD_CTX, typical ^ ltp);
                ltp = typical;
                if typical {
                    continue;
                }
            }

            let mut line1 = sample(words, wpr, w, h, 1, y - 2)
                | sample(words, wpr, w, h, 0, y - 2) << 1
                | sample(words, wpr, w, h, -1, y - 2) << 2;
            let mut line2 = sample(words, wpr, w, h, 2, y - 1)
                | sample(words, wpr, w, h, 1, y - 1) << 1
                | sample(words, wpr, w, h, 0, y - 1) << 2
                | sample(words, wpr, w, h, -1, y - 1) << 3
                | sample(words, wpr, w, h, -2, y - 1) << 4;
            let mut line3: u32 = 0;

            for x in 0..w {
                let at1 = sample(words, wpr, w, h, x + at[0].0 as i32, y + at[0].1 as i32);
                let at2 = sample(words, wpr, w, h, x + at[1].0 as i32, y + at[1].1 as i32);
                let at3 = sample(words, wpr, w, h, x + at[2].0 as i32, y + at[2].1 as i32);
                let at4 = sample(words, wpr, w, h, x + at[3].0 as i32, y + at[3].1 as i32);

                let cx = line3 as usize
                    | (at1 as usize) << 4
                    | (line2 as usize) << 5
                    | (at2 as usize) << 10
                    | (at3 as usize) << 11
                    | (line1 as usize) << 12
                    | (at4 as usize) << 15;

                let pixel = sample(words, wpr, w, h, x, y) != 0;
                self.encode_bit(cx, pixel);

                line1 = ((line1 << 1) | sample(words, wpr, w, h, x + 2, y - 2)) & 0x07;
                line2 = ((line2 << 1) | sample(words, wpr, w, h, x + 3, y - 1)) & 0x1F;
                line3 = ((line3 << 1) | pixel as u32) & 0x0F;
            }
        }
        Ok(())
    }

    /// Terminates the stream: forces the remaining interval out (SETBITS),
    /// flushes the code register, and emits the pending byte unless it is a
    /// trailing `0xFF` (which decoders regenerate on their own).
    pub fn finish(&mut self) {
        let tempc = self.c.wrapping_add(self.a as u32);
        self.c |= 0xFFFF;
        if self.c >= tempc {
            self.c -= 0x8000;
        }
        self.c <<= self.ct as u32;
        self.byte_out();
        self.c <<= self.ct as u32;
        self.byte_out();
        if self.bp >= 0 && self.b != 0xFF {
            self.data.push(self.b);
        }
        debug!("arith stream finished, {} bytes", self.data.len());
    }

    fn renorm(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        if self.b == 0xFF {
            self.emit_stuffed();
            return;
        }
        if self.c < 0x0800_0000 {
            self.emit_plain();
            return;
        }
        // Carry out of the code register into the pending byte.
        self.b = self.b.wrapping_add(1);
        if self.b == 0xFF {
            self.c &= 0x07FF_FFFF;
            self.emit_stuffed();
        } else {
            self.emit_plain();
        }
    }

    /// Emit the pending byte and take only 7 bits next, so the byte after an
    /// `0xFF` can never carry or form a marker.
    fn emit_stuffed(&mut self) {
        if self.bp >= 0 {
            self.data.push(self.b);
        }
        self.b = (self.c >> 20) as u8;
        self.bp += 1;
        self.c &= 0x000F_FFFF;
        self.ct = 7;
    }

    fn emit_plain(&mut self) {
        if self.bp >= 0 {
            self.data.push(self.b);
        }
        self.b = (self.c >> 19) as u8;
        self.bp += 1;
        self.c &= 0x0007_FFFF;
        self.ct = 8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_table_keeps_mps_halves_consistent() {
        for i in 0..47usize {
            assert_eq!(FULL[i].qe, FULL[i + 47].qe);
            assert!(FULL[i].nmps < 47);
            assert!(FULL[i + 47].nmps >= 47);
            if FULL[i].switch {
                // An LPS that flips the MPS must cross halves.
                assert!(FULL[i].nlps >= 47);
                assert!(FULL[i + 47].nlps < 47);
            }
        }
    }

    #[test]
    fn int_ranges_cover_the_domain_without_overlap() {
        for v in [-4436, -340, -84, -20, -4, -3, -1, 0, 3, 4, 19, 20, 83, 84, 4435, 4436] {
            let hits = INT_ENC_RANGE
                .iter()
                .filter(|r| r.bot <= v && v <= r.top)
                .count();
            assert_eq!(hits, 1, "value {} matched {} rows", v, hits);
        }
    }

    #[test]
    fn prev_register_saturates_at_nine_bits() {
        let mut prev = 1usize;
        for _ in 0..64 {
            prev = next_prev(prev, true);
            assert!(prev < 512);
        }
        assert!(prev >= 256);
    }
}
