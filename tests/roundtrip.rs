// Generic-region round-trip: everything the encoder emits must decode back
// to the original raster. The decoder here follows the T.88 Annex E decoding
// procedures (INITDEC/BYTEIN/DECODE with both exchange paths) and is kept
// test-only; it shares the probability table with the encoder.

mod common;

use common::{checkerboard, parse_segments, uniform, BitSource};
use jbig2enc::jbig2arith::BASE;
use jbig2enc::{encode_generic, BitImage};

const TPGD_CTX: usize = 0x9B25;

/// MQ arithmetic decoder over a finished stream. Reads past the end of the
/// data see `0xFF`, which the marker rule turns into an endless 1-fill, so a
/// stream whose trailing `0xFF` was dropped still decodes.
struct MqDecoder<'a> {
    data: &'a [u8],
    bp: usize,
    c: u32,
    ct: i32,
    a: u32,
}

impl<'a> MqDecoder<'a> {
    fn byte_at(&self, i: usize) -> u32 {
        self.data.get(i).copied().map_or(0xFF, u32::from)
    }

    fn new(data: &'a [u8]) -> Self {
        let mut dec = Self {
            data,
            bp: 0,
            c: 0,
            ct: 0,
            a: 0,
        };
        dec.c = dec.byte_at(0) << 16;
        dec.byte_in();
        dec.c = dec.c.wrapping_shl(7);
        dec.ct -= 7;
        dec.a = 0x8000;
        dec
    }

    fn byte_in(&mut self) {
        if self.byte_at(self.bp) == 0xFF {
            if self.byte_at(self.bp + 1) > 0x8F {
                // Marker (or end of data): feed 1-bits from here on.
                self.c = self.c.wrapping_add(0xFF00);
                self.ct = 8;
            } else {
                self.bp += 1;
                self.c = self.c.wrapping_add(self.byte_at(self.bp) << 9);
                self.ct = 7;
            }
        } else {
            self.bp += 1;
            self.c = self.c.wrapping_add(self.byte_at(self.bp) << 8);
            self.ct = 8;
        }
    }

    fn renorm(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c = self.c.wrapping_shl(1);
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// Decodes one decision under the (state index, MPS) pair in `cx`.
    fn decode_bit(&mut self, contexts: &mut [(u8, bool)], cx: usize) -> bool {
        let (mut index, mut mps) = contexts[cx];
        let st = BASE[index as usize];
        let qe = st.qe as u32;

        self.a -= qe;
        let d;
        if ((self.c >> 16) & 0xFFFF) < qe {
            // Code point in the lower subinterval: LPS, unless exchanged.
            if self.a < qe {
                d = mps;
                index = st.nmps;
            } else {
                d = !mps;
                if st.switch {
                    mps = !mps;
                }
                index = st.nlps;
            }
            self.a = qe;
            self.renorm();
        } else {
            self.c = self.c.wrapping_sub(qe << 16);
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    d = !mps;
                    if st.switch {
                        mps = !mps;
                    }
                    index = st.nlps;
                } else {
                    d = mps;
                    index = st.nmps;
                }
                self.renorm();
            } else {
                d = mps;
            }
        }

        contexts[cx] = (index, mps);
        d
    }
}

/// Decodes a template-0 generic region coded with the nominal AT offsets,
/// mirroring the encoder's context layout.
fn decode_generic_region(data: &[u8], width: usize, height: usize, tpgd: bool) -> BitImage {
    let mut dec = MqDecoder::new(data);
    let mut contexts = vec![(0u8, false); 1 << 16];
    let mut img = BitImage::new(width, height).unwrap();

    let mut ltp = false;
    for y in 0..height {
        if tpgd {
            ltp ^= dec.decode_bit(&mut contexts, TPGD_CTX);
            if ltp {
                for x in 0..width {
                    let above = y > 0 && img.get(x, y - 1);
                    img.set(x, y, above);
                }
                continue;
            }
        }
        for x in 0..width {
            let cx = {
                let g = |dx: i32, dy: i32| -> usize {
                    img.get_signed(x as i32 + dx, y as i32 + dy) as usize
                };
                g(-1, 0)
                    | g(-2, 0) << 1
                    | g(-3, 0) << 2
                    | g(-4, 0) << 3
                    | g(3, -1) << 4
                    | g(2, -1) << 5
                    | g(1, -1) << 6
                    | g(0, -1) << 7
                    | g(-1, -1) << 8
                    | g(-2, -1) << 9
                    | g(-3, -1) << 10
                    | g(2, -2) << 11
                    | g(1, -2) << 12
                    | g(0, -2) << 13
                    | g(-1, -2) << 14
                    | g(-2, -2) << 15
            };
            if dec.decode_bit(&mut contexts, cx) {
                img.set(x, y, true);
            }
        }
    }
    img
}

/// Encodes a raster without file headers and decodes the generic-region
/// payload back out of the framed stream.
fn roundtrip(img: &BitImage, tpgd: bool) -> BitImage {
    let stream = encode_generic(img, false, 0, 0, tpgd).unwrap();
    let segs = parse_segments(&stream);
    let reg = segs
        .iter()
        .find(|s| s.seg_type == 38)
        .expect("no generic region segment");
    let payload = &stream[reg.payload_at..reg.payload_at + reg.len as usize];
    // Region record is 26 bytes for template 0; the flags byte must agree
    // with the requested TPGD mode.
    assert_eq!(payload[17], if tpgd { 0x08 } else { 0x00 });
    decode_generic_region(&payload[26..], img.width, img.height, tpgd)
}

#[test]
fn uniform_rasters_roundtrip() {
    for black in [false, true] {
        let img = uniform(32, 32, black);
        assert_eq!(roundtrip(&img, false), img);
        assert_eq!(roundtrip(&img, true), img);
    }
}

#[test]
fn checkerboard_roundtrips_at_odd_widths() {
    for width in [8usize, 19, 37, 63, 64, 65] {
        let img = checkerboard(width, 24);
        assert_eq!(roundtrip(&img, false), img, "width {}", width);
    }
}

#[test]
fn noise_rasters_roundtrip() {
    for seed in 1..=4u64 {
        let mut src = BitSource::new(seed * 0x0123_4567);
        let mut img = BitImage::new(61, 47).unwrap();
        for y in 0..img.height {
            for x in 0..img.width {
                if src.next_bit() {
                    img.set(x, y, true);
                }
            }
        }
        assert_eq!(roundtrip(&img, false), img, "seed {}", seed);
        assert_eq!(roundtrip(&img, true), img, "seed {} tpgd", seed);
    }
}

#[test]
fn duplicate_rows_roundtrip_under_tpgd() {
    let mut src = BitSource::new(0xBEEF);
    let row: Vec<bool> = (0..48).map(|_| src.next_bit()).collect();
    let mut img = BitImage::new(48, 32).unwrap();
    for y in 0..32 {
        // Repeat the row, with a few disturbed rows to exercise both the
        // typical and coded paths.
        let flip = y == 9 || y == 20;
        for (x, &bit) in row.iter().enumerate() {
            img.set(x, y, bit ^ (flip && x % 5 == 0));
        }
    }
    assert_eq!(roundtrip(&img, true), img);
    assert_eq!(roundtrip(&img, false), img);
}

#[test]
fn sparse_text_like_raster_roundtrips() {
    let mut img = BitImage::new(96, 40).unwrap();
    // A few glyph-ish boxes with varying fill.
    for (bx, by, w, h) in [(4usize, 6usize, 10usize, 14usize), (30, 8, 6, 12), (50, 10, 14, 10), (72, 5, 9, 16)] {
        for y in by..by + h {
            for x in bx..bx + w {
                if (x + 2 * y) % 3 != 0 {
                    img.set(x, y, true);
                }
            }
        }
    }
    assert_eq!(roundtrip(&img, false), img);
    assert_eq!(roundtrip(&img, true), img);
}
