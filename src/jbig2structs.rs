//! Segment framing: file header, segment headers and the payload parameter
//! records, all written field by field in big-endian order (T.88 section 7
//! and Annexes D/H).

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{self, Write};

/// JBIG2 file magic.
pub const JBIG2_FILE_MAGIC: [u8; 8] = [0x97, 0x4A, 0x42, 0x32, 0x0D, 0x0A, 0x1A, 0x0A];

/// The segment types this encoder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentType {
    /// Symbol dictionary (type 0).
    SymbolDictionary = 0,
    /// Immediate text region (type 6).
    ImmTextRegion = 6,
    /// Immediate generic region (type 38).
    ImmGenericRegion = 38,
    /// Page information (type 48).
    PageInformation = 48,
    /// End of page (type 49).
    EndOfPage = 49,
    /// End of file (type 51).
    EndOfFile = 51,
}

/// File header: magic, organisation flags, page count (13 bytes total for a
/// sequential file with a known page count).
#[derive(Debug)]
pub struct FileHeader {
    /// Number of pages in the file.
    pub n_pages: u32,
}

impl FileHeader {
    /// Serializes the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13);
        buf.extend_from_slice(&JBIG2_FILE_MAGIC);
        // Bit 0: sequential organisation. Bit 1 (unknown page count) clear.
        buf.push(0x01);
        buf.write_u32::<BigEndian>(self.n_pages).unwrap();
        buf
    }
}

/// Page information segment payload (19 bytes, T.88 7.4.8).
#[derive(Debug, Default)]
pub struct PageInfo {
    /// Page width in pixels.
    pub width: u32,
    /// Page height in pixels.
    pub height: u32,
    /// X resolution in ppi, 0 if unknown.
    pub xres: u32,
    /// Y resolution in ppi, 0 if unknown.
    pub yres: u32,
    /// The page is coded losslessly.
    pub is_lossless: bool,
    /// The page may contain refinements (never set by this encoder).
    pub contains_refinements: bool,
    /// Default pixel value.
    pub default_pixel: bool,
    /// Default combination operator (0 = OR).
    pub default_operator: u8,
    /// Auxiliary buffers may be needed.
    pub aux_buffers: bool,
    /// Combination operator may be overridden.
    pub operator_override: bool,
    /// Striping information.
    pub striping: u16,
}

impl PageInfo {
    /// Serializes the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(19);
        buf.write_u32::<BigEndian>(self.width).unwrap();
        buf.write_u32::<BigEndian>(self.height).unwrap();
        buf.write_u32::<BigEndian>(self.xres).unwrap();
        buf.write_u32::<BigEndian>(self.yres).unwrap();

        let mut flags = 0u8;
        if self.is_lossless {
            flags |= 0x01;
        }
        if self.contains_refinements {
            flags |= 0x02;
        }
        if self.default_pixel {
            flags |= 0x04;
        }
        flags |= (self.default_operator & 0x03) << 3;
        if self.aux_buffers {
            flags |= 0x20;
        }
        if self.operator_override {
            flags |= 0x40;
        }
        buf.push(flags);
        buf.write_u16::<BigEndian>(self.striping).unwrap();
        buf
    }
}

/// Generic region segment parameters (26 bytes for template 0: region info,
/// generic flags, four AT pairs).
#[derive(Debug)]
pub struct GenericRegionParams {
    /// Region width.
    pub width: u32,
    /// Region height.
    pub height: u32,
    /// Region X origin on the page.
    pub x: u32,
    /// Region Y origin on the page.
    pub y: u32,
    /// External combination operator (0 = OR).
    pub comb_operator: u8,
    /// MMR coding instead of arithmetic (never set here).
    pub mmr: bool,
    /// Generic template id, 0..=3 (only 0 is emitted).
    pub template: u8,
    /// Typical prediction enabled.
    pub tpgdon: bool,
    /// Adaptive template offsets, written as signed bytes.
    pub at: [(i8, i8); 4],
}

impl GenericRegionParams {
    /// Serializes the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(26);
        buf.write_u32::<BigEndian>(self.width).unwrap();
        buf.write_u32::<BigEndian>(self.height).unwrap();
        buf.write_u32::<BigEndian>(self.x).unwrap();
        buf.write_u32::<BigEndian>(self.y).unwrap();
        buf.push(self.comb_operator & 0x07);

        let mut flags = 0u8;
        if self.mmr {
            flags |= 0x01;
        }
        flags |= (self.template & 0x03) << 1;
        if self.tpgdon {
            flags |= 0x08;
        }
        buf.push(flags);

        for &(x, y) in &self.at {
            buf.push(x as u8);
            buf.push(y as u8);
        }
        buf
    }
}

/// Symbol dictionary segment parameters (18 bytes: flags, AT pairs, export
/// and new symbol counts).
#[derive(Debug)]
pub struct SymbolDictParams {
    /// Symbol dictionary template (0..=3; only 0 is emitted).
    pub sd_template: u8,
    /// Adaptive template offsets.
    pub at: [(i8, i8); 4],
    /// Number of exported symbols.
    pub exsyms: u32,
    /// Number of new symbols.
    pub newsyms: u32,
}

impl SymbolDictParams {
    /// Serializes the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(18);
        // SDHUFF and SDREFAGG clear; SDTEMPLATE in bits 10-11.
        let flags: u16 = ((self.sd_template as u16) & 0x03) << 10;
        buf.write_u16::<BigEndian>(flags).unwrap();
        for &(x, y) in &self.at {
            buf.push(x as u8);
            buf.push(y as u8);
        }
        buf.write_u32::<BigEndian>(self.exsyms).unwrap();
        buf.write_u32::<BigEndian>(self.newsyms).unwrap();
        buf
    }
}

/// Text region segment parameters (19 bytes: region info plus the 16-bit
/// flags; the instance count follows separately).
#[derive(Debug)]
pub struct TextRegionParams {
    /// Region width.
    pub width: u32,
    /// Region height.
    pub height: u32,
    /// Region X origin.
    pub x: u32,
    /// Region Y origin.
    pub y: u32,
    /// External combination operator.
    pub comb_operator: u8,
    /// log2 of the strip height (LOGSBSTRIPS).
    pub log_strips: u8,
    /// Reference corner (0 = bottom left).
    pub ref_corner: u8,
    /// Transposed layout.
    pub transposed: bool,
    /// Combination operator for symbol instances.
    pub comb_op: u8,
    /// Signed DS offset, 5 bits.
    pub ds_offset: u8,
}

impl TextRegionParams {
    /// Serializes the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(19);
        buf.write_u32::<BigEndian>(self.width).unwrap();
        buf.write_u32::<BigEndian>(self.height).unwrap();
        buf.write_u32::<BigEndian>(self.x).unwrap();
        buf.write_u32::<BigEndian>(self.y).unwrap();
        buf.push(self.comb_operator & 0x07);

        // SBHUFF and SBREFINE clear: arithmetic coding, no refinement.
        let mut flags: u16 = 0;
        flags |= ((self.log_strips as u16) & 0x03) << 2;
        flags |= ((self.ref_corner as u16) & 0x03) << 4;
        if self.transposed {
            flags |= 1 << 6;
        }
        flags |= ((self.comb_op as u16) & 0x03) << 7;
        flags |= ((self.ds_offset as u16) & 0x1F) << 10;
        buf.write_u16::<BigEndian>(flags).unwrap();
        buf
    }
}

/// A segment header. The payload is written by the caller right after the
/// header; `len` must already hold the payload size.
#[derive(Debug)]
pub struct Segment {
    /// Segment number; emission order is strictly increasing.
    pub number: u32,
    /// Segment type tag.
    pub seg_type: SegmentType,
    /// Retain flags for this segment and its referred segments.
    pub retain_bits: u8,
    /// Referred-to segment numbers, all smaller than `number`.
    pub referred_to: Vec<u32>,
    /// Page association (0 = global).
    pub page: u32,
    /// Payload length in bytes.
    pub len: u32,
}

impl Segment {
    /// Width of one referred-to segment number, decided by this segment's
    /// own number.
    fn ref_size(&self) -> usize {
        if self.number <= 256 {
            1
        } else if self.number <= 65536 {
            2
        } else {
            4
        }
    }

    /// Size of the serialized header in bytes.
    pub fn size(&self) -> usize {
        4 + 1 + 1
            + self.referred_to.len() * self.ref_size()
            + if self.page > 255 { 4 } else { 1 }
            + 4
    }

    /// Writes the header.
    pub fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.number)?;

        let mut flags = self.seg_type as u8 & 0x3F;
        if self.page > 255 {
            flags |= 0x40;
        }
        w.write_u8(flags)?;

        debug_assert!(
            self.referred_to.len() <= 4,
            "short-form referred-to count overflow"
        );
        debug_assert!(self.referred_to.iter().all(|&r| r < self.number));
        w.write_u8(((self.referred_to.len() as u8) << 5) | (self.retain_bits & 0x1F))?;

        for &r in &self.referred_to {
            match self.ref_size() {
                1 => w.write_u8(r as u8)?,
                2 => w.write_u16::<BigEndian>(r as u16)?,
                _ => w.write_u32::<BigEndian>(r)?,
            }
        }

        if self.page > 255 {
            w.write_u32::<BigEndian>(self.page)?;
        } else {
            w.write_u8(self.page as u8)?;
        }

        w.write_u32::<BigEndian>(self.len)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_is_thirteen_bytes() {
        let bytes = FileHeader { n_pages: 1 }.to_bytes();
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[..8], &JBIG2_FILE_MAGIC);
        assert_eq!(bytes[8], 0x01);
        assert_eq!(&bytes[9..], &[0, 0, 0, 1]);
    }

    #[test]
    fn segment_header_size_matches_serialization() {
        let seg = Segment {
            number: 2,
            seg_type: SegmentType::ImmTextRegion,
            retain_bits: 2,
            referred_to: vec![0, 1],
            page: 1,
            len: 100,
        };
        let mut out = Vec::new();
        seg.write_into(&mut out).unwrap();
        assert_eq!(out.len(), seg.size());
        // Two referred segments, each one byte wide for small numbers.
        assert_eq!(out[5] >> 5, 2);
        assert_eq!(out[6], 0);
        assert_eq!(out[7], 1);
    }

    #[test]
    fn page_info_flags_pack_into_one_byte() {
        let info = PageInfo {
            width: 32,
            height: 32,
            is_lossless: true,
            ..Default::default()
        };
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), 19);
        assert_eq!(bytes[16], 0x01);
    }
}
