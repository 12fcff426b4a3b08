//! JBIG2 encoder.
//!
//! Encodes bi-level (1 bpp) raster images into the JBIG2 format (ITU-T T.88 /
//! ISO/IEC 14492), either as complete files or as segment streams suitable for
//! embedding in a PDF. Two coding modes are provided:
//!
//! * **generic mode**: the whole page is coded losslessly as a single
//!   arithmetic-coded generic region ([`jbig2enc::encode_generic`]);
//! * **symbol mode**: connected components are extracted, clustered into
//!   shared templates and coded as a symbol dictionary plus per-page text
//!   regions ([`jbig2enc::Jbig2Ctx`]), which is lossy but far smaller on
//!   text-heavy scans.
//!
//! The multi-page lifecycle is: create a [`Jbig2Ctx`], feed pages with
//! [`Jbig2Ctx::add_page`], flush the global symbol dictionary with
//! [`Jbig2Ctx::pages_complete`], then emit each page with
//! [`Jbig2Ctx::produce_page`].

#![warn(missing_docs)]

// Re-export the page input type used by the convenience entry points.
pub use ndarray::Array2;

use thiserror::Error;

/// Errors reported by the encoder.
///
/// `CodingError` means an internal invariant failed; the bitstream produced so
/// far is corrupt by construction and must be discarded. `ResourceExceeded`
/// does not corrupt prior output.
#[derive(Error, Debug)]
pub enum Jbig2Error {
    /// The input raster cannot be encoded (wrong depth, empty, malformed).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A parameter is outside its documented range.
    #[error("invalid value for {name}: {value} (allowed {min}..={max})")]
    InvalidValue {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
        /// Lower bound (inclusive).
        min: f64,
        /// Upper bound (inclusive).
        max: f64,
    },

    /// A raster dimension or symbol count exceeds the encoder limits.
    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    /// Internal invariant violation; the output stream is unusable.
    #[error("coding error: {0}")]
    CodingError(String),

    /// I/O failure, for CLI callers.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub mod jbig2arith;
pub mod jbig2classify;
pub mod jbig2comparator;
pub mod jbig2enc;
pub mod jbig2structs;
pub mod jbig2sym;

pub use crate::jbig2arith::Jbig2ArithCoder;
pub use crate::jbig2enc::{encode_generic, Jbig2Config, Jbig2Ctx};
pub use crate::jbig2sym::{array_to_bitimage, BitImage, Rect};

use log::info;

/// Encodes a single page as one lossless generic region.
///
/// With `full_headers` the result is a complete JBIG2 file (file header,
/// page information, generic region, end-of-page, end-of-file); without, it
/// is an embeddable segment stream.
pub fn encode_generic_document(
    page: &Array2<u8>,
    config: &Jbig2Config,
) -> Result<Vec<u8>, Jbig2Error> {
    let image = array_to_bitimage(page)?;
    encode_generic(
        &image,
        config.want_full_headers,
        config.dpi,
        config.dpi,
        config.duplicate_line_removal,
    )
}

/// Encodes a multi-page document in symbol mode.
///
/// Produces the interleaved stream the CLI writes to stdout: global symbol
/// dictionary first, then every page in order.
pub fn encode_symbol_document(
    pages: &[Array2<u8>],
    config: &Jbig2Config,
) -> Result<Vec<u8>, Jbig2Error> {
    if pages.is_empty() {
        return Err(Jbig2Error::InvalidInput("no pages supplied".into()));
    }

    let mut ctx = Jbig2Ctx::new(config.clone())?;
    for page in pages {
        ctx.add_page_array(page)?;
    }

    let mut out = ctx.pages_complete()?;
    for page_no in 0..pages.len() {
        out.extend(ctx.produce_page(page_no)?);
    }
    info!("encoded {} pages, {} bytes", pages.len(), out.len());
    Ok(out)
}

/// Version string of the crate and the encoder behaviour it tracks.
pub fn get_version() -> String {
    let enc_version = option_env!("JBIG2ENC_VERSION").unwrap_or("unknown");
    format!(
        "jbig2enc-rs {}, jbig2enc {}",
        env!("CARGO_PKG_VERSION"),
        enc_version
    )
}

/// Build metadata string.
pub fn get_build_info() -> String {
    let build_ts = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown");
    let build_type = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!("{} ({})", build_ts, build_type)
}
