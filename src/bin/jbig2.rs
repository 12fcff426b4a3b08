//! Command-line front end for the JBIG2 encoder.
//!
//! Consumes pre-thresholded bi-level images (raw PBM, P4) and writes either a
//! standalone JBIG2 file to stdout or, in PDF mode, `basename.sym` plus
//! `basename.NNNN` fragment files for embedding.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use jbig2enc::jbig2classify::{
    THRESHOLD_DEF, THRESHOLD_MAX, THRESHOLD_MIN, WEIGHT_DEF, WEIGHT_MAX, WEIGHT_MIN,
};
use jbig2enc::jbig2sym::load_pbm;
use jbig2enc::{encode_generic, Jbig2Config, Jbig2Ctx};
use log::{info, warn, LevelFilter};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::exit;

const BW_THRESHOLD_MIN: i64 = 0;
const BW_THRESHOLD_MAX: i64 = 255;
const DPI_MAX: i64 = 9600;

#[derive(Parser, Debug)]
#[command(
    name = "jbig2",
    disable_version_flag = true,
    about = "JBIG2 encoder: produces JBIG2 files or PDF-ready fragments from bi-level images"
)]
struct Args {
    /// Output file root name when using symbol coding.
    #[arg(short = 'b', long = "basename", default_value = "output")]
    basename: String,

    /// Use TPGD in the generic region coder.
    #[arg(short = 'd', long = "duplicate-line-removal")]
    duplicate_line_removal: bool,

    /// Produce PDF-ready data (no file headers, split output files).
    #[arg(short = 'p', long = "pdf")]
    pdf: bool,

    /// Use symbol classification and text regions, not the generic coder.
    #[arg(short = 's', long = "symbol-mode")]
    symbol_mode: bool,

    /// Classification threshold for the symbol coder.
    #[arg(short = 't', value_name = "threshold")]
    threshold: Option<f32>,

    /// Classification weight for the symbol coder.
    #[arg(short = 'w', value_name = "weight")]
    weight: Option<f32>,

    /// 1 bpp threshold for grayscale input (external preprocessing).
    #[arg(short = 'T', value_name = "bw threshold")]
    bw_threshold: Option<i64>,

    /// Use a global BW threshold instead of adaptive thresholding.
    #[arg(short = 'G', long = "global")]
    global: bool,

    /// Use refinement (requires -s; currently rejected).
    #[arg(short = 'r', long = "refine")]
    refine: bool,

    /// Dump the thresholded image as PNG (external preprocessing).
    #[arg(short = 'O', value_name = "outfile")]
    output_threshold_image: Option<PathBuf>,

    /// Upsample 2x before thresholding (external preprocessing).
    #[arg(short = '2')]
    up2: bool,

    /// Upsample 4x before thresholding (external preprocessing).
    #[arg(short = '4')]
    up4: bool,

    /// Remove images from mixed input and save them separately.
    #[arg(short = 'S')]
    segment: bool,

    /// Write images from mixed input as JPEG.
    #[arg(short = 'j', long = "jpeg-output")]
    jpeg_output: bool,

    /// Use automatic thresholding in the symbol encoder.
    #[arg(short = 'a', long = "auto-thresh")]
    auto_thresh: bool,

    /// Force dpi.
    #[arg(short = 'D', long = "dpi", value_name = "dpi")]
    dpi: Option<i64>,

    /// Disable the hash function in automatic thresholding.
    #[arg(long = "no-hash")]
    no_hash: bool,

    /// Be verbose.
    #[arg(short = 'v')]
    verbose: bool,

    /// Print version information.
    #[arg(short = 'V', long = "version")]
    version: bool,

    /// Input files (raw PBM).
    files: Vec<PathBuf>,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand) => {
            let _ = e.print();
            exit(0);
        }
        Err(e) => {
            let _ = e.print();
            exit(1);
        }
    };

    if args.version {
        eprintln!("{}", jbig2enc::get_version());
        eprintln!("built {}", jbig2enc::get_build_info());
        exit(0);
    }

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();

    if args.refine {
        eprintln!(
            "Refinement coding is not functional and is rejected; \
             encode without -r instead"
        );
        exit(1);
    }
    if args.up2 && args.up4 {
        eprintln!("Can't have both -2 and -4!");
        exit(5);
    }

    let threshold = args.threshold.unwrap_or(THRESHOLD_DEF);
    if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold) {
        eprintln!(
            "Invalid value for threshold (must be between {:.2} and {:.2})",
            THRESHOLD_MIN, THRESHOLD_MAX
        );
        exit(10);
    }
    let weight = args.weight.unwrap_or(WEIGHT_DEF);
    if !(WEIGHT_MIN..=WEIGHT_MAX).contains(&weight) {
        eprintln!(
            "Invalid value for weight (must be between {:.2} and {:.2})",
            WEIGHT_MIN, WEIGHT_MAX
        );
        exit(10);
    }
    if let Some(bw) = args.bw_threshold {
        if !(BW_THRESHOLD_MIN..=BW_THRESHOLD_MAX).contains(&bw) {
            eprintln!(
                "Invalid bw threshold: ({}..{})",
                BW_THRESHOLD_MIN, BW_THRESHOLD_MAX
            );
            exit(11);
        }
    }
    let dpi = match args.dpi {
        Some(dpi) if !(1..=DPI_MAX).contains(&dpi) => {
            eprintln!("Invalid dpi: (1..{})", DPI_MAX);
            exit(11);
        }
        Some(dpi) => dpi as u32,
        None => 0,
    };

    if args.files.is_empty() {
        eprintln!("No filename given");
        exit(4);
    }

    // Grayscale preprocessing belongs to an external image library; raw PBM
    // input is already bi-level, so these switches have nothing to act on.
    for (given, flag) in [
        (args.bw_threshold.is_some(), "-T"),
        (args.global, "-G"),
        (args.up2, "-2"),
        (args.up4, "-4"),
        (args.output_threshold_image.is_some(), "-O"),
        (args.segment, "-S"),
        (args.jpeg_output, "-j"),
    ] {
        if given {
            warn!("PBM input is already bi-level; {} is ignored", flag);
        }
    }

    let config = Jbig2Config {
        symbol_mode: args.symbol_mode,
        duplicate_line_removal: args.duplicate_line_removal,
        auto_thresh: args.auto_thresh,
        hash: !args.no_hash,
        threshold,
        weight,
        sbstrips: 1,
        dpi,
        want_full_headers: !args.pdf,
    };

    if let Err(code) = run(&args, &config) {
        exit(code);
    }
}

/// Encodes the input files, returning a process exit code on failure.
fn run(args: &Args, config: &Jbig2Config) -> Result<(), i32> {
    let mut stdout = std::io::stdout();

    if !config.symbol_mode {
        // Generic mode encodes a single image, like the original tool.
        if args.files.len() > 1 {
            warn!("generic mode encodes the first input only");
        }
        let path = &args.files[0];
        let image = load_pbm(path).map_err(|e| {
            eprintln!("Unable to read \"{}\": {}", path.display(), e);
            3
        })?;
        info!("source image: {}x{}", image.width, image.height);
        let data = encode_generic(
            &image,
            config.want_full_headers,
            config.dpi,
            config.dpi,
            config.duplicate_line_removal,
        )
        .map_err(|e| {
            eprintln!("Encoding failed: {}", e);
            12
        })?;
        stdout.write_all(&data).map_err(|e| {
            eprintln!("Write failed: {}", e);
            1
        })?;
        return Ok(());
    }

    let mut ctx = Jbig2Ctx::new(config.clone()).map_err(|e| {
        eprintln!("{}", e);
        12
    })?;

    for path in &args.files {
        let image = load_pbm(path).map_err(|e| {
            eprintln!("Unable to read \"{}\": {}", path.display(), e);
            3
        })?;
        info!(
            "adding page {}: {}x{}",
            ctx.num_pages(),
            image.width,
            image.height
        );
        ctx.add_page(&image).map_err(|e| {
            eprintln!("Failed to add \"{}\": {}", path.display(), e);
            12
        })?;
    }
    let num_pages = ctx.num_pages();

    let global = ctx.pages_complete().map_err(|e| {
        eprintln!("Encoding failed: {}", e);
        12
    })?;
    if args.pdf {
        write_file(&format!("{}.sym", args.basename), &global)?;
    } else {
        stdout.write_all(&global).map_err(|e| {
            eprintln!("Write failed: {}", e);
            1
        })?;
    }

    for page_no in 0..num_pages {
        let page = ctx.produce_page(page_no).map_err(|e| {
            eprintln!("Encoding failed on page {}: {}", page_no, e);
            12
        })?;
        if args.pdf {
            write_file(&format!("{}.{:04}", args.basename, page_no), &page)?;
        } else {
            stdout.write_all(&page).map_err(|e| {
                eprintln!("Write failed: {}", e);
                1
            })?;
        }
    }

    Ok(())
}

fn write_file(name: &str, data: &[u8]) -> Result<(), i32> {
    File::create(name)
        .and_then(|mut f| f.write_all(data))
        .with_context(|| format!("writing {}", name))
        .map_err(|e| {
            eprintln!("{:#}", e);
            1
        })
}
