use std::error::Error;
use vergen::{BuildBuilder, Emitter};

fn main() -> Result<(), Box<dyn Error>> {
    // Version of the jbig2enc bitstream behaviour this encoder tracks.
    println!("cargo:rustc-env=JBIG2ENC_VERSION=0.30");

    let build = BuildBuilder::default().build_timestamp(true).build()?;
    Emitter::default().add_instructions(&build)?.emit()?;

    Ok(())
}
