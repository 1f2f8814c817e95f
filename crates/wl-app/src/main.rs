//! WaveLoom headless player
//!
//! Loads the given audio files as regions (one track per file), starts the
//! cpal driver, and plays the arrangement through the real-time mixer until
//! the transport reaches the end.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use wl_audio::{AudioDriver, CpalDriver};
use wl_core::BufferSize;
use wl_engine::CoreSession;
use wl_file::ConverterQuality;

/// Largest block the mixer accepts per process call
const MAX_BLOCK: BufferSize = BufferSize::Frames2048;

#[derive(Parser)]
#[command(name = "waveloom", about = "Non-destructive multi-track audio editor core")]
struct Args {
    /// Audio files to pre-load as regions (WAV, FLAC, OGG, AIFF, CAF)
    paths: Vec<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if args.paths.is_empty() {
        eprintln!("usage: waveloom <audio files...>");
        return;
    }
    if let Err(e) = run(args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut driver = CpalDriver::new(MAX_BLOCK.as_usize())?;
    let (mut session, mut mixer) = CoreSession::new(driver.sample_rate(), MAX_BLOCK.as_usize());

    for path in &args.paths {
        let addr = session.import_file(
            path,
            |from, to| {
                log::info!("converting {from} Hz -> {to} Hz (best quality)");
                Some(ConverterQuality::Best)
            },
            &mut |stage, fraction| {
                log::debug!("load {stage:?}: {:3.0}%", fraction * 100.0);
                true
            },
        )?;
        let region = session.region(addr)?;
        log::info!(
            "loaded {} ({} frames) onto track {}",
            path.display(),
            region.nframes(),
            addr.track
        );
    }

    driver.initialize(Box::new(move |_nframes, out_l, out_r| {
        mixer.process(out_l, out_r);
    }))?;

    session.transport().play();
    log::info!(
        "playing {} frames at {} Hz",
        session.transport().last_frame(),
        session.sample_rate()
    );

    while session.transport().is_playing() {
        std::thread::sleep(Duration::from_millis(250));
        let master = session.master();
        log::debug!(
            "pos {:>10}  peak L {:.3} R {:.3}",
            session.transport().offset(),
            master.peak_l.load(),
            master.peak_r.load()
        );
    }

    driver.cleanup()?;
    Ok(())
}
