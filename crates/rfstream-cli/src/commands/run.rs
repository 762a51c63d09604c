//! Run a configuration over synthetic frames.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use crossbeam_channel::RecvTimeoutError;

use super::common::{build_engine, load_config, write_synthetic_frame};

/// Run an engine configuration.
#[derive(Args)]
pub struct RunArgs {
    /// Path to the engine configuration (TOML)
    pub config: PathBuf,

    /// Number of frames to produce (overrides the config)
    #[arg(short, long)]
    pub frames: Option<usize>,
}

/// Run the run command.
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let frames = args.frames.unwrap_or(config.frames);
    let (engine, host) = build_engine(&config)?;
    let outputs = engine.outputs();
    let queue = outputs
        .queue()
        .context("engine was built with a callback; no queue to drain")?;

    tracing::info!(frames, "starting producer");
    let start = Instant::now();
    let mut delivered = 0u64;

    let produced = thread::scope(|scope| {
        let producer = scope.spawn(|| -> anyhow::Result<()> {
            for frame in 0..frames {
                let element = host.acquire(frame % host.len())?;
                write_synthetic_frame(&element, frame)?;
                engine.process(element)?;
            }
            engine.sync();
            Ok(())
        });

        loop {
            match queue.recv_timeout(Duration::from_millis(50)) {
                Ok(_frame) => delivered += 1,
                Err(RecvTimeoutError::Timeout) if producer.is_finished() => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))
    })?;
    produced?;

    let elapsed = start.elapsed();
    engine.close();

    println!("Frames:    {frames}");
    println!("Delivered: {delivered}");
    println!("Dropped:   {}", engine.dropped_frames());
    println!(
        "Elapsed:   {:.3}s ({:.1} frames/s)",
        elapsed.as_secs_f64(),
        frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
