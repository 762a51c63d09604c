//! Compile a configuration and print the resulting schedule.

use std::path::PathBuf;

use clap::Args;

use super::common::{build_engine, load_config};

/// Compile a configuration without running it.
#[derive(Args)]
pub struct CheckArgs {
    /// Path to the engine configuration (TOML)
    pub config: PathBuf,

    /// Also list every parameter key
    #[arg(long)]
    pub params: bool,
}

/// Run the check command.
pub fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let (engine, _host) = build_engine(&config)?;

    println!("Config:  {}", args.config.display());
    println!("Streams: {}", config.streams.len());
    println!();
    print!("{}", engine.schedule());
    println!();

    println!("Outputs:");
    for (i, descriptor) in engine.outputs().descriptors().iter().enumerate() {
        println!("  Output:{i}  {}", descriptor.layout());
    }
    println!();
    println!(
        "Pinned host memory: {} bytes",
        engine.registry().registered_bytes()
    );

    let configured = config.parameter_values();
    if !configured.is_empty() {
        println!();
        println!("Configured parameters:");
        for (key, value) in configured {
            let current = engine.get_parameter(&key)?;
            println!("  {key:32}  {value} (engine: {current})");
        }
    }

    if args.params {
        println!();
        println!("Parameters:");
        for descriptor in engine.parameters().descriptors() {
            println!(
                "  {:32}  default {}{}",
                descriptor.name,
                descriptor.default,
                descriptor.unit.suffix()
            );
        }
    }

    engine.close();
    Ok(())
}
