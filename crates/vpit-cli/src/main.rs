#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use vpit_cli::{run_realtime, run_virtual, Scenario};
use vpit_devices::VmConfig;

#[derive(Debug, Parser)]
#[command(about = "Runs a scripted guest against the virtual i8253 timer")]
struct Args {
    /// VM settings as JSON (`vm_id`, `name`, `vcpus`). Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the VM id from the config file.
    #[arg(long)]
    vm_id: Option<u32>,

    /// Reload value for channel 0 (0 means 65536).
    #[arg(long, default_value_t = 11_932)]
    divisor: u16,

    /// Operating mode for channel 0. Mode 0 re-arms after every interrupt, others fire once.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=5))]
    mode: u8,

    /// How long to run the guest, in milliseconds.
    #[arg(long, default_value_t = 1_000)]
    duration_ms: u64,

    /// Sleep on the host clock instead of jumping between deadlines.
    #[arg(long)]
    realtime: bool,

    /// Latch and read back the count after every N-th interrupt (0 disables).
    #[arg(long, default_value_t = 0)]
    latch_every: u64,

    /// Write the final device snapshot to this file.
    #[arg(long)]
    snapshot_out: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<VmConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            VmConfig::from_json(&text)
                .with_context(|| format!("invalid config: {}", path.display()))?
        }
        None => VmConfig::default(),
    };
    if let Some(vm_id) = args.vm_id {
        config.vm_id = vm_id;
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let scenario = Scenario {
        divisor: args.divisor,
        mode: args.mode,
        duration: Duration::from_millis(args.duration_ms),
        latch_every: args.latch_every,
    };

    let report = if args.realtime {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("failed to build tokio runtime")?;
        runtime.block_on(run_realtime(config, &scenario))?
    } else {
        run_virtual(config, &scenario)?
    };

    if let Some(path) = &args.snapshot_out {
        fs::write(path, &report.snapshot)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        tracing::info!("snapshot written to {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
