//! Gate sandbox command-line interface
//!
//! This CLI provides tools for:
//! - Listing the ABI entry points a loader binary exposes
//! - Showing the payload layout compiled artifacts would produce
//! - Running compiled artifacts in an executor and capturing their output

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gate_sandbox::payload;
use gate_sandbox::{Artifacts, Environment, PayloadParams, Sandbox, SandboxConfig};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "gate")]
#[command(author, version, about = "Gate sandbox host CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the ABI entry points resolved from a loader binary
    Symbols {
        /// Loader binary (ELF)
        #[arg(short, long)]
        loader: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the payload layout for compiled artifacts as JSON
    Layout {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        #[command(flatten)]
        sizes: SizeArgs,
    },

    /// Run compiled artifacts and write the captured output to stdout
    Run {
        /// Sandbox configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Executor binary
        #[arg(long)]
        executor: Option<PathBuf>,

        /// Loader binary
        #[arg(long)]
        loader: Option<PathBuf>,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        #[command(flatten)]
        sizes: SizeArgs,

        /// Kill the executor after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Pass executor stderr through
        #[arg(long)]
        inherit_stderr: bool,
    },
}

/// Compiled module segments
#[derive(Args)]
struct ArtifactArgs {
    /// Read-only data segment file
    #[arg(long)]
    rodata: PathBuf,

    /// Code segment file
    #[arg(long)]
    text: PathBuf,

    /// Data segment file (globals followed by initial memory)
    #[arg(long)]
    data: PathBuf,

    /// Offset of linear memory within the data segment
    #[arg(long)]
    memory_offset: usize,

    /// Initial linear memory size declared by the module
    #[arg(long)]
    init_memory: u32,
}

impl ArtifactArgs {
    fn load(&self) -> Result<Artifacts> {
        Ok(Artifacts {
            rodata: read_segment(&self.rodata)?,
            text: read_segment(&self.text)?,
            data: read_segment(&self.data)?,
            memory_offset: self.memory_offset,
            init_memory_size: self.init_memory,
        })
    }
}

/// Payload sizes
#[derive(Args)]
struct SizeArgs {
    /// Linear memory ceiling in bytes
    #[arg(long)]
    grow_memory: Option<u32>,

    /// Stack size in bytes
    #[arg(long)]
    stack: Option<u32>,
}

impl SizeArgs {
    fn apply(&self, config: &mut SandboxConfig) {
        if let Some(grow) = self.grow_memory {
            config.grow_memory_size = grow;
        }
        if let Some(stack) = self.stack {
            config.stack_size = stack;
        }
    }
}

fn read_segment(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[derive(Serialize)]
struct EntryPointReport<'a> {
    name: &'a str,
    addr: String,
    signature: String,
}

fn cmd_symbols(loader: PathBuf, json: bool) -> Result<()> {
    // The executor is never started here.
    let env = Environment::new("/", &loader)
        .with_context(|| format!("Failed to resolve symbols in {}", loader.display()))?;

    let mut entries: Vec<_> = env.entry_points().collect();
    entries.sort_by_key(|e| e.addr);

    if json {
        let report: Vec<_> = entries
            .iter()
            .map(|e| EntryPointReport {
                name: e.name,
                addr: format!("{:#x}", e.addr),
                signature: e.signature.to_string(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Loader: {}", loader.display());
    println!("Entry points: {}", entries.len());
    for e in entries {
        println!("  {:#010x}  {:<28} {}", e.addr, e.name, e.signature);
    }

    Ok(())
}

#[derive(Serialize)]
struct LayoutReport {
    descriptor: payload::PayloadDescriptor,
    layout: payload::Layout,
    text_offset: u64,
    data_offset: u64,
    stack_offset: u64,
    total_size: u64,
}

fn cmd_layout(artifacts: ArtifactArgs, sizes: SizeArgs) -> Result<()> {
    let artifacts = artifacts.load()?;

    let mut config = SandboxConfig::default();
    sizes.apply(&mut config);
    let params: PayloadParams = config.payload_params();

    let (layout, descriptor) = payload::plan(&artifacts, &params)?;
    let report = LayoutReport {
        descriptor,
        layout,
        text_offset: layout.text_offset(),
        data_offset: layout.data_offset(),
        stack_offset: layout.stack_offset(),
        total_size: layout.total_size(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config_path: Option<PathBuf>,
    executor: Option<PathBuf>,
    loader: Option<PathBuf>,
    artifacts: ArtifactArgs,
    sizes: SizeArgs,
    timeout_ms: Option<u64>,
    inherit_stderr: bool,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => SandboxConfig::load(path)?,
        None => SandboxConfig::default(),
    };

    if executor.is_some() {
        config.executor = executor;
    }
    if loader.is_some() {
        config.loader = loader;
    }
    sizes.apply(&mut config);
    if let Some(ms) = timeout_ms {
        config.run.timeout_ms = ms;
    }
    if inherit_stderr {
        config.run.inherit_stderr = true;
    }

    let artifacts = artifacts.load()?;
    let sandbox = Sandbox::from_config(config).context("Failed to set up sandbox")?;

    info!(
        rodata = artifacts.rodata.len(),
        text = artifacts.text.len(),
        data = artifacts.data.len(),
        "Running module"
    );

    let output = sandbox.run(&artifacts).context("Run failed")?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&output)?;
    stdout.flush()?;

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Symbols { loader, json } => cmd_symbols(loader, json),

        Commands::Layout { artifacts, sizes } => cmd_layout(artifacts, sizes),

        Commands::Run {
            config,
            executor,
            loader,
            artifacts,
            sizes,
            timeout_ms,
            inherit_stderr,
        } => cmd_run(config, executor, loader, artifacts, sizes, timeout_ms, inherit_stderr),
    }
}
