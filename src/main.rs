//=====================================================
// File: main.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: ScriptVM CLI entry point
// Objective: Run compiled scripts under the cooperative scheduler, assemble text
//            sources into images, and inspect existing images
//=====================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use scriptvm::{Engine, HostConfig, assemble_with_host_opcodes, logging};
use scriptvm_core::disasm::{Listing, Summary};
use scriptvm_core::{Image, ProgramState};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "scriptvm", about = "ScriptVM bytecode runner and image tools")]
struct Args {
    /// Configuration file. Defaults to <config dir>/scriptvm/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load scripts and tick the scheduler until they finish.
    Run(RunArgs),
    /// Assemble a text source into an image.
    Asm(AsmArgs),
    /// Print the procedure table, string tables and code of an image.
    Disasm(ImageArgs),
    /// Print the header summary of an image.
    Info(ImageArgs),
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Script names or image paths, started in order.
    #[arg(required = true)]
    scripts: Vec<String>,

    /// Opcodes per program per tick.
    #[arg(long)]
    burst: Option<u32>,

    /// Stop after this many ticks.
    #[arg(long = "max-ticks")]
    max_ticks: Option<u64>,

    /// Extra directory to search for scripts. May be repeated.
    #[arg(long = "script-dir")]
    script_dirs: Vec<PathBuf>,

    /// Pause between ticks, in milliseconds.
    #[arg(long = "tick-ms")]
    tick_ms: Option<u64>,

    /// Do not echo script output to stdout.
    #[arg(long)]
    quiet: bool,
}

#[derive(ClapArgs, Debug, Clone)]
struct AsmArgs {
    /// Input text source.
    input: PathBuf,
    /// Output image file.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
struct ImageArgs {
    /// Image file to inspect.
    image: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut config, path) = HostConfig::load(args.config.as_deref())?;
    logging::init(&config.log_level);
    if let Some(path) = path {
        info!(path = %path.display(), "configuration loaded");
    }

    match args.command {
        Command::Run(cmd) => run_scripts(&mut config, cmd),
        Command::Asm(cmd) => assemble_file(&cmd.input, &cmd.output),
        Command::Disasm(cmd) => {
            let image = read_image(&cmd.image)?;
            print!("{}", Listing(&image));
            Ok(())
        }
        Command::Info(cmd) => {
            let image = read_image(&cmd.image)?;
            print!("{}", Summary(&image));
            Ok(())
        }
    }
}

fn run_scripts(config: &mut HostConfig, args: RunArgs) -> Result<()> {
    if let Some(burst) = args.burst {
        config.runtime = config.runtime.clone().with_burst_size(burst);
    }
    if args.max_ticks.is_some() {
        config.max_ticks = args.max_ticks;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    config.script_dirs.extend(args.script_dirs);

    // A path to an existing image is run from its own directory.
    let mut names = Vec::with_capacity(args.scripts.len());
    for script in &args.scripts {
        let path = Path::new(script);
        match (path.is_file(), path.parent(), path.file_name()) {
            (true, Some(dir), Some(file)) => {
                if !dir.as_os_str().is_empty() {
                    config.script_dirs.insert(0, dir.to_path_buf());
                }
                names.push(file.to_string_lossy().into_owned());
            }
            _ => names.push(script.clone()),
        }
    }

    let mut engine = Engine::new(config)?.with_echo(!args.quiet);
    for name in &names {
        let id = engine.start(name)?;
        let failed = engine
            .runtime()
            .program(id)
            .is_some_and(|program| program.state() == ProgramState::ExitedWithError);
        if failed {
            warn!(script = %name, "script failed during start-up");
        }
    }

    let summary = engine.run_until_idle();
    info!(
        ticks = summary.ticks,
        remaining = summary.remaining,
        "scheduler stopped"
    );
    if summary.remaining > 0 {
        let names = engine.runtime().program_names().join(", ");
        warn!(programs = %names, "programs still linked at exit");
    }
    Ok(())
}

fn assemble_file(input: &Path, output: &Path) -> Result<()> {
    let source = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let bytes = assemble_with_host_opcodes(&source)
        .with_context(|| format!("failed to assemble {}", input.display()))?;
    fs::write(output, &bytes).with_context(|| format!("failed to write {}", output.display()))?;
    info!(output = %output.display(), len = bytes.len(), "image written");
    Ok(())
}

fn read_image(path: &Path) -> Result<Image> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Image::parse(name, bytes).with_context(|| format!("failed to parse {}", path.display()))
}
