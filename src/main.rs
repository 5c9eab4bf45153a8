//! SFC Compiler CLI

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use sfc_compiler::codegen::script_module_id;
use sfc_compiler::{
    compile_script_module, config, extract_blocks, route_manifest, CompileOptions, Compiler, CompilerError,
    SourceUnit,
};

#[derive(Parser)]
#[command(name = "sfc")]
#[command(author, version, about = "Single-file component compiler", long_about = None)]
struct Cli {
    /// Options file (.json or .toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a component source unit to an ES module
    Compile {
        file: PathBuf,

        /// Write the module code here instead of printing the full result as JSON
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Emit the companion behavior script module for a unit
    Script { file: PathBuf },

    /// Print the route manifest for every unit under a directory
    Manifest { dir: PathBuf },
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", e.code(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CompilerError> {
    let options = match &cli.config {
        Some(path) => config::load(path)?,
        None => CompileOptions::default(),
    };

    match cli.command {
        Commands::Compile { file, out } => compile(options, &file, out.as_deref()),
        Commands::Script { file } => script(options, &file),
        Commands::Manifest { dir } => {
            let manifest = route_manifest(&dir, &options)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}

fn compile(options: CompileOptions, file: &Path, out: Option<&Path>) -> Result<(), CompilerError> {
    let compiler = Compiler::new(options);
    let module = compiler.compile(file)?;

    for diagnostic in &module.diagnostics {
        log::warn!("{}", diagnostic.as_comment());
    }

    match out {
        Some(path) => {
            fs::write(path, &module.code).map_err(|e| CompilerError::io(path.display().to_string(), e))?;
            log::info!("[sfc] wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&module)?),
    }

    compiler.cache().flush_snapshot();
    Ok(())
}

fn script(options: CompileOptions, file: &Path) -> Result<(), CompilerError> {
    let unit = SourceUnit::read(file)?;
    let blocks = extract_blocks(&unit, &options);
    let id = script_module_id(&unit.path, &blocks);
    let module = compile_script_module(blocks.script_text(), &id)?;
    for diagnostic in &module.diagnostics {
        log::warn!("{}", diagnostic.as_comment());
    }
    println!("{}", module.code);
    Ok(())
}
