//! csvmod CLI - run a controller over a CSV file
//!
//! ```bash
//! csvmod shipping offers.csv changed.csv      # Built-in controller
//! csvmod my-rules offers.csv changed.csv      # .csvmod/controllers/my-rules.json
//! csvmod ./rules.json offers.csv changed.csv  # Manifest by path
//! csvmod --list                               # Show available controllers
//! csvmod --operations                         # Show manifest operations
//! ```

use clap::error::ErrorKind;
use clap::Parser;
use csvmod::logs::LOG_BROADCASTER;
use csvmod::{
    execute, operations_description, ControllerKind, ControllerRegistry, Location, PipelineError,
    RunOptions,
};
use std::path::{Path, PathBuf};
use std::process;

const USAGE: &str = "Usage: csvmod <controller> <input> <output>";

#[derive(Parser)]
#[command(name = "csvmod", version)]
#[command(about = "Modify CSV rows with a controller and write the changed ones", long_about = None)]
struct Cli {
    /// Controller name or manifest path
    controller: Option<String>,

    /// Input CSV file
    input: Option<PathBuf>,

    /// Output CSV file
    output: Option<PathBuf>,

    /// List available controllers
    #[arg(long)]
    list: bool,

    /// Show available manifest operations
    #[arg(long)]
    operations: bool,

    /// Input delimiter (overrides the controller)
    #[arg(short, long)]
    delimiter: Option<char>,

    /// Output delimiter (overrides the controller)
    #[arg(long)]
    output_delimiter: Option<char>,

    /// Input encoding label, or "auto"
    #[arg(short, long)]
    encoding: Option<String>,

    /// Output encoding label
    #[arg(long)]
    output_encoding: Option<String>,

    /// Directory searched for <controller>.json
    #[arg(long)]
    controllers_dir: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return;
        }
        Err(_) => usage(),
    };

    let options = build_options(&cli);
    LOG_BROADCASTER.set_quiet(options.quiet);
    let registry = ControllerRegistry::with_builtins(&options.controllers_dir);

    if cli.list {
        cmd_list(&registry);
        return;
    }
    if cli.operations {
        println!("{}", operations_description());
        return;
    }

    let (Some(controller), Some(input), Some(output)) = (&cli.controller, &cli.input, &cli.output) else {
        usage();
    };

    if let Err(e) = cmd_run(&registry, controller, input, output, &options) {
        match e.downcast_ref::<PipelineError>().and_then(|p| p.header_mismatch()) {
            Some((expected, actual)) => {
                eprintln!("Unexpected header detected.");
                eprintln!("   Expected: {}", expected.join(", "));
                eprintln!("   Found:    {}", actual.join(", "));
            }
            None => eprintln!("❌ Error: {}", e),
        }
        process::exit(1);
    }
}

fn usage() -> ! {
    eprintln!("{}", USAGE);
    process::exit(1);
}

fn build_options(cli: &Cli) -> RunOptions {
    let mut options = RunOptions::from_env();
    if cli.quiet {
        options.quiet = true;
    }
    if let Some(dir) = &cli.controllers_dir {
        options.controllers_dir = dir.clone();
    }
    options.delimiter = cli.delimiter;
    options.output_delimiter = cli.output_delimiter;
    options.encoding = cli.encoding.clone();
    options.output_encoding = cli.output_encoding.clone();
    options
}

fn cmd_list(registry: &ControllerRegistry) {
    let controllers = registry.list();
    if controllers.is_empty() {
        eprintln!("📋 No controllers available.");
        return;
    }

    for info in controllers {
        let kind = match info.kind {
            ControllerKind::Builtin => "builtin",
            ControllerKind::Manifest => "manifest",
        };
        if info.description.is_empty() {
            println!("{:<20} [{}]", info.name, kind);
        } else {
            println!("{:<20} [{}] {}", info.name, kind, info.description);
        }
    }
}

fn cmd_run(
    registry: &ControllerRegistry,
    name: &str,
    input: &Path,
    output: &Path,
    options: &RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut controller = registry.resolve(name)?;
    if !options.quiet {
        eprintln!("⚙️  Controller: {}", name);
    }

    let report = execute(
        controller.as_mut(),
        Location::file(input),
        Location::file(output),
        options,
    )?;

    if report.rows_written > 0 && !options.quiet {
        eprintln!("💾 Output written to: {}", output.display());
    }
    Ok(())
}
