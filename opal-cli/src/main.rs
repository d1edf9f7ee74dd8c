use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use opal_program::Program;
use opal_propagation::{PropagatorConfig, TypeDatabase};

#[derive(Parser)]
#[command(name = "opal")]
#[command(version = "0.3.0")]
#[command(about = "Opal bytecode analysis toolchain", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propagate types through a compiled image, printing JSON to stdout
    Analyze {
        /// Input image (.json)
        #[arg(value_name = "IMAGE")]
        input: PathBuf,

        /// Widen argument positions broader than this many classes
        #[arg(
            long,
            value_name = "N",
            default_value_t = PropagatorConfig::DEFAULT_MEGAMORPHIC_THRESHOLD
        )]
        megamorphic_threshold: usize,

        /// Pretty-print the output document
        #[arg(long)]
        pretty: bool,
    },

    /// Print image statistics
    Info {
        /// Input image (.json)
        #[arg(value_name = "IMAGE")]
        input: PathBuf,
    },
}

fn load_program(input: &Path) -> Result<Program> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    Program::from_json(&source)
        .map_err(|e| anyhow::anyhow!("{} {}", "⚠️  Image error:".red(), e))
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            megamorphic_threshold,
            pretty,
        } => {
            log::info!("Analyzing: {:?}", input);
            let program = load_program(&input)?;

            let config = PropagatorConfig {
                megamorphic_threshold,
            };
            let database = TypeDatabase::compute_with_config(&program, config);

            // Stdout carries nothing but the document; logs go to stderr.
            if pretty {
                println!("{}", database.as_json_pretty(&program));
            } else {
                println!("{}", database.as_json(&program));
            }
        }

        Commands::Info { input } => {
            let program = load_program(&input)?;
            println!("📦 {}", input.display().to_string().bold());
            println!("   classes:          {}", program.class_count);
            println!("   bytecodes:        {}", program.bytecodes.len());
            println!("   literals:         {}", program.literals.len());
            println!("   globals:          {}", program.global_variables.len());
            println!("   dispatch entries: {}", program.dispatch_table.len());
            println!("   entry method:     {}", program.entry_method);
        }
    }

    Ok(())
}
