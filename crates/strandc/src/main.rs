use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strandc::compile;
use strandc::modfile;

#[derive(Parser)]
#[command(name = "strandc")]
#[command(about = "Strand durable-coroutine compiler (source-to-source).", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the language id this compiler accepts.
    LangId,
    /// Rewrite the yielding procedures of a package.
    Compile {
        /// Package directory, module file, or recursive pattern (dir/...).
        #[arg(long)]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::LangId => {
            println!("{}", modfile::STRAND_AST_SCHEMA_VERSION);
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Compile { path } => {
            let path = path.to_string_lossy().to_string();
            match compile::compile(&path) {
                Ok(report) => {
                    for p in &report.written {
                        println!("{}", p.display());
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
