//! kettle CLI - Command line interface for the sandbox

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kettle_core::config::default_socket_path;
use kettle_core::protocol::{self, Request, Response};
use kettle_core::{CompilationResult, Sandbox, SandboxConfig};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod client;

use client::Client;

#[derive(Parser)]
#[command(name = "kettle")]
#[command(author, version, about = "Compile and run untrusted single-file Java programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a file in-process (no daemon)
    Run {
        /// Java source file (or - for stdin)
        file: PathBuf,

        /// Timeout in seconds
        #[arg(short, long, default_value_t = kettle_core::config::DEFAULT_WALL_CLOCK_SECS)]
        timeout: u64,

        /// Heap limit in MB
        #[arg(short, long, default_value_t = kettle_core::config::DEFAULT_HEAP_MB)]
        memory: u64,

        /// Directory for per-run workspaces
        #[arg(long)]
        temp_root: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and run a file through the daemon
    Exec {
        /// Java source file (or - for stdin)
        file: PathBuf,

        /// Socket path (defaults to KETTLE_SOCKET env var or /run/kettle/kettle.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Get daemon status
    Status {
        /// Socket path (defaults to KETTLE_SOCKET env var or /run/kettle/kettle.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Ping the daemon
    Ping {
        /// Socket path (defaults to KETTLE_SOCKET env var or /run/kettle/kettle.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Program output goes to stdout, so logs stay on stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kettle_core=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            timeout,
            memory,
            temp_root,
            json,
        } => {
            let source = read_source(&file)?;
            if let Err(e) = protocol::validate_submission(&source) {
                eprintln!("{e}");
                return Ok(ExitCode::FAILURE);
            }

            let mut builder = SandboxConfig::builder()
                .wall_clock_secs(timeout)
                .heap_mb(memory)
                .max_concurrent(1);
            if let Some(root) = temp_root {
                builder = builder.temp_root(root);
            }

            let sandbox = Sandbox::new(builder.build())?;
            tracing::debug!(file = ?file, "running in-process");
            let result = sandbox.compile_and_run(&source).await;
            sandbox.shutdown().await;
            print_result(&result, json)
        }

        Commands::Exec { file, socket, json } => {
            let source = read_source(&file)?;
            let socket = socket.unwrap_or_else(default_socket_path);
            let mut client = Client::connect(&socket).await?;

            match client.call(&Request::CompileAndRun { source }).await? {
                Response::Result(result) => print_result(&result, json),
                Response::Rejected { message } | Response::Error { message } => {
                    eprintln!("{message}");
                    Ok(ExitCode::FAILURE)
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Commands::Status { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let mut client = Client::connect(&socket).await?;

            match client.call(&Request::Status).await? {
                Response::Status(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(ExitCode::SUCCESS)
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }

        Commands::Ping { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let mut client = Client::connect(&socket).await?;

            match client.call(&Request::Ping).await? {
                Response::Pong => {
                    println!("pong from {}", socket.display());
                    Ok(ExitCode::SUCCESS)
                }
                other => bail!("unexpected response: {other:?}"),
            }
        }
    }
}

fn read_source(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("failed to read source from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))
    }
}

fn print_result(result: &CompilationResult, json: bool) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string(result)?);
    } else {
        print!("{}", result.output);
        if !result.errors.is_empty() {
            eprint!("{}", result.errors);
            if !result.errors.ends_with('\n') {
                eprintln!();
            }
        }
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_documented_ceilings() {
        let cli = Cli::try_parse_from(["kettle", "run", "Main.java"]).unwrap();
        let Commands::Run { timeout, memory, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(timeout, 5);
        assert_eq!(memory, 128);
    }

    #[test]
    fn reads_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Main.java");
        std::fs::write(&path, "public class Main {}").unwrap();
        assert_eq!(read_source(&path).unwrap(), "public class Main {}");
    }

    #[test]
    fn missing_source_names_the_file() {
        let err = read_source(Path::new("/nonexistent/Main.java")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/Main.java"));
    }
}
