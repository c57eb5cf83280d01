//! cinder - a UCI chess engine searching with a network-guided MCTS.
//!
//! The process is a plain blocking loop: read a UCI command from stdin,
//! dispatch it to the [`EngineController`], print whatever events the
//! search emits. Search threads print their own info/bestmove lines through
//! the controller's sinks; `println!` keeps each line atomic.

use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

mod engine;
mod options;
mod time;
mod uci;

use crate::engine::EngineController;
use crate::options::EngineOptions;
use crate::uci::{format_bestmove, format_info, Command};

#[derive(Debug, Parser)]
#[command(name = "cinder", about = "UCI chess engine")]
struct Args {
    /// Path to an options file (defaults to ./cinder.toml if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (logs go to stderr).
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);
    cinder_eval::registry::init();

    let options = EngineOptions::load(args.config.as_deref())?;
    let mut engine = EngineController::new(
        options,
        Arc::new(|info| println!("{}", format_info(&info))),
        Arc::new(|best| println!("{}", format_bestmove(&best))),
    );
    info!("engine initialized");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match Command::parse(&line) {
            Command::Uci => {
                println!("id name {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                println!("id author the cinder authors");
                for option_line in engine.options().uci_option_lines() {
                    println!("{option_line}");
                }
                println!("uciok");
            }
            Command::Debug { on } => {
                debug!(on, "debug mode toggled by host");
            }
            Command::IsReady => match engine.ensure_ready() {
                Ok(()) => println!("readyok"),
                Err(err) => println!("info string {err:#}"),
            },
            Command::SetOption { name, value } => {
                if let Err(err) = engine.set_option(&name, &value) {
                    println!("info string {err}");
                }
            }
            Command::NewGame => {
                if let Err(err) = engine.new_game() {
                    println!("info string {err:#}");
                }
            }
            Command::SetPosition { fen, moves } => {
                if let Err(err) = engine.set_position(fen.as_deref(), &moves) {
                    println!("info string {err:#}");
                }
            }
            Command::Go(params) => {
                if let Err(err) = engine.go(&params) {
                    println!("info string {err:#}");
                }
            }
            Command::Stop => engine.stop(),
            Command::Quit => {
                engine.stop();
                break;
            }
            Command::Unknown(cmd) if cmd.is_empty() => {}
            Command::Unknown(cmd) => {
                println!("info string unknown command: {cmd}");
            }
        }
    }
    Ok(())
}
