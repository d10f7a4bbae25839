// main.rs — startup: command line, maze template, logging, signals, and
// the hand-off to the listener/supervisor.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mazewar_server::maze::Maze;
use mazewar_server::server::{self, Engine};

/// Used when no template file is given.
const DEFAULT_MAZE: [&str; 8] = [
    "******************************",
    "***** %%%%%%%%% &&&&&&&&&&& **",
    "***** %%%%%%%%%        $$$$  *",
    "*           $$$$$$ $$$$$$$$$ *",
    "*##########                  *",
    "*########## @@@@@@@@@@@@@@@@@*",
    "*           @@@@@@@@@@@@@@@@@*",
    "******************************",
];

#[derive(Parser, Debug)]
#[command(name = "mazewar", about = "multi-player maze combat game server")]
struct Args {
    /// TCP port to listen on (1024-65535)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1024..))]
    port: u16,

    /// Maze template file, one row per line; uppercase letters are
    /// reserved for players and rejected
    #[arg(short, long)]
    template: Option<PathBuf>,
}

fn load_template(args: &Args) -> anyhow::Result<Vec<String>> {
    let Some(path) = &args.template else {
        return Ok(DEFAULT_MAZE.iter().map(|row| row.to_string()).collect());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading maze template {}", path.display()))?;
    let rows: Vec<String> = text.lines().map(str::to_owned).collect();
    if rows.is_empty() {
        // an empty file falls back to the built-in maze
        return Ok(DEFAULT_MAZE.iter().map(|row| row.to_string()).collect());
    }
    Ok(rows)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let template = load_template(&args)?;
    let maze = Maze::from_template(&template).context("invalid maze template")?;
    let (rows, cols) = maze.dimensions();

    let engine = Arc::new(Engine::new(maze));

    // Shutdown is a flag raised from the signal handler; the accept loop
    // polls it. SIGPIPE stays ignored (the runtime default), so a send to a
    // departed client surfaces as a write error at the call site instead of
    // killing the process.
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGHUP, SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("installing signal handler")?;
    }

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .with_context(|| format!("binding TCP port {}", args.port))?;
    info!(port = args.port, rows, cols, "mazewar server listening");

    server::run(engine, listener, shutdown)?;
    info!("mazewar server terminated");
    Ok(())
}
