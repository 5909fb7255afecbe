use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memkit_core::{DetourKind, LabelMap, TextEncoding};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse_hex_addr, parse_kind, parse_value};

#[derive(Parser)]
#[command(name = "memkit")]
#[command(about = "Inspect and instrument a live process's memory")]
struct Args {
    /// Target process ID
    #[arg(long, global = true, env = "MEMKIT_PID")]
    pid: Option<u32>,

    /// Target process name (".exe"/".bin" suffix optional)
    #[arg(long, global = true, env = "MEMKIT_PROCESS")]
    process: Option<String>,

    /// JSON file mapping label names to expressions; use as `@name`
    #[arg(long, global = true)]
    labels: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a pointer-path expression to an address
    Resolve {
        /// Expression like `base+1240C,10,A8` or `@label`
        expr: String,
    },

    /// Read a typed value
    Read {
        expr: String,

        /// Value kind: bool, byte, int16/32/64, float, double, vec2/3/4, text, bytes
        #[arg(long, default_value = "int32")]
        kind: String,

        /// Byte length, required for text and bytes
        #[arg(long)]
        len: Option<usize>,

        /// Text encoding: utf8, utf16, sjis
        #[arg(long, default_value = "utf8")]
        encoding: TextEncoding,
    },

    /// Write a typed value through the protected write path
    Write {
        expr: String,

        /// Raw value; hex integers with 0x, vectors comma-separated,
        /// bytes as a hex string
        value: String,

        #[arg(long, default_value = "int32")]
        kind: String,

        #[arg(long)]
        len: Option<usize>,

        #[arg(long, default_value = "utf8")]
        encoding: TextEncoding,

        /// Skip the protection relax/restore around the write
        #[arg(long)]
        no_protect: bool,
    },

    /// Pin a value at an address until Ctrl-C
    Freeze {
        expr: String,
        value: String,

        #[arg(long, default_value = "int32")]
        kind: String,

        #[arg(long)]
        len: Option<usize>,

        #[arg(long, default_value = "utf8")]
        encoding: TextEncoding,

        /// Rewrite interval in milliseconds
        #[arg(long = "interval", default_value_t = 25)]
        interval_ms: u64,
    },

    /// Print the jump-site bytes a detour would install, without a process
    DetourCalc {
        /// Source address (hex)
        #[arg(value_parser = parse_hex_addr)]
        source: u64,

        /// Cave address (hex)
        #[arg(value_parser = parse_hex_addr)]
        target: u64,

        /// Detour kind: jump, jump-far, call
        #[arg(long, default_value = "jump")]
        kind: String,

        /// Number of source bytes to replace
        #[arg(long = "replace", default_value_t = 5)]
        replace_count: usize,
    },

    /// Dump all readable committed memory to a file
    Dump {
        #[arg(long, default_value = "dump.bin")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("memkit=info".parse()?))
        .init();

    let args = Args::parse();

    let labels = match &args.labels {
        Some(path) => {
            let labels = LabelMap::load(path)
                .with_context(|| format!("failed to load labels from {}", path.display()))?;
            info!("loaded {} labels from {}", labels.len(), path.display());
            labels
        }
        None => LabelMap::new(),
    };

    // detour-calc is pure and never opens a process.
    if let Command::DetourCalc {
        source,
        target,
        kind,
        replace_count,
    } = &args.command
    {
        let kind = DetourKind::from_str(kind)
            .map_err(|_| anyhow::anyhow!("unknown detour kind {kind:?}"))?;
        return commands::detour_calc::run(*source, *target, kind, *replace_count);
    }

    run_with_process(&args, &labels)
}

/// Substitute `@name` with the labelled expression.
fn expand<'a>(labels: &'a LabelMap, expr: &'a str) -> Result<&'a str> {
    match expr.strip_prefix('@') {
        Some(name) => labels
            .get(name)
            .with_context(|| format!("unknown label {name:?}")),
        None => Ok(expr),
    }
}

#[cfg(target_os = "windows")]
fn run_with_process(args: &Args, labels: &LabelMap) -> Result<()> {
    use memkit_core::{ProcessTarget, Session};

    let target = if let Some(pid) = args.pid {
        ProcessTarget::open(pid)?
    } else if let Some(name) = &args.process {
        ProcessTarget::open_by_name(name)?
    } else {
        anyhow::bail!("specify a target with --pid or --process");
    };
    let session = Session::new(target);

    match &args.command {
        Command::Resolve { expr } => commands::resolve::run(&session, expand(labels, expr)?),
        Command::Read {
            expr,
            kind,
            len,
            encoding,
        } => {
            let kind = parse_kind(kind, *len, *encoding)?;
            commands::read::run(&session, expand(labels, expr)?, &kind)
        }
        Command::Write {
            expr,
            value,
            kind,
            len,
            encoding,
            no_protect,
        } => {
            let kind = parse_kind(kind, *len, *encoding)?;
            let value = parse_value(&kind, value)?;
            commands::write::run(&session, expand(labels, expr)?, &value, !no_protect)
        }
        Command::Freeze {
            expr,
            value,
            kind,
            len,
            encoding,
            interval_ms,
        } => {
            let kind = parse_kind(kind, *len, *encoding)?;
            let value = parse_value(&kind, value)?;
            commands::freeze::run(
                &session,
                expand(labels, expr)?,
                value,
                Duration::from_millis(*interval_ms),
            )
        }
        Command::Dump { out } => commands::dump::run(&session, out),
        Command::DetourCalc { .. } => unreachable!("handled before opening a process"),
    }
}

#[cfg(not(target_os = "windows"))]
fn run_with_process(_args: &Args, _labels: &LabelMap) -> Result<()> {
    anyhow::bail!("live process access is only supported on Windows")
}
