//! Replays a sequence of allocator operations on a fresh arena and logs the
//! outcome of each one.
//!
//! ```text
//! cargo run --example replay -- --arena-size 64 alloc:10 alloc:20 free:0 alloc:10 alloc:100
//! ```
//!
//! Handles are referred to by the order they were handed out in: `free:0`
//! drops a reference to the first handle returned by `alloc`. Freeing a
//! handle whose block is already released is a double free and aborts the
//! replay.

use std::{
    fmt, process,
    sync::OnceLock,
    time::{Duration, Instant},
};

use argh::FromArgs;
use block_allocator::{BlockAllocator, CallingContext, Handle};
use os_sync::SysLock;
use snafu::{OptionExt as _, ResultExt as _, whatever};
use snafu_utils::{GenericError, Report};

macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        log($level, format_args!($($arg)*))
    };
}

macro_rules! trace {
    ($($arg:tt)*) => {
        log!(LogLevel::Trace, $($arg)*)
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        log!(LogLevel::Debug, $($arg)*)
    };
}

macro_rules! info {
    ($($arg:tt)*) => {
        log!(LogLevel::Info, $($arg)*)
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        log!(LogLevel::Warn, $($arg)*)
    };
}

/// Replay allocator operations on a fixed arena.
#[derive(Debug, FromArgs)]
struct Args {
    /// size of the arena in bytes
    #[argh(option, default = "1024")]
    arena_size: usize,
    /// run every operation from a system-locked context
    #[argh(switch)]
    syslock: bool,
    /// lowest level to log: trace, debug, info or warn
    #[argh(option, default = "LogLevel::Info", from_str_fn(parse_level))]
    log_level: LogLevel,
    /// operations: alloc:<size>, use:<n>, free:<n>, robust:<n> or clean
    #[argh(positional)]
    ops: Vec<String>,
}

fn main() {
    let args: Args = argh::from_env();
    let _ = LOG_LEVEL.set(args.log_level);
    let _ = START.get_or_init(Instant::now);

    if let Err(err) = run(&args) {
        let report = Report::new(err);
        eprintln!("{report}");
        process::exit(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Alloc(usize),
    Use(usize),
    Free(usize),
    Robust(usize),
    Clean,
}

fn parse_op(op: &str) -> Result<Op, GenericError> {
    let (name, arg) = op
        .split_once(':')
        .map_or((op, None), |(name, arg)| (name, Some(arg)));
    let parse_arg = || -> Result<usize, GenericError> {
        arg.with_whatever_context(|| format!("missing argument, op={op}"))?
            .parse()
            .with_whatever_context(|_| format!("invalid argument, op={op}"))
    };

    let op = match name {
        "alloc" => Op::Alloc(parse_arg()?),
        "use" => Op::Use(parse_arg()?),
        "free" => Op::Free(parse_arg()?),
        "robust" => Op::Robust(parse_arg()?),
        "clean" if arg.is_none() => Op::Clean,
        "clean" => {
            whatever!("clean takes no argument, op={op}");
        }
        _ => {
            whatever!("unknown operation, op={op}");
        }
    };
    Ok(op)
}

fn handle_at(handles: &[Handle], index: usize) -> Result<Handle, GenericError> {
    handles.get(index).copied().with_whatever_context(|| {
        format!(
            "no handle with index {index}, {} handed out so far",
            handles.len()
        )
    })
}

fn run(args: &Args) -> Result<(), GenericError> {
    let ops = args
        .ops
        .iter()
        .map(|op| parse_op(op))
        .collect::<Result<Vec<_>, _>>()?;

    let mut storage = vec![0_u8; args.arena_size];
    let allocator =
        BlockAllocator::from_storage(&mut storage).whatever_context("failed to bind arena")?;
    let context = if args.syslock {
        CallingContext::SysLock
    } else {
        CallingContext::Normal
    };
    info!(
        "arena of {} bytes bound, context={context:?}",
        args.arena_size
    );

    let mut handles = vec![];
    for (step, op) in ops.into_iter().enumerate() {
        trace!("#{step} {op:?}");
        let _scope = context.is_serialized().then(SysLock::scope);
        let mut guard = allocator.lock(context);

        match op {
            Op::Alloc(size) => match guard.alloc(size) {
                Some(handle) => {
                    info!("#{step} alloc({size}) -> [{}] {handle}", handles.len());
                    handles.push(handle);
                }
                None => warn!(
                    "#{step} alloc({size}) -> none, remaining={}",
                    guard.remaining()
                ),
            },
            Op::Use(index) => {
                let handle = handle_at(&handles, index)?;
                match guard.retain(handle) {
                    Some(_) => info!("#{step} use([{index}]) -> {:?}", guard.state(handle)),
                    None => warn!("#{step} use([{index}]) rejected, {handle}"),
                }
            }
            Op::Free(index) => {
                let handle = handle_at(&handles, index)?;
                match guard.free(handle) {
                    Some(_) => info!("#{step} free([{index}]) -> {:?}", guard.state(handle)),
                    None => info!("#{step} free([{index}]) -> released"),
                }
            }
            Op::Robust(index) => {
                let handle = handle_at(&handles, index)?;
                match guard.robust_free(handle) {
                    Some(_) => warn!("#{step} robust([{index}]) -> not released, {handle}"),
                    None => info!("#{step} robust([{index}]) -> released"),
                }
            }
            Op::Clean => {
                let free = guard.clean();
                info!("#{step} clean -> {free} free of {} items", guard.len());
            }
        }
        debug!("len={} remaining={}", guard.len(), guard.remaining());
    }

    #[cfg(feature = "stats")]
    {
        let stats = allocator.stats();
        info!(
            "blocks={} used={} free={} remaining={}",
            stats.blocks,
            stats.used,
            stats.free(),
            allocator.remaining()
        );
    }

    Ok(())
}

static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();
static START: OnceLock<Instant> = OnceLock::new();

fn log(level: LogLevel, message: fmt::Arguments) {
    if level < LOG_LEVEL.get().copied().unwrap_or(LogLevel::Info) {
        return;
    }
    let now = START.get().map_or(Duration::ZERO, Instant::elapsed);
    println!("{now:?} {} {}", LevelFormat(level), message);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
}

fn parse_level(s: &str) -> Result<LogLevel, String> {
    match s {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        _ => Err(format!("unknown log level: {s}")),
    }
}

struct LevelFormat(LogLevel);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (color, msg) = match self.0 {
            LogLevel::Trace => (35, "TRACE"),
            LogLevel::Debug => (34, "DEBUG"),
            LogLevel::Info => (32, " INFO"),
            LogLevel::Warn => (33, " WARN"),
        };
        write!(f, "\x1B[{color};1m{msg}\x1B[0m")
    }
}
