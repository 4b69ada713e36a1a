//! The driver loop
//!
//! `run` orchestrates a whole session: flag parsing, context construction or
//! load, the update loop, and the final commit. The loop itself is exposed
//! as [`run_loop`] over any buffered reader so clients and tests can drive
//! it without a real stdin.

use crate::flags::{parse_session_args, SessionMode};
use crate::stdin::{apply_records, WriteEvent, WriteParser};
use skfs_core::{DirName, SkfsResult};
use skfs_engine::persist::{load_context, save_context};
use skfs_engine::{Context, EHandle};
use std::io::BufRead;
use std::path::Path;
use tracing::{error, info};

/// Clean stop
pub const EXIT_OK: i32 = 0;
/// Fatal engine error
pub const EXIT_FATAL: i32 = 1;
/// CLI / argument error
pub const EXIT_CLI_ERROR: i32 = 2;

/// Update passes per iteration before stale cycles are carried over
///
/// Convergent lazy cycles settle in a handful of passes; anything still
/// dirty after this many is left for the next iteration.
const MAX_UPDATE_PASSES: usize = 64;

/// What the client body wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep looping
    Continue,
    /// Commit and exit
    Stop,
}

/// Run a whole session from an argument vector
///
/// `init` registers the client's directories, mappers, and lazy functions;
/// it runs once against a fresh context in an init session and once to
/// re-attach code after a load in a data session. `body` runs after every
/// update in a data session.
///
/// Returns the process exit code.
pub fn run<A, S, I, B>(args: A, input_dir: &DirName, init: I, mut body: B) -> i32
where
    A: IntoIterator<Item = S>,
    S: Into<String>,
    I: Fn(&mut Context, &EHandle<String>) -> SkfsResult<()>,
    B: FnMut(&mut Context) -> SkfsResult<Control>,
{
    init_tracing();
    let mode = match parse_session_args(args) {
        Ok(mode) => mode,
        Err(message) => {
            eprintln!("{message}");
            return EXIT_CLI_ERROR;
        }
    };

    let result = match &mode {
        SessionMode::Init(path) => init_session(path, input_dir, &init),
        SessionMode::Data(path) => {
            let stdin = std::io::stdin();
            data_session(path, input_dir, &init, &mut body, &mut stdin.lock())
        }
    };

    match result {
        Ok(()) => EXIT_OK,
        Err(err) => {
            error!(error = %err, "session failed");
            eprintln!("skfs: {err}");
            EXIT_FATAL
        }
    }
}

/// Install the log subscriber once; respects `RUST_LOG`
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn init_session<I>(path: &Path, input_dir: &DirName, init: &I) -> SkfsResult<()>
where
    I: Fn(&mut Context, &EHandle<String>) -> SkfsResult<()>,
{
    let mut ctx = Context::new();
    let input = ctx.mkdir::<String>(input_dir, true, Vec::new())?;
    init(&mut ctx, &input)?;
    ctx.update()?;
    save_context(&ctx, path)?;
    info!(path = %path.display(), "init session complete");
    Ok(())
}

fn data_session<I, B>(
    path: &Path,
    input_dir: &DirName,
    init: &I,
    body: &mut B,
    reader: &mut dyn BufRead,
) -> SkfsResult<()>
where
    I: Fn(&mut Context, &EHandle<String>) -> SkfsResult<()>,
    B: FnMut(&mut Context) -> SkfsResult<Control>,
{
    let mut ctx = load_context(path)?;
    let input = ctx.mkdir::<String>(input_dir, true, Vec::new())?;
    init(&mut ctx, &input)?;
    run_with_gc(&mut ctx, path, input_dir, reader, body)
}

/// The data-session loop with per-iteration garbage collection
///
/// # Errors
///
/// Fatal engine, I/O, and body errors; nothing is committed for the failed
/// iteration.
pub fn run_with_gc<B>(
    ctx: &mut Context,
    snapshot_path: &Path,
    input_dir: &DirName,
    reader: &mut dyn BufRead,
    body: &mut B,
) -> SkfsResult<()>
where
    B: FnMut(&mut Context) -> SkfsResult<Control>,
{
    run_loop(ctx, snapshot_path, input_dir, reader, body, true)
}

/// The data-session loop
///
/// Per iteration: read one stdin batch (up to a blank-key separator or EOF),
/// apply it to the input directory, drive updates to a fixed point, then
/// hand control to the body. `Control::Stop` — or EOF with nothing left to
/// apply — commits the context atomically and returns.
///
/// # Errors
///
/// Fatal engine, I/O, and body errors; nothing is committed for the failed
/// iteration.
pub fn run_loop<B>(
    ctx: &mut Context,
    snapshot_path: &Path,
    input_dir: &DirName,
    reader: &mut dyn BufRead,
    body: &mut B,
    with_gc: bool,
) -> SkfsResult<()>
where
    B: FnMut(&mut Context) -> SkfsResult<Control>,
{
    let mut parser = WriteParser::new();
    let mut eof = false;

    loop {
        let mut events: Vec<WriteEvent> = Vec::new();
        while !eof && !events.contains(&WriteEvent::Flush) {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                eof = true;
                events.extend(parser.finish());
                break;
            }
            let consumed = buf.len();
            events.extend(parser.feed(buf));
            reader.consume(consumed);
        }

        let idle = events.is_empty();
        apply_records(ctx, input_dir, &events)?;

        let mut passes = 0;
        loop {
            ctx.update()?;
            passes += 1;
            if !ctx.has_dirty() || passes >= MAX_UPDATE_PASSES {
                break;
            }
        }

        match body(ctx)? {
            Control::Stop => {
                save_context(ctx, snapshot_path)?;
                info!("session stopped by client");
                return Ok(());
            }
            Control::Continue => {
                if with_gc {
                    ctx.collect();
                }
                if eof && idle {
                    save_context(ctx, snapshot_path)?;
                    info!("input exhausted; session committed");
                    return Ok(());
                }
            }
        }
    }
}
