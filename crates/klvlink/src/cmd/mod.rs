use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use klvlink_session::config::{DEFAULT_FRAME_RATE, DEFAULT_RESOLUTION};
use klvlink_session::LineFormat;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod extract;
pub mod receive;
pub mod scan;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream JPEG frames with telemetry to a receiver.
    Send(SendArgs),
    /// Receive frames and write video, KLV, log and index outputs.
    Receive(ReceiveArgs),
    /// Decode every packet in a KLV file into a JSON index.
    Extract(ExtractArgs),
    /// Print framing diagnostics for a KLV file.
    Scan(ScanArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Receive(args) => receive::run(args, format),
        Command::Extract(args) => extract::run(args, format),
        Command::Scan(args) => scan::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver address (host:port).
    pub addr: String,
    /// Directory of .jpg/.jpeg frames, sent in file name order.
    #[arg(long, value_name = "DIR")]
    pub frames: PathBuf,
    /// Telemetry samples, one JSON object per line.
    #[arg(long, value_name = "FILE")]
    pub telemetry: Option<PathBuf>,
    /// Frames per second. 0 sends as fast as possible.
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE, value_parser = parse_fps)]
    pub fps: f64,
    /// Restart from the first frame when the directory is exhausted.
    #[arg(long = "loop")]
    pub looping: bool,
    /// Stop after this many frames.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    /// Local address to bind (host:port).
    pub bind: String,
    /// Directory for output.rgb, output.klv, output_log.txt and frame_index.jsonl.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,
    /// Stop after this many frames have been stored.
    #[arg(long)]
    pub count: Option<u64>,
    /// Socket read timeout (e.g. 250ms, 1s).
    #[arg(long, default_value = "250ms")]
    pub read_timeout: String,
    /// Per-frame log line encoding.
    #[arg(long, value_enum, default_value = "text")]
    pub line_format: LineFormatArg,
    /// Output video width in pixels.
    #[arg(long, default_value_t = DEFAULT_RESOLUTION.0)]
    pub width: u32,
    /// Output video height in pixels.
    #[arg(long, default_value_t = DEFAULT_RESOLUTION.1)]
    pub height: u32,
}

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum LineFormatArg {
    Text,
    Json,
}

impl From<LineFormatArg> for LineFormat {
    fn from(arg: LineFormatArg) -> Self {
        match arg {
            LineFormatArg::Text => LineFormat::Text,
            LineFormatArg::Json => LineFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Recorded KLV metadata stream.
    pub input: PathBuf,
    /// Where to write the JSON index.
    #[arg(long, short = 'o', default_value = "frame_klv_mapping.json")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Recorded KLV metadata stream.
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Include build and platform details.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `250ms`, `2s` or bare seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Slowest accepted rate: one frame every 1000 s.
const MIN_FPS: f64 = 0.001;

/// Parse a frame rate: 0 (unpaced) or a finite rate of at least [`MIN_FPS`].
fn parse_fps(input: &str) -> Result<f64, String> {
    let fps: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame rate: {input}"))?;
    if fps == 0.0 || (fps.is_finite() && fps >= MIN_FPS) {
        Ok(fps)
    } else {
        Err(format!("frame rate must be 0 or a finite value >= {MIN_FPS}: {input}"))
    }
}

/// Set the returned flag on Ctrl-C.
pub(crate) fn install_cancel_handler() -> CliResult<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(cancel)
}
