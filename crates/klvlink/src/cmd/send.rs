use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use klvlink_session::{DirectoryFrames, Sender, SenderConfig, TelemetryReplay};
use klvlink_transport::UdpChannel;
use tracing::info;

use crate::cmd::{install_cancel_handler, SendArgs};
use crate::exit::{io_error, session_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_sender_stats, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let mut frames = DirectoryFrames::open(&args.frames, args.looping)
        .map_err(|err| session_error("failed to open frame directory", err))?;
    let mut telemetry = match &args.telemetry {
        Some(path) => load_telemetry(path)?,
        None => TelemetryReplay::default(),
    };

    let channel = UdpChannel::connect(&args.addr)
        .map_err(|err| transport_error("failed to open socket", err))?;
    let config = SenderConfig {
        max_frames: args.count,
        ..SenderConfig::with_fps(args.fps)
    };
    info!(
        addr = %args.addr,
        frames = frames.len(),
        samples = telemetry.len(),
        fps = args.fps,
        "sending"
    );

    let cancel = install_cancel_handler()?;
    let mut sender = Sender::new(channel, config);
    let stats = sender
        .run(&mut frames, &mut telemetry, &cancel)
        .map_err(|err| session_error("send failed", err))?;

    print_sender_stats(&stats, format);
    Ok(SUCCESS)
}

fn load_telemetry(path: &Path) -> CliResult<TelemetryReplay> {
    let context = format!("failed to read telemetry {}", path.display());
    let file = File::open(path).map_err(|err| io_error(&context, err))?;
    TelemetryReplay::from_jsonl(BufReader::new(file)).map_err(|err| session_error(&context, err))
}
