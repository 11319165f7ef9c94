use klvlink_session::{
    JpegFrameDecoder, OutputPaths, Outputs, Reassembler, Receiver, ReceiverConfig,
};
use tracing::info;

use crate::cmd::{install_cancel_handler, parse_duration, ReceiveArgs};
use crate::exit::{io_error, session_error, CliResult, SUCCESS};
use crate::output::{print_receiver_stats, OutputFormat};

pub fn run(args: ReceiveArgs, format: OutputFormat) -> CliResult<i32> {
    let config = ReceiverConfig {
        read_timeout: parse_duration(&args.read_timeout)?,
        width: args.width,
        height: args.height,
        log_format: args.line_format.into(),
        max_frames: args.count,
    };

    std::fs::create_dir_all(&args.out_dir)
        .map_err(|err| io_error(&format!("failed to create {}", args.out_dir.display()), err))?;
    let paths = OutputPaths::in_dir(&args.out_dir);
    let outputs =
        Outputs::create(&paths).map_err(|err| session_error("failed to open outputs", err))?;
    let mut reassembler = Reassembler::new(JpegFrameDecoder::new(), outputs, config)
        .map_err(|err| session_error("failed to write log header", err))?;

    let receiver = Receiver::bind(&args.bind)
        .map_err(|err| session_error("failed to bind receiver", err))?;
    info!(bind = %args.bind, out_dir = %args.out_dir.display(), "receiving");

    let cancel = install_cancel_handler()?;
    let stats = receiver
        .run(&mut reassembler, &cancel)
        .map_err(|err| session_error("receive failed", err))?;
    reassembler
        .finish()
        .map_err(|err| session_error("failed to flush outputs", err))?;

    print_receiver_stats(&stats, format);
    Ok(SUCCESS)
}
