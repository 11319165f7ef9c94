use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use tracing::info;

use crate::cmd::ExtractArgs;
use crate::exit::{io_error, session_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_extract_summary, ExtractSummary, OutputFormat};

pub fn run(args: ExtractArgs, format: OutputFormat) -> CliResult<i32> {
    let input = File::open(&args.input)
        .map_err(|err| io_error(&format!("failed to open {}", args.input.display()), err))?;
    let index = klvlink_session::extract(BufReader::new(input))
        .map_err(|err| session_error("extraction failed", err))?;

    let output_context = format!("failed to write {}", args.output.display());
    let file = File::create(&args.output).map_err(|err| io_error(&output_context, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &index)
        .map_err(|err| CliError::new(DATA_INVALID, format!("{output_context}: {err}")))?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .map_err(|err| io_error(&output_context, err))?;
    info!(packets = index.len(), output = %args.output.display(), "wrote index");

    let output = args.output.display().to_string();
    print_extract_summary(&ExtractSummary::new(&output, &index), format);
    Ok(SUCCESS)
}
