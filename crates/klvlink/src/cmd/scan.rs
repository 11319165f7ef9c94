use crate::cmd::ScanArgs;
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_scan_report, OutputFormat};

pub fn run(args: ScanArgs, format: OutputFormat) -> CliResult<i32> {
    let data = std::fs::read(&args.input)
        .map_err(|err| io_error(&format!("failed to read {}", args.input.display()), err))?;
    let report = klvlink_session::scan(&data);
    print_scan_report(&args.input.display().to_string(), &report, format);
    Ok(SUCCESS)
}
