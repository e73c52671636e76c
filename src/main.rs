use std::process::ExitCode;

use clap::Parser;

use restorefe::cli::{self, CliArgs};
use restorefe::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init(args.verbose);
    restorefe::log_info!("RestoreFE {} starting", env!("CARGO_PKG_VERSION"));
    let code = cli::run(args);
    restorefe::log_info!("RestoreFE exiting");
    code
}
