use std::process::ExitCode;

fn main() -> ExitCode {
    skipper_rs::run_cli()
}
