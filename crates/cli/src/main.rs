use std::process::ExitCode;

fn main() -> ExitCode {
    negotiator_cli::run()
}
