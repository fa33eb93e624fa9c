use std::process::ExitCode;

fn main() -> ExitCode {
    devis_cli::run()
}
