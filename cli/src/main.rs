use std::process::ExitCode;

use b1core::{Features, Interpreter, Signal};
use b1fmt::Program;
use b1host::{OsRandomSource, StdioPort};
use clap::Parser;

/// Runs a line-numbered BASIC program.
#[derive(Parser)]
#[command(name = "b1", version, about)]
struct Cli {
    /// Path to the program text file
    program: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut program = match Program::read_file(&cli.program) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("b1: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut io = StdioPort::new();
    let mut rng = OsRandomSource::new();
    let mut interp = Interpreter::new(Features::default(), &mut program, &mut io, &mut rng);

    match interp.run() {
        Ok(Signal::End) => ExitCode::SUCCESS,
        Ok(Signal::Stop) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("b1: {e}");
            ExitCode::from(e.kind.code())
        }
    }
}
