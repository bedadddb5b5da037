mod cli;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    match cli::run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            // Denials are expected outcomes; keep them apart from failures
            let code = if e.is_user_facing() { 2 } else { 1 };
            std::process::exit(code);
        }
    }
}
