// src/main.rs

use trainlaunch::{cli, logging, run};

// The environment patch needs a single-threaded runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = cli::parse();
    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("trainlaunch error: {err:?}");
        std::process::exit(1);
    }

    match run(args).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(err) => {
            eprintln!("trainlaunch error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}
