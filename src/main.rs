use bookmark_sync::cli::{
    Cli, ShutdownController, error_envelope, human_summary, usage_exit_code,
};
use bookmark_sync::error::{EXIT_FAILURE, EXIT_OK};
use bookmark_sync::{SyncConfig, SyncOrchestrator};
use clap::Parser;

fn main() {
    bookmark_sync::logging::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = usage_exit_code(&error);
            let _ = error.print();
            std::process::exit(code);
        }
    };

    let config = SyncConfig::from_env();
    if let Err(error) = ShutdownController::install(config.lock_path.clone()) {
        tracing::warn!("failed to install signal handler: {error}");
    }

    // The orchestrator and its lock guard are dropped inside `run`, before exit.
    let code = run(&cli, config);
    std::process::exit(code);
}

fn run(cli: &Cli, config: SyncConfig) -> i32 {
    let orchestrator = SyncOrchestrator::from_config(config);
    match orchestrator.run(&cli.options()) {
        Ok(outcome) => {
            if cli.json {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(error) => {
                        eprintln!("error: {error}");
                        return EXIT_FAILURE;
                    }
                }
            } else {
                println!("{}", human_summary(&outcome));
            }
            EXIT_OK
        }
        Err(error) => {
            if cli.json {
                println!("{}", error_envelope(&error));
            }
            eprintln!("error: {error}");
            error.exit_code()
        }
    }
}
