use clap::Parser;
use parmap::app::{handle_fatal_error, init_logging, AppConfig};
use parmap::cli::{execute_command, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = AppConfig::new(cli.verbose).with_config_file(cli.config.clone());
    init_logging(&app_config);

    if let Err(e) = execute_command(cli.command, app_config.config_file.as_deref()).await {
        handle_fatal_error(e, app_config.verbose);
    }
}
