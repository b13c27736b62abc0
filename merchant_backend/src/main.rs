use std::process::ExitCode;

use dotenvy::dotenv;
use log::{error, info};
use merchant_backend::{cli::handle_command_line_args, config::ServerConfig, errors::ServerError, server::run_server};

#[actix_web::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();
    if handle_command_line_args() {
        return ExitCode::SUCCESS;
    }
    let config = ServerConfig::from_env_or_default();

    info!("🚀️ Starting server on {}:{}", config.host, config.port);
    match run_server(config).await {
        Ok(_) => {
            println!("Bye!");
            ExitCode::SUCCESS
        },
        Err(e @ ServerError::ConfigurationError(_)) => {
            error!("🪛️ {e}");
            eprintln!("{e}");
            ExitCode::from(1)
        },
        Err(e) => {
            error!("🚀️ {e}");
            eprintln!("{e}");
            ExitCode::from(2)
        },
    }
}
