use clap::Parser;
use std::io;

use pagetalk_server::logging::init_logging;
use pagetalk_server::{run_server, AppState};

#[derive(Parser, Debug, Clone)]
#[command(name = "pagetalk-server")]
#[command(about = "Branching document-conversation HTTP server")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8081")]
    port: u16,

    /// LLM API base URL (OpenAI-compatible)
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_base_url: String,

    /// LLM model name
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", default_value = "sk-test")]
    api_key: String,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    if cli.log_level.is_some() {
        env_logger::init();
    } else {
        init_logging(cli.debug);
    }

    log::info!("Starting pagetalk server on port {}", cli.port);
    log::info!("LLM configuration:");
    log::info!("  Base URL: {}", cli.llm_base_url);
    log::info!("  Model: {}", cli.model);

    let state = AppState::new_with_config(cli.llm_base_url, cli.model, cli.api_key);
    run_server(cli.port, state).await
}
