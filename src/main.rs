use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wm_gw_cli::cli::{self, commands, Cli, Commands};
use wm_gw_cli::Error;

#[tokio::main]
async fn main() -> Result<()> {
    let (cli, source) = match Cli::load(std::env::args_os()) {
        Ok(loaded) => loaded,
        Err(Error::Arguments(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    // Initialize tracing
    let filter = match &cli.settings.framework.debug_level {
        Some(level) => EnvFilter::try_new(cli::log_directive(level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "wm_gw_cli=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    source.log();

    let command = cli.selected_command();
    commands::check_settings(&cli.settings, &command)?;

    let settings = &cli.settings;
    match command {
        Commands::Init { force } => commands::init(settings, force).await,
        Commands::Settings { dump } => commands::show_settings(settings, dump.as_deref()).await,
        Commands::Listen { format } => commands::listen(settings, format).await,
        Commands::Gateways { format } => commands::gateways(settings, format).await,
        Commands::Store { workers } => commands::store(settings, workers).await,
        Commands::Inventory => commands::inventory(settings).await,
    }
}
