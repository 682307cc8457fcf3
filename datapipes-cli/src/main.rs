mod commands;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "datapipes",
    version,
    about = "Streaming processing of tar sample shards"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Concatenate sample streams from tar files or messaging endpoints
    Cat(commands::cat::CatArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Cat(args) => commands::cat::execute(args).await,
    }
}
