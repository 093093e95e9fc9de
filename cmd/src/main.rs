use cardpatrol_cmd::{RunArgs, Settings, VERSION};
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use reqwest::Url;
use tracing_subscriber::EnvFilter;

/// Watches Prometheus for cardinality explosions and suppresses the
/// offending label at scrape time.
#[derive(Debug, Parser)]
#[command(name = "cardpatrol", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install the recording rule, then patrol until interrupted
    Run(RunArgs),
    /// Print suppressed labels as metric.label
    List,
    /// Remove the suppression of a metric.label
    Unsilence {
        /// metric.label, as printed by `list`
        identifier: String,

        /// Base URL of the running instance whose gauge is reset
        #[arg(long, env = "CARDPATROL_RESET_URL", default_value = "http://localhost:8080")]
        reset_url: Url,
    },
    /// Print the version and exit
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => cardpatrol_cmd::run(&cli.settings, &args).await,
        Command::List => {
            for suppression in cardpatrol_cmd::list(&cli.settings).await? {
                println!("{suppression}");
            }
            Ok(())
        }
        Command::Unsilence {
            identifier,
            reset_url,
        } => {
            let removed = cardpatrol_cmd::unsilence(&cli.settings, &identifier, &reset_url).await?;
            println!("Removed suppression of {removed}");
            Ok(())
        }
        Command::Version => {
            println!("cardpatrol {VERSION}");
            Ok(())
        }
    }
}
