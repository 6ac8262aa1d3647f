use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use dcabot::app::{App, BotDefinition};
use dcabot::config::Config;
use dcabot::domain::{BotId, DealId};

/// dcabot - Dollar-cost-averaging trading engine.
#[derive(Parser, Debug)]
#[command(name = "dcabot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine: stream events, ingest fills, reconcile open deals
    Run,

    /// Register a bot from a TOML definition file
    Add {
        /// Path to the bot definition file
        definition: PathBuf,
    },

    /// Start a bot: open a deal and attach its event stream
    Start {
        /// Bot id
        bot_id: String,
    },

    /// Stop a bot; its open deal is left for reconciliation
    Stop {
        /// Bot id
        bot_id: String,
    },

    /// Compute a bot's order ladder against the live ticker
    Preview {
        /// Bot id
        bot_id: String,
    },

    /// Reconcile one deal against exchange state
    Check {
        /// Deal id
        deal_id: String,

        /// Report discrepancies without repairing them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        Config::default()
    };
    config.init_logging();

    let api_key = std::env::var("BINANCE_API_KEY").ok();
    if api_key.is_none() {
        info!("BINANCE_API_KEY not set; exchange calls will be unauthenticated");
    }

    let app = App::new(config, api_key)?;

    match cli.command {
        Commands::Run => {
            info!("dcabot starting");
            app.run().await?;
            info!("dcabot stopped");
        }
        Commands::Add { definition } => {
            let content = std::fs::read_to_string(&definition)
                .with_context(|| format!("reading {}", definition.display()))?;
            let definition: BotDefinition =
                toml::from_str(&content).context("parsing bot definition")?;
            let bot = app.create_bot(definition).await?;
            println!("created bot {} ({})", bot.name, bot.id);
        }
        Commands::Start { bot_id } => {
            app.start_bot(&BotId::new(bot_id)).await?;
        }
        Commands::Stop { bot_id } => {
            app.stop_bot(&BotId::new(bot_id)).await?;
        }
        Commands::Preview { bot_id } => {
            let preview = app.preview_orders(&BotId::new(bot_id)).await?;
            println!(
                "{} orders, total cost {}, take-profit at {}",
                preview.order_count, preview.total_cost, preview.take_profit_price
            );
            let market = std::iter::once(&preview.ladder.base);
            let limits = preview
                .ladder
                .safety
                .iter()
                .chain(std::iter::once(&preview.ladder.take_profit));
            for spec in market.chain(limits) {
                let price = spec
                    .price
                    .map_or_else(|| "market".to_string(), |p| p.to_string());
                println!(
                    "  {:>13} {:>12} @ {}",
                    spec.order_type.as_str(),
                    spec.quantity,
                    price
                );
            }
        }
        Commands::Check { deal_id, dry_run } => {
            let report = app.check_deal(&DealId::new(deal_id), dry_run).await?;
            println!(
                "situation: {:?}, changed: {}",
                report.situation, report.changed
            );
            for action in &report.actions {
                println!("  {action:?}");
            }
        }
    }

    Ok(())
}
