use crate::cli::node::Node;
use crate::config::Config;
use crate::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "powchaind")]
#[command(about = "Proof-of-work UTXO ledger node with a parallel miner")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Required leading zero bits of a block hash")]
    pub difficulty: Option<u32>,

    #[arg(long, global = true, help = "Number of mining workers")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: miner, transaction generator and peer inbox
    Start {
        #[arg(long, help = "Use the testnet preset instead of the config file")]
        testnet: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        #[arg(long, help = "Show the testnet preset")]
        testnet: bool,
    },
}

impl Cli {
    fn testnet(&self) -> bool {
        match self.command {
            Commands::Start { testnet } | Commands::Config { testnet } => testnet,
        }
    }

    /// Preset or file configuration with command line overrides applied.
    pub fn effective_config(&self) -> Result<Config> {
        let mut config = if self.testnet() {
            Config::testnet()
        } else {
            let path = self.config.clone().unwrap_or_else(Config::default_path);
            Config::load(&path)?
        };

        if let Some(difficulty) = self.difficulty {
            config.consensus.difficulty = difficulty;
        }
        if let Some(threads) = self.threads {
            config.mining.threads = threads;
        }

        config.validate()?;
        Ok(config)
    }
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging once
    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let config = cli.effective_config()?;

    match cli.command {
        Commands::Start { .. } => start_node(config).await,
        Commands::Config { .. } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn start_node(config: Config) -> Result<()> {
    println!("🚀 Starting powchain node...");
    println!(
        "⛏️  Difficulty {} bits, {} mining workers, {} keys",
        config.consensus.difficulty, config.mining.threads, config.node.num_keys
    );

    let node = Node::new(config)?;

    node.run(async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
        }
    })
    .await?;

    println!("✅ Node stopped.");
    Ok(())
}
