use crate::config::Config;
use crate::core::transaction::format_amount;
use crate::core::{Amount, Blockchain, ChainParams, Transaction, TxInput, TxOutput};
use crate::crypto::keys::KeyRing;
use crate::mining::Miner;
use crate::network::{Envelope, PeerInbox, ProtocolHandler};
use crate::{ChainError, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Keeps the pending pool busy by moving coins between the node's own keys.
pub struct TxGenerator {
    blockchain: Arc<Blockchain>,
    keys: Arc<KeyRing>,
    max_fee: Amount,
    interval: Duration,
}

impl TxGenerator {
    pub fn new(blockchain: Arc<Blockchain>, keys: Arc<KeyRing>, max_fee: Amount, interval: Duration) -> Self {
        Self {
            blockchain,
            keys,
            max_fee,
            interval,
        }
    }

    /// Spends a random unspent output of the working pool to a random key.
    /// `Ok(None)` when there is nothing to spend.
    pub fn generate_once(&self) -> Result<Option<Transaction>> {
        let pool = self.blockchain.working_pool();
        let Some((outpoint, spent)) = pool.pick_random_unspent() else {
            return Ok(None);
        };

        let signer = self.keys.find(&spent.address).ok_or_else(|| {
            ChainError::Transaction(format!("No key for the owner of {}", outpoint))
        })?;
        let recipient = self
            .keys
            .random()
            .ok_or_else(|| ChainError::Transaction("Key ring is empty".to_string()))?;

        let fee = rand::thread_rng().gen_range(0..=self.max_fee.min(spent.value));
        let tx = Transaction::new(
            TxInput::new(outpoint.txid, outpoint.vout),
            TxOutput::new(spent.value - fee, recipient.public_key.clone()),
            signer,
        );

        self.blockchain.try_process_tx(&tx)?;
        log::info!(
            "💸 New transaction {} moves {} to {} (fee {})",
            tx.hash.short(),
            format_amount(spent.value - fee),
            recipient.address(),
            format_amount(fee)
        );
        log::debug!("{}", tx);

        Ok(Some(tx))
    }

    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.generate_once() {
                        log::debug!("Transaction generation skipped: {}", e);
                    }
                }
            }
        }
    }
}

/// A single node: one chain, its miner, the transaction generator and the
/// peer inbox.
pub struct Node {
    config: Config,
    keys: Arc<KeyRing>,
    blockchain: Arc<Blockchain>,
    miner: Arc<Miner>,
}

impl Node {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let keys = Arc::new(KeyRing::generate(config.node.num_keys)?);
        let genesis_key = keys
            .random()
            .ok_or_else(|| ChainError::Config("Key ring is empty".to_string()))?;

        let blockchain = Arc::new(Blockchain::new(
            ChainParams::from(&config.consensus),
            genesis_key.public_key.clone(),
        )?);
        log::info!("{}", blockchain.chain_info());

        let miner = Arc::new(Miner::new(Arc::clone(&blockchain), keys.public_keys(), &config.mining)?);

        Ok(Self {
            config,
            keys,
            blockchain,
            miner,
        })
    }

    pub fn blockchain(&self) -> Arc<Blockchain> {
        Arc::clone(&self.blockchain)
    }

    pub fn miner(&self) -> Arc<Miner> {
        Arc::clone(&self.miner)
    }

    /// Runs every service until `shutdown` resolves, then stops them all and
    /// waits for them.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);

        let miner = Arc::clone(&self.miner);
        let mining_handle = tokio::spawn(async move { miner.start().await });

        let generator = TxGenerator::new(
            Arc::clone(&self.blockchain),
            Arc::clone(&self.keys),
            self.config.node.max_tx_fee,
            self.config.node.tx_interval(),
        );
        let generator_handle = tokio::spawn(generator.run(stopped(stop_rx.clone())));

        let handler = ProtocolHandler::new(Arc::clone(&self.blockchain), self.miner.publish_lock());
        let (inbox, peers): (PeerInbox, mpsc::Sender<Envelope>) = PeerInbox::new(handler, self.config.node.peer_queue);
        let inbox_handle = tokio::spawn(inbox.run(stopped(stop_rx.clone())));

        let status_handle = tokio::spawn(Self::report_status(
            Arc::clone(&self.blockchain),
            Arc::clone(&self.miner),
            stopped(stop_rx),
        ));

        log::info!("✅ Node started with {} keys", self.keys.len());

        shutdown.await;
        log::info!("🛑 Shutting down node...");

        self.miner.stop();
        let _ = stop_tx.send(true);
        drop(peers);

        match mining_handle.await {
            Ok(result) => result?,
            Err(e) => log::error!("Miner task failed: {}", e),
        }
        if let Err(e) = generator_handle.await {
            log::error!("Transaction generator failed: {}", e);
        }
        match inbox_handle.await {
            Ok(stats) => log::info!("📬 Peer inbox handled {} messages", stats.messages_received),
            Err(e) => log::error!("Peer inbox failed: {}", e),
        }
        let _ = status_handle.await;

        log::info!("{}", self.blockchain.chain_info());
        log::info!("✅ Node stopped gracefully");
        Ok(())
    }

    async fn report_status(blockchain: Arc<Blockchain>, miner: Arc<Miner>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = interval(STATUS_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let tip = blockchain.tip();
                    let stats = miner.stats();
                    let eta = miner
                        .estimate_time_to_block()
                        .map(|eta| format!("{:.1}s", eta.as_secs_f64()))
                        .unwrap_or_else(|| "unknown".to_string());
                    log::info!(
                        "📊 Height {} ({}), pending {}, {:.2} H/s, {} blocks mined, next block in ~{}",
                        tip.height,
                        tip.hash.short(),
                        blockchain.pending_tx_count(),
                        stats.hashrate,
                        stats.blocks_mined,
                        eta
                    );
                }
            }
        }
    }
}
