use crate::config::MiningConfig;
use crate::core::{Block, Blockchain};
use crate::crypto::keys::PublicKey;
use crate::mining::difficulty::DifficultyTarget;
use crate::{ChainError, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Nonces tried between looks at the wall clock.
const SYNC_CHECK_STRIDE: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStats {
    pub is_mining: bool,
    pub hashrate: f64,
    pub total_hashes: u64,
    pub blocks_mined: u64,
    pub stale_restarts: u64,
    pub difficulty: u32,
    pub threads: usize,
    pub uptime_seconds: u64,
}

/// How a nonce search ended.
#[derive(Debug)]
enum SearchOutcome {
    Solved(Block),
    Stale,
    Exhausted,
    Cancelled,
}

/// Walks the nonce space of `block` from 0 until the hash meets `target`.
///
/// `cancel` is polled on every nonce. `on_tick` runs every
/// [`SYNC_CHECK_STRIDE`] nonces and abandons the search by returning true.
fn search(
    mut block: Block,
    target: DifficultyTarget,
    cancel: &AtomicBool,
    hash_counter: &AtomicU64,
    mut on_tick: impl FnMut(&Block) -> bool,
) -> SearchOutcome {
    let prefix = block.hash_prefix();
    let mut nonce: u32 = 0;
    let mut unflushed: u64 = 0;

    let outcome = loop {
        if cancel.load(Ordering::Relaxed) {
            break SearchOutcome::Cancelled;
        }

        let hash = Block::hash_with_nonce(&prefix, nonce);
        unflushed += 1;

        if target.is_met_by(&hash) {
            block.nonce = nonce;
            block.hash = hash;
            break SearchOutcome::Solved(block);
        }

        if nonce % SYNC_CHECK_STRIDE == SYNC_CHECK_STRIDE - 1 {
            hash_counter.fetch_add(unflushed, Ordering::Relaxed);
            unflushed = 0;
            if on_tick(&block) {
                break SearchOutcome::Stale;
            }
        }

        match nonce.checked_add(1) {
            Some(next) => nonce = next,
            None => break SearchOutcome::Exhausted,
        }
    };

    hash_counter.fetch_add(unflushed, Ordering::Relaxed);
    outcome
}

/// Solves `block` for `target` without looking at any chain.
///
/// Returns `None` when `cancel` is raised or no nonce works.
pub fn mine_block(block: Block, target: DifficultyTarget, cancel: &AtomicBool) -> Option<Block> {
    let hashes = AtomicU64::new(0);
    match search(block, target, cancel, &hashes, |_| false) {
        SearchOutcome::Solved(block) => Some(block),
        _ => None,
    }
}

/// State each worker shares with the engine.
#[derive(Clone)]
struct WorkerContext {
    blockchain: Arc<Blockchain>,
    addresses: Arc<Vec<PublicKey>>,
    sync_interval: Duration,
    shutdown: Arc<AtomicBool>,
    publish_lock: Arc<Mutex<()>>,
    hash_counter: Arc<AtomicU64>,
    blocks_mined: Arc<AtomicU64>,
    stale_restarts: Arc<AtomicU64>,
}

impl WorkerContext {
    fn run(self, worker_id: usize) {
        log::info!("⛏️  Mining worker {} started", worker_id);
        let target = self.blockchain.target();
        let mut rng = rand::thread_rng();

        while !self.shutdown.load(Ordering::Relaxed) {
            let Some(address) = self.addresses.choose(&mut rng).cloned() else {
                break;
            };
            let candidate = self.blockchain.assemble_candidate_block(address);
            let height = candidate.height;

            let mut last_sync = Instant::now();
            let outcome = search(candidate, target, &self.shutdown, &self.hash_counter, |block| {
                if last_sync.elapsed() < self.sync_interval {
                    return false;
                }
                last_sync = Instant::now();
                self.is_stale(block)
            });

            match outcome {
                SearchOutcome::Solved(block) => self.publish(block, worker_id),
                SearchOutcome::Stale => {
                    self.stale_restarts.fetch_add(1, Ordering::Relaxed);
                    log::debug!("🔄 Worker {} dropped stale candidate at height {}", worker_id, height);
                }
                SearchOutcome::Exhausted => {
                    log::debug!("🔄 Worker {} exhausted the nonce space at height {}", worker_id, height);
                }
                SearchOutcome::Cancelled => break,
            }
        }

        log::info!("⛏️  Mining worker {} stopped", worker_id);
    }

    /// A better parent or a richer pending set exists.
    fn is_stale(&self, candidate: &Block) -> bool {
        self.blockchain.current_height() >= candidate.height
            || self.blockchain.pending_tx_count() > candidate.transactions.len()
    }

    fn publish(&self, block: Block, worker_id: usize) {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.blockchain.process_block(&block) {
            self.blocks_mined.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "🎉 Block {} mined by worker {} at height {} (nonce {})",
                block.hash.short(),
                worker_id,
                block.height,
                block.nonce
            );
        } else {
            log::debug!("Worker {} lost the race for height {}", worker_id, block.height);
        }
    }
}

/// Parallel proof-of-work engine.
///
/// Every worker builds its own candidate and searches the whole nonce space
/// for it; workers only meet at the publish lock.
pub struct Miner {
    blockchain: Arc<Blockchain>,
    addresses: Arc<Vec<PublicKey>>,
    threads: usize,
    sync_interval: Duration,
    running: AtomicBool,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    publish_lock: Arc<Mutex<()>>,
    hash_counter: Arc<AtomicU64>,
    blocks_mined: Arc<AtomicU64>,
    stale_restarts: Arc<AtomicU64>,
    start_time: Instant,
}

impl Miner {
    pub fn new(blockchain: Arc<Blockchain>, reward_addresses: Vec<PublicKey>, config: &MiningConfig) -> Result<Self> {
        if reward_addresses.is_empty() {
            return Err(ChainError::Mining("At least one reward address is required".to_string()));
        }
        if config.threads == 0 {
            return Err(ChainError::Mining("At least one mining thread is required".to_string()));
        }

        Ok(Self {
            blockchain,
            addresses: Arc::new(reward_addresses),
            threads: config.threads,
            sync_interval: config.sync_interval(),
            running: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            publish_lock: Arc::new(Mutex::new(())),
            hash_counter: Arc::new(AtomicU64::new(0)),
            blocks_mined: Arc::new(AtomicU64::new(0)),
            stale_restarts: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        })
    }

    /// Lock that serializes every block submission into the chain, shared
    /// with anything else that publishes blocks.
    pub fn publish_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.publish_lock)
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            blockchain: Arc::clone(&self.blockchain),
            addresses: Arc::clone(&self.addresses),
            sync_interval: self.sync_interval,
            shutdown: Arc::clone(&self.shutdown),
            publish_lock: Arc::clone(&self.publish_lock),
            hash_counter: Arc::clone(&self.hash_counter),
            blocks_mined: Arc::clone(&self.blocks_mined),
            stale_restarts: Arc::clone(&self.stale_restarts),
        }
    }

    /// Runs the workers until [`Miner::stop`] is called, then waits for all
    /// of them to exit.
    pub async fn start(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ChainError::Mining("Mining already started".to_string()));
        }

        log::info!(
            "🚀 Starting miner with {} workers at difficulty {}",
            self.threads,
            self.blockchain.target().bits()
        );

        let handles: Vec<_> = (0..self.threads)
            .map(|worker_id| {
                let context = self.worker_context();
                tokio::task::spawn_blocking(move || context.run(worker_id))
            })
            .collect();

        // A stop() racing with this check leaves a permit behind.
        if !self.shutdown.load(Ordering::SeqCst) {
            self.shutdown_notify.notified().await;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Mining worker failed: {}", e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        log::info!("🛑 Miner stopped after {} blocks", self.blocks_mined.load(Ordering::Relaxed));
        Ok(())
    }

    /// Signals every worker to exit. Only the first call has an effect.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("🛑 Stopping miner");
        self.shutdown_notify.notify_one();
    }

    pub fn is_mining(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> MiningStats {
        let total_hashes = self.hash_counter.load(Ordering::Relaxed);
        let uptime = self.start_time.elapsed();
        let hashrate = if uptime.as_secs_f64() > 0.0 {
            total_hashes as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        MiningStats {
            is_mining: self.is_mining(),
            hashrate,
            total_hashes,
            blocks_mined: self.blocks_mined.load(Ordering::Relaxed),
            stale_restarts: self.stale_restarts.load(Ordering::Relaxed),
            difficulty: self.blockchain.target().bits(),
            threads: self.threads,
            uptime_seconds: uptime.as_secs(),
        }
    }

    pub fn estimate_time_to_block(&self) -> Option<Duration> {
        self.blockchain.target().estimate_time(self.stats().hashrate)
    }
}
