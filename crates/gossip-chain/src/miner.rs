//! CPU miner thread.
//!
//! The miner runs in its own thread and hashes random nonces over a
//! snapshot of the pending set. The chain lock is only taken to commit a
//! candidate, at which point the fields are re-snapshotted and the
//! proof-of-work re-verified. Mined blocks are handed back to the node over
//! a channel for broadcasting.
//!
//! Pacing: after the first block past genesis the miner pauses
//! `FIRST_BLOCK_DELAY`, after later blocks twice the measured mining
//! duration. The pause deliberately slows publication so that concurrent
//! miners fork.

use crate::tree::Blockchain;
use crate::{FIRST_BLOCK_DELAY, MINER_IDLE_SLEEP};
use gossip_proto::Block;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Handle to the mining thread.
pub struct Miner {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Miner {
    /// Spawn the mining thread. Mined blocks are sent on `block_tx`.
    pub fn spawn(chain: Arc<Blockchain>, block_tx: mpsc::Sender<Block>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || {
                Self::mining_loop(chain, block_tx, running_clone);
            })
            .expect("failed to spawn miner thread");

        info!("Miner thread spawned");

        Self {
            handle: Some(handle),
            running,
        }
    }

    fn mining_loop(
        chain: Arc<Blockchain>,
        block_tx: mpsc::Sender<Block>,
        running: Arc<AtomicBool>,
    ) {
        let mut rng = rand::thread_rng();

        'outer: while running.load(Ordering::Relaxed) {
            let started = Instant::now();
            let mut idle = Duration::ZERO;
            let mut attempts: u64 = 0;

            // Search nonces until one commits.
            let (block, depth) = loop {
                if !running.load(Ordering::Relaxed) {
                    break 'outer;
                }

                let Some((prev_hash, transactions)) = chain.mining_snapshot() else {
                    idle += MINER_IDLE_SLEEP;
                    thread::sleep(MINER_IDLE_SLEEP);
                    continue;
                };

                let mut nonce = [0u8; 32];
                rng.fill_bytes(&mut nonce);
                let candidate = Block {
                    prev_hash,
                    nonce,
                    transactions,
                };
                attempts += 1;
                if !candidate.pow_ok() {
                    continue;
                }

                // The candidate was valid against a snapshot; commit
                // re-validates against the live tail and pending set.
                match chain.commit_mined(nonce) {
                    Some(committed) => break committed,
                    None => {
                        debug!("Candidate invalidated before commit, resuming search");
                        continue;
                    }
                }
            };

            let mining_time = started.elapsed().saturating_sub(idle);
            info!(
                depth,
                attempts,
                secs = mining_time.as_secs_f64(),
                "Mined a block"
            );

            if block_tx.blocking_send(block).is_err() {
                // Node is gone, stop mining.
                break;
            }

            let pause = if depth == 1 {
                FIRST_BLOCK_DELAY
            } else {
                2 * mining_time
            };
            Self::interruptible_sleep(&running, pause);
        }

        info!("Miner thread stopped");
    }

    fn interruptible_sleep(running: &AtomicBool, total: Duration) {
        let step = Duration::from_millis(100);
        let deadline = Instant::now() + total;
        while running.load(Ordering::Relaxed) && Instant::now() < deadline {
            thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    /// Ask the miner to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Stop and wait for the thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}
