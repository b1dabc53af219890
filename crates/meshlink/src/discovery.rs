//! Periodic neighbour discovery
//!
//! Each cycle asks the transport for a discovery run and waits for its
//! outcome. A successful run replaces the peer directory wholesale; a failed
//! or silent one leaves it as it was. Cycles repeat on a fixed pause until
//! the session closes. Every `refresh_every` the loop also makes the next
//! cycle clear the transport's known peers, so nodes that left the mesh drop
//! out of the directory even when the transport reports a cumulative list.
//!
//! ```text
//! Idle -> Discovering -> Succeeded -> Discovering -> ...
//!                     \-> Failed
//! ```
//!
//! The terminal phase of a cycle stays visible until the next one starts.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::peers::{PeerDirectory, PeerNode};
use crate::transport::Transport;

/// Result of one transport discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Whether the run completed normally
    pub success: bool,
    /// Peers found
    pub peers: Vec<PeerNode>,
}

/// Where the discovery loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPhase {
    /// No cycle has run yet, or the loop has stopped
    Idle,
    /// A cycle is running
    Discovering,
    /// The last cycle replaced the peer set
    Succeeded,
    /// The last cycle failed; the peer set is unchanged
    Failed,
}

impl std::fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryPhase::Idle => write!(f, "idle"),
            DiscoveryPhase::Discovering => write!(f, "discovering"),
            DiscoveryPhase::Succeeded => write!(f, "succeeded"),
            DiscoveryPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Observable discovery state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryState {
    /// Current phase
    pub phase: DiscoveryPhase,
    /// Timeout the next cycle will use
    pub timeout: Duration,
    /// Whether the most recent cycle succeeded
    pub last_cycle_succeeded: bool,
    /// Whether the next cycle clears the transport's peer cache first
    pub refresh_requested: bool,
    /// Cycles started
    pub cycles: u64,
    /// Cycles that replaced the peer set
    pub successes: u64,
    /// Cycles that failed or timed out
    pub failures: u64,
}

#[derive(Debug)]
struct Progress {
    phase: DiscoveryPhase,
    ever_succeeded: bool,
    last_cycle_succeeded: bool,
    cycles: u64,
    successes: u64,
    failures: u64,
}

/// Drives discovery cycles against a transport
#[derive(Debug)]
pub struct DiscoveryManager {
    config: DiscoveryConfig,
    peers: Arc<PeerDirectory>,
    refresh_requested: AtomicBool,
    progress: Mutex<Progress>,
}

impl DiscoveryManager {
    /// Create a manager that writes into `peers`
    pub fn new(config: DiscoveryConfig, peers: Arc<PeerDirectory>) -> Self {
        Self {
            config,
            peers,
            refresh_requested: AtomicBool::new(false),
            progress: Mutex::new(Progress {
                phase: DiscoveryPhase::Idle,
                ever_succeeded: false,
                last_cycle_succeeded: false,
                cycles: 0,
                successes: 0,
                failures: 0,
            }),
        }
    }

    /// Make the next cycle clear the transport's known peers first
    pub fn request_refresh(&self) {
        self.refresh_requested.store(true, Ordering::SeqCst);
        debug!("Peer refresh requested");
    }

    /// Timeout for the next cycle
    pub fn current_timeout(&self) -> Duration {
        if self.progress.lock().ever_succeeded {
            self.config.steady_timeout
        } else {
            self.config.initial_timeout
        }
    }

    /// Snapshot of the discovery state
    pub fn state(&self) -> DiscoveryState {
        let timeout = self.current_timeout();
        let progress = self.progress.lock();
        DiscoveryState {
            phase: progress.phase,
            timeout,
            last_cycle_succeeded: progress.last_cycle_succeeded,
            refresh_requested: self.refresh_requested.load(Ordering::SeqCst),
            cycles: progress.cycles,
            successes: progress.successes,
            failures: progress.failures,
        }
    }

    /// Run one discovery cycle, returning whether it succeeded
    pub async fn run_cycle<T>(
        &self,
        transport: &T,
        outcomes: &mut mpsc::Receiver<DiscoveryOutcome>,
    ) -> bool
    where
        T: Transport + ?Sized,
    {
        // An outcome left over from a timed-out cycle belongs to that cycle
        while outcomes.try_recv().is_ok() {
            debug!("Discarding late discovery outcome");
        }

        let timeout = self.current_timeout();
        {
            let mut progress = self.progress.lock();
            progress.phase = DiscoveryPhase::Discovering;
            progress.cycles += 1;
        }

        if let Err(e) = transport.set_discovery_timeout(timeout).await {
            warn!(error = %e, "Failed to set discovery timeout");
        }

        if self.refresh_requested.swap(false, Ordering::SeqCst) {
            debug!("Clearing known peers before discovery");
            if let Err(e) = transport.clear_known_peers().await {
                warn!(error = %e, "Failed to clear known peers, retrying next cycle");
                self.refresh_requested.store(true, Ordering::SeqCst);
            }
        }

        let outcome = match transport.start_discovery().await {
            Ok(()) => {
                match tokio::time::timeout(timeout + self.config.grace, outcomes.recv()).await {
                    Ok(Some(outcome)) => Some(outcome),
                    Ok(None) => {
                        warn!("Discovery outcome channel closed");
                        None
                    }
                    Err(_) => {
                        warn!(timeout = ?timeout, "Discovery timed out");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to start discovery");
                None
            }
        };

        match outcome {
            Some(DiscoveryOutcome {
                success: true,
                peers,
            }) => {
                let count = peers.len();
                self.peers.replace(peers);
                self.finish(true);
                info!(peers = count, "Discovery succeeded");
                true
            }
            Some(_) => {
                warn!("Discovery reported failure, keeping previous peers");
                self.finish(false);
                false
            }
            None => {
                self.finish(false);
                false
            }
        }
    }

    /// Run cycles until `closed` turns true
    pub async fn run<T>(
        self: Arc<Self>,
        transport: Arc<T>,
        mut outcomes: mpsc::Receiver<DiscoveryOutcome>,
        mut closed: watch::Receiver<bool>,
    ) where
        T: Transport + ?Sized,
    {
        debug!(
            interval = ?self.config.interval,
            refresh_every = ?self.config.refresh_every,
            "Discovery loop started"
        );
        let mut last_refresh = Instant::now();

        loop {
            if *closed.borrow() {
                break;
            }

            let period = self.config.refresh_every;
            if !period.is_zero() && last_refresh.elapsed() >= period {
                debug!("Refresh period elapsed, forcing re-enumeration");
                self.request_refresh();
                last_refresh = Instant::now();
            }

            tokio::select! {
                _ = self.run_cycle(transport.as_ref(), &mut outcomes) => {}
                _ = closed.changed() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = closed.changed() => break,
            }
        }

        self.progress.lock().phase = DiscoveryPhase::Idle;
        debug!("Discovery loop stopped");
    }

    fn finish(&self, success: bool) {
        let mut progress = self.progress.lock();
        progress.last_cycle_succeeded = success;
        if success {
            progress.ever_succeeded = true;
            progress.successes += 1;
            progress.phase = DiscoveryPhase::Succeeded;
        } else {
            progress.failures += 1;
            progress.phase = DiscoveryPhase::Failed;
        }
    }
}
