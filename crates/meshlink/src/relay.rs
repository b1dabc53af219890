//! Flood relay
//!
//! Every message this node completes (and did not originate) is passed on
//! to all known peers except the neighbour it came from. The seen cache
//! stops the flood: an id relayed once is never relayed again while its
//! entry lives, and ids this node sent itself are in the cache from the
//! start.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::cache::{SeenCache, SeenReason};
use crate::codec::WireCodec;
use crate::frame;
use crate::peers::{PeerDirectory, PeerNode};
use crate::reassembly::CompletedMessage;
use crate::transport::Transport;

/// A completed message waiting to be relayed
#[derive(Debug, Clone)]
pub struct RelayJob {
    /// The message
    pub message: CompletedMessage,
    /// Neighbour it arrived from, excluded from the relay
    pub sender: Option<String>,
}

/// What a relay attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The id was already seen; nothing was sent
    Suppressed,
    /// Frames were handed to the transport
    Relayed {
        /// Frames per peer
        frames: usize,
        /// Peers targeted
        peers: usize,
        /// Unicasts that failed
        failed: usize,
    },
}

/// Relay counters
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Messages relayed
    pub relayed: u64,
    /// Messages suppressed as already seen
    pub suppressed: u64,
    /// Frames unicast successfully
    pub frames_sent: u64,
    /// Frames the transport refused
    pub send_failures: u64,
}

/// Re-sends completed messages to the rest of the mesh
#[derive(Debug)]
pub struct ForwardingRelay {
    seen: SeenCache,
    codec: Arc<dyn WireCodec>,
    max_part_len: usize,
    stats: Mutex<RelayStats>,
}

impl ForwardingRelay {
    /// Create a relay sharing `seen` with the sending path
    pub fn new(seen: SeenCache, codec: Arc<dyn WireCodec>, max_part_len: usize) -> Self {
        Self {
            seen,
            codec,
            max_part_len,
            stats: Mutex::new(RelayStats::default()),
        }
    }

    /// The seen-id cache
    pub fn seen(&self) -> &SeenCache {
        &self.seen
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> RelayStats {
        self.stats.lock().clone()
    }

    /// Relay one message to every known peer except `from`
    pub async fn relay<T>(
        &self,
        transport: &T,
        peers: &PeerDirectory,
        message: &CompletedMessage,
        from: Option<&str>,
    ) -> RelayOutcome
    where
        T: Transport + ?Sized,
    {
        if self.seen.check_and_mark(&message.message_id, SeenReason::Relayed) {
            debug!(message_id = %message.message_id, "Suppressing relay of seen message");
            self.stats.lock().suppressed += 1;
            return RelayOutcome::Suppressed;
        }

        // A relayed message keeps its id and origin; the size limit was
        // enforced by whoever sent it first
        let encoded: Vec<Bytes> = match frame::split(
            &message.message_id,
            &message.origin_node_id,
            &message.text,
            self.max_part_len,
            usize::MAX,
        ) {
            Ok(frames) => frames.iter().map(|f| self.codec.encode(f)).collect(),
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Cannot re-split message for relay");
                return RelayOutcome::Relayed {
                    frames: 0,
                    peers: 0,
                    failed: 0,
                };
            }
        };

        let snapshot = peers.snapshot();
        let targets: Vec<&PeerNode> = snapshot
            .iter()
            .filter(|peer| Some(peer.node_id.as_str()) != from)
            .collect();

        let mut failed = 0;
        for peer in &targets {
            for (part_index, data) in encoded.iter().enumerate() {
                match transport.unicast(peer, data.clone()).await {
                    Ok(()) => trace!(
                        message_id = %message.message_id,
                        part_index,
                        peer = %peer.node_id,
                        "Relayed frame"
                    ),
                    Err(e) => {
                        warn!(
                            message_id = %message.message_id,
                            part_index,
                            peer = %peer.node_id,
                            error = %e,
                            "Relay send failed"
                        );
                        failed += 1;
                    }
                }
            }
        }

        let attempted = encoded.len() * targets.len();
        {
            let mut stats = self.stats.lock();
            stats.relayed += 1;
            stats.frames_sent += (attempted - failed) as u64;
            stats.send_failures += failed as u64;
        }

        debug!(
            message_id = %message.message_id,
            origin = %message.origin_node_id,
            peers = targets.len(),
            frames = encoded.len(),
            failed,
            "Relayed message"
        );

        RelayOutcome::Relayed {
            frames: encoded.len(),
            peers: targets.len(),
            failed,
        }
    }

    /// Process relay jobs until `closed` turns true or the job channel closes
    pub async fn run<T>(
        self: Arc<Self>,
        transport: Arc<T>,
        peers: Arc<PeerDirectory>,
        mut jobs: mpsc::Receiver<RelayJob>,
        mut closed: watch::Receiver<bool>,
    ) where
        T: Transport + ?Sized,
    {
        debug!("Relay worker started");

        loop {
            if *closed.borrow() {
                break;
            }

            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => {
                        self.relay(transport.as_ref(), &peers, &job.message, job.sender.as_deref())
                            .await;
                    }
                    None => break,
                },
                _ = closed.changed() => break,
            }
        }

        debug!("Relay worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{codec_for, DelimitedCodec};
    use crate::config::WireFormat;
    use crate::frame::MessageId;
    use crate::test_utils::MockTransport;

    fn completed(id: &str, text: &str) -> CompletedMessage {
        CompletedMessage {
            message_id: MessageId::new(id).unwrap(),
            origin_node_id: "ORIGIN".to_string(),
            text: text.to_string(),
        }
    }

    async fn setup(peers: &[&str]) -> (MockTransport, PeerDirectory, ForwardingRelay) {
        let mock = MockTransport::new("LOCAL");
        let (tx, _rx) = mpsc::channel(8);
        mock.open(tx).await.unwrap();

        let dir = PeerDirectory::new();
        dir.replace(peers.iter().map(|id| PeerNode::new(*id, "addr")).collect());

        let relay = ForwardingRelay::new(SeenCache::new(), codec_for(WireFormat::Delimited), 10);
        (mock, dir, relay)
    }

    #[tokio::test]
    async fn test_relay_excludes_sender() {
        let (mock, dir, relay) = setup(&["A", "B", "C"]).await;
        let message = completed("rel", "twenty-five characters!!!");

        let outcome = relay.relay(&mock, &dir, &message, Some("B")).await;
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                frames: 3,
                peers: 2,
                failed: 0
            }
        );

        let unicasts = mock.unicasts();
        assert_eq!(unicasts.len(), 6);
        assert!(unicasts.iter().all(|(peer, _)| peer != "B"));
    }

    #[tokio::test]
    async fn test_relayed_frames_keep_id_and_origin() {
        let (mock, dir, relay) = setup(&["A"]).await;
        relay.relay(&mock, &dir, &completed("kep", "hello"), None).await;

        let (_, data) = &mock.unicasts()[0];
        let frame = DelimitedCodec.decode(data).unwrap();
        assert_eq!(frame.message_id.as_str(), "kep");
        assert_eq!(frame.origin_node_id, "ORIGIN");
        assert!(frame.is_last);
    }

    #[tokio::test]
    async fn test_same_message_relayed_at_most_once() {
        let (mock, dir, relay) = setup(&["A", "B"]).await;
        let message = completed("twice", "flood");

        relay.relay(&mock, &dir, &message, None).await;
        let second = relay.relay(&mock, &dir, &message, None).await;

        assert_eq!(second, RelayOutcome::Suppressed);
        assert_eq!(mock.unicasts().len(), 2);
        assert_eq!(relay.stats().relayed, 1);
        assert_eq!(relay.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn test_own_message_is_never_relayed() {
        let (mock, dir, relay) = setup(&["A"]).await;
        let message = completed("mine", "echo");
        relay.seen().mark_seen(&message.message_id, SeenReason::Sent);

        assert_eq!(
            relay.relay(&mock, &dir, &message, Some("A")).await,
            RelayOutcome::Suppressed
        );
        assert!(mock.unicasts().is_empty());
    }

    #[tokio::test]
    async fn test_send_errors_are_counted_not_retried() {
        let (mock, dir, relay) = setup(&["A", "B"]).await;
        mock.fail_sends_at([0]);

        let outcome = relay.relay(&mock, &dir, &completed("err", "short"), None).await;
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                frames: 1,
                peers: 2,
                failed: 1
            }
        );
        assert_eq!(mock.unicasts().len(), 1);
        assert_eq!(relay.stats().send_failures, 1);
    }

    #[tokio::test]
    async fn test_worker_processes_jobs_until_closed() {
        let (mock, dir, relay) = setup(&["A"]).await;
        let relay = Arc::new(relay);
        let (job_tx, job_rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&relay).run(
            Arc::new(mock.clone()),
            Arc::new(dir),
            job_rx,
            closed_rx,
        ));

        job_tx
            .send(RelayJob {
                message: completed("job", "queued"),
                sender: None,
            })
            .await
            .unwrap();

        while relay.stats().relayed == 0 {
            tokio::task::yield_now().await;
        }
        closed_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(mock.unicasts().len(), 1);
    }
}
