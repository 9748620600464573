//! Site-side sync agent: pull buffered scans, verify, hand off, confirm.
//!
//! The relay marks scans delivered as soon as they are pulled. The agent
//! only confirms scans that passed checksum verification and were accepted
//! by the local sink, so anything else is handed out again once the relay's
//! redelivery window has elapsed.

use crate::checksum::ChecksumMismatch;
use crate::client::EckwmsClient;
use crate::error::ClientError;
use crate::models::{effective_pull_limit, PullRequest, PulledScan};
use crate::Result;
use std::time::Duration;
use uuid::Uuid;

/// Destination for verified scans on the site side.
pub trait ScanSink {
    /// Persist or process one scan. An `Err` leaves the scan unconfirmed.
    fn accept(&mut self, scan: &PulledScan) -> std::result::Result<(), String>;
}

/// Outcome of one pull/confirm round.
#[derive(Debug, Default)]
pub struct SyncRound {
    pub received: usize,
    pub accepted: Vec<Uuid>,
    pub corrupted: Vec<ChecksumMismatch>,
    pub rejected: Vec<(Uuid, String)>,
    pub confirmed: u64,
}

/// Exponential backoff for retryable failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt. Doubles up to the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Drives pull/confirm rounds against the relay.
pub struct SyncAgent {
    client: EckwmsClient,
    pull: PullRequest,
}

impl SyncAgent {
    pub fn new(client: EckwmsClient, pull: PullRequest) -> Self {
        Self { client, pull }
    }

    /// Run a single round: pull, verify, hand off, confirm accepted scans.
    pub async fn sync_once<S: ScanSink>(&self, sink: &mut S) -> Result<SyncRound> {
        let response = self.client.pull(&self.pull).await?;
        let mut round = process_batch(&response.scans, sink);

        if !round.accepted.is_empty() {
            let confirmed = self.client.confirm(&round.accepted).await?;
            round.confirmed = confirmed.confirmed_count;
        }

        tracing::info!(
            received = round.received,
            accepted = round.accepted.len(),
            corrupted = round.corrupted.len(),
            rejected = round.rejected.len(),
            confirmed = round.confirmed,
            "Sync round completed"
        );
        Ok(round)
    }

    /// Largest batch the relay will return for this agent's pull request.
    pub fn batch_size(&self) -> usize {
        effective_pull_limit(self.pull.limit) as usize
    }

    /// Loop until a non-retryable error occurs, which is returned.
    ///
    /// Full batches are drained back to back; otherwise the agent waits
    /// `idle_interval` between rounds.
    pub async fn run<S: ScanSink>(&self, sink: &mut S, idle_interval: Duration) -> ClientError {
        let batch = self.batch_size();
        let mut backoff = Backoff::default();

        loop {
            match self.sync_once(sink).await {
                Ok(round) => {
                    backoff.reset();
                    if round.received < batch {
                        tokio::time::sleep(idle_interval).await;
                    }
                }
                Err(e) if e.is_retryable() => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Sync failed, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return e,
            }
        }
    }
}

/// Verify and hand off a pulled batch. Returns which scans may be confirmed.
pub fn process_batch<S: ScanSink>(scans: &[PulledScan], sink: &mut S) -> SyncRound {
    let mut round = SyncRound {
        received: scans.len(),
        ..SyncRound::default()
    };

    for scan in scans {
        if let Some(mismatch) =
            ChecksumMismatch::check(scan.scan_id, scan.payload.as_bytes(), &scan.checksum)
        {
            tracing::warn!(
                scan_id = %mismatch.scan_id,
                expected = %mismatch.expected,
                actual = %mismatch.actual,
                "Checksum mismatch, leaving scan unconfirmed"
            );
            round.corrupted.push(mismatch);
            continue;
        }

        match sink.accept(scan) {
            Ok(()) => round.accepted.push(scan.scan_id),
            Err(reason) => {
                tracing::warn!(scan_id = %scan.scan_id, "Sink rejected scan: {}", reason);
                round.rejected.push((scan.scan_id, reason));
            }
        }
    }

    round
}
