//! Shard discovery and per-shard polling.
//!
//! [`ShardConsumer::setup`] runs inside stream creation so that an unreachable
//! or inactive source fails the create call. [`ShardConsumer::run`] then owns
//! one poller per shard until the stream is cancelled or every shard closes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sluice_core::emit;
use sluice_core::metrics::events::{ShardPollFailed, ShardRecordsRead};

use super::{STREAM_ACTIVE, ShardSourceRef};
use crate::arn::StreamArn;
use crate::error::FirehoseError;
use crate::pipeline::Record;

/// Pause between polls of one shard, and after a failed poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Iterator position of one shard.
#[derive(Debug, Clone)]
struct ShardCursor {
    shard_id: String,
    iterator: String,
}

/// Readers for every shard of one source stream.
pub struct ShardConsumer {
    source: ShardSourceRef,
    stream: StreamArn,
    cursors: Vec<ShardCursor>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ShardConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConsumer")
            .field("stream", &self.stream.to_string())
            .field("shards", &self.cursors.len())
            .finish_non_exhaustive()
    }
}

impl ShardConsumer {
    /// Resolve the stream and position an iterator at the start of each shard.
    ///
    /// A missing source means no endpoint was configured.
    pub async fn setup(
        stream_arn: &str,
        source: Option<ShardSourceRef>,
        poll_interval: Duration,
    ) -> Result<Self, FirehoseError> {
        let stream: StreamArn = stream_arn
            .parse()
            .map_err(|_| FirehoseError::invalid("invalid StreamARN"))?;
        let source = source.ok_or_else(|| {
            FirehoseError::invalid("Kinesis endpoint is not configured")
        })?;

        let description = source.describe_stream(&stream.name).await.map_err(|e| {
            warn!(stream = %stream.name, error = %e, "Failed to describe stream");
            FirehoseError::unavailable("unable to connect Kinesis Streams")
        })?;
        if description.status != STREAM_ACTIVE {
            return Err(FirehoseError::unavailable(format!(
                "stream status is {}",
                description.status
            )));
        }

        let mut cursors = Vec::with_capacity(description.shard_ids.len());
        for shard_id in description.shard_ids {
            let iterator = source
                .get_shard_iterator(&stream.name, &shard_id)
                .await
                .map_err(|e| {
                    warn!(
                        stream = %stream.name,
                        shard_id = %shard_id,
                        error = %e,
                        "Failed to get shard iterator"
                    );
                    FirehoseError::unavailable("failed to get shard iterator")
                })?;
            cursors.push(ShardCursor { shard_id, iterator });
        }

        debug!(stream = %stream.name, shards = cursors.len(), "Shard iterators acquired");
        Ok(Self {
            source,
            stream,
            cursors,
            poll_interval,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.cursors.len()
    }

    /// Poll every shard into `intake` until cancelled or all shards close.
    pub async fn run(self, token: CancellationToken, intake: mpsc::Sender<Record>, target: String) {
        info!(
            target = %target,
            stream = %self.stream.name,
            shards = self.cursors.len(),
            "Shard consumer started"
        );

        let mut pollers = JoinSet::new();
        for cursor in self.cursors {
            pollers.spawn(poll_shard(
                self.source.clone(),
                cursor,
                self.poll_interval,
                token.clone(),
                intake.clone(),
                target.clone(),
            ));
        }
        drop(intake);

        while let Some(joined) = pollers.join_next().await {
            if let Err(e) = joined {
                warn!(target = %target, error = %e, "Shard poller failed");
            }
        }

        info!(target = %target, "Shard consumer stopped");
    }
}

/// Poll one shard, forwarding records in order.
async fn poll_shard(
    source: ShardSourceRef,
    mut cursor: ShardCursor,
    poll_interval: Duration,
    token: CancellationToken,
    intake: mpsc::Sender<Record>,
    target: String,
) {
    loop {
        let Some(result) = token
            .run_until_cancelled(source.get_records(&cursor.iterator))
            .await
        else {
            trace!(target = %target, shard_id = %cursor.shard_id, "Poller cancelled");
            return;
        };

        match result {
            Ok(batch) => {
                if batch.skipped > 0 {
                    warn!(
                        target = %target,
                        shard_id = %cursor.shard_id,
                        skipped = batch.skipped,
                        "Dropped undecodable records"
                    );
                    emit!(ShardPollFailed {
                        stream: target.clone(),
                    });
                }
                if !batch.records.is_empty() {
                    emit!(ShardRecordsRead {
                        count: batch.records.len() as u64,
                        stream: target.clone(),
                    });
                }
                for payload in batch.records {
                    // Blocks on a full intake; cancellation still wins.
                    match token.run_until_cancelled(intake.send(Record::new(payload))).await {
                        Some(Ok(())) => {}
                        Some(Err(_)) => {
                            debug!(target = %target, shard_id = %cursor.shard_id, "Intake closed");
                            return;
                        }
                        None => return,
                    }
                }

                match batch.next_iterator {
                    Some(next) => cursor.iterator = next,
                    None => {
                        info!(target = %target, shard_id = %cursor.shard_id, "Shard exhausted");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(
                    target = %target,
                    shard_id = %cursor.shard_id,
                    error = %e,
                    "Failed to read shard"
                );
                emit!(ShardPollFailed {
                    stream: target.clone(),
                });
            }
        }

        if token
            .run_until_cancelled(tokio::time::sleep(poll_interval))
            .await
            .is_none()
        {
            return;
        }
    }
}
