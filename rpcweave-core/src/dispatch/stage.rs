//! Concurrent stage primitive.
//!
//! A stage reads items from a source stream and runs one task per item with
//! no concurrency bound. Task outputs are forwarded to a sink either as they
//! complete, or resequenced into arrival order.
//!
//! Every task reports `(sequence, Option<output>)` to a single collector.
//! In ordered mode the collector parks early completions in a
//! [`Resequencer`] until every earlier sequence number has reported, so a
//! slow item holds back later ones but never blocks their execution.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Order in which a stage emits outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageOrdering {
    /// Outputs follow input acceptance order.
    Ordered,
    /// Outputs follow completion order.
    #[default]
    Completion,
}

/// Buffer that releases items in sequence-number order.
///
/// Slots may be empty (`None`): they advance the sequence without producing
/// an item, which is how items with no output are skipped.
#[derive(Debug)]
pub struct Resequencer<T> {
    next: u64,
    pending: BTreeMap<u64, Option<T>>,
}

impl<T> Default for Resequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Resequencer<T> {
    /// Create a resequencer expecting sequence number 0 first.
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Record the outcome for `seq`. Numbers already released are ignored.
    pub fn push(&mut self, seq: u64, item: Option<T>) {
        if seq >= self.next {
            self.pending.insert(seq, item);
        }
    }

    /// Release the next item if every earlier slot has been filled.
    pub fn pop_ready(&mut self) -> Option<T> {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next {
                return None;
            }
            self.next += 1;
            if let Some(item) = entry.remove() {
                return Some(item);
            }
        }
        None
    }

    /// Number of outcomes parked behind a missing sequence number.
    pub fn parked(&self) -> usize {
        self.pending.len()
    }

    /// The sequence number the resequencer is waiting for.
    pub fn next_sequence(&self) -> u64 {
        self.next
    }
}

/// Spawn a stage over `source`.
///
/// `work` is called once per item, on the pump task, and the future it
/// returns is spawned. The stage stops reading when `source` ends or `stop`
/// fires; tasks already started still run and their outputs are still
/// forwarded. The sink is dropped, closing it, after the last output.
///
/// A task that panics is logged and contributes no output.
///
/// The returned handle completes once every output has been forwarded.
pub fn spawn_stage<S, T, F, Fut>(
    source: S,
    ordering: StageOrdering,
    stop: CancellationToken,
    sink: mpsc::Sender<T>,
    mut work: F,
) -> JoinHandle<()>
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
    T: Send + 'static,
    F: FnMut(S::Item) -> Fut + Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::unbounded_channel::<(u64, Option<T>)>();
    let collector = tokio::spawn(collect(done_rx, ordering, sink));

    tokio::spawn(async move {
        let mut source = std::pin::pin!(source);
        let mut seq: u64 = 0;

        loop {
            let item = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!(accepted = seq, "stage detached from its source");
                    break;
                }
                item = source.next() => match item {
                    Some(item) => item,
                    None => {
                        debug!(accepted = seq, "stage source completed");
                        break;
                    }
                },
            };

            let task = work(item);
            let done_tx = done_tx.clone();
            let this_seq = seq;
            seq += 1;

            tokio::spawn(async move {
                let output = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(output) => output,
                    Err(_) => {
                        error!(seq = this_seq, "stage task panicked, dropping its output");
                        None
                    }
                };
                // The collector only goes away once every sender is gone.
                let _ = done_tx.send((this_seq, output));
            });
        }

        drop(done_tx);
        if let Err(e) = collector.await {
            error!(error = %e, "stage collector failed");
        }
    })
}

async fn collect<T>(
    mut done_rx: mpsc::UnboundedReceiver<(u64, Option<T>)>,
    ordering: StageOrdering,
    sink: mpsc::Sender<T>,
) {
    let mut resequencer = Resequencer::new();
    let mut sink_open = true;

    while let Some((seq, output)) = done_rx.recv().await {
        match ordering {
            StageOrdering::Completion => {
                if let Some(item) = output {
                    sink_open = forward(&sink, item, sink_open).await;
                }
            }
            StageOrdering::Ordered => {
                resequencer.push(seq, output);
                while let Some(item) = resequencer.pop_ready() {
                    sink_open = forward(&sink, item, sink_open).await;
                }
            }
        }
    }

    if resequencer.parked() > 0 {
        error!(
            parked = resequencer.parked(),
            waiting_for = resequencer.next_sequence(),
            "stage finished with outputs parked behind a missing sequence number"
        );
    }
}

async fn forward<T>(sink: &mpsc::Sender<T>, item: T, open: bool) -> bool {
    if !open {
        return false;
    }
    if sink.send(item).await.is_err() {
        debug!("stage sink closed, discarding further output");
        return false;
    }
    true
}

/// Adapt a tokio receiver into a stream suitable as a stage source.
pub fn receiver_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> impl Stream<Item = T> + Send + 'static {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}
