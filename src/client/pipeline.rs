//! The parallel pipeline engine.
//!
//! Between two Syncs, every extended-query operation is sequenced into a
//! window of per-operation output buffers. Executes of bound portals run on
//! a semaphore-bounded worker pool; everything the loop resolves inline is
//! pushed as an already-complete buffer. The window drains strictly in
//! submission order, so the client observes the exact byte stream the
//! serial path would have produced.
//!
//! Failure semantics: the first failed operation (in submission order)
//! contributes its ErrorResponse; every later buffer in the window is
//! dropped, and workers that have not started yet skip their work entirely.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::{oneshot, Semaphore};

use crate::errors::ErrorInfo;
use crate::messages::protocol::error_response;
use crate::server::config::PipelineConfig;

/// What one operation produced: its wire output and whether it failed.
pub(crate) struct TaskOutput {
    pub buffer: BytesMut,
    pub failed: bool,
}

enum PendingOutput {
    Ready(TaskOutput),
    Task(oneshot::Receiver<TaskOutput>),
}

/// Everything the drain produced, reassembled in submission order.
pub(crate) struct Drained {
    pub buffer: BytesMut,
    pub failed: bool,
}

pub(crate) struct Pipeline {
    semaphore: Arc<Semaphore>,
    max_queue_depth: usize,
    pending: VecDeque<PendingOutput>,
    /// Lowest submission sequence that failed in this window; workers with
    /// a higher sequence skip their work. usize::MAX means no failure.
    min_failed_seq: Arc<AtomicUsize>,
    next_seq: usize,
}

impl Pipeline {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Pipeline {
            semaphore: Arc::new(Semaphore::new(config.effective_concurrency())),
            max_queue_depth: config.max_queue_depth.max(1),
            pending: VecDeque::new(),
            min_failed_seq: Arc::new(AtomicUsize::new(usize::MAX)),
            next_seq: 0,
        }
    }

    /// True when the window is at capacity and must drain before admitting
    /// another operation.
    pub(crate) fn at_capacity(&self) -> bool {
        self.pending.len() >= self.max_queue_depth
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue an operation the loop already resolved.
    pub(crate) fn push_ready(&mut self, buffer: BytesMut, failed: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if failed {
            self.min_failed_seq.fetch_min(seq, Ordering::AcqRel);
        }
        self.pending
            .push_back(PendingOutput::Ready(TaskOutput { buffer, failed }));
    }

    /// Queue an operation on the worker pool.
    pub(crate) fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = TaskOutput> + Send + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        let semaphore = self.semaphore.clone();
        let min_failed_seq = self.min_failed_seq.clone();

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("pipeline semaphore closed");
            let output = if min_failed_seq.load(Ordering::Acquire) < seq {
                // An earlier operation in the window already failed; this
                // one is cancelled and emits nothing.
                TaskOutput {
                    buffer: BytesMut::new(),
                    failed: false,
                }
            } else {
                let output = work.await;
                if output.failed {
                    min_failed_seq.fetch_min(seq, Ordering::AcqRel);
                }
                output
            };
            let _ = tx.send(output);
        });

        self.pending.push_back(PendingOutput::Task(rx));
    }

    /// Await every queued operation and reassemble the window in submission
    /// order. Output after the first failure is dropped.
    pub(crate) async fn drain(&mut self) -> Drained {
        let mut buffer = BytesMut::new();
        let mut failed = false;

        while let Some(pending) = self.pending.pop_front() {
            let output = match pending {
                PendingOutput::Ready(output) => output,
                PendingOutput::Task(rx) => rx.await.unwrap_or_else(|_| TaskOutput {
                    buffer: error_response(&ErrorInfo::new(
                        "statement worker terminated unexpectedly",
                    )),
                    failed: true,
                }),
            };
            if failed {
                continue;
            }
            buffer.extend_from_slice(&output.buffer);
            failed = output.failed;
        }

        // A fresh window starts after every drain.
        self.min_failed_seq.store(usize::MAX, Ordering::Release);
        self.next_seq = 0;
        Drained { buffer, failed }
    }
}
