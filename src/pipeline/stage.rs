//! A pool of worker threads draining one queue into another.
//!
//! Shutdown works through the queue itself. A worker that finishes, fails or
//! dequeues a marker puts a marker back on its own input and exits, so every
//! sibling eventually sees one too. A closer thread joins all workers and only
//! then sends a single terminal message downstream.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};

use super::Message;
use crate::error::PipelineError;

/// What a handler decided about one input item.
pub(crate) enum Step<O> {
    /// Pass the output downstream and keep going.
    Emit(O),
    /// Nothing to emit for this item.
    Skip,
    /// End of data: optionally emit a last output, then shut the stage down.
    Finish(Option<O>),
    /// Abort the run.
    Fail(PipelineError),
}

/// Terminal message carried by a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    EndOfStream,
    Error(PipelineError),
}

impl<T> From<Signal> for Message<T> {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::EndOfStream => Message::EndOfStream,
            Signal::Error(e) => Message::Error(e),
        }
    }
}

/// How one worker left its loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker's own handler reported end of data.
    Finished,
    /// The worker's own handler failed.
    Failed(PipelineError),
    /// The worker dequeued a marker.
    Signalled(Signal),
}

impl WorkerExit {
    fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Failed(e) | Self::Signalled(Signal::Error(e)) => Some(e),
            _ => None,
        }
    }
}

/// Summary of a stage after its closer has run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: &'static str,
    /// One entry per worker, in spawn order.
    pub exits: Vec<WorkerExit>,
    /// Items handed to the handler.
    pub processed: usize,
    /// Items the handler skipped.
    pub skipped: usize,
    /// The single terminal message sent downstream.
    pub forwarded: Signal,
}

/// Running stage.
pub(crate) struct StageHandle {
    stage: &'static str,
    halted: Arc<AtomicBool>,
    closer: JoinHandle<StageReport>,
}

impl StageHandle {
    /// True once any worker has finished, failed or seen a marker.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Wait for the closer, i.e. for every worker and the terminal forward.
    pub fn join(self) -> Result<StageReport, PipelineError> {
        self.closer
            .join()
            .map_err(|_| PipelineError::WorkerPanicked { stage: self.stage })
    }
}

/// State shared by the workers of one stage.
struct Worker<I, O, F> {
    stage: &'static str,
    handler: F,
    halted: Arc<AtomicBool>,
    processed: AtomicUsize,
    skipped: AtomicUsize,
    input_tx: Sender<Message<I>>,
    input_rx: Receiver<Message<I>>,
    output: Sender<Message<O>>,
}

/// Start `workers` threads named `{stage}-N` plus the stage's closer.
///
/// `input_tx` must send into the same queue `input_rx` reads from; workers use
/// it to put markers back.
pub(crate) fn spawn_stage<I, O, F>(
    stage: &'static str,
    workers: usize,
    input_tx: Sender<Message<I>>,
    input_rx: Receiver<Message<I>>,
    output: Sender<Message<O>>,
    handler: F,
) -> Result<StageHandle, PipelineError>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Step<O> + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let halted = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(Worker {
        stage,
        handler,
        halted: Arc::clone(&halted),
        processed: AtomicUsize::new(0),
        skipped: AtomicUsize::new(0),
        input_tx: input_tx.clone(),
        input_rx,
        output,
    });

    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let worker = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("{stage}-{id}"))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                let err = PipelineError::Spawn { stage, reason: e.to_string() };
                // Release the workers already running
                let _ = input_tx.send(Message::Error(err.clone()));
                return Err(err);
            }
        }
    }

    info!("[Stage {}] started {} workers", stage, workers);

    let closer = thread::Builder::new()
        .name(format!("{stage}-closer"))
        .spawn(move || close(shared, handles));

    match closer {
        Ok(closer) => Ok(StageHandle { stage, halted, closer }),
        Err(e) => {
            let err = PipelineError::Spawn { stage, reason: e.to_string() };
            let _ = input_tx.send(Message::Error(err.clone()));
            Err(err)
        }
    }
}

impl<I, O, F> Worker<I, O, F>
where
    F: Fn(I) -> Step<O>,
{
    fn run(&self) -> WorkerExit {
        loop {
            let item = match self.input_rx.recv() {
                Ok(Message::Data(item)) => item,
                Ok(Message::EndOfStream) => {
                    self.halt(Message::EndOfStream);
                    return WorkerExit::Signalled(Signal::EndOfStream);
                }
                Ok(Message::Error(e)) => {
                    self.halt(Message::Error(e.clone()));
                    return WorkerExit::Signalled(Signal::Error(e));
                }
                // Workers hold a sender of their own input, so this needs every worker gone
                Err(_) => return WorkerExit::Failed(PipelineError::Disconnected { stage: self.stage }),
            };

            self.processed.fetch_add(1, Ordering::Relaxed);
            let step = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(item)))
                .unwrap_or_else(|_| {
                    error!("[Stage {}] handler panicked", self.stage);
                    Step::Fail(PipelineError::WorkerPanicked { stage: self.stage })
                });

            match step {
                Step::Emit(out) => {
                    let _ = self.output.send(Message::Data(out));
                }
                Step::Skip => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Step::Finish(last) => {
                    if let Some(out) = last {
                        let _ = self.output.send(Message::Data(out));
                    }
                    debug!("[Stage {}] end of data detected", self.stage);
                    self.halt(Message::EndOfStream);
                    return WorkerExit::Finished;
                }
                Step::Fail(e) => {
                    self.halt(Message::Error(e.clone()));
                    return WorkerExit::Failed(e);
                }
            }
        }
    }

    /// Mark the stage halted and put a marker back for the next sibling.
    fn halt(&self, marker: Message<I>) {
        self.halted.store(true, Ordering::Release);
        let _ = self.input_tx.send(marker);
    }
}

/// Join every worker, then forward exactly one terminal message.
fn close<I, O, F>(shared: Arc<Worker<I, O, F>>, handles: Vec<JoinHandle<WorkerExit>>) -> StageReport {
    let stage = shared.stage;
    let exits: Vec<WorkerExit> = handles
        .into_iter()
        .map(|handle| {
            handle.join().unwrap_or_else(|_| {
                WorkerExit::Failed(PipelineError::WorkerPanicked { stage })
            })
        })
        .collect();

    let forwarded = match exits.iter().find_map(WorkerExit::error) {
        Some(e) => Signal::Error(e.clone()),
        None => Signal::EndOfStream,
    };

    let processed = shared.processed.load(Ordering::Relaxed);
    let skipped = shared.skipped.load(Ordering::Relaxed);
    match &forwarded {
        Signal::EndOfStream => info!(
            "[Stage {}] all {} workers done ({} processed, {} skipped), forwarding end of stream",
            stage, exits.len(), processed, skipped
        ),
        Signal::Error(e) => info!(
            "[Stage {}] all {} workers done, forwarding error: {}",
            stage, exits.len(), e
        ),
    }
    let _ = shared.output.send(forwarded.clone().into());

    StageReport {
        stage,
        exits,
        processed,
        skipped,
        forwarded,
    }
}
