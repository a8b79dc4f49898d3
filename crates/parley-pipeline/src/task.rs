//! One running conversation: the stage chain plus its cancellation and
//! turn-tracking state.

use crate::error::PipelineError;
use crate::frame::Frame;
use crate::pipeline::Pipeline;
use crate::stage::{run_stage, StageContext};
use crate::tracker::TurnTracker;
use parley_types::{AudioChunk, PipelineParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Input ended and every stage drained.
    Completed,
    /// The task was cancelled before draining.
    Cancelled,
}

/// Cloneable control surface of a [`SessionTask`].
#[derive(Clone)]
pub struct SessionTaskHandle {
    head: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    cancel_logged: Arc<AtomicBool>,
}

impl SessionTaskHandle {
    /// Injects a frame at the head of the chain.
    pub async fn enqueue(&self, frame: Frame) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Closed);
        }
        self.head
            .send(frame)
            .await
            .map_err(|_| PipelineError::Closed)
    }

    /// Stops the task. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.cancel_logged.swap(true, Ordering::SeqCst) {
            info!("cancelling session task");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct SessionTask {
    pipeline: Pipeline,
    params: Arc<PipelineParams>,
    tracker: Arc<TurnTracker>,
    handle: SessionTaskHandle,
    head: mpsc::Receiver<Frame>,
}

impl SessionTask {
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (head_tx, head_rx) = mpsc::channel(pipeline.queue_capacity);
        Self {
            pipeline,
            params: Arc::new(params),
            tracker: Arc::new(TurnTracker::new()),
            handle: SessionTaskHandle {
                head: head_tx,
                cancel: CancellationToken::new(),
                cancel_logged: Arc::new(AtomicBool::new(false)),
            },
            head: head_rx,
        }
    }

    pub fn handle(&self) -> SessionTaskHandle {
        self.handle.clone()
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn tracker(&self) -> &Arc<TurnTracker> {
        &self.tracker
    }

    pub async fn enqueue(&self, frame: Frame) -> Result<(), PipelineError> {
        self.handle.enqueue(frame).await
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Runs every stage to completion.
    pub async fn run(self) -> TaskOutcome {
        let SessionTask {
            pipeline,
            params,
            tracker,
            handle,
            head,
        } = self;
        let cancel = handle.cancel.clone();
        let capacity = pipeline.queue_capacity;
        let Pipeline { stages, input, .. } = pipeline;

        let mut tasks = JoinSet::new();
        let mut receiver = head;
        let count = stages.len();
        for (index, stage) in stages.into_iter().enumerate() {
            let (out, next) = if index + 1 < count {
                let (tx, rx) = mpsc::channel(capacity);
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            let ctx = StageContext::new(
                stage.name(),
                out,
                Arc::clone(&params),
                Arc::clone(&tracker),
                cancel.clone(),
            );
            tasks.spawn(run_stage(stage, receiver, ctx, cancel.clone()));
            match next {
                Some(next) => receiver = next,
                None => break,
            }
        }

        tasks.spawn(pump_input(input, handle.head.clone(), cancel.clone()));
        drop(handle);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "pipeline task failed");
                cancel.cancel();
            }
        }

        if cancel.is_cancelled() {
            TaskOutcome::Cancelled
        } else {
            TaskOutcome::Completed
        }
    }
}

/// Moves transport audio to the head of the chain and signals the end of
/// input once the transport closes.
async fn pump_input(
    mut input: mpsc::Receiver<AudioChunk>,
    head: mpsc::Sender<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            chunk = input.recv() => chunk,
        };
        let frame = match chunk {
            Some(chunk) => Frame::InputAudio(chunk),
            None => Frame::End,
        };
        let last = matches!(frame, Frame::End);
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = head.send(frame) => sent,
        };
        if sent.is_err() || last {
            debug!("input pump finished");
            return;
        }
    }
}
