//! The [`Stage`] abstraction and the loop that drives one stage.

use crate::error::StageError;
use crate::frame::Frame;
use crate::tracker::TurnTracker;
use async_trait::async_trait;
use parley_types::PipelineParams;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// One step of the conversation chain.
///
/// `process` is called once per frame, in queue order. A stage forwards
/// frames it does not handle by pushing them unchanged.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError>;

    /// Called after in-flight work was abandoned because the caller
    /// interrupted the assistant.
    async fn on_interruption(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
        Ok(())
    }

    /// Called after `process` failed on a non-critical stage. May emit
    /// degraded output in place of the failed work.
    async fn recover(&mut self, _error: &StageError, _ctx: &StageContext) -> Result<(), StageError> {
        Ok(())
    }

    /// A failing critical stage cancels the whole session.
    fn critical(&self) -> bool {
        false
    }

    /// Whether assistant-turn interruptions abort this stage's work.
    fn observes_interruptions(&self) -> bool {
        false
    }

    async fn shutdown(&mut self) {}
}

/// What a stage sees of its surroundings.
#[derive(Clone)]
pub struct StageContext {
    stage: &'static str,
    out: Option<mpsc::Sender<Frame>>,
    params: Arc<PipelineParams>,
    tracker: Arc<TurnTracker>,
    cancel: CancellationToken,
}

impl StageContext {
    pub fn new(
        stage: &'static str,
        out: Option<mpsc::Sender<Frame>>,
        params: Arc<PipelineParams>,
        tracker: Arc<TurnTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stage,
            out,
            params,
            tracker,
            cancel,
        }
    }

    /// Sends a frame to the next stage. The last stage has no successor
    /// and its pushes are discarded.
    pub async fn push(&self, frame: Frame) -> Result<(), StageError> {
        let Some(out) = &self.out else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StageError::Closed),
            sent = out.send(frame) => sent.map_err(|_| StageError::Closed),
        }
    }

    /// Runs a service call under the session's service timeout.
    pub async fn with_timeout<F, T>(&self, call: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let limit = self.params.service_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout(limit)),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn tracker(&self) -> &TurnTracker {
        &self.tracker
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

enum Outcome {
    Done(Result<(), StageError>),
    Interrupted,
    Cancelled,
}

/// Drives one stage until its input ends, the session is cancelled, or
/// the stage fails critically.
pub(crate) async fn run_stage(
    mut stage: Box<dyn Stage>,
    mut input: mpsc::Receiver<Frame>,
    ctx: StageContext,
    cancel: CancellationToken,
) {
    let name = stage.name();
    let mut epochs = ctx.tracker.subscribe();
    let observes = stage.observes_interruptions();
    debug!(stage = name, "stage started");

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = epochs.changed(), if observes => {
                if changed.is_err() {
                    break;
                }
                epochs.borrow_and_update();
                if !interrupted(stage.as_mut(), &ctx).await {
                    break;
                }
                continue;
            }
            frame = input.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Some(epoch) = frame.epoch() {
            if ctx.tracker.is_stale(epoch) {
                trace!(stage = name, epoch, kind = frame.kind(), "dropping stale frame");
                continue;
            }
        }

        if matches!(frame, Frame::End) {
            let _ = ctx.push(Frame::End).await;
            break;
        }

        let outcome = {
            let work = stage.process(frame, &ctx);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::Cancelled,
                _ = epochs.changed(), if observes => Outcome::Interrupted,
                result = work => Outcome::Done(result),
            }
        };

        match outcome {
            Outcome::Cancelled => break,
            Outcome::Interrupted => {
                epochs.borrow_and_update();
                if !interrupted(stage.as_mut(), &ctx).await {
                    break;
                }
            }
            Outcome::Done(Ok(())) => {}
            Outcome::Done(Err(StageError::Closed)) => break,
            Outcome::Done(Err(e)) => {
                if !failed(stage.as_mut(), e, &ctx, &cancel).await {
                    break;
                }
            }
        }
    }

    stage.shutdown().await;
    debug!(stage = name, "stage stopped");
}

async fn interrupted(stage: &mut dyn Stage, ctx: &StageContext) -> bool {
    debug!(stage = stage.name(), epoch = ctx.tracker.current(), "interrupted");
    match stage.on_interruption(ctx).await {
        Ok(()) => true,
        Err(StageError::Closed) => false,
        Err(e) => {
            warn!(stage = stage.name(), error = %e, "interruption handler failed");
            true
        }
    }
}

/// Applies the failure policy. Returns whether the stage keeps running.
async fn failed(
    stage: &mut dyn Stage,
    err: StageError,
    ctx: &StageContext,
    cancel: &CancellationToken,
) -> bool {
    if stage.critical() {
        error!(stage = stage.name(), error = %err, "critical stage failed, cancelling session");
        cancel.cancel();
        return false;
    }

    warn!(stage = stage.name(), error = %err, "stage failed, recovering");
    match stage.recover(&err, ctx).await {
        Ok(()) => true,
        Err(StageError::Closed) => false,
        Err(e) => {
            error!(stage = stage.name(), error = %e, "stage recovery failed, cancelling session");
            cancel.cancel();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::ServiceError;

    struct Flaky {
        critical: bool,
        recovered: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Stage for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<(), StageError> {
            match frame {
                Frame::ContextUpdated => Err(ServiceError::Failed("boom".into()).into()),
                other => ctx.push(other).await,
            }
        }

        async fn recover(&mut self, _error: &StageError, ctx: &StageContext) -> Result<(), StageError> {
            self.recovered
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ctx.push(Frame::ResponseEnd { epoch: 0 }).await
        }

        fn critical(&self) -> bool {
            self.critical
        }
    }

    fn harness(
        critical: bool,
    ) -> (
        mpsc::Sender<Frame>,
        mpsc::Receiver<Frame>,
        CancellationToken,
        Arc<std::sync::atomic::AtomicUsize>,
        tokio::task::JoinHandle<()>,
    ) {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let recovered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ctx = StageContext::new(
            "flaky",
            Some(out_tx),
            Arc::new(PipelineParams::default()),
            Arc::new(TurnTracker::new()),
            cancel.clone(),
        );
        let stage = Box::new(Flaky {
            critical,
            recovered: recovered.clone(),
        });
        let handle = tokio::spawn(run_stage(stage, in_rx, ctx, cancel.clone()));
        (in_tx, out_rx, cancel, recovered, handle)
    }

    #[tokio::test]
    async fn non_critical_failure_recovers_and_keeps_running() {
        let (input, mut output, cancel, recovered, handle) = harness(false);

        input.send(Frame::ContextUpdated).await.unwrap();
        input.send(Frame::End).await.unwrap();

        assert_eq!(output.recv().await, Some(Frame::ResponseEnd { epoch: 0 }));
        assert_eq!(output.recv().await, Some(Frame::End));
        handle.await.unwrap();
        assert_eq!(recovered.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn critical_failure_cancels_the_session() {
        let (input, mut output, cancel, recovered, handle) = harness(true);

        input.send(Frame::ContextUpdated).await.unwrap();
        handle.await.unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(recovered.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(output.recv().await, None);
    }

    #[tokio::test]
    async fn timeouts_surface_as_stage_errors() {
        let params = PipelineParams {
            service_timeout: std::time::Duration::from_millis(10),
            ..PipelineParams::default()
        };
        let ctx = StageContext::new(
            "slow",
            None,
            Arc::new(params),
            Arc::new(TurnTracker::new()),
            CancellationToken::new(),
        );
        let result: Result<(), StageError> = ctx
            .with_timeout(async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(
            result,
            Err(StageError::Timeout(std::time::Duration::from_millis(10)))
        );
    }
}
