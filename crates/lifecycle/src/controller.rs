//! Generic operation controller.
//!
//! One controller drives one operation kind against one device. It gates
//! starts on the cold state, arbitrates pause/resume/cancel against engine
//! callbacks arriving on arbitrary threads, and hands every advertisement to
//! the background dispatcher.
//!
//! Locking: `commands` serializes caller commands; `inner` guards state and
//! is never held across an engine call. Advertisements are enqueued while
//! `inner` is held so observers see them in state order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use smpflow_protocol::{
    Advertisement, ConnectionTarget, EngineError, ErrorRecord, LifecycleState, LogLevel,
    OperationKind, Verdict, classify, constants::GLOBAL_CODE_GENERIC,
};
use smpflow_transfer::TransferSession;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::batch::{BatchOptions, BatchOutcome};
use crate::config::LifecycleConfig;
use crate::dispatch::{ChannelObserver, Dispatcher, Observer, SubscriptionId};
use crate::engine::{ActiveTransfer, EngineCallbacks, EngineFactory, EnginePhase, TransferEngine};
use crate::error::{OperationError, StartError};
use crate::machine::{StateMachine, Transition};
use crate::operations::{
    DownloadStrategy, EraseStrategy, InstallStrategy, OperationStrategy, Prepared, ResetStrategy,
    UploadStrategy,
};

pub type DeviceResetter = OperationController<ResetStrategy>;
pub type FileUploader = OperationController<UploadStrategy>;
pub type FileDownloader = OperationController<DownloadStrategy>;
pub type FirmwareEraser = OperationController<EraseStrategy>;
pub type FirmwareInstaller = OperationController<InstallStrategy>;

/// Successful end of a run awaited with [`OperationController::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub resource: String,
    /// Downloaded bytes, for kinds that fetch something.
    pub payload: Option<Vec<u8>>,
}

/// Drives one operation kind through its lifecycle.
pub struct OperationController<S: OperationStrategy> {
    shared: Arc<Shared<S>>,
}

struct Shared<S: OperationStrategy> {
    strategy: S,
    config: LifecycleConfig,
    factory: Arc<dyn EngineFactory>,
    inner: Mutex<Inner<S::RunState>>,
    commands: Mutex<()>,
    dispatcher: Dispatcher,
}

struct Inner<R> {
    machine: StateMachine,
    session: TransferSession,
    run_state: R,
    busy: bool,
    /// Generation of the current run; callbacks carry the one they belong to.
    run: u64,
    target: ConnectionTarget,
    engine: Option<Arc<dyn TransferEngine>>,
    handle: Option<Arc<dyn ActiveTransfer>>,
    last_error: Option<ErrorRecord>,
    disposed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: OperationStrategy> OperationController<S> {
    /// Creates a controller for `target`. Must be called from within a tokio
    /// runtime, which hosts the advertisement dispatcher.
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        target: ConnectionTarget,
        config: LifecycleConfig,
    ) -> Self {
        let dispatcher = Dispatcher::spawn(config.event_queue_warn_depth, S::KIND.log_category());
        Self {
            shared: Arc::new(Shared {
                strategy: S::default(),
                config,
                factory,
                inner: Mutex::new(Inner {
                    machine: StateMachine::new(S::KIND),
                    session: TransferSession::new(),
                    run_state: S::RunState::default(),
                    busy: false,
                    run: 0,
                    target,
                    engine: None,
                    handle: None,
                    last_error: None,
                    disposed: false,
                }),
                commands: Mutex::new(()),
                dispatcher,
            }),
        }
    }

    pub fn kind(&self) -> OperationKind {
        S::KIND
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.shared.inner).machine.state()
    }

    /// `true` when a new run may start.
    pub fn is_cold(&self) -> bool {
        lock(&self.shared.inner).machine.is_cold()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.shared.inner).busy
    }

    pub fn target(&self) -> ConnectionTarget {
        lock(&self.shared.inner).target.clone()
    }

    /// The last fatal error, kept after the run that produced it.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        lock(&self.shared.inner).last_error.clone()
    }

    /// Message of [`last_error`](Self::last_error), or an empty string.
    pub fn last_error_message(&self) -> String {
        lock(&self.shared.inner)
            .last_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.shared.dispatcher.subscribe(observer)
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Subscribes a channel receiving every advertisement.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Advertisement>) {
        let (observer, rx) = ChannelObserver::new();
        (self.subscribe(Arc::new(observer)), rx)
    }

    /// Waits until every advertisement queued so far has been delivered.
    pub async fn flush(&self) {
        self.shared.dispatcher.flush().await;
    }

    /// Starts a run. Only the returned verdict reports rejections; they
    /// never touch state or the advertisement feed.
    pub fn start(&self, request: S::Request) -> Verdict {
        match self.try_start(request) {
            Ok(()) => Verdict::Success,
            Err(e) => e.verdict(),
        }
    }

    fn try_start(&self, request: S::Request) -> Result<(), StartError> {
        let shared = &self.shared;
        let kind = S::KIND;
        let _command = lock(&shared.commands);

        if !lock(&shared.inner).machine.is_cold() {
            debug!(%kind, "start refused: operation already in progress");
            return Err(StartError::AlreadyInProgress);
        }

        let prepared = shared
            .config
            .validate()
            .map_err(|e| StartError::InvalidParameters(e.to_string()))
            .and_then(|()| shared.strategy.prepare(request, &shared.config));
        let Prepared {
            resource,
            total_bytes,
            request,
            warnings,
        } = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(%kind, error = %e, "start rejected");
                return Err(e);
            }
        };

        let (run, target, cached_engine, disposed) = {
            let mut inner = lock(&shared.inner);
            inner.run += 1;
            inner.session.begin(resource.clone(), total_bytes);
            inner.run_state = S::RunState::default();
            inner.handle = None;

            let mut out = Vec::new();
            shared.set_busy(&mut inner, true, &mut out);
            shared.transition(&mut inner, LifecycleState::Idle, &mut out);
            for warning in warnings {
                warn!(%kind, %resource, "{warning}");
                out.push(shared.log_ad(LogLevel::Warning, warning, &resource));
            }
            shared.dispatcher.enqueue(out);

            info!(%kind, run = %inner.session.run_id(), %resource, "operation starting");
            (
                inner.run,
                inner.target.clone(),
                inner.engine.clone(),
                inner.disposed,
            )
        };

        if disposed {
            let error = EngineError::device("controller disposed", GLOBAL_CODE_GENERIC);
            return Err(shared.fail_to_commence(run, error));
        }

        let engine = match cached_engine {
            Some(engine) => engine,
            None => match shared.factory.initialize(&target, shared.config.initial_mtu) {
                Ok(engine) => {
                    debug!(%kind, %target, "engine initialized");
                    lock(&shared.inner).engine = Some(Arc::clone(&engine));
                    engine
                }
                Err(e) => return Err(shared.fail_to_commence(run, e)),
            },
        };

        engine.request_high_priority();

        let callbacks: Arc<dyn EngineCallbacks> = Arc::new(RunCallbacks {
            shared: Arc::downgrade(&self.shared),
            run,
        });
        let handle = match engine.begin(request, callbacks) {
            Ok(handle) => handle,
            Err(e) => return Err(shared.fail_to_commence(run, e)),
        };

        let mut inner = lock(&shared.inner);
        // The engine may already have finished the run from inside begin().
        if inner.run == run && !inner.machine.is_cold() {
            inner.handle = Some(handle);
            if let Some(phase) = kind.phase_on_start() {
                let mut out = Vec::new();
                shared.transition(&mut inner, phase, &mut out);
                shared.dispatcher.enqueue(out);
            }
        }
        Ok(())
    }

    /// Pauses the transfer in flight.
    ///
    /// `true` if the run is (now) paused. A failed engine pause only produces
    /// a warning; the transfer keeps going.
    pub fn pause(&self) -> bool {
        let shared = &self.shared;
        let kind = S::KIND;
        let _command = lock(&shared.commands);

        if !kind.supports_pause() {
            debug!(%kind, "pause not supported");
            return false;
        }

        let (run, handle) = {
            let inner = lock(&shared.inner);
            let state = inner.machine.state();
            if state == LifecycleState::Paused {
                return true;
            }
            if !Shared::<S>::is_transferring(state) {
                debug!(%kind, %state, "pause ignored: no transfer in flight");
                return false;
            }
            match &inner.handle {
                Some(handle) => (inner.run, Arc::clone(handle)),
                None => return false,
            }
        };

        if let Err(e) = handle.pause() {
            shared.suppressed("pause", &e);
            return false;
        }

        let mut inner = lock(&shared.inner);
        if inner.run != run || !Shared::<S>::is_transferring(inner.machine.state()) {
            return false;
        }
        let mut out = Vec::new();
        shared.transition(&mut inner, LifecycleState::Paused, &mut out);
        shared.set_busy(&mut inner, false, &mut out);
        shared.dispatcher.enqueue(out);
        info!(%kind, run = %inner.session.run_id(), "transfer paused");
        true
    }

    /// Resumes a paused transfer. `true` if the run is (now) transferring.
    pub fn resume(&self) -> bool {
        let shared = &self.shared;
        let kind = S::KIND;
        let _command = lock(&shared.commands);

        if !kind.supports_pause() {
            debug!(%kind, "resume not supported");
            return false;
        }

        let (run, handle) = {
            let inner = lock(&shared.inner);
            let state = inner.machine.state();
            if Shared::<S>::is_transferring(state) {
                return true;
            }
            if state != LifecycleState::Paused {
                debug!(%kind, %state, "resume ignored: not paused");
                return false;
            }
            match &inner.handle {
                Some(handle) => (inner.run, Arc::clone(handle)),
                None => return false,
            }
        };

        if let Err(e) = handle.resume() {
            shared.suppressed("resume", &e);
            return false;
        }

        let mut inner = lock(&shared.inner);
        if inner.run != run || inner.machine.state() != LifecycleState::Paused {
            return false;
        }
        let mut out = Vec::new();
        if !shared.resume_transition(&mut inner, &mut out).is_applied() {
            return false;
        }
        shared.set_busy(&mut inner, true, &mut out);
        inner.session.reseed();
        shared.dispatcher.enqueue(out);
        info!(%kind, run = %inner.session.run_id(), "transfer resumed");
        true
    }

    /// Asks the engine to abandon the run.
    ///
    /// The intent is advertised (and the state moves to Cancelling) before the
    /// engine is signalled; the terminal Cancelled only follows the engine's
    /// confirmation. Without an engine transfer to confirm it, the run is
    /// finished here. A cold controller has nothing to cancel and returns
    /// `true`.
    pub fn cancel(&self, reason: &str) -> bool {
        let shared = &self.shared;
        let kind = S::KIND;
        let _command = lock(&shared.commands);

        let handle = {
            let mut inner = lock(&shared.inner);
            if inner.machine.is_cold() {
                return true;
            }
            inner.session.set_cancel_reason(reason);

            let mut out = vec![Advertisement::Cancelling {
                reason: reason.to_string(),
            }];
            if kind.admits(LifecycleState::Cancelling) {
                shared.transition(&mut inner, LifecycleState::Cancelling, &mut out);
            }
            shared.dispatcher.enqueue(out);
            info!(%kind, run = %inner.session.run_id(), %reason, "cancelling");

            match &inner.handle {
                Some(handle) => Arc::clone(handle),
                None => {
                    // No engine transfer left to confirm the cancel.
                    shared.finish_cancelled(&mut inner);
                    return true;
                }
            }
        };

        match handle.cancel() {
            Ok(()) => true,
            Err(e) => {
                shared.suppressed("cancel", &e);
                false
            }
        }
    }

    /// Releases the engine. The controller stays usable; the next start
    /// initializes a fresh engine.
    ///
    /// A run still in flight ends here: as cancelled if a cancel was already
    /// requested, otherwise as failed with a "disconnected" record.
    pub fn disconnect(&self) {
        let _command = lock(&self.shared.commands);
        self.shared.release_engine();
    }

    /// Disconnects and stops the dispatcher. Later starts fail to commence.
    pub fn dispose(&self) {
        let _command = lock(&self.shared.commands);
        {
            let mut inner = lock(&self.shared.inner);
            if inner.disposed {
                return;
            }
            inner.disposed = true;
        }
        self.shared.release_engine();
        self.shared.dispatcher.shutdown();
        debug!(kind = %S::KIND, "controller disposed");
    }

    /// Points the controller at another device. Refused while a run is in
    /// flight; a different target drops the cached engine.
    pub fn try_set_target(&self, target: ConnectionTarget) -> bool {
        let _command = lock(&self.shared.commands);
        let engine = {
            let mut inner = lock(&self.shared.inner);
            if !Shared::<S>::is_idle_or_cold(inner.machine.state()) {
                debug!(kind = %S::KIND, %target, "target change refused: run in flight");
                return false;
            }
            if inner.target == target {
                return true;
            }
            inner.target = target;
            inner.handle = None;
            inner.engine.take()
        };
        if let Some(engine) = engine {
            engine.release();
        }
        true
    }

    /// Drops the cached engine so the next start builds a new one. Refused
    /// while a run is in flight.
    pub fn try_invalidate_cached_engine(&self) -> bool {
        let _command = lock(&self.shared.commands);
        let engine = {
            let mut inner = lock(&self.shared.inner);
            if inner.engine.is_none() {
                return true;
            }
            if !Shared::<S>::is_idle_or_cold(inner.machine.state()) {
                return false;
            }
            inner.handle = None;
            inner.engine.take()
        };
        if let Some(engine) = engine {
            engine.release();
        }
        true
    }

    /// Starts a run and waits for its terminal advertisement.
    ///
    /// No retries and no timeout; both are the caller's call.
    pub async fn execute(&self, request: S::Request) -> Result<Outcome, OperationError> {
        if self.shared.dispatcher.is_shut_down() {
            return Err(OperationError::Disposed);
        }

        // Drain leftovers of an earlier run before listening.
        self.flush().await;
        let (id, mut rx) = self.subscribe_channel();

        let verdict = self.start(request);
        if !verdict.is_success() {
            self.unsubscribe(id);
            return Err(OperationError::Rejected(verdict));
        }

        let shutdown = self.shared.dispatcher.shutdown_token();
        let result = loop {
            tokio::select! {
                ad = rx.recv() => match ad {
                    Some(Advertisement::Completed { resource, payload }) => {
                        break Ok(Outcome { resource, payload });
                    }
                    Some(Advertisement::Failed { message, code, fatal_error_type, .. }) => {
                        let record = self.last_error().unwrap_or_else(|| {
                            let record = ErrorRecord::new(message, code, LifecycleState::Error);
                            match fatal_error_type {
                                Some(fatal) => record.with_fatal_error_type(fatal),
                                None => record,
                            }
                        });
                        break Err(OperationError::Failed(record));
                    }
                    Some(Advertisement::Cancelled { reason }) => {
                        break Err(OperationError::Cancelled { reason });
                    }
                    Some(_) => continue,
                    None => break Err(OperationError::Disposed),
                },
                _ = shutdown.cancelled() => break Err(OperationError::Disposed),
            }
        };

        self.unsubscribe(id);
        result
    }

    /// Runs `files` one after the other, keyed by remote path.
    ///
    /// A failed file either ends the batch with its error or, with
    /// `continue_on_error`, is recorded and skipped. Cancellation, disposal
    /// and start rejections always end the batch.
    pub(crate) async fn execute_batch(
        &self,
        files: Vec<(String, S::Request)>,
        options: &BatchOptions,
    ) -> Result<BatchOutcome, OperationError> {
        let kind = S::KIND;
        let shutdown = self.shared.dispatcher.shutdown_token();
        let mut report = BatchOutcome::default();
        let last = files.len().saturating_sub(1);

        for (i, (path, request)) in files.into_iter().enumerate() {
            match self.execute(request).await {
                Ok(outcome) => report.completed.push((path, outcome)),
                Err(e) if options.continue_on_error && e.is_file_failure() => {
                    warn!(%kind, %path, error = %e, "file failed; moving to the next one");
                    report.failed.push(path);
                }
                Err(e) => return Err(e),
            }

            if i < last && !options.pause_between.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => return Err(OperationError::Disposed),
                    _ = tokio::time::sleep(options.pause_between) => {}
                }
            }
        }

        info!(
            %kind,
            completed = report.completed.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }
}

impl<S: OperationStrategy> Drop for OperationController<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<S: OperationStrategy> Shared<S> {
    fn transition(
        &self,
        inner: &mut Inner<S::RunState>,
        new: LifecycleState,
        out: &mut Vec<Advertisement>,
    ) -> Transition {
        let Inner {
            machine,
            session,
            run_state,
            ..
        } = inner;
        let strategy = &self.strategy;
        machine.transition(new, session, out, |old, new, session, out| {
            strategy.on_transition(run_state, old, new, session, out)
        })
    }

    fn resume_transition(
        &self,
        inner: &mut Inner<S::RunState>,
        out: &mut Vec<Advertisement>,
    ) -> Transition {
        let Inner {
            machine,
            session,
            run_state,
            ..
        } = inner;
        let strategy = &self.strategy;
        machine.resume(session, out, |old, new, session, out| {
            strategy.on_transition(run_state, old, new, session, out)
        })
    }

    /// Edge-triggered busy flag.
    fn set_busy(&self, inner: &mut Inner<S::RunState>, busy: bool, out: &mut Vec<Advertisement>) {
        if inner.busy != busy {
            inner.busy = busy;
            out.push(Advertisement::BusyChanged { busy });
        }
    }

    fn log_ad(&self, level: LogLevel, message: impl Into<String>, resource: &str) -> Advertisement {
        Advertisement::Log {
            message: message.into(),
            category: S::KIND.log_category().to_string(),
            level,
            resource: resource.to_string(),
        }
    }

    fn is_transferring(state: LifecycleState) -> bool {
        Some(state) == S::KIND.transfer_phase() || state == LifecycleState::Resuming
    }

    fn is_idle_or_cold(state: LifecycleState) -> bool {
        state == LifecycleState::Idle || state.is_cold()
    }

    /// Reports a failed pause/resume/cancel. Never fatal.
    fn suppressed(&self, command: &str, error: &EngineError) {
        let kind = S::KIND;
        warn!(%kind, %command, error = %error, "engine command failed");
        let inner = lock(&self.inner);
        let ad = self.log_ad(
            LogLevel::Warning,
            format!("{command} failed: {error}"),
            inner.session.resource(),
        );
        self.dispatcher.enqueue([ad]);
    }

    fn release_engine(&self) {
        let (engine, handle) = {
            let mut inner = lock(&self.inner);
            let ended = if inner.machine.is_cold() {
                None
            } else if inner.session.is_cancel_requested() {
                self.finish_cancelled(&mut inner)
            } else {
                let error = EngineError::device("disconnected", GLOBAL_CODE_GENERIC);
                self.fail_run(&mut inner, "disconnected".to_string(), &error)
            };
            (inner.engine.take(), ended.or_else(|| inner.handle.take()))
        };
        drop(handle);
        if let Some(engine) = engine {
            debug!(kind = %S::KIND, "releasing engine");
            engine.release();
        }
    }

    /// Locks state for a callback, or `None` if the callback belongs to a
    /// run that is no longer live.
    fn live(&self, run: u64) -> Option<MutexGuard<'_, Inner<S::RunState>>> {
        let inner = lock(&self.inner);
        if inner.run != run || inner.machine.is_cold() {
            trace!(
                kind = %S::KIND,
                run,
                current = inner.run,
                "callback for a finished run ignored"
            );
            return None;
        }
        Some(inner)
    }

    fn fail_to_commence(&self, run: u64, error: EngineError) -> StartError {
        let mut inner = lock(&self.inner);
        if inner.run == run && !inner.machine.is_cold() {
            let message = format!("failed to commence {}: {error}", S::KIND);
            let handle = self.fail_run(&mut inner, message, &error);
            drop(inner);
            drop(handle);
        }
        StartError::Commence(error)
    }

    /// Records the failure and moves to Error. Returns the released handle so
    /// it is dropped outside the lock.
    fn fail_run(
        &self,
        inner: &mut Inner<S::RunState>,
        message: String,
        error: &EngineError,
    ) -> Option<Arc<dyn ActiveTransfer>> {
        let kind = S::KIND;
        let failed_in = inner.machine.state();
        let code = classify(error);
        let fatal = self.strategy.fatal_error_type(failed_in, error);
        let resource = inner.session.resource().to_string();

        let mut record = ErrorRecord::new(message.clone(), code, failed_in);
        if let Some(fatal) = fatal {
            record = record.with_fatal_error_type(fatal);
        }

        let mut out = Vec::new();
        self.set_busy(inner, false, &mut out);
        self.transition(inner, LifecycleState::Error, &mut out);
        out.push(Advertisement::Failed {
            resource: resource.clone(),
            message: message.clone(),
            code,
            fatal_error_type: fatal,
        });
        out.push(self.log_ad(
            LogLevel::Error,
            format!("{kind} failed while {}: {message} (code {code})", failed_in.label(kind)),
            &resource,
        ));
        self.dispatcher.enqueue(out);

        error!(
            %kind,
            run = %inner.session.run_id(),
            %resource,
            state = %failed_in,
            code,
            error = %message,
            "operation failed"
        );
        inner.last_error = Some(record);
        inner.handle.take()
    }

    fn handle_progress(&self, run: u64, bytes: u64, total: u64, at: Instant) {
        let Some(phase) = S::KIND.transfer_phase() else {
            return;
        };
        let Some(mut inner) = self.live(run) else {
            return;
        };

        let state = inner.machine.state();
        // Progress only ever moves a run forward into its transfer phase.
        let may_enter = matches!(
            state,
            LifecycleState::Idle
                | LifecycleState::Validating
                | LifecycleState::Resuming
                | LifecycleState::Paused
                | LifecycleState::Cancelling
        );
        if state != phase && !may_enter {
            trace!(kind = %S::KIND, %state, "progress outside the transfer phase ignored");
            return;
        }

        inner.session.observe_total(total);
        let mut out = Vec::new();
        let entered = match self.transition(&mut inner, phase, &mut out) {
            Transition::Applied { .. } => true,
            Transition::Unchanged => false,
            Transition::Swallowed | Transition::Rejected => return,
        };

        self.set_busy(&mut inner, true, &mut out);
        if let Some(update) = inner.session.record_progress(bytes, total, at) {
            out.push(Advertisement::Progress {
                resource: inner.session.resource().to_string(),
                percent: update.percent,
                instant_kbps: update.instant_kbps,
                average_kbps: update.average_kbps,
            });
            let Inner { run_state, .. } = &mut *inner;
            self.strategy.on_progress(run_state, &update, &mut out);
        }
        self.dispatcher.enqueue(out);

        let engine = if entered { inner.engine.clone() } else { None };
        drop(inner);
        if let Some(engine) = engine {
            engine.set_logging_enabled(false);
        }
    }

    fn handle_phase(&self, run: u64, phase: EnginePhase) {
        let kind = S::KIND;
        let target = match phase {
            EnginePhase::Validate => LifecycleState::Validating,
            EnginePhase::Upload => LifecycleState::Uploading,
            EnginePhase::Test => LifecycleState::Testing,
            EnginePhase::Reset => LifecycleState::Resetting,
            EnginePhase::Confirm => LifecycleState::Confirming,
        };
        if !kind.admits(target) {
            trace!(%kind, ?phase, "phase not used by this kind");
            return;
        }
        let Some(mut inner) = self.live(run) else {
            return;
        };
        let state = inner.machine.state();
        if matches!(state, LifecycleState::Paused | LifecycleState::Cancelling) {
            trace!(%kind, %state, ?phase, "phase change while paused or cancelling ignored");
            return;
        }

        let mut out = Vec::new();
        if !self.transition(&mut inner, target, &mut out).is_applied() {
            return;
        }
        let uploading = Some(target) == kind.transfer_phase();
        if uploading {
            inner.session.reseed();
        }
        self.set_busy(&mut inner, true, &mut out);
        self.dispatcher.enqueue(out);
        debug!(%kind, run = %inner.session.run_id(), state = %target, "phase entered");

        let engine = inner.engine.clone();
        drop(inner);
        if let Some(engine) = engine {
            engine.set_logging_enabled(!uploading);
        }
    }

    fn handle_complete(&self, run: u64, payload: Option<Vec<u8>>) {
        let kind = S::KIND;
        let Some(mut inner) = self.live(run) else {
            return;
        };

        let mut transition_out = Vec::new();
        if !self
            .transition(&mut inner, LifecycleState::Complete, &mut transition_out)
            .is_applied()
        {
            return;
        }

        let mut out = Vec::new();
        self.set_busy(&mut inner, false, &mut out);
        out.append(&mut transition_out);
        let resource = inner.session.resource().to_string();
        out.push(Advertisement::Completed {
            resource: resource.clone(),
            payload,
        });
        self.dispatcher.enqueue(out);

        info!(
            %kind,
            run = %inner.session.run_id(),
            %resource,
            elapsed_ms = inner.session.elapsed().as_millis() as u64,
            "operation complete"
        );
        let handle = inner.handle.take();
        let engine = inner.engine.clone();
        drop(inner);
        drop(handle);
        if let Some(engine) = engine {
            engine.set_logging_enabled(true);
        }
    }

    fn handle_failure(&self, run: u64, error: EngineError) {
        let Some(mut inner) = self.live(run) else {
            return;
        };
        let handle = self.fail_run(&mut inner, error.message.clone(), &error);
        let engine = inner.engine.clone();
        drop(inner);
        drop(handle);
        if let Some(engine) = engine {
            engine.set_logging_enabled(true);
        }
    }

    /// Moves to the kind's cancelled phase and advertises the stored reason.
    /// Returns the released handle so it is dropped outside the lock.
    fn finish_cancelled(
        &self,
        inner: &mut Inner<S::RunState>,
    ) -> Option<Arc<dyn ActiveTransfer>> {
        let kind = S::KIND;
        let reason = inner.session.cancel_reason().to_string();
        let mut out = Vec::new();
        self.set_busy(inner, false, &mut out);
        self.transition(inner, kind.cancelled_phase(), &mut out);
        out.push(Advertisement::Cancelled {
            reason: reason.clone(),
        });
        self.dispatcher.enqueue(out);

        info!(%kind, run = %inner.session.run_id(), %reason, "operation cancelled");
        inner.handle.take()
    }

    fn handle_cancelled(&self, run: u64) {
        let Some(mut inner) = self.live(run) else {
            return;
        };

        let handle = self.finish_cancelled(&mut inner);
        let engine = inner.engine.clone();
        drop(inner);
        drop(handle);
        if let Some(engine) = engine {
            engine.set_logging_enabled(true);
        }
    }
}

/// Callbacks handed to the engine for one run.
struct RunCallbacks<S: OperationStrategy> {
    shared: Weak<Shared<S>>,
    run: u64,
}

impl<S: OperationStrategy> EngineCallbacks for RunCallbacks<S> {
    fn on_progress(&self, bytes: u64, total: u64, at: Instant) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_progress(self.run, bytes, total, at);
        }
    }

    fn on_phase(&self, phase: EnginePhase) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_phase(self.run, phase);
        }
    }

    fn on_complete(&self, payload: Option<Vec<u8>>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_complete(self.run, payload);
        }
    }

    fn on_failure(&self, error: EngineError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_failure(self.run, error);
        }
    }

    fn on_cancelled(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_cancelled(self.run);
        }
    }
}
