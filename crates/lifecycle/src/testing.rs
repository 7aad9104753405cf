//! Scripted engine used by the controller tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use smpflow_protocol::{Advertisement, ConnectionTarget, EngineError};
use tokio::sync::mpsc;

use crate::engine::{
    ActiveTransfer, EngineCallbacks, EngineFactory, EnginePhase, EngineRequest, TransferEngine,
};

/// Shared record of everything the fake engine was asked to do.
#[derive(Default)]
pub(crate) struct FakeState {
    pub initializations: AtomicUsize,
    pub releases: AtomicUsize,
    pub fail_initialize: Mutex<Option<EngineError>>,
    pub fail_begin: Mutex<Option<EngineError>>,
    pub fail_pause: AtomicBool,
    pub fail_resume: AtomicBool,
    pub fail_cancel: AtomicBool,
    /// Completes the run from inside `begin`.
    pub complete_on_begin: AtomicBool,
    /// Fails runs for these remote paths from inside `begin`.
    pub fail_paths: Mutex<Vec<String>>,
    pub commands: Mutex<Vec<&'static str>>,
    pub logging: Mutex<Vec<bool>>,
    pub requests: Mutex<Vec<EngineRequest>>,
    pub targets: Mutex<Vec<ConnectionTarget>>,
    callbacks: Mutex<Vec<Arc<dyn EngineCallbacks>>>,
    epoch: Mutex<Option<Instant>>,
}

impl FakeState {
    /// Callbacks handed over by the latest `begin`.
    pub fn callbacks(&self) -> Arc<dyn EngineCallbacks> {
        self.callbacks_of(self.runs() - 1)
    }

    /// Callbacks of the `n`th run, counting from zero.
    pub fn callbacks_of(&self, n: usize) -> Arc<dyn EngineCallbacks> {
        Arc::clone(&self.callbacks.lock().unwrap()[n])
    }

    pub fn runs(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.commands.lock().unwrap().clone()
    }

    /// Reports `bytes` of `total` at `ms` milliseconds into the run.
    pub fn progress_at(&self, bytes: u64, total: u64, ms: u64) {
        let epoch = *self.epoch.lock().unwrap().get_or_insert_with(Instant::now);
        self.callbacks()
            .on_progress(bytes, total, epoch + Duration::from_millis(ms));
    }

    pub fn phase(&self, phase: EnginePhase) {
        self.callbacks().on_phase(phase);
    }

    pub fn complete(&self, payload: Option<Vec<u8>>) {
        self.callbacks().on_complete(payload);
    }

    pub fn fail(&self, error: EngineError) {
        self.callbacks().on_failure(error);
    }

    pub fn cancelled(&self) {
        self.callbacks().on_cancelled();
    }
}

pub(crate) struct FakeEngineFactory {
    state: Arc<FakeState>,
}

impl FakeEngineFactory {
    pub fn new() -> (Arc<Self>, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        (
            Arc::new(Self {
                state: Arc::clone(&state),
            }),
            state,
        )
    }
}

impl EngineFactory for FakeEngineFactory {
    fn initialize(
        &self,
        target: &ConnectionTarget,
        _mtu_hint: Option<u16>,
    ) -> Result<Arc<dyn TransferEngine>, EngineError> {
        self.state.initializations.fetch_add(1, Ordering::SeqCst);
        self.state.targets.lock().unwrap().push(target.clone());
        if let Some(error) = self.state.fail_initialize.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(Arc::new(FakeEngine {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeEngine {
    state: Arc<FakeState>,
}

impl TransferEngine for FakeEngine {
    fn begin(
        &self,
        request: EngineRequest,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Result<Arc<dyn ActiveTransfer>, EngineError> {
        self.state.commands.lock().unwrap().push("begin");
        if let Some(error) = self.state.fail_begin.lock().unwrap().clone() {
            return Err(error);
        }
        let failing = match &request {
            EngineRequest::Upload { remote_path, .. } | EngineRequest::Download { remote_path } => {
                self.state.fail_paths.lock().unwrap().contains(remote_path)
            }
            _ => false,
        };
        self.state.requests.lock().unwrap().push(request);
        self.state.callbacks.lock().unwrap().push(Arc::clone(&callbacks));
        *self.state.epoch.lock().unwrap() = None;
        if failing {
            callbacks.on_failure(EngineError::device("file failed", 5));
        } else if self.state.complete_on_begin.load(Ordering::SeqCst) {
            callbacks.on_complete(None);
        }
        Ok(Arc::new(FakeTransfer {
            state: Arc::clone(&self.state),
        }))
    }

    fn set_logging_enabled(&self, enabled: bool) {
        self.state.logging.lock().unwrap().push(enabled);
    }

    fn request_high_priority(&self) {
        self.state.commands.lock().unwrap().push("high_priority");
    }

    fn release(&self) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeTransfer {
    state: Arc<FakeState>,
}

impl ActiveTransfer for FakeTransfer {
    fn pause(&self) -> Result<(), EngineError> {
        self.state.commands.lock().unwrap().push("pause");
        if self.state.fail_pause.load(Ordering::SeqCst) {
            return Err(EngineError::transport("link busy"));
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), EngineError> {
        self.state.commands.lock().unwrap().push("resume");
        if self.state.fail_resume.load(Ordering::SeqCst) {
            return Err(EngineError::transport("link busy"));
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), EngineError> {
        self.state.commands.lock().unwrap().push("cancel");
        if self.state.fail_cancel.load(Ordering::SeqCst) {
            return Err(EngineError::transport("link lost"));
        }
        Ok(())
    }
}

/// Everything currently buffered in `rx`.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Advertisement>) -> Vec<Advertisement> {
    let mut ads = Vec::new();
    while let Ok(ad) = rx.try_recv() {
        ads.push(ad);
    }
    ads
}

/// Percent figures of every progress advertisement, in order.
pub(crate) fn percents(ads: &[Advertisement]) -> Vec<u8> {
    ads.iter()
        .filter_map(|ad| match ad {
            Advertisement::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

/// Destination state of every state-changed advertisement, in order.
pub(crate) fn states(ads: &[Advertisement]) -> Vec<smpflow_protocol::LifecycleState> {
    ads.iter()
        .filter_map(|ad| match ad {
            Advertisement::StateChanged { new, .. } => Some(*new),
            _ => None,
        })
        .collect()
}
