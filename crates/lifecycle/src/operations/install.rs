use std::time::Duration;

use smpflow_protocol::constants::SUSPICIOUS_SWAP_TIME;
use smpflow_protocol::{
    Advertisement, EngineError, InstallFatalErrorType, InstallMode, LifecycleState, OperationKind,
};
use smpflow_transfer::{OverallProgress, ProgressUpdate, TransferSession, image_fingerprint};

use super::{OperationStrategy, Prepared};
use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// Resource name used on install advertisements.
pub const INSTALL_RESOURCE: &str = "firmware";

/// How the new image is activated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSettings {
    pub mode: InstallMode,
    /// Wipe device settings as part of the install.
    pub erase_settings: bool,
    /// How long the bootloader needs to swap images.
    pub estimated_swap_time: Option<Duration>,
}

/// Uploads and activates a firmware image.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    /// Decoded image bytes. `None` and empty are both rejected.
    pub image: Option<Vec<u8>>,
    pub settings: InstallSettings,
}

impl InstallRequest {
    pub fn new(image: Option<Vec<u8>>) -> Self {
        Self {
            image,
            settings: InstallSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: InstallSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Install-only bookkeeping for one run.
#[derive(Debug, Default)]
pub struct InstallRunState {
    overall: OverallProgress,
    cached_reported: bool,
}

#[derive(Debug, Default)]
pub struct InstallStrategy;

impl OperationStrategy for InstallStrategy {
    const KIND: OperationKind = OperationKind::Install;
    type Request = InstallRequest;
    type RunState = InstallRunState;

    fn prepare(
        &self,
        request: InstallRequest,
        config: &LifecycleConfig,
    ) -> Result<Prepared, StartError> {
        let Some(image) = request.image else {
            return Err(StartError::InvalidData("no firmware image".into()));
        };
        if image.is_empty() {
            return Err(StartError::InvalidData("firmware image is empty".into()));
        }

        let settings = request.settings;
        let mut warnings = Vec::new();
        if let Some(swap) = settings.estimated_swap_time
            && swap <= SUSPICIOUS_SWAP_TIME
        {
            warnings.push(format!(
                "estimated swap time of {} ms is suspiciously low; did you mean seconds?",
                swap.as_millis()
            ));
        }

        let total = image.len() as u64;
        let fingerprint = image_fingerprint(&image);
        let mut prepared = Prepared::new(
            INSTALL_RESOURCE,
            EngineRequest::Install {
                image,
                fingerprint,
                mode: settings.mode,
                erase_settings: settings.erase_settings,
                estimated_swap_time: settings.estimated_swap_time,
                window_capacity: config.effective_window(),
                memory_alignment: config.effective_alignment(),
            },
        );
        prepared.total_bytes = Some(total);
        prepared.warnings = warnings;
        Ok(prepared)
    }

    fn on_transition(
        &self,
        run: &mut InstallRunState,
        _old: LifecycleState,
        new: LifecycleState,
        session: &TransferSession,
        out: &mut Vec<Advertisement>,
    ) {
        if let Some(percent) = run.overall.on_state(new) {
            out.push(Advertisement::OverallProgress { percent });
        }

        // At most one sample means the device skipped the upload.
        if !run.cached_reported && session.samples_seen() <= 1 {
            let active = match new {
                LifecycleState::Testing => Some(false),
                LifecycleState::Complete => Some(true),
                _ => None,
            };
            if let Some(active) = active {
                run.cached_reported = true;
                out.push(Advertisement::FirmwareAlreadyCached { active });
            }
        }
    }

    fn on_progress(
        &self,
        run: &mut InstallRunState,
        update: &ProgressUpdate,
        out: &mut Vec<Advertisement>,
    ) {
        if let Some(percent) = run.overall.on_upload_percent(update.percent) {
            out.push(Advertisement::OverallProgress { percent });
        }
    }

    fn fatal_error_type(
        &self,
        failed_in: LifecycleState,
        error: &EngineError,
    ) -> Option<InstallFatalErrorType> {
        Some(InstallFatalErrorType::for_phase(failed_in, error.is_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use smpflow_protocol::Verdict;

    use super::*;

    fn prepare(request: InstallRequest) -> Result<Prepared, StartError> {
        InstallStrategy.prepare(request, &LifecycleConfig::default())
    }

    #[test]
    fn missing_or_empty_image_is_invalid_data() {
        assert_eq!(
            prepare(InstallRequest::new(None)).unwrap_err().verdict(),
            Verdict::FailedInvalidData
        );
        assert_eq!(
            prepare(InstallRequest::new(Some(Vec::new()))).unwrap_err().verdict(),
            Verdict::FailedInvalidData
        );
    }

    #[test]
    fn fingerprint_and_defaults_reach_engine() {
        let prepared = prepare(InstallRequest::new(Some(b"hello".to_vec()))).unwrap();
        assert_eq!(prepared.resource, INSTALL_RESOURCE);
        assert_eq!(prepared.total_bytes, Some(5));
        assert!(prepared.warnings.is_empty());
        match prepared.request {
            EngineRequest::Install {
                fingerprint, mode, ..
            } => {
                assert_eq!(fingerprint, image_fingerprint(b"hello"));
                assert_eq!(mode, InstallMode::TestAndConfirm);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn short_swap_time_warns_but_passes() {
        let request = InstallRequest::new(Some(vec![1, 2, 3])).with_settings(InstallSettings {
            estimated_swap_time: Some(Duration::from_millis(30)),
            ..InstallSettings::default()
        });
        let prepared = prepare(request).unwrap();
        assert_eq!(prepared.warnings.len(), 1);
        assert!(prepared.warnings[0].contains("30 ms"));

        let request = InstallRequest::new(Some(vec![1])).with_settings(InstallSettings {
            estimated_swap_time: Some(Duration::from_secs(25)),
            ..InstallSettings::default()
        });
        assert!(prepare(request).unwrap().warnings.is_empty());
    }

    #[test]
    fn cached_image_detected_on_testing() {
        let strategy = InstallStrategy;
        let mut run = InstallRunState::default();
        let mut session = TransferSession::new();
        session.begin(INSTALL_RESOURCE, Some(10));
        let mut out = Vec::new();

        strategy.on_transition(
            &mut run,
            LifecycleState::Validating,
            LifecycleState::Testing,
            &session,
            &mut out,
        );
        strategy.on_transition(
            &mut run,
            LifecycleState::Confirming,
            LifecycleState::Complete,
            &session,
            &mut out,
        );

        let cached: Vec<_> = out
            .iter()
            .filter(|ad| matches!(ad, Advertisement::FirmwareAlreadyCached { .. }))
            .collect();
        assert_eq!(
            cached,
            vec![&Advertisement::FirmwareAlreadyCached { active: false }]
        );
    }

    #[test]
    fn failures_carry_phase_fatal_type() {
        let fatal = InstallStrategy.fatal_error_type(
            LifecycleState::Confirming,
            &EngineError::timeout("swap took too long"),
        );
        assert_eq!(
            fatal,
            Some(InstallFatalErrorType::FirmwareFinishingImageSwapTimeout)
        );
    }
}
