//! Per-kind lifecycle state machine.

use smpflow_protocol::{Advertisement, LifecycleState, OperationKind};
use smpflow_transfer::TransferSession;
use tracing::{trace, warn};

/// Result of asking the machine to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Applied {
        old: LifecycleState,
        new: LifecycleState,
    },
    /// Already in the requested state.
    Unchanged,
    /// A stale move into the transfer phase while paused or cancelling.
    Swallowed,
    /// Not a legal move for this kind.
    Rejected,
}

impl Transition {
    pub(crate) fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug)]
pub(crate) struct StateMachine {
    kind: OperationKind,
    state: LifecycleState,
}

impl StateMachine {
    pub(crate) fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            state: LifecycleState::None,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn is_cold(&self) -> bool {
        self.state.is_cold()
    }

    /// Moves to `new`, appending the advertisements the move produces.
    ///
    /// `on_applied` runs after the state-changed (and started) advertisement
    /// and before any injected 100 % progress, so per-kind extras land in
    /// between.
    pub(crate) fn transition<F>(
        &mut self,
        new: LifecycleState,
        session: &mut TransferSession,
        out: &mut Vec<Advertisement>,
        on_applied: F,
    ) -> Transition
    where
        F: FnOnce(LifecycleState, LifecycleState, &TransferSession, &mut Vec<Advertisement>),
    {
        let old = self.state;
        if old == new {
            return Transition::Unchanged;
        }

        if Some(new) == self.kind.transfer_phase()
            && matches!(old, LifecycleState::Paused | LifecycleState::Cancelling)
        {
            trace!(
                kind = %self.kind,
                from = %old,
                to = %new,
                "stale transfer-phase move swallowed"
            );
            return Transition::Swallowed;
        }

        self.apply(old, new, session, out, on_applied)
    }

    /// Leaves Paused for the kind's resume phase. Bypasses the stale-move
    /// guard, which would otherwise swallow install's Paused -> Uploading.
    pub(crate) fn resume<F>(
        &mut self,
        session: &mut TransferSession,
        out: &mut Vec<Advertisement>,
        on_applied: F,
    ) -> Transition
    where
        F: FnOnce(LifecycleState, LifecycleState, &TransferSession, &mut Vec<Advertisement>),
    {
        let (LifecycleState::Paused, Some(target)) = (self.state, self.kind.resume_phase()) else {
            return Transition::Rejected;
        };
        self.apply(LifecycleState::Paused, target, session, out, on_applied)
    }

    fn apply<F>(
        &mut self,
        old: LifecycleState,
        new: LifecycleState,
        session: &mut TransferSession,
        out: &mut Vec<Advertisement>,
        on_applied: F,
    ) -> Transition
    where
        F: FnOnce(LifecycleState, LifecycleState, &TransferSession, &mut Vec<Advertisement>),
    {
        if !self.is_legal(old, new) {
            warn!(kind = %self.kind, from = %old, to = %new, "illegal state transition ignored");
            return Transition::Rejected;
        }

        self.state = new;
        out.push(Advertisement::StateChanged { old, new });

        if old == LifecycleState::Idle && new.is_active() {
            out.push(Advertisement::Started {
                resource: session.resource().to_string(),
                total_bytes: session.total_bytes().unwrap_or(0),
            });
        }

        on_applied(old, new, session, out);

        if self.finishes_transfer(old, new) && session.last_percent() != Some(100) {
            session.mark_finished();
            out.push(Advertisement::Progress {
                resource: session.resource().to_string(),
                percent: 100,
                instant_kbps: 0.0,
                average_kbps: 0.0,
            });
        }

        Transition::Applied { old, new }
    }

    fn is_legal(&self, old: LifecycleState, new: LifecycleState) -> bool {
        if !self.kind.admits(new) {
            return false;
        }
        // A run only ever starts from Idle; finished runs only restart.
        if old == LifecycleState::None || old.is_terminal() {
            return new == LifecycleState::Idle;
        }
        true
    }

    /// Leaving the byte-moving part of a run successfully. Engines rarely
    /// report exactly 100 %, so the controller supplies it.
    fn finishes_transfer(&self, old: LifecycleState, new: LifecycleState) -> bool {
        if self.kind.transfer_phase().is_none() {
            return false;
        }
        match new {
            LifecycleState::Complete => true,
            LifecycleState::Testing | LifecycleState::Resetting | LifecycleState::Confirming => {
                self.kind == OperationKind::Install && old == LifecycleState::Uploading
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        _: LifecycleState,
        _: LifecycleState,
        _: &TransferSession,
        _: &mut Vec<Advertisement>,
    ) {
    }

    fn machine_at(kind: OperationKind, path: &[LifecycleState]) -> (StateMachine, TransferSession) {
        let mut machine = StateMachine::new(kind);
        let mut session = TransferSession::new();
        session.begin("/lfs/file.bin", Some(2048));
        let mut out = Vec::new();
        for state in path {
            assert!(machine.transition(*state, &mut session, &mut out, noop).is_applied());
        }
        (machine, session)
    }

    fn count_full_progress(out: &[Advertisement]) -> usize {
        out.iter()
            .filter(|ad| matches!(ad, Advertisement::Progress { percent: 100, .. }))
            .count()
    }

    #[test]
    fn same_state_is_a_silent_noop() {
        let (mut machine, mut session) =
            machine_at(OperationKind::Upload, &[LifecycleState::Idle, LifecycleState::Uploading]);
        let mut out = Vec::new();
        let t = machine.transition(LifecycleState::Uploading, &mut session, &mut out, noop);
        assert_eq!(t, Transition::Unchanged);
        assert!(out.is_empty());
    }

    #[test]
    fn started_emitted_once_from_idle() {
        let mut machine = StateMachine::new(OperationKind::Upload);
        let mut session = TransferSession::new();
        session.begin("/lfs/file.bin", Some(2048));
        let mut out = Vec::new();
        machine.transition(LifecycleState::Idle, &mut session, &mut out, noop);
        machine.transition(LifecycleState::Uploading, &mut session, &mut out, noop);
        machine.transition(LifecycleState::Paused, &mut session, &mut out, noop);
        machine.resume(&mut session, &mut out, noop);
        machine.transition(LifecycleState::Uploading, &mut session, &mut out, noop);

        let started: Vec<_> = out
            .iter()
            .filter(|ad| matches!(ad, Advertisement::Started { .. }))
            .collect();
        assert_eq!(
            started,
            vec![&Advertisement::Started {
                resource: "/lfs/file.bin".into(),
                total_bytes: 2048
            }]
        );
    }

    #[test]
    fn completion_injects_single_full_progress_after_state_change() {
        let (mut machine, mut session) =
            machine_at(OperationKind::Upload, &[LifecycleState::Idle, LifecycleState::Uploading]);
        let mut out = Vec::new();
        machine.transition(LifecycleState::Complete, &mut session, &mut out, noop);
        assert_eq!(
            out,
            vec![
                Advertisement::StateChanged {
                    old: LifecycleState::Uploading,
                    new: LifecycleState::Complete
                },
                Advertisement::Progress {
                    resource: "/lfs/file.bin".into(),
                    percent: 100,
                    instant_kbps: 0.0,
                    average_kbps: 0.0
                },
            ]
        );
    }

    #[test]
    fn install_injects_full_progress_when_upload_ends() {
        let (mut machine, mut session) = machine_at(
            OperationKind::Install,
            &[LifecycleState::Idle, LifecycleState::Validating, LifecycleState::Uploading],
        );
        let mut out = Vec::new();
        for state in [
            LifecycleState::Testing,
            LifecycleState::Resetting,
            LifecycleState::Confirming,
            LifecycleState::Complete,
        ] {
            machine.transition(state, &mut session, &mut out, noop);
        }
        assert_eq!(count_full_progress(&out), 1);
        assert!(matches!(
            out[1],
            Advertisement::Progress { percent: 100, .. }
        ));
    }

    #[test]
    fn reset_never_injects_progress() {
        let (mut machine, mut session) =
            machine_at(OperationKind::Reset, &[LifecycleState::Idle, LifecycleState::Resetting]);
        let mut out = Vec::new();
        machine.transition(LifecycleState::Complete, &mut session, &mut out, noop);
        assert_eq!(count_full_progress(&out), 0);
    }

    #[test]
    fn transfer_phase_swallowed_while_paused() {
        let (mut machine, mut session) = machine_at(
            OperationKind::Download,
            &[
                LifecycleState::Idle,
                LifecycleState::Downloading,
                LifecycleState::Paused,
            ],
        );
        let mut out = Vec::new();
        let t = machine.transition(LifecycleState::Downloading, &mut session, &mut out, noop);
        assert_eq!(t, Transition::Swallowed);
        assert_eq!(machine.state(), LifecycleState::Paused);
        assert!(out.is_empty());
    }

    #[test]
    fn transfer_phase_swallowed_while_cancelling() {
        let (mut machine, mut session) = machine_at(
            OperationKind::Upload,
            &[LifecycleState::Idle, LifecycleState::Cancelling],
        );
        let mut out = Vec::new();
        let t = machine.transition(LifecycleState::Uploading, &mut session, &mut out, noop);
        assert_eq!(t, Transition::Swallowed);
        assert_eq!(machine.state(), LifecycleState::Cancelling);
    }

    #[test]
    fn install_resume_goes_straight_to_uploading() {
        let (mut machine, mut session) = machine_at(
            OperationKind::Install,
            &[
                LifecycleState::Idle,
                LifecycleState::Uploading,
                LifecycleState::Paused,
            ],
        );
        let mut out = Vec::new();
        let t = machine.resume(&mut session, &mut out, noop);
        assert_eq!(
            t,
            Transition::Applied {
                old: LifecycleState::Paused,
                new: LifecycleState::Uploading
            }
        );
    }

    #[test]
    fn inadmissible_state_rejected() {
        let (mut machine, mut session) = machine_at(OperationKind::Erase, &[LifecycleState::Idle]);
        let mut out = Vec::new();
        let t = machine.transition(LifecycleState::Paused, &mut session, &mut out, noop);
        assert_eq!(t, Transition::Rejected);
        assert_eq!(machine.state(), LifecycleState::Idle);
        assert!(out.is_empty());
    }

    #[test]
    fn terminal_only_accepts_idle() {
        let (mut machine, mut session) = machine_at(
            OperationKind::Upload,
            &[LifecycleState::Idle, LifecycleState::Error],
        );
        let mut out = Vec::new();
        assert_eq!(
            machine.transition(LifecycleState::Uploading, &mut session, &mut out, noop),
            Transition::Rejected
        );
        assert_eq!(
            machine.transition(LifecycleState::Complete, &mut session, &mut out, noop),
            Transition::Rejected
        );
        assert!(machine.is_cold());
        assert!(
            machine
                .transition(LifecycleState::Idle, &mut session, &mut out, noop)
                .is_applied()
        );
        assert!(!machine.is_cold());
    }

    #[test]
    fn hook_runs_between_state_change_and_injected_progress() {
        let (mut machine, mut session) =
            machine_at(OperationKind::Upload, &[LifecycleState::Idle, LifecycleState::Uploading]);
        let mut out = Vec::new();
        machine.transition(
            LifecycleState::Complete,
            &mut session,
            &mut out,
            |_, _, _, out| out.push(Advertisement::OverallProgress { percent: 100 }),
        );
        assert!(matches!(out[0], Advertisement::StateChanged { .. }));
        assert_eq!(out[1], Advertisement::OverallProgress { percent: 100 });
        assert!(matches!(out[2], Advertisement::Progress { percent: 100, .. }));
    }
}
