use smpflow_protocol::LifecycleState;

const UPLOAD_FLOOR: u8 = 10;
const UPLOAD_SPAN: u8 = 40;

/// Whole-run progress of a firmware install.
///
/// Each install phase owns a fixed milestone; the upload phase interpolates
/// between 10 and 50. The figure never goes down during a run. Only a new
/// run (Idle) brings it back to 1.
#[derive(Debug, Default)]
pub struct OverallProgress {
    current: u8,
}

impl OverallProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milestone for entering `state`, if the state has one.
    pub fn milestone(state: LifecycleState) -> Option<u8> {
        match state {
            LifecycleState::None => Some(0),
            LifecycleState::Idle => Some(1),
            LifecycleState::Validating => Some(2),
            LifecycleState::Uploading => Some(UPLOAD_FLOOR),
            LifecycleState::Testing => Some(UPLOAD_FLOOR + UPLOAD_SPAN),
            LifecycleState::Resetting => Some(70),
            LifecycleState::Confirming => Some(80),
            LifecycleState::Complete => Some(100),
            _ => None,
        }
    }

    /// Applies a state change. Returns the new figure when it moved.
    pub fn on_state(&mut self, state: LifecycleState) -> Option<u8> {
        let target = Self::milestone(state)?;
        if state == LifecycleState::Idle {
            return self.set(target);
        }
        self.raise(target)
    }

    /// Applies an upload percentage. Returns the new figure when it moved.
    pub fn on_upload_percent(&mut self, percent: u8) -> Option<u8> {
        let percent = u16::from(percent.min(100));
        let scaled = u16::from(UPLOAD_FLOOR) + percent * u16::from(UPLOAD_SPAN) / 100;
        self.raise(scaled as u8)
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    fn raise(&mut self, target: u8) -> Option<u8> {
        if target > self.current {
            self.set(target)
        } else {
            None
        }
    }

    fn set(&mut self, target: u8) -> Option<u8> {
        if target == self.current {
            return None;
        }
        self.current = target;
        Some(target)
    }
}
