//! ModeController - operating mode state machine
//!
//! Only the transitions below are legal:
//!
//! ```text
//! Normal ──► Restricted ──► Normal
//! Normal ──► DataInjection | ReplayDataInjection | HalBypassReplayDataInjection ──► Normal
//! ```
//!
//! `plan` validates a request without side effects; the hub executes the
//! returned transition and then calls `commit`.

use contracts::OperatingMode;

use crate::error::{HubError, HubResult};

/// Work the hub must do to move between two modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// Already in the requested mode
    NoOp,
    EnterRestricted,
    ExitRestricted,
    EnterInjection(OperatingMode),
    ExitInjection(OperatingMode),
}

#[derive(Debug, Default)]
pub struct ModeController {
    mode: OperatingMode,
    allow_listed_package: Option<String>,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn allow_listed_package(&self) -> Option<&str> {
        self.allow_listed_package.as_deref()
    }

    pub fn is_allow_listed(&self, package: &str) -> bool {
        self.allow_listed_package.as_deref() == Some(package)
    }

    /// Whether `package` may subscribe in the current mode.
    ///
    /// Replay keeps hardware running for everyone.
    pub fn may_enable(&self, package: &str) -> bool {
        match self.mode {
            OperatingMode::Normal | OperatingMode::ReplayDataInjection => true,
            _ => self.is_allow_listed(package),
        }
    }

    /// Whether `package` may open a connection in the current mode
    pub fn may_connect(&self, package: &str) -> bool {
        self.mode == OperatingMode::Normal || self.is_allow_listed(package)
    }

    /// Validate a transition request
    pub fn plan(&self, target: OperatingMode, package: Option<&str>) -> HubResult<ModeTransition> {
        if target == self.mode {
            return Ok(ModeTransition::NoOp);
        }
        if target != OperatingMode::Normal && package.is_none_or(str::is_empty) {
            return Err(HubError::invalid_argument(format!(
                "mode {target} requires an allow-listed package"
            )));
        }

        match (self.mode, target) {
            (OperatingMode::Normal, OperatingMode::Restricted) => Ok(ModeTransition::EnterRestricted),
            (OperatingMode::Restricted, OperatingMode::Normal) => Ok(ModeTransition::ExitRestricted),
            (OperatingMode::Normal, t) if t.is_injection() => Ok(ModeTransition::EnterInjection(t)),
            (from, OperatingMode::Normal) if from.is_injection() => {
                Ok(ModeTransition::ExitInjection(from))
            }
            (from, to) => Err(HubError::invalid_operation(format!(
                "illegal mode transition {from} -> {to}"
            ))),
        }
    }

    /// Record a completed transition
    pub fn commit(&mut self, target: OperatingMode, package: Option<&str>) {
        self.mode = target;
        self.allow_listed_package = match target {
            OperatingMode::Normal => None,
            _ => package.map(str::to_owned),
        };
        observability::metrics::record_operating_mode(target.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let mut ctl = ModeController::new();
        assert_eq!(
            ctl.plan(OperatingMode::Restricted, Some("pkg")).unwrap(),
            ModeTransition::EnterRestricted
        );
        ctl.commit(OperatingMode::Restricted, Some("pkg"));
        assert!(ctl.is_allow_listed("pkg"));

        assert_eq!(
            ctl.plan(OperatingMode::Normal, None).unwrap(),
            ModeTransition::ExitRestricted
        );
        ctl.commit(OperatingMode::Normal, None);
        assert_eq!(ctl.allow_listed_package(), None);

        assert_eq!(
            ctl.plan(OperatingMode::ReplayDataInjection, Some("pkg")).unwrap(),
            ModeTransition::EnterInjection(OperatingMode::ReplayDataInjection)
        );
    }

    #[test]
    fn test_restricted_to_injection_rejected() {
        let mut ctl = ModeController::new();
        ctl.commit(OperatingMode::Restricted, Some("pkg"));

        let err = ctl
            .plan(OperatingMode::DataInjection, Some("pkg"))
            .unwrap_err();
        assert!(matches!(err, HubError::InvalidOperation(_)));
        assert_eq!(ctl.mode(), OperatingMode::Restricted);
    }

    #[test]
    fn test_package_required() {
        let ctl = ModeController::new();
        assert!(matches!(
            ctl.plan(OperatingMode::DataInjection, None),
            Err(HubError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctl.plan(OperatingMode::Restricted, Some("")),
            Err(HubError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_same_mode_is_noop() {
        let ctl = ModeController::new();
        assert_eq!(
            ctl.plan(OperatingMode::Normal, None).unwrap(),
            ModeTransition::NoOp
        );
    }

    #[test]
    fn test_gates() {
        let mut ctl = ModeController::new();
        assert!(ctl.may_connect("other"));

        ctl.commit(OperatingMode::ReplayDataInjection, Some("pkg"));
        assert!(ctl.may_enable("other"));
        assert!(!ctl.may_connect("other"));
        assert!(ctl.may_connect("pkg"));

        ctl.commit(OperatingMode::Normal, None);
        ctl.commit(OperatingMode::Restricted, Some("pkg"));
        assert!(!ctl.may_enable("other"));
        assert!(ctl.may_enable("pkg"));
    }
}
