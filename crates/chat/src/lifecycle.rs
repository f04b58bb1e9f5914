use crate::message::StreamTarget;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream delivered its terminal signal.
    Completed,
    /// The stream ended, or broke, before the terminal signal. Partial content stands.
    Truncated { error: Option<String> },
    /// The stream could not be opened.
    OpenFailed { message: String },
    /// The caller abandoned the turn.
    Cancelled,
}

/// Request lifecycle of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestLifecycle {
    #[default]
    Idle,
    Pending(StreamTarget),
    Settled {
        target: StreamTarget,
        outcome: TurnOutcome,
    },
}

/// State transition input for the request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleTransition {
    Start(StreamTarget),
    Settle {
        target: StreamTarget,
        outcome: TurnOutcome,
    },
}

/// Rejection reason for illegal lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleRejection {
    AlreadyPending {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveTurn,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type LifecycleResult = Result<RequestLifecycle, LifecycleRejection>;

impl RequestLifecycle {
    /// Returns the in-flight target if and only if the state is `Pending`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Pending(target) => Some(*target),
            Self::Idle | Self::Settled { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Returns true when stream data for `target` belongs to the in-flight turn.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Pending(active) if *active == target)
    }

    pub fn outcome(&self) -> Option<&TurnOutcome> {
        match self {
            Self::Settled { outcome, .. } => Some(outcome),
            Self::Idle | Self::Pending(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// `Idle` and `Settled` may start a new turn; settling must name the in-flight
    /// target exactly.
    pub fn apply(&self, transition: LifecycleTransition) -> LifecycleResult {
        match transition {
            LifecycleTransition::Start(target) => self.apply_start(target),
            LifecycleTransition::Settle { target, outcome } => self.apply_settle(target, outcome),
        }
    }

    fn apply_start(&self, target: StreamTarget) -> LifecycleResult {
        match self {
            Self::Pending(active) => Err(LifecycleRejection::AlreadyPending {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Settled { .. } => Ok(Self::Pending(target)),
        }
    }

    fn apply_settle(&self, target: StreamTarget, outcome: TurnOutcome) -> LifecycleResult {
        match self {
            Self::Pending(active) if *active == target => Ok(Self::Settled { target, outcome }),
            Self::Pending(active) => Err(LifecycleRejection::SessionMismatch {
                active: *active,
                attempted: target,
            }),
            Self::Idle | Self::Settled { .. } => Err(LifecycleRejection::NoActiveTurn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ConversationId, StreamSessionId};

    fn target(session: u64) -> StreamTarget {
        StreamTarget::new(ConversationId::new(1), StreamSessionId::new(session))
    }

    #[test]
    fn start_then_settle_then_start_again() {
        let pending = RequestLifecycle::Idle
            .apply(LifecycleTransition::Start(target(1)))
            .unwrap();
        assert_eq!(pending.active_target(), Some(target(1)));
        assert!(pending.is_pending());

        let settled = pending
            .apply(LifecycleTransition::Settle {
                target: target(1),
                outcome: TurnOutcome::Completed,
            })
            .unwrap();
        assert!(!settled.is_pending());
        assert_eq!(settled.outcome(), Some(&TurnOutcome::Completed));

        let next = settled.apply(LifecycleTransition::Start(target(2))).unwrap();
        assert!(next.accepts_stream_event(target(2)));
        assert!(!next.accepts_stream_event(target(1)));
    }

    #[test]
    fn overlapping_start_is_rejected() {
        let pending = RequestLifecycle::Pending(target(1));
        assert_eq!(
            pending.apply(LifecycleTransition::Start(target(2))),
            Err(LifecycleRejection::AlreadyPending {
                active: target(1),
                attempted: target(2),
            })
        );
    }

    #[test]
    fn settle_requires_the_active_session() {
        let pending = RequestLifecycle::Pending(target(2));
        assert_eq!(
            pending.apply(LifecycleTransition::Settle {
                target: target(1),
                outcome: TurnOutcome::Cancelled,
            }),
            Err(LifecycleRejection::SessionMismatch {
                active: target(2),
                attempted: target(1),
            })
        );
        assert_eq!(
            RequestLifecycle::Idle.apply(LifecycleTransition::Settle {
                target: target(1),
                outcome: TurnOutcome::Completed,
            }),
            Err(LifecycleRejection::NoActiveTurn)
        );
    }
}
