/// Which selector an attempt runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The selector the client asked for (or the fallback, if it asked for none).
    Requested,
    /// The single retry, always with the fallback selector.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The extractor could not be started.
    Spawn(String),
    /// The extractor exited unsuccessfully and no retry is left.
    Download { detail: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The response stream went away.
    ClientDisconnect,
    /// A newer download request took over the same session id.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Starting { selector: String, attempt: Attempt },
    Streaming { selector: String, attempt: Attempt },
    Retrying,
    Complete,
    Failed(Failure),
    Aborted(AbortReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed(_) | SessionState::Aborted(_))
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    retry_attempted: bool,
    fallback: String,
}

impl Lifecycle {
    pub fn new(requested: Option<&str>, fallback: impl Into<String>) -> Self {
        let fallback = fallback.into();
        let selector = requested.unwrap_or(&fallback).to_string();
        Self {
            state: SessionState::Starting { selector, attempt: Attempt::Requested },
            retry_attempted: false,
            fallback,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn retry_attempted(&self) -> bool {
        self.retry_attempted
    }

    /// Starting -> Streaming.
    pub fn spawned(&mut self) {
        let next = match &self.state {
            SessionState::Starting { selector, attempt } => {
                SessionState::Streaming { selector: selector.clone(), attempt: *attempt }
            }
            other => {
                tracing::warn!("ignoring spawn notification in state {:?}", other);
                return;
            }
        };
        self.state = next;
    }

    /// Starting -> Failed. A process that never ran is not retried.
    pub fn spawn_failed(&mut self, reason: impl Into<String>) {
        if matches!(self.state, SessionState::Starting { .. }) {
            self.state = SessionState::Failed(Failure::Spawn(reason.into()));
        } else {
            tracing::warn!("ignoring spawn failure in state {:?}", self.state);
        }
    }

    /// Streaming -> Complete | Retrying | Failed.
    pub fn exited(&mut self, success: bool, detail: Option<String>) {
        if !matches!(self.state, SessionState::Streaming { .. }) {
            tracing::warn!("ignoring process exit in state {:?}", self.state);
            return;
        }
        self.state = if success {
            SessionState::Complete
        } else if !self.retry_attempted {
            self.retry_attempted = true;
            SessionState::Retrying
        } else {
            SessionState::Failed(Failure::Download { detail })
        };
    }

    /// Retrying -> Starting with the fallback selector.
    pub fn restart(&mut self) {
        if self.state == SessionState::Retrying {
            self.state = SessionState::Starting { selector: self.fallback.clone(), attempt: Attempt::Fallback };
        } else {
            tracing::warn!("ignoring restart in state {:?}", self.state);
        }
    }

    /// Any live state -> Aborted. Terminal states stay as they are.
    pub fn abort(&mut self, reason: AbortReason) {
        if !self.state.is_terminal() {
            self.state = SessionState::Aborted(reason);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: &str = "best";

    fn streaming(lifecycle: &mut Lifecycle) {
        lifecycle.spawned();
        assert!(matches!(lifecycle.state(), SessionState::Streaming { .. }));
    }

    #[test]
    fn requested_selector_is_used_first() {
        let lifecycle = Lifecycle::new(Some("137+140"), FALLBACK);
        assert_eq!(
            lifecycle.state(),
            &SessionState::Starting { selector: "137+140".into(), attempt: Attempt::Requested }
        );
    }

    #[test]
    fn missing_selector_starts_with_fallback() {
        let lifecycle = Lifecycle::new(None, FALLBACK);
        assert_eq!(
            lifecycle.state(),
            &SessionState::Starting { selector: FALLBACK.into(), attempt: Attempt::Requested }
        );
    }

    #[test]
    fn success_completes() {
        let mut lifecycle = Lifecycle::new(Some("22"), FALLBACK);
        streaming(&mut lifecycle);
        lifecycle.exited(true, None);
        assert_eq!(lifecycle.state(), &SessionState::Complete);
        assert!(!lifecycle.retry_attempted());
    }

    #[test]
    fn first_failure_retries_once_with_fallback() {
        let mut lifecycle = Lifecycle::new(Some("22"), FALLBACK);
        streaming(&mut lifecycle);
        lifecycle.exited(false, Some("ERROR: 403".into()));
        assert_eq!(lifecycle.state(), &SessionState::Retrying);
        assert!(lifecycle.retry_attempted());

        lifecycle.restart();
        assert_eq!(
            lifecycle.state(),
            &SessionState::Starting { selector: FALLBACK.into(), attempt: Attempt::Fallback }
        );
        streaming(&mut lifecycle);
        lifecycle.exited(true, None);
        assert_eq!(lifecycle.state(), &SessionState::Complete);
    }

    #[test]
    fn second_failure_is_terminal() {
        let mut lifecycle = Lifecycle::new(Some("22"), FALLBACK);
        let mut attempts = 0;
        while !lifecycle.is_terminal() {
            match lifecycle.state() {
                SessionState::Starting { .. } => {
                    attempts += 1;
                    lifecycle.spawned();
                }
                SessionState::Streaming { .. } => lifecycle.exited(false, Some("boom".into())),
                SessionState::Retrying => lifecycle.restart(),
                other => panic!("unexpected state {other:?}"),
            }
        }
        assert_eq!(attempts, 2);
        assert_eq!(
            lifecycle.state(),
            &SessionState::Failed(Failure::Download { detail: Some("boom".into()) })
        );
    }

    #[test]
    fn spawn_failure_is_not_retried() {
        let mut lifecycle = Lifecycle::new(Some("22"), FALLBACK);
        lifecycle.spawn_failed("No such file or directory");
        assert_eq!(
            lifecycle.state(),
            &SessionState::Failed(Failure::Spawn("No such file or directory".into()))
        );
        lifecycle.restart();
        assert!(lifecycle.is_terminal());
    }

    #[test]
    fn disconnect_aborts_without_retry() {
        let mut lifecycle = Lifecycle::new(Some("22"), FALLBACK);
        streaming(&mut lifecycle);
        lifecycle.abort(AbortReason::ClientDisconnect);
        assert_eq!(lifecycle.state(), &SessionState::Aborted(AbortReason::ClientDisconnect));
        assert!(!lifecycle.retry_attempted());

        lifecycle.exited(false, None);
        assert_eq!(lifecycle.state(), &SessionState::Aborted(AbortReason::ClientDisconnect));
    }

    #[test]
    fn terminal_states_ignore_abort() {
        let mut lifecycle = Lifecycle::new(None, FALLBACK);
        streaming(&mut lifecycle);
        lifecycle.exited(true, None);
        lifecycle.abort(AbortReason::Superseded);
        assert_eq!(lifecycle.state(), &SessionState::Complete);
    }
}
