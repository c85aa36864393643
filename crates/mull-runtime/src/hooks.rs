//! Lifecycle callbacks fired by the Executor.

use std::sync::Arc;

use crate::executor::RunOutput;
use crate::handoff::HandoffInput;
use mull_core::{MullError, Observation, Result, RunContext, ToolCall};

/// What an `on_error` hook wants done with a fatal error.
#[derive(Debug)]
pub enum ErrorDecision {
    /// Keep the original error.
    Propagate,
    /// Fail with this error instead.
    Replace(MullError),
    /// Drop the error and move on to the next iteration.
    Suppress,
}

pub type StartHook = Arc<dyn Fn(&RunContext, &str) -> Result<()> + Send + Sync>;
pub type IterationHook = Arc<dyn Fn(&RunContext, usize) + Send + Sync>;
pub type ToolCallHook = Arc<dyn Fn(&RunContext, &ToolCall) -> Result<()> + Send + Sync>;
pub type ToolResultHook = Arc<dyn Fn(&RunContext, &Observation) + Send + Sync>;
pub type HandoffHook = Arc<dyn Fn(&RunContext, &str, &HandoffInput) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&RunContext, &MullError) -> ErrorDecision + Send + Sync>;
pub type EndHook = Arc<dyn Fn(&RunContext, &Result<RunOutput>) + Send + Sync>;

/// Optional callbacks for one Executor. Unset hooks are skipped.
///
/// - `on_start`: an error aborts the run before the first plan.
/// - `on_tool_call`: an error vetoes the call; the veto becomes an error
///   observation. `transfer_to_{id}` calls pass through it too; planner
///   `Handoff` actions do not.
/// - `on_error`: sees planner, model and invalid-action failures; may
///   replace or suppress them.
/// - `on_end`: fires exactly once with the final outcome.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_start: Option<StartHook>,
    pub on_iteration: Option<IterationHook>,
    pub on_tool_call: Option<ToolCallHook>,
    pub on_tool_result: Option<ToolResultHook>,
    pub on_handoff: Option<HandoffHook>,
    pub on_error: Option<ErrorHook>,
    pub on_end: Option<EndHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_iteration<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, usize) + Send + Sync + 'static,
    {
        self.on_iteration = Some(Arc::new(f));
        self
    }

    pub fn on_tool_call<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &ToolCall) -> Result<()> + Send + Sync + 'static,
    {
        self.on_tool_call = Some(Arc::new(f));
        self
    }

    pub fn on_tool_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &Observation) + Send + Sync + 'static,
    {
        self.on_tool_result = Some(Arc::new(f));
        self
    }

    pub fn on_handoff<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &str, &HandoffInput) + Send + Sync + 'static,
    {
        self.on_handoff = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &MullError) -> ErrorDecision + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext, &Result<RunOutput>) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(f));
        self
    }

    /// Chain several hook sets into one, called in order.
    ///
    /// `on_start` and `on_tool_call` stop at the first error. `on_error`
    /// returns the first decision that is not `Suppress`; the error is
    /// suppressed only when every hook suppresses it.
    pub fn compose(all: Vec<Hooks>) -> Hooks {
        let all = Arc::new(all);
        let mut out = Hooks::new();

        if all.iter().any(|h| h.on_start.is_some()) {
            let hs = Arc::clone(&all);
            out.on_start = Some(Arc::new(move |ctx: &RunContext, input: &str| {
                for f in hs.iter().filter_map(|h| h.on_start.as_ref()) {
                    f(ctx, input)?;
                }
                Ok(())
            }));
        }
        if all.iter().any(|h| h.on_iteration.is_some()) {
            let hs = Arc::clone(&all);
            out.on_iteration = Some(Arc::new(move |ctx: &RunContext, n: usize| {
                for f in hs.iter().filter_map(|h| h.on_iteration.as_ref()) {
                    f(ctx, n);
                }
            }));
        }
        if all.iter().any(|h| h.on_tool_call.is_some()) {
            let hs = Arc::clone(&all);
            out.on_tool_call = Some(Arc::new(move |ctx: &RunContext, call: &ToolCall| {
                for f in hs.iter().filter_map(|h| h.on_tool_call.as_ref()) {
                    f(ctx, call)?;
                }
                Ok(())
            }));
        }
        if all.iter().any(|h| h.on_tool_result.is_some()) {
            let hs = Arc::clone(&all);
            out.on_tool_result = Some(Arc::new(move |ctx: &RunContext, obs: &Observation| {
                for f in hs.iter().filter_map(|h| h.on_tool_result.as_ref()) {
                    f(ctx, obs);
                }
            }));
        }
        if all.iter().any(|h| h.on_handoff.is_some()) {
            let hs = Arc::clone(&all);
            out.on_handoff = Some(Arc::new(move |ctx: &RunContext, target: &str, input: &HandoffInput| {
                for f in hs.iter().filter_map(|h| h.on_handoff.as_ref()) {
                    f(ctx, target, input);
                }
            }));
        }
        if all.iter().any(|h| h.on_error.is_some()) {
            let hs = Arc::clone(&all);
            out.on_error = Some(Arc::new(move |ctx: &RunContext, err: &MullError| {
                for f in hs.iter().filter_map(|h| h.on_error.as_ref()) {
                    match f(ctx, err) {
                        ErrorDecision::Suppress => {}
                        decision => return decision,
                    }
                }
                ErrorDecision::Suppress
            }));
        }
        if all.iter().any(|h| h.on_end.is_some()) {
            let hs = Arc::clone(&all);
            out.on_end = Some(Arc::new(move |ctx: &RunContext, outcome: &Result<RunOutput>| {
                for f in hs.iter().filter_map(|h| h.on_end.as_ref()) {
                    f(ctx, outcome);
                }
            }));
        }
        out
    }

    // ── Dispatch helpers used by the Executor ──────────────────

    pub(crate) fn start(&self, ctx: &RunContext, input: &str) -> Result<()> {
        match &self.on_start {
            Some(f) => f(ctx, input),
            None => Ok(()),
        }
    }

    pub(crate) fn iteration(&self, ctx: &RunContext, n: usize) {
        if let Some(f) = &self.on_iteration {
            f(ctx, n);
        }
    }

    pub(crate) fn tool_call(&self, ctx: &RunContext, call: &ToolCall) -> Result<()> {
        match &self.on_tool_call {
            Some(f) => f(ctx, call),
            None => Ok(()),
        }
    }

    pub(crate) fn tool_result(&self, ctx: &RunContext, obs: &Observation) {
        if let Some(f) = &self.on_tool_result {
            f(ctx, obs);
        }
    }

    pub(crate) fn handoff(&self, ctx: &RunContext, target: &str, input: &HandoffInput) {
        if let Some(f) = &self.on_handoff {
            f(ctx, target, input);
        }
    }

    /// `None` means the error was suppressed.
    pub(crate) fn error(&self, ctx: &RunContext, err: MullError) -> Option<MullError> {
        let Some(f) = &self.on_error else {
            return Some(err);
        };
        match f(ctx, &err) {
            ErrorDecision::Propagate => Some(err),
            ErrorDecision::Replace(other) => Some(other),
            ErrorDecision::Suppress => None,
        }
    }

    pub(crate) fn end(&self, ctx: &RunContext, outcome: &Result<RunOutput>) {
        if let Some(f) = &self.on_end {
            f(ctx, outcome);
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_iteration", &self.on_iteration.is_some())
            .field("on_tool_call", &self.on_tool_call.is_some())
            .field("on_tool_result", &self.on_tool_result.is_some())
            .field("on_handoff", &self.on_handoff.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_compose_start_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        let hooks = Hooks::compose(vec![
            Hooks::new().on_start(move |_, _| {
                a.lock().push("first");
                Err(MullError::Hook("no".into()))
            }),
            Hooks::new().on_start(move |_, _| {
                b.lock().push("second");
                Ok(())
            }),
        ]);
        let ctx = RunContext::detached("a");
        assert!(hooks.start(&ctx, "hi").is_err());
        assert_eq!(*seen.lock(), vec!["first"]);
    }

    #[test]
    fn test_compose_error_first_non_suppressing_wins() {
        let hooks = Hooks::compose(vec![
            Hooks::new().on_error(|_, _| ErrorDecision::Suppress),
            Hooks::new().on_error(|_, _| ErrorDecision::Replace(MullError::Hook("second".into()))),
            Hooks::new().on_error(|_, _| ErrorDecision::Replace(MullError::Hook("third".into()))),
        ]);
        let ctx = RunContext::detached("a");
        let out = hooks.error(&ctx, MullError::Planning("boom".into()));
        assert!(matches!(out, Some(MullError::Hook(m)) if m == "second"));
    }

    #[test]
    fn test_compose_error_all_suppress() {
        let hooks = Hooks::compose(vec![
            Hooks::new().on_error(|_, _| ErrorDecision::Suppress),
            Hooks::new(),
        ]);
        let ctx = RunContext::detached("a");
        assert!(hooks.error(&ctx, MullError::Planning("boom".into())).is_none());
    }

    #[test]
    fn test_missing_hooks_are_noops() {
        let hooks = Hooks::compose(vec![Hooks::new(), Hooks::new()]);
        assert!(hooks.on_start.is_none());
        assert!(hooks.on_end.is_none());
        let ctx = RunContext::detached("a");
        assert!(hooks.start(&ctx, "x").is_ok());
        assert!(matches!(
            hooks.error(&ctx, MullError::Cancelled),
            Some(MullError::Cancelled)
        ));
    }

    #[test]
    fn test_end_hooks_all_called() {
        let count = Arc::new(Mutex::new(0));
        let (a, b) = (Arc::clone(&count), Arc::clone(&count));
        let hooks = Hooks::compose(vec![
            Hooks::new().on_end(move |_, _| *a.lock() += 1),
            Hooks::new().on_end(move |_, _| *b.lock() += 1),
        ]);
        hooks.end(&RunContext::detached("a"), &Err(MullError::Cancelled));
        assert_eq!(*count.lock(), 2);
    }
}
