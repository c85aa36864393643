use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::common::{ask, parse_score, respond, single_answer};
use mull_config::ReflexionConfig;
use mull_core::{Action, MullError, Observation, Planner, PlannerState, Result, RunContext};
use mull_llm::ChatModel;

const EVALUATOR_SYSTEM: &str =
    "You are a strict grader. Output only a decimal number between 0.0 and 1.0.";
const REFLECTOR_SYSTEM: &str =
    "You review failed answers. Give concise, actionable feedback on how to improve.";

/// Actor / Evaluator / Reflector loop.
///
/// Each `plan` call runs up to `max_attempts` actor attempts on a private copy
/// of the state. A candidate scoring at or above `threshold` is returned at
/// once; otherwise the reflector's critique is appended as an observation and
/// the actor tries again. When attempts run out the best candidate wins.
///
/// Critiques are also remembered across calls (up to `max_reflections`) and
/// shown to the actor on later calls, e.g. on replan after tool results.
pub struct ReflexionPlanner {
    actor: Arc<dyn ChatModel>,
    evaluator: Arc<dyn ChatModel>,
    threshold: f64,
    max_attempts: usize,
    max_reflections: usize,
    reflections: Mutex<Vec<String>>,
}

impl ReflexionPlanner {
    /// The actor also evaluates and reflects unless an evaluator is set.
    pub fn new(actor: Arc<dyn ChatModel>) -> Self {
        Self::from_config(actor, &ReflexionConfig::default())
    }

    pub fn from_config(actor: Arc<dyn ChatModel>, config: &ReflexionConfig) -> Self {
        Self {
            evaluator: Arc::clone(&actor),
            actor,
            threshold: config.threshold,
            max_attempts: config.max_attempts.max(1),
            max_reflections: config.max_reflections.max(1),
            reflections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ChatModel>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Values below 1 are ignored.
    pub fn with_max_attempts(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_attempts = n;
        }
        self
    }

    /// Values below 1 are ignored.
    pub fn with_max_reflections(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_reflections = n;
        }
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Critiques produced so far, oldest first.
    pub fn reflections(&self) -> Vec<String> {
        self.reflections.lock().clone()
    }

    pub fn reset_reflections(&self) {
        self.reflections.lock().clear();
    }

    async fn evaluate(&self, ctx: &RunContext, input: &str, candidate: &str) -> Result<f64> {
        let prompt = format!(
            "Rate how well the answer solves the task.\n\n\
             Task: {input}\n\nAnswer: {candidate}\n\n\
             Reply with ONLY a number between 0.0 (useless) and 1.0 (perfect)."
        );
        let reply = ask(ctx, self.evaluator.as_ref(), EVALUATOR_SYSTEM, prompt).await?;
        Ok(parse_score(&reply))
    }

    async fn reflect(
        &self,
        ctx: &RunContext,
        input: &str,
        candidate: &str,
        score: f64,
    ) -> Result<String> {
        let prompt = format!(
            "The following answer scored {score:.2}/1.0 for the task.\n\n\
             Task: {input}\n\nAnswer: {candidate}\n\n\
             Explain briefly what is wrong and how the next attempt should differ."
        );
        ask(ctx, self.evaluator.as_ref(), REFLECTOR_SYSTEM, prompt).await
    }
}

#[async_trait]
impl Planner for ReflexionPlanner {
    fn name(&self) -> &str {
        "reflexion"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let remembered = self.reflections();
        let preamble = (!remembered.is_empty()).then(|| {
            format!(
                "Lessons from earlier attempts:\n{}",
                remembered.join("\n")
            )
        });

        let mut working = state.clone();
        let mut best: Option<(f64, String)> = None;

        for attempt in 1..=self.max_attempts {
            let actions = respond(ctx, &self.actor, &working, preamble.clone()).await?;
            // Tool calls go straight to the executor; only answers are graded.
            let Some(candidate) = single_answer(&actions).map(str::to_string) else {
                return Ok(actions);
            };

            let score = match self.evaluate(ctx, &state.input, &candidate).await {
                Ok(score) => score,
                Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                Err(e) => {
                    warn!(error = %e, attempt, "evaluation failed, accepting candidate");
                    return Ok(vec![Action::final_answer(candidate)]);
                }
            };
            ctx.offer_partial(candidate.clone(), score);
            debug!(attempt, score, threshold = self.threshold, "reflexion candidate scored");

            if score >= self.threshold {
                return Ok(vec![Action::final_answer(candidate)]);
            }
            if best.as_ref().is_none_or(|(b, _)| score > *b) {
                best = Some((score, candidate.clone()));
            }
            if attempt == self.max_attempts || self.reflections.lock().len() >= self.max_reflections
            {
                break;
            }

            let critique = match self.reflect(ctx, &state.input, &candidate, score).await {
                Ok(critique) => critique,
                Err(MullError::Cancelled) => return Err(MullError::Cancelled),
                Err(e) => {
                    warn!(error = %e, attempt, "reflection failed");
                    break;
                }
            };
            self.reflections.lock().push(critique.clone());
            working.append(Observation::critique(attempt, critique));
        }

        let answer = best.map(|(_, text)| text).unwrap_or_default();
        Ok(vec![Action::final_answer(answer)])
    }
}
