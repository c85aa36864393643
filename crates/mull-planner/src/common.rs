//! Helpers shared by the planners: model calls under the run's cancellation
//! token and the small text parsers every strategy leans on.

use std::sync::Arc;

use mull_core::{Action, Message, PlannerState, Result, RunContext};
use mull_llm::{ChatModel, ChatModelExt, ChatResponse, GenerateOptions};

/// One-shot prompt with a fixed system instruction. Returns the reply text.
pub(crate) async fn ask(
    ctx: &RunContext,
    model: &dyn ChatModel,
    system: &str,
    prompt: String,
) -> Result<String> {
    let messages = [Message::system(system), Message::user(prompt)];
    let resp = ctx
        .guard(model.generate(&messages, &GenerateOptions::default()))
        .await?;
    Ok(resp.text())
}

/// Send the state's conversation to `model` with the state's tools bound,
/// optionally preceded by a system preamble, and map the reply to actions.
pub(crate) async fn respond(
    ctx: &RunContext,
    model: &Arc<dyn ChatModel>,
    state: &PlannerState,
    preamble: Option<String>,
) -> Result<Vec<Action>> {
    let bound = model.bind_tools(state.tools.clone());
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    if let Some(text) = preamble {
        messages.push(Message::system(text));
    }
    messages.extend(state.conversation());
    let resp = ctx
        .guard(bound.generate(&messages, &GenerateOptions::default()))
        .await?;
    Ok(response_to_actions(&resp))
}

/// Tool calls become `ToolCall` actions; a plain reply becomes one `FinalAnswer`.
pub fn response_to_actions(resp: &ChatResponse) -> Vec<Action> {
    if resp.has_tool_calls() {
        resp.tool_calls().iter().map(Action::from_tool_call).collect()
    } else {
        vec![Action::final_answer(resp.text())]
    }
}

/// The text of a lone `FinalAnswer`, if that is all the actions are.
pub(crate) fn single_answer(actions: &[Action]) -> Option<&str> {
    match actions {
        [Action::FinalAnswer { text }] => Some(text.as_str()),
        _ => None,
    }
}

/// Items of a numbered or bulleted list, one per non-empty line, prefix removed.
pub fn parse_numbered_list(text: &str, max_items: usize) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || ".)-*• ".contains(c))
                .trim()
        })
        .filter(|line| !line.is_empty())
        .take(max_items)
        .map(str::to_string)
        .collect()
}

/// First number in `text`, clamped to 0.0–1.0. Unparseable replies score 0.5.
pub fn parse_score(text: &str) -> f64 {
    text.split_whitespace()
        .filter_map(|token| {
            token
                .trim_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .trim_end_matches('.')
                .parse::<f64>()
                .ok()
        })
        .find(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.5)
}

/// "sure" = 1.0, "maybe" = 0.5, anything else ("impossible") = 0.0.
pub fn parse_verdict(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if words.contains(&"sure") {
        1.0
    } else if words.contains(&"maybe") {
        0.5
    } else {
        0.0
    }
}

/// "Step 1: ...\nStep 2: ..." rendering of a reasoning path.
pub(crate) fn render_steps(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Step {}: {}\n", i + 1, s))
        .collect()
}

/// Resolve a concurrency setting; 0 means `fallback`.
pub(crate) fn concurrency_limit(configured: usize, fallback: usize) -> usize {
    if configured == 0 {
        fallback.max(1)
    } else {
        configured
    }
}

pub(crate) const VERDICT_SYSTEM: &str =
    "You are a reasoning evaluator. Reply with exactly one word: sure, maybe, or impossible.";

pub(crate) fn verdict_prompt(input: &str, thought: &str) -> String {
    format!(
        "Evaluate whether the following reasoning step is on the right track for solving the problem.\n\n\
         Problem: {input}\n\nReasoning step: {thought}\n\n\
         Evaluate this step as one of:\n\
         - \"sure\": clearly correct and productive\n\
         - \"maybe\": could be useful but uncertain\n\
         - \"impossible\": clearly wrong or a dead end\n\n\
         Reply with ONLY one word: sure, maybe, or impossible."
    )
}
