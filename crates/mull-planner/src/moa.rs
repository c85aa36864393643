use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::common::{concurrency_limit, response_to_actions};
use mull_config::MixtureOfAgentsConfig;
use mull_core::{
    Action, Message, MullError, Observation, Planner, PlannerState, Result, RunContext,
};
use mull_llm::{ChatModel, ChatModelExt, GenerateOptions};

const AGGREGATOR_SYSTEM: &str = "You have been given responses from several models to the \
user's request. Critically evaluate them, as some may be biased or wrong, and synthesize a \
single accurate, well-structured reply. Do not simply copy any one response.";

/// Mixture-of-Agents.
///
/// Each layer fans the conversation out to its members concurrently and waits
/// for every member to answer, fail, or time out. The next layer sees the
/// successful outputs of the previous one. An aggregator then synthesizes all
/// proposals into the reply.
pub struct MixtureOfAgentsPlanner {
    layers: Vec<Vec<Arc<dyn ChatModel>>>,
    aggregator: Arc<dyn ChatModel>,
    call_timeout: Option<Duration>,
    concurrency: usize,
}

impl MixtureOfAgentsPlanner {
    /// One layer with `model` as its only member, also used as aggregator.
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::from_config(model, &MixtureOfAgentsConfig::default(), 0)
    }

    pub fn from_config(
        model: Arc<dyn ChatModel>,
        config: &MixtureOfAgentsConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            layers: vec![vec![Arc::clone(&model)]],
            aggregator: model,
            call_timeout: config.call_timeout(),
            concurrency,
        }
    }

    /// Replace the layers. Empty layers are dropped; an empty list is ignored.
    pub fn with_layers(mut self, layers: Vec<Vec<Arc<dyn ChatModel>>>) -> Self {
        let layers: Vec<_> = layers.into_iter().filter(|l| !l.is_empty()).collect();
        if !layers.is_empty() {
            self.layers = layers;
        }
        self
    }

    pub fn with_aggregator(mut self, aggregator: Arc<dyn ChatModel>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    async fn call_member(
        &self,
        ctx: &RunContext,
        member: &Arc<dyn ChatModel>,
        messages: &[Message],
        state: &PlannerState,
    ) -> Result<String> {
        let bound = member.bind_tools(state.tools.clone());
        let options = GenerateOptions::default();
        let call = ctx.guard(bound.generate(messages, &options));
        let resp = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                MullError::model(member.name(), format!("timed out after {limit:?}"))
            })??,
            None => call.await?,
        };
        Ok(resp.text())
    }

    /// Run every layer. Returns the proposal observations, layer by layer.
    pub async fn fan_out(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Observation>> {
        let base = state.conversation();
        let mut previous: Vec<String> = Vec::new();
        let mut proposals = Vec::new();

        for (layer, members) in self.layers.iter().enumerate() {
            let mut messages = base.clone();
            if !previous.is_empty() {
                let listed: String = previous
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("{}. {}\n", i + 1, p))
                    .collect();
                messages.push(Message::system(format!(
                    "Responses from the previous layer:\n{listed}\nUse them to write a better response."
                )));
            }

            let limit = concurrency_limit(self.concurrency, members.len());
            let messages = &messages;
            let results: Vec<Result<String>> = stream::iter(0..members.len())
                .map(|i| async move { self.call_member(ctx, &members[i], messages, state).await })
                .buffered(limit)
                .collect()
                .await;
            ctx.check()?;

            previous.clear();
            for (member, result) in results.into_iter().enumerate() {
                match result {
                    Ok(text) => {
                        previous.push(text.clone());
                        proposals.push(Observation::proposal(layer, member, text, false));
                    }
                    Err(e) => {
                        warn!(layer, member, error = %e, "mixture-of-agents member failed");
                        proposals.push(Observation::proposal(layer, member, e.to_string(), true));
                    }
                }
            }
            debug!(layer, ok = previous.len(), total = members.len(), "mixture-of-agents layer done");

            if previous.is_empty() {
                return Err(MullError::Planning(format!(
                    "mixture-of-agents layer {} produced no output: every member failed",
                    layer + 1
                )));
            }
        }
        Ok(proposals)
    }
}

#[async_trait]
impl Planner for MixtureOfAgentsPlanner {
    fn name(&self) -> &str {
        "mixture-of-agents"
    }

    async fn plan(&self, ctx: &RunContext, state: &PlannerState) -> Result<Vec<Action>> {
        let proposals = self.fan_out(ctx, state).await?;

        let mut working = state.clone();
        for p in proposals {
            working.append(p);
        }
        let mut messages = vec![Message::system(AGGREGATOR_SYSTEM)];
        messages.extend(working.conversation());

        let aggregator = self.aggregator.bind_tools(state.tools.clone());
        let resp = ctx
            .guard(aggregator.generate(&messages, &GenerateOptions::default()))
            .await?;
        Ok(response_to_actions(&resp))
    }
}
