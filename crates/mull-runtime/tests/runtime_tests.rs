#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mull_core::{
        ErrorKind, EventPayload, FnTool, MullError, ObservationKind, Planner, Result, RunContext,
        Tool, ToolDefinition, ToolOutput,
    };
    use mull_llm::{ChatModel, MockModel, MockResponse};
    use mull_planner::ReActPlanner;
    use mull_runtime::{Agent, ErrorDecision, Executor, Handoff, Hooks};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn react(mock: &Arc<MockModel>) -> Arc<dyn Planner> {
        let model: Arc<dyn ChatModel> = mock.clone();
        Arc::new(ReActPlanner::new(model))
    }

    fn adder() -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDefinition::new(
                "add",
                "Add two integers",
                json!({
                    "type": "object",
                    "properties": { "a": { "type": "integer" }, "b": { "type": "integer" } },
                    "required": ["a", "b"]
                }),
            ),
            |args: Value| {
                let a = args["a"].as_i64().unwrap_or_default();
                let b = args["b"].as_i64().unwrap_or_default();
                Ok((a + b).to_string())
            },
        ))
    }

    /// Records a partial answer every time it runs.
    struct Progress;

    #[async_trait]
    impl Tool for Progress {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("progress", "Record progress", json!({ "type": "object" }))
        }

        async fn execute(&self, ctx: &RunContext, _arguments: Value) -> Result<ToolOutput> {
            ctx.offer_partial("halfway", 0.5);
            Ok(ToolOutput::text("noted"))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("slow", "Takes a second", json!({ "type": "object" }))
        }

        async fn execute(&self, _ctx: &RunContext, _arguments: Value) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(ToolOutput::text("done"))
        }
    }

    fn billing(reply: &str) -> (Arc<MockModel>, Arc<Agent>) {
        let mock = Arc::new(MockModel::new("billing").with_response(reply));
        let agent = Agent::new("billing", Executor::builder(react(&mock)).build())
            .with_description("Handles charges and refunds");
        (mock, Arc::new(agent))
    }

    fn triage_to_billing(final_reply: &str) -> Arc<MockModel> {
        Arc::new(
            MockModel::new("triage")
                .with_tool_call("transfer_to_billing", json!({ "message": "dispute a charge" }))
                .with_response(final_reply),
        )
    }

    // ── Loop ───────────────────────────────────────────────────

    mod run_loop {
        use super::*;

        #[tokio::test]
        async fn test_react_answers_in_one_iteration() {
            let mock = Arc::new(MockModel::new("m").with_response("4"));
            let executor = Executor::builder(react(&mock)).build();

            let out = executor
                .run(&RunContext::detached("a"), "What is 2+2?")
                .await
                .unwrap();
            assert_eq!(out.answer, "4");
            assert_eq!(out.iterations, 1);
            assert!(out.observations.is_empty());
            assert_eq!(mock.call_count(), 1);
        }

        #[tokio::test]
        async fn test_tool_result_feeds_next_iteration() {
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("add", json!({ "a": 2, "b": 2 }))
                    .with_response("The sum is 4"),
            );
            let executor = Executor::builder(react(&mock)).tool(adder()).build();

            let out = executor
                .run(&RunContext::detached("a"), "What is 2+2?")
                .await
                .unwrap();
            assert_eq!(out.answer, "The sum is 4");
            assert_eq!(out.iterations, 2);
            assert_eq!(out.observations.len(), 1);
            assert_eq!(out.observations[0].content, "4");
            assert!(!out.observations[0].is_error);

            let calls = mock.recorded_calls();
            assert!(calls[0].options.tools.iter().any(|t| t.name == "add"));
            assert_eq!(calls[1].last_text(), "4");
        }

        #[tokio::test]
        async fn test_system_prompt_prepended() {
            let mock = Arc::new(MockModel::new("m").with_response("ok"));
            let executor = Executor::builder(react(&mock))
                .system_prompt("Answer tersely.")
                .build();
            executor.run(&RunContext::detached("a"), "hi").await.unwrap();
            assert!(mock.recorded_calls()[0].system_text().contains("Answer tersely."));
        }

        #[tokio::test]
        async fn test_max_iterations_carries_partial_answer() {
            let mock = Arc::new(
                MockModel::new("m")
                    .with_responder(|_, _| MockResponse::tool_call("progress", json!({}))),
            );
            let executor = Executor::builder(react(&mock))
                .tool(Arc::new(Progress))
                .max_iterations(3)
                .build();

            let err = executor
                .run(&RunContext::detached("a"), "loop forever")
                .await
                .unwrap_err();
            match &err {
                MullError::MaxIterationsExceeded { limit, partial } => {
                    assert_eq!(*limit, 3);
                    assert_eq!(partial.as_deref(), Some("halfway"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(err.kind(), ErrorKind::MaxIterationsExceeded);
            assert_eq!(mock.call_count(), 3);
        }

        #[tokio::test]
        async fn test_zero_max_iterations_keeps_default() {
            let mock = Arc::new(MockModel::new("m"));
            let executor = Executor::builder(react(&mock)).max_iterations(0).build();
            assert_eq!(executor.max_iterations(), 10);
        }

        #[tokio::test]
        async fn test_one_millisecond_timeout() {
            let mock = Arc::new(MockModel::new("m").with_mock_response(MockResponse::hang()));
            let executor = Executor::builder(react(&mock))
                .timeout(Some(Duration::from_millis(1)))
                .build();

            let err = executor
                .run(&RunContext::detached("a"), "anything")
                .await
                .unwrap_err();
            assert!(matches!(err, MullError::Timeout { partial: None, .. }));
            assert_eq!(err.kind(), ErrorKind::Timeout);
        }

        #[tokio::test]
        async fn test_cancelled_run() {
            let mock = Arc::new(MockModel::new("m").with_mock_response(MockResponse::hang()));
            let executor = Executor::builder(react(&mock)).timeout(None).build();
            let token = tokio_util::sync::CancellationToken::new();
            let ctx = RunContext::new("a", token.clone());

            let cancel = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            });
            let err = executor.run(&ctx, "anything").await.unwrap_err();
            cancel.await.unwrap();
            assert!(matches!(err, MullError::Cancelled));
        }

        #[tokio::test]
        async fn test_reflexion_through_executor() {
            let actor = Arc::new(MockModel::new("actor").with_response("draft").with_response("final"));
            let evaluator = Arc::new(
                MockModel::new("eval")
                    .with_response("0.4")
                    .with_response("Check the units.")
                    .with_response("0.8"),
            );
            let actor_model: Arc<dyn ChatModel> = actor.clone();
            let evaluator_model: Arc<dyn ChatModel> = evaluator.clone();
            let planner = mull_planner::ReflexionPlanner::new(actor_model)
                .with_evaluator(evaluator_model)
                .with_threshold(0.7);
            let executor = Executor::builder(Arc::new(planner)).build();

            let ctx = RunContext::detached("a");
            let out = executor.run(&ctx, "task").await.unwrap();
            assert_eq!(out.answer, "final");
            assert_eq!(out.iterations, 1);
            assert_eq!(ctx.best_partial().unwrap().score, 0.8);
        }
    }

    // ── Tools ──────────────────────────────────────────────────

    mod tools {
        use super::*;

        #[tokio::test]
        async fn test_tool_error_becomes_observation() {
            let failing: Arc<dyn Tool> = Arc::new(FnTool::new(
                ToolDefinition::new("fail", "Always fails", json!({ "type": "object" })),
                |_| {
                    Err(MullError::ToolExecution {
                        tool: "fail".into(),
                        reason: "disk on fire".into(),
                    })
                },
            ));
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("fail", json!({}))
                    .with_response("gave up politely"),
            );
            let executor = Executor::builder(react(&mock)).tool(failing).build();

            let out = executor.run(&RunContext::detached("a"), "go").await.unwrap();
            assert_eq!(out.answer, "gave up politely");
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("disk on fire"));
        }

        #[tokio::test]
        async fn test_unknown_tool_is_error_observation() {
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("missing", json!({}))
                    .with_response("ok"),
            );
            let executor = Executor::builder(react(&mock)).build();

            let out = executor.run(&RunContext::detached("a"), "go").await.unwrap();
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("missing"));
        }

        #[tokio::test]
        async fn test_tool_call_hook_veto() {
            let executed = Arc::new(Mutex::new(0usize));
            let counter = executed.clone();
            let counted: Arc<dyn Tool> = Arc::new(FnTool::new(
                ToolDefinition::new("delete", "Delete things", json!({ "type": "object" })),
                move |_| {
                    *counter.lock() += 1;
                    Ok("deleted".into())
                },
            ));
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("delete", json!({}))
                    .with_response("fine"),
            );
            let hooks = Hooks::new().on_tool_call(|_ctx, call| {
                if call.tool_name == "delete" {
                    Err(MullError::Hook("not allowed".into()))
                } else {
                    Ok(())
                }
            });
            let executor = Executor::builder(react(&mock)).tool(counted).hooks(hooks).build();

            let out = executor.run(&RunContext::detached("a"), "go").await.unwrap();
            assert_eq!(*executed.lock(), 0);
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("not allowed"));
        }

        #[tokio::test]
        async fn test_tool_timeout() {
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("slow", json!({}))
                    .with_response("moved on"),
            );
            let executor = Executor::builder(react(&mock))
                .tool(Arc::new(Slow))
                .tool_timeout(Some(Duration::from_millis(10)))
                .build();

            let out = executor.run(&RunContext::detached("a"), "go").await.unwrap();
            assert_eq!(out.answer, "moved on");
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("timed out"));
        }
    }

    // ── Handoffs ───────────────────────────────────────────────

    mod handoffs {
        use super::*;

        #[tokio::test]
        async fn test_transfer_to_billing() {
            let (billing_mock, billing_agent) = billing("Refund opened for the disputed charge");
            let triage = triage_to_billing("Billing has opened a refund.");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::to(billing_agent, "Billing questions"))
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "I want to dispute a charge")
                .await
                .unwrap();
            assert_eq!(out.answer, "Billing has opened a refund.");
            assert_eq!(out.iterations, 2);

            let tools = &triage.recorded_calls()[0].options.tools;
            let transfer = tools.iter().find(|t| t.name == "transfer_to_billing").unwrap();
            assert_eq!(transfer.description, "Billing questions");

            assert_eq!(billing_mock.call_count(), 1);
            assert_eq!(billing_mock.recorded_calls()[0].last_text(), "dispute a charge");

            let observation = &out.observations[0];
            assert!(!observation.is_error);
            assert_eq!(observation.content, "Refund opened for the disputed charge");
            assert!(matches!(
                &observation.kind,
                ObservationKind::Handoff { target, .. } if target == "billing"
            ));
        }

        #[tokio::test]
        async fn test_finish_on_handoff_returns_target_answer() {
            let (_, billing_agent) = billing("Refund opened");
            let triage = triage_to_billing("unused");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent))
                .finish_on_handoff(true)
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert_eq!(out.answer, "Refund opened");
            assert_eq!(out.iterations, 1);
            assert_eq!(triage.call_count(), 1);
        }

        #[tokio::test]
        async fn test_disabled_handoff_is_error_observation() {
            let (billing_mock, billing_agent) = billing("never");
            let triage = triage_to_billing("handled it myself");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent).with_enabled(|_| false))
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert_eq!(out.answer, "handled it myself");
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("disabled"));
            assert_eq!(billing_mock.call_count(), 0);
        }

        #[tokio::test]
        async fn test_transfer_call_passes_through_tool_call_hook() {
            let (billing_mock, billing_agent) = billing("Refund opened");
            let triage = triage_to_billing("done");
            let seen = Arc::new(Mutex::new(Vec::new()));
            let log = seen.clone();
            let hooks = Hooks::new().on_tool_call(move |_, call| {
                log.lock().push(call.tool_name.clone());
                Ok(())
            });
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent))
                .hooks(hooks)
                .build();

            executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert_eq!(*seen.lock(), vec!["transfer_to_billing".to_string()]);
            assert_eq!(billing_mock.call_count(), 1);
        }

        #[tokio::test]
        async fn test_vetoed_transfer_never_reaches_target() {
            let (billing_mock, billing_agent) = billing("never");
            let triage = triage_to_billing("kept it");
            let hooks = Hooks::new().on_tool_call(|_, call| {
                if call.tool_name.starts_with("transfer_to_") {
                    Err(MullError::Hook("transfers frozen".into()))
                } else {
                    Ok(())
                }
            });
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent))
                .hooks(hooks)
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert_eq!(out.answer, "kept it");
            let observation = &out.observations[0];
            assert!(observation.is_error);
            assert!(observation.content.contains("transfers frozen"));
            assert!(matches!(
                &observation.kind,
                ObservationKind::Handoff { target, .. } if target == "billing"
            ));
            assert_eq!(billing_mock.call_count(), 0);
        }

        #[tokio::test]
        async fn test_depth_limit() {
            let (billing_mock, billing_agent) = billing("never");
            let triage = triage_to_billing("stopped");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent))
                .max_handoff_depth(0)
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("depth limit"));
            assert_eq!(billing_mock.call_count(), 0);
        }

        #[tokio::test]
        async fn test_input_filter_and_context_reach_target() {
            let seen = Arc::new(Mutex::new(None::<(String, u32, Option<Value>)>));
            let sink = seen.clone();
            let billing_mock = Arc::new(MockModel::new("billing").with_response("done"));
            let billing_executor = Executor::builder(react(&billing_mock))
                .hooks(Hooks::new().on_start(move |ctx, input| {
                    *sink.lock() = Some((
                        input.to_string(),
                        ctx.depth(),
                        ctx.handoff_context().get("ticket").cloned(),
                    ));
                    Ok(())
                }))
                .build();
            let billing_agent = Arc::new(Agent::new("billing", billing_executor));

            let handed = Arc::new(Mutex::new(Vec::new()));
            let log = handed.clone();
            let triage = triage_to_billing("ok");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent).with_input_filter(|mut input| {
                    input.message = format!("[triage] {}", input.message);
                    input.context.insert("ticket".into(), json!(42));
                    input
                }))
                .hooks(Hooks::new().on_handoff(move |_ctx, target, _input| {
                    log.lock().push(target.to_string());
                }))
                .build();

            executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            let (input, depth, ticket) = seen.lock().clone().unwrap();
            assert_eq!(input, "[triage] dispute a charge");
            assert_eq!(depth, 1);
            assert_eq!(ticket, Some(json!(42)));
            assert_eq!(*handed.lock(), vec!["billing".to_string()]);
        }

        #[tokio::test]
        async fn test_on_handoff_error_aborts_transfer() {
            let (billing_mock, billing_agent) = billing("never");
            let triage = triage_to_billing("ok");
            let executor = Executor::builder(react(&triage))
                .handoff(
                    Handoff::new(billing_agent)
                        .with_on_handoff(|_, _| Err(MullError::Hook("billing closed".into()))),
                )
                .build();

            let out = executor
                .run(&RunContext::detached("triage"), "dispute")
                .await
                .unwrap();
            assert!(out.observations[0].is_error);
            assert!(out.observations[0].content.contains("billing closed"));
            assert_eq!(billing_mock.call_count(), 0);
        }
    }

    // ── Hooks ──────────────────────────────────────────────────

    mod hooks {
        use super::*;

        #[tokio::test]
        async fn test_on_error_suppress_retries() {
            let mock = Arc::new(MockModel::new("m").with_error("overloaded").with_response("recovered"));
            let hooks = Hooks::new().on_error(|_, _| ErrorDecision::Suppress);
            let executor = Executor::builder(react(&mock)).hooks(hooks).build();

            let out = executor.run(&RunContext::detached("a"), "go").await.unwrap();
            assert_eq!(out.answer, "recovered");
            assert_eq!(out.iterations, 2);
        }

        #[tokio::test]
        async fn test_on_error_replace() {
            let mock = Arc::new(MockModel::new("m").with_error("overloaded"));
            let hooks = Hooks::new().on_error(|_, err| {
                ErrorDecision::Replace(MullError::Hook(format!("wrapped: {err}")))
            });
            let executor = Executor::builder(react(&mock)).hooks(hooks).build();

            let err = executor.run(&RunContext::detached("a"), "go").await.unwrap_err();
            match err {
                MullError::Hook(msg) => assert!(msg.contains("overloaded")),
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_model_error_propagates_without_hook() {
            let mock = Arc::new(MockModel::new("m").with_error("overloaded"));
            let executor = Executor::builder(react(&mock)).build();
            let err = executor.run(&RunContext::detached("a"), "go").await.unwrap_err();
            assert!(matches!(err, MullError::Model { .. }));
        }

        #[tokio::test]
        async fn test_on_start_error_aborts_before_planning() {
            let mock = Arc::new(MockModel::new("m").with_response("never"));
            let ended = Arc::new(Mutex::new(false));
            let flag = ended.clone();
            let hooks = Hooks::new()
                .on_start(|_, _| Err(MullError::Hook("quota exceeded".into())))
                .on_end(move |_, outcome| *flag.lock() = outcome.is_err());
            let executor = Executor::builder(react(&mock)).hooks(hooks).build();

            let (events, outcome) = executor
                .stream(&RunContext::detached("a"), "go")
                .collect_all()
                .await;
            assert!(matches!(outcome, Err(MullError::Hook(_))));
            assert_eq!(mock.call_count(), 0);
            assert!(*ended.lock());
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type(), "error");
        }

        #[tokio::test]
        async fn test_lifecycle_order() {
            let log = Arc::new(Mutex::new(Vec::<String>::new()));
            let (a, b, c, d, e) = (log.clone(), log.clone(), log.clone(), log.clone(), log.clone());
            let hooks = Hooks::new()
                .on_start(move |_, _| {
                    a.lock().push("start".into());
                    Ok(())
                })
                .on_iteration(move |_, n| b.lock().push(format!("iteration {n}")))
                .on_tool_call(move |_, call| {
                    c.lock().push(format!("call {}", call.tool_name));
                    Ok(())
                })
                .on_tool_result(move |_, obs| d.lock().push(format!("result {}", obs.content)))
                .on_end(move |_, _| e.lock().push("end".into()));
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("add", json!({ "a": 1, "b": 2 }))
                    .with_response("3"),
            );
            let executor = Executor::builder(react(&mock)).tool(adder()).hooks(hooks).build();
            executor.run(&RunContext::detached("a"), "1+2").await.unwrap();

            assert_eq!(
                *log.lock(),
                vec![
                    "start",
                    "iteration 1",
                    "call add",
                    "result 3",
                    "iteration 2",
                    "end"
                ]
            );
        }
    }

    // ── Streaming ──────────────────────────────────────────────

    mod streaming {
        use super::*;
        use futures::StreamExt;

        #[tokio::test]
        async fn test_sequence_and_single_terminal_event() {
            let (_, billing_agent) = billing("Refund opened");
            let triage = triage_to_billing("All sorted.");
            let executor = Executor::builder(react(&triage))
                .handoff(Handoff::new(billing_agent))
                .build();

            let (events, outcome) = executor
                .stream(&RunContext::detached("triage"), "dispute")
                .collect_all()
                .await;
            assert_eq!(outcome.unwrap().answer, "All sorted.");

            let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
            assert_eq!(kinds, vec!["handoff", "tool_result", "text", "done"]);
            assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
            assert_eq!(events[0].sequence, 1);
            assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
            assert!(events.iter().all(|e| e.agent_id == "triage"));
            match &events[3].payload {
                EventPayload::Done { answer, iterations } => {
                    assert_eq!(answer, "All sorted.");
                    assert_eq!(*iterations, 2);
                }
                other => panic!("unexpected payload: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_error_event_is_terminal() {
            let mock = Arc::new(MockModel::new("m").with_mock_response(MockResponse::hang()));
            let executor = Executor::builder(react(&mock))
                .timeout(Some(Duration::from_millis(1)))
                .build();
            let (events, outcome) = executor
                .stream(&RunContext::detached("a"), "go")
                .collect_all()
                .await;
            assert!(outcome.is_err());
            assert_eq!(events.len(), 1);
            match &events[0].payload {
                EventPayload::Error { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
                other => panic!("unexpected payload: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_run_waits_for_reader() {
            let iterations = Arc::new(Mutex::new(0usize));
            let counter = iterations.clone();
            let mock = Arc::new(
                MockModel::new("m")
                    .with_tool_call("add", json!({ "a": 2, "b": 2 }))
                    .with_response("4"),
            );
            let executor = Executor::builder(react(&mock))
                .tool(adder())
                .hooks(Hooks::new().on_iteration(move |_, n| *counter.lock() = n))
                .build();

            let mut stream = executor.stream(&RunContext::detached("a"), "2+2");
            let first = stream.next().await.unwrap();
            assert_eq!(first.event_type(), "tool_call");

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(*iterations.lock(), 1);

            let (rest, outcome) = stream.collect_all().await;
            let kinds: Vec<_> = rest.iter().map(|e| e.event_type()).collect();
            assert_eq!(kinds, vec!["tool_result", "text", "done"]);
            assert_eq!(outcome.unwrap().answer, "4");
            assert_eq!(*iterations.lock(), 2);
        }

        #[tokio::test]
        async fn test_dropping_stream_cancels_run() {
            let outcome = Arc::new(Mutex::new(None::<bool>));
            let slot = outcome.clone();
            let mock = Arc::new(MockModel::new("m").with_mock_response(MockResponse::hang()));
            let executor = Executor::builder(react(&mock))
                .timeout(None)
                .hooks(Hooks::new().on_end(move |_, result| {
                    *slot.lock() = Some(matches!(result, Err(MullError::Cancelled)));
                }))
                .build();

            let ctx = RunContext::detached("a");
            drop(executor.stream(&ctx, "go"));

            tokio::time::timeout(Duration::from_secs(1), async {
                while outcome.lock().is_none() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
            assert_eq!(*outcome.lock(), Some(true));
            assert!(!ctx.is_cancelled());
        }

        #[tokio::test]
        async fn test_finish_drains_unread_events() {
            let mock = Arc::new(MockModel::new("m").with_response("4"));
            let executor = Executor::builder(react(&mock)).build();
            let out = executor
                .stream(&RunContext::detached("a"), "2+2")
                .finish()
                .await
                .unwrap();
            assert_eq!(out.answer, "4");
        }
    }

    // ── Bus and config ─────────────────────────────────────────

    mod wiring {
        use super::*;
        use mull_config::MullConfig;
        use mull_core::EventBus;
        use mull_planner::{PlannerOptions, PlannerRegistry};
        use mull_runtime::RUNS_TOPIC;

        #[tokio::test]
        async fn test_run_summary_published() {
            let bus = EventBus::new(16);
            let mut runs = bus.subscribe(RUNS_TOPIC);
            let mock = Arc::new(MockModel::new("m").with_response("4"));
            let executor = Executor::builder(react(&mock)).bus(bus).build();

            executor.run(&RunContext::detached("calc"), "2+2").await.unwrap();
            let msg = runs.try_recv().unwrap();
            assert_eq!(msg.source, "calc");
            assert_eq!(msg.payload["status"], "done");
            assert_eq!(msg.payload["answer"], "4");
            assert_eq!(msg.payload["iterations"], 1);
        }

        #[tokio::test]
        async fn test_from_config() {
            let mut config = MullConfig::default();
            config.planner.default = "react".into();
            config.executor.max_iterations = 2;
            config.executor.timeout_secs = 7;
            let mock = Arc::new(MockModel::new("m").with_response("hello"));
            let model: Arc<dyn ChatModel> = mock.clone();

            let executor = Executor::from_config(
                &config,
                &PlannerRegistry::with_builtins(),
                &PlannerOptions::new(model),
            )
            .unwrap()
            .build();
            assert_eq!(executor.planner_name(), "react");
            assert_eq!(executor.max_iterations(), 2);
            assert_eq!(executor.timeout(), Some(Duration::from_secs(7)));

            let out = executor.run(&RunContext::detached("a"), "hi").await.unwrap();
            assert_eq!(out.answer, "hello");
        }

        #[test]
        fn test_from_config_unknown_planner() {
            let mut config = MullConfig::default();
            config.planner.default = "astrology".into();
            let model: Arc<dyn ChatModel> = Arc::new(MockModel::new("m"));
            let err = Executor::from_config(
                &config,
                &PlannerRegistry::with_builtins(),
                &PlannerOptions::new(model),
            )
            .unwrap_err();
            assert!(matches!(err, MullError::UnknownPlanner(_)));
        }

        #[test]
        fn test_builder_debug_names_planner() {
            let mock = Arc::new(MockModel::new("m"));
            let builder = Executor::builder(react(&mock)).max_iterations(3);
            let shown = format!("{builder:?}");
            assert!(shown.contains("ExecutorBuilder"));
            assert!(shown.contains("react"));
            assert!(shown.contains("max_iterations: 3"));
        }
    }
}
