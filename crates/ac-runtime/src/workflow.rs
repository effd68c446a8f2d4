//! The per-run control loop (`workflowLoop.run`): a deterministic state
//! machine alternating planner invocations with tool batches.
//!
//! Grounded on the teacher's turn loop (`crates/gateway/src/runtime/turn.rs`),
//! generalized from its fixed single-provider loop to the deadline/interrupt/
//! cap-aware state machine the specification requires.

use std::sync::Arc;

use ac_engine::{PlannerActivityInput, WorkflowContext};
use ac_types::{
    AgentID, AgentRegistration, CapsState, ChildTracker, Error, Event, Message, PlanResult,
    Result, RunCompleted, RunInput, RunOutcome, RunOutput, TerminationReason, ToolResult, TurnID,
    Usage,
};

use crate::confirmation::ConfirmationPolicy;
use crate::context::PlannerContext;
use crate::dispatch::{self, DispatchContext};
use crate::registry::{OverridePolicy, Registry};
use crate::util::event_meta;

/// Mutable state threaded through one run's iterations.
struct RunState {
    tool_events: Vec<ToolResult>,
    agg_usage: Usage,
    next_attempt: u32,
    caps: CapsState,
    tracker: ChildTracker,
    turn_counter: u64,
}

impl RunState {
    fn new(registration: &AgentRegistration, policy: &ac_types::RunPolicy) -> Self {
        Self {
            tool_events: Vec::new(),
            agg_usage: Usage::default(),
            next_attempt: 0,
            caps: CapsState::from_policy(policy),
            tracker: ChildTracker::new(),
            turn_counter: 0,
        }
    }

    fn next_turn_id(&mut self, run_input: &RunInput) -> TurnID {
        let id = TurnID::new(format!("{}/turn/{}", run_input.run_id.as_str(), self.turn_counter));
        self.turn_counter += 1;
        id
    }
}

/// Drive one run from `RunInput` to `RunOutput`, against `ctx`'s workflow
/// primitives and `registry`'s agent/toolset registrations.
pub async fn run(
    ctx: &dyn WorkflowContext,
    registry: &Registry,
    run_input: RunInput,
    confirmation: Option<&ConfirmationPolicy>,
) -> Result<RunOutput> {
    let registration = registry
        .agent(&run_input.agent_id)
        .ok_or_else(|| Error::AgentNotFound(run_input.agent_id.to_string()))?;
    let planner = registry
        .planner(&run_input.agent_id)
        .ok_or_else(|| Error::AgentNotFound(run_input.agent_id.to_string()))?;
    let override_policy = registry.override_policy(&run_input.agent_id);
    let policy = crate::registry::resolve_run_policy(
        &registration.run_policy,
        override_policy,
        run_input.policy.clone(),
    );

    ctx.publish_hook(Event::RunStarted {
        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
    })
    .await?;

    let started_at = ctx.now();
    let mut hard_deadline = started_at
        + policy
            .run_time_budget
            .unwrap_or_else(|| chrono::Duration::minutes(10));
    let finalizer_grace = policy
        .run_finalizer_grace
        .unwrap_or_else(|| chrono::Duration::seconds(20));

    let mut state = RunState::new(&registration, &policy);
    let mut resume_payload: Option<serde_json::Value> = None;
    let mut prior_tool_results: Vec<ToolResult> = Vec::new();

    loop {
        handle_interrupts(ctx, &run_input, &mut hard_deadline, &mut resume_payload).await?;

        let now = ctx.now();
        if hard_deadline - now <= finalizer_grace {
            return finalize_with_planner(
                ctx,
                registry,
                &planner,
                &registration.agent_id,
                &run_input,
                &mut state,
                resume_payload.take(),
                std::mem::take(&mut prior_tool_results),
                TerminationReason::TimeBudget,
                "time budget exceeded",
            )
            .await;
        }

        let turn_id = state.next_turn_id(&run_input);
        let plan_input = PlannerActivityInput {
            run_input: run_input.clone(),
            resume_payload: resume_payload.take(),
            prior_tool_results: std::mem::take(&mut prior_tool_results),
        };
        let plan = planner
            .plan(PlannerContext {
                agent_id: registration.agent_id.clone(),
                turn_id: turn_id.clone(),
                attempt: state.next_attempt,
                activity_input: plan_input,
                tool_specs: registry.tool_specs_for_agent(&registration.agent_id),
            })
            .await?;
        state.next_attempt += 1;

        if plan.is_await_only() {
            let await_spec = plan.r#await.expect("is_await_only guarantees Some");
            ctx.publish_hook(Event::AwaitRequested {
                meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
                reason: await_spec.reason.clone(),
                prompt: await_spec.prompt.clone(),
            })
            .await?;
            ctx.publish_hook(Event::RunPaused {
                meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            })
            .await?;
            let clarification = ctx
                .clarification_signals()
                .lock()
                .await
                .receive()
                .await
                .unwrap_or(serde_json::Value::Null);
            ctx.publish_hook(Event::RunResumed {
                meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            })
            .await?;
            resume_payload = Some(clarification);
            continue;
        }

        if !plan.has_tool_calls() {
            let final_message = plan
                .final_response
                .unwrap_or_else(|| Message::assistant(String::new()));
            return complete_run(ctx, &run_input, &mut state, final_message, RunOutcome::Success, None).await;
        }

        let batch_result = run_tool_turn(
            ctx,
            registry,
            &run_input,
            &turn_id,
            &mut state,
            hard_deadline,
            &policy,
            plan,
            confirmation,
        )
        .await;

        match batch_result {
            Ok(ToolTurnOutcome::Continue(results)) => {
                prior_tool_results = results;
            }
            Ok(ToolTurnOutcome::CapExceeded) => {
                return finalize_with_planner(
                    ctx,
                    registry,
                    &planner,
                    &registration.agent_id,
                    &run_input,
                    &mut state,
                    resume_payload.take(),
                    std::mem::take(&mut prior_tool_results),
                    TerminationReason::ToolCallsCap,
                    "tool call cap exceeded",
                )
                .await;
            }
            Ok(ToolTurnOutcome::ConsecutiveFailures) => {
                return fail_run(
                    ctx,
                    &run_input,
                    "consecutive failed tool call cap exceeded",
                    TerminationReason::ConsecutiveFailures,
                )
                .await;
            }
            Err(e) => return Err(e),
        }
    }
}

enum ToolTurnOutcome {
    Continue(Vec<ToolResult>),
    CapExceeded,
    ConsecutiveFailures,
}

#[allow(clippy::too_many_arguments)]
async fn run_tool_turn(
    ctx: &dyn WorkflowContext,
    registry: &Registry,
    run_input: &RunInput,
    turn_id: &TurnID,
    state: &mut RunState,
    hard_deadline: chrono::DateTime<chrono::Utc>,
    policy: &ac_types::RunPolicy,
    plan: PlanResult,
    confirmation: Option<&ConfirmationPolicy>,
) -> Result<ToolTurnOutcome> {
    let batch_len = plan.tool_calls.len() as u32;
    if !state.caps.try_consume(batch_len) {
        return Ok(ToolTurnOutcome::CapExceeded);
    }

    let dispatch_ctx = DispatchContext {
        run_input,
        turn_id: turn_id.clone(),
        attempt: state.next_attempt,
        hard_deadline,
    };

    let results = dispatch::dispatch_batch(
        ctx,
        registry,
        &dispatch_ctx,
        plan.tool_calls,
        &mut state.tracker,
        confirmation,
    )
    .await?;
    state.tool_events.extend(results.iter().cloned());

    let any_success = results.iter().any(|r| !r.is_err());
    if state
        .caps
        .record_batch_outcome(any_success, policy.run_max_consecutive_failed_tool_calls)
    {
        return Ok(ToolTurnOutcome::ConsecutiveFailures);
    }

    for result in &results {
        state.agg_usage.merge(&Usage {
            prompt_tokens: result.telemetry.prompt_tokens,
            completion_tokens: result.telemetry.completion_tokens,
        });
    }

    Ok(ToolTurnOutcome::Continue(results))
}

/// Handle a pending `Signal::Pause`/`Signal::Resume`, if one has arrived.
/// Paused time is excluded from the run's time budget (§4.2 step 1: "Pause
/// extends deadlines by paused duration"), and any payload the resume signal
/// carries is handed to the planner on the next turn rather than discarded.
async fn handle_interrupts(
    ctx: &dyn WorkflowContext,
    run_input: &RunInput,
    hard_deadline: &mut chrono::DateTime<chrono::Utc>,
    resume_payload: &mut Option<serde_json::Value>,
) -> Result<()> {
    if let Some(()) = ctx.pause_signals().lock().await.receive_async() {
        let paused_at = ctx.now();
        ctx.publish_hook(Event::RunPaused {
            meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        })
        .await?;
        if let Some(payload) = ctx.resume_signals().lock().await.receive().await {
            *hard_deadline += ctx.now() - paused_at;
            *resume_payload = payload;
            ctx.publish_hook(Event::RunResumed {
                meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
            })
            .await?;
        }
    }
    Ok(())
}

async fn complete_run(
    ctx: &dyn WorkflowContext,
    run_input: &RunInput,
    state: &mut RunState,
    final_message: Message,
    outcome: RunOutcome,
    reason: Option<TerminationReason>,
) -> Result<RunOutput> {
    ctx.publish_hook(Event::AssistantMessage {
        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        message: final_message.clone(),
    })
    .await?;

    ctx.publish_hook(Event::RunCompleted {
        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        completed: RunCompleted {
            status: outcome,
            public_error: None,
            provider: None,
            operation: None,
            kind: None,
            code: None,
            http_status: None,
            retryable: false,
            reason,
        },
    })
    .await?;

    Ok(RunOutput {
        r#final: final_message,
        tool_events: std::mem::take(&mut state.tool_events),
        agg_usage: state.agg_usage,
    })
}

async fn fail_run(
    ctx: &dyn WorkflowContext,
    run_input: &RunInput,
    public_error: &str,
    reason: TerminationReason,
) -> Result<RunOutput> {
    ctx.publish_hook(Event::RunCompleted {
        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        completed: RunCompleted {
            status: RunOutcome::Failed,
            public_error: Some(public_error.to_string()),
            provider: None,
            operation: None,
            kind: None,
            code: None,
            http_status: None,
            retryable: false,
            reason: Some(reason),
        },
    })
    .await?;
    Err(Error::Other(public_error.to_string()))
}

/// Ask the planner for a closing message under a termination reason (time
/// budget exhausted, tool-call cap exceeded), using the finalizer grace
/// window rather than the normal plan/dispatch turn.
#[allow(clippy::too_many_arguments)]
async fn finalize_with_planner(
    ctx: &dyn WorkflowContext,
    registry: &Registry,
    planner: &Arc<dyn crate::registry::Planner>,
    agent_id: &AgentID,
    run_input: &RunInput,
    state: &mut RunState,
    resume_payload: Option<serde_json::Value>,
    prior_tool_results: Vec<ToolResult>,
    reason: TerminationReason,
    public_error: &str,
) -> Result<RunOutput> {
    ctx.publish_hook(Event::PlannerNote {
        meta: event_meta(ctx, &run_input.run_id, &run_input.agent_id, &run_input.session_id),
        note: format!("finalizing: {public_error}"),
    })
    .await?;

    let turn_id = state.next_turn_id(run_input);
    let plan = planner
        .plan(PlannerContext {
            agent_id: agent_id.clone(),
            turn_id,
            attempt: state.next_attempt,
            activity_input: PlannerActivityInput {
                run_input: run_input.clone(),
                resume_payload,
                prior_tool_results,
            },
            tool_specs: registry.tool_specs_for_agent(agent_id),
        })
        .await?;

    let final_message = plan
        .final_response
        .unwrap_or_else(|| Message::assistant(public_error.to_string()));
    complete_run(ctx, run_input, state, final_message, RunOutcome::Success, Some(reason)).await
}
