//! Reconciliation loop for NsxUpgradeRun.
//!
//! A spec generation that has not been observed yet is executed: the spec is
//! validated, the remote client set is built from the manager reference, the
//! driver runs the whole plan, and the outputs are collected into status.
//! An observed generation only refreshes the outputs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::{
        common::{add_finalizer, read_manager_credentials, remove_finalizer},
        context::{Context, FIELD_MANAGER},
        error::Error,
        run_state_machine::{
            RunEvent, RunStateMachine, RunTransitionContext, determine_run_event, start_event,
        },
        status::compute_run_conditions,
        validation::validate_run,
    },
    crd::{NsxUpgradeRun, NsxUpgradeRunStatus, RunPhase},
    upgrade::{
        ComponentOutcome, NsxManagerClient, NsxManagerConfig, RunOutputs, UpgradeClientSet,
        UpgradeDriver, UpgradeStatus, collect_outputs,
    },
};

/// Finalizer name for NsxUpgradeRun resources
pub const FINALIZER: &str = "nsx-upgrade.smoketurner.com/finalizer";

/// How often an observed run refreshes its outputs
const REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile an NsxUpgradeRun
pub async fn reconcile(obj: Arc<NsxUpgradeRun>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling NsxUpgradeRun");

    let api: Api<NsxUpgradeRun> = Api::namespaced(ctx.client.clone(), &namespace);

    // Deleting a run has no remote effect
    if obj.metadata.deletion_timestamp.is_some() {
        info!(name = %name, "Handling deletion");
        remove_finalizer(&api, &name, FINALIZER).await?;
        ctx.retries.reset(&retry_key(&namespace, &name));
        return Ok(Action::await_change());
    }

    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, "Adding finalizer");
        add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let generation = obj.metadata.generation;
    let observed = obj.status.as_ref().and_then(|s| s.observed_generation);

    let action = if generation.is_some() && observed == generation {
        refresh_outputs(&obj, &ctx, &api, &namespace).await?
    } else {
        execute_run(&obj, &ctx, &api, &namespace).await?
    };

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state.last_reconcile.store(
            Timestamp::now().as_second().max(0).unsigned_abs(),
            std::sync::atomic::Ordering::Relaxed,
        );
    }

    ctx.retries.reset(&retry_key(&namespace, &name));
    Ok(action)
}

fn retry_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<NsxUpgradeRun>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        let retry_count = ctx.retries.record_failure(&retry_key(&namespace, &name));
        let backoff = error.requeue_after_with_retry_count(retry_count);

        warn!(
            name = %name,
            error = %error,
            retry_count = retry_count,
            backoff_secs = backoff.as_secs(),
            "Retryable error, will retry with exponential backoff"
        );
        Action::requeue(backoff)
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}

/// Execute a spec generation that has not been observed yet.
async fn execute_run(
    obj: &NsxUpgradeRun,
    ctx: &Context,
    api: &Api<NsxUpgradeRun>,
    namespace: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let generation = obj.metadata.generation;
    let sm = RunStateMachine::new();
    let previous = obj.status.clone().unwrap_or_default();
    let current_phase = previous.phase;

    if let Err(e) = validate_run(obj) {
        if e.is_retryable() {
            return Err(e);
        }
        warn!(name = %name, error = %e, "Rejected NsxUpgradeRun spec");
        let phase = next_phase(
            &sm,
            current_phase,
            RunEvent::ValidationFailed,
            &RunTransitionContext::default(),
        )?;
        let status = NsxUpgradeRunStatus {
            phase,
            error_message: Some(e.to_string()),
            observed_generation: generation,
            conditions: compute_run_conditions(phase, Some(&e.to_string()), generation),
            ..previous
        };
        update_status(api, &name, &status).await?;
        ctx.publish_warning_event(obj, "ValidationFailed", "Validate", Some(e.to_string()))
            .await;
        return Ok(Action::await_change());
    }

    let manager_url = obj.spec.manager.url.clone();
    let _claim = ctx
        .active_runs
        .try_claim(&manager_url)
        .ok_or_else(|| Error::RunInProgress(manager_url.clone()))?;

    let clients = build_clients(obj, ctx, namespace).await?;

    let run_id = previous
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let phase = next_phase(
        &sm,
        current_phase,
        start_event(current_phase),
        &RunTransitionContext::default(),
    )?;
    let running = NsxUpgradeRunStatus {
        phase,
        run_id: Some(run_id.clone()),
        upgrade_prepare_ready_id: Some(obj.spec.upgrade_prepare_ready_id.clone()),
        error_message: None,
        conditions: compute_run_conditions(phase, None, generation),
        ..previous
    };
    update_status(api, &name, &running).await?;

    info!(
        name = %name,
        run_id = %run_id,
        manager = %manager_url,
        prepare_ready_id = %obj.spec.upgrade_prepare_ready_id,
        "Starting upgrade run"
    );
    ctx.publish_normal_event(
        obj,
        "RunStarted",
        "Upgrade",
        Some(format!("Upgrading fabric managed by {}", manager_url)),
    )
    .await;

    let run = obj.spec.to_upgrade_run();
    let driver = UpgradeDriver::with_cancellation(
        clients.clone(),
        ctx.driver_config.clone(),
        ctx.shutdown.child_token(),
    );
    let run_started = Instant::now();
    let result = driver.execute(&run).await;

    if let Err(ref e) = result
        && e.is_cancelled()
    {
        // Leave the phase at Running so the next leader resumes the run.
        info!(name = %name, run_id = %run_id, "Upgrade run interrupted by shutdown");
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let event = determine_run_event(result.as_ref());
    let transition_ctx = result
        .as_ref()
        .map(RunTransitionContext::from_report)
        .unwrap_or_default();
    let phase = next_phase(&sm, running.phase, event, &transition_ctx)?;
    let error_message = result.as_ref().err().map(|e| e.to_string());

    let outputs = collect_best_effort(&clients, &name).await;
    let mut status = NsxUpgradeRunStatus {
        phase,
        error_message: error_message.clone(),
        observed_generation: generation,
        last_run_at: Some(Timestamp::now().to_string()),
        conditions: compute_run_conditions(phase, error_message.as_deref(), generation),
        ..running
    };
    if let Some(outputs) = outputs {
        record_component_metrics(ctx, namespace, &name, &outputs);
        status.upgrade_plan = outputs.upgrade_group_plan;
        status.state = outputs.state;
    }
    update_status(api, &name, &status).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_run(
            namespace,
            &name,
            &phase.to_string(),
            run_started.elapsed().as_secs_f64(),
        );
    }

    match (&result, phase) {
        (Err(e), _) => {
            error!(name = %name, run_id = %run_id, error = %e, "Upgrade run failed");
            ctx.publish_warning_event(obj, "UpgradeFailed", "Upgrade", Some(e.to_string()))
                .await;
        }
        (Ok(report), RunPhase::PartiallyCompleted) => {
            let partial: Vec<String> = report
                .components
                .iter()
                .filter(|c| c.outcome == ComponentOutcome::PartiallyCompleted)
                .map(|c| c.component.to_string())
                .collect();
            info!(name = %name, run_id = %run_id, partial = ?partial, "Upgrade run partially completed");
            ctx.publish_normal_event(
                obj,
                "UpgradePartiallyCompleted",
                "Upgrade",
                Some(format!(
                    "Components {} left groups for a later run; MP upgrade skipped",
                    partial.join(", ")
                )),
            )
            .await;
        }
        (Ok(report), _) => {
            info!(name = %name, run_id = %run_id, post_checks = ?report.post_checks, "Upgrade run completed");
            ctx.publish_normal_event(
                obj,
                "UpgradeCompleted",
                "Upgrade",
                Some("All components upgraded".to_string()),
            )
            .await;
        }
    }

    Ok(Action::requeue(REFRESH_INTERVAL))
}

/// Refresh the outputs of an already executed generation.
///
/// Collection failures surface to the error policy, which backs off on
/// transient remote errors.
async fn refresh_outputs(
    obj: &NsxUpgradeRun,
    ctx: &Context,
    api: &Api<NsxUpgradeRun>,
    namespace: &str,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let clients = build_clients(obj, ctx, namespace).await?;
    let outputs = collect_outputs(&clients).await?;
    record_component_metrics(ctx, namespace, &name, &outputs);

    let mut status = obj.status.clone().unwrap_or_default();
    if status.upgrade_plan == outputs.upgrade_group_plan && status.state == outputs.state {
        return Ok(Action::requeue(REFRESH_INTERVAL));
    }
    status.upgrade_plan = outputs.upgrade_group_plan;
    status.state = outputs.state;
    update_status(api, &name, &status).await?;
    Ok(Action::requeue(REFRESH_INTERVAL))
}

/// Build the remote client set from the manager reference.
async fn build_clients(
    obj: &NsxUpgradeRun,
    ctx: &Context,
    namespace: &str,
) -> Result<UpgradeClientSet, Error> {
    let manager = &obj.spec.manager;
    let secret_api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let credentials = read_manager_credentials(&secret_api, &manager.credentials_secret).await?;

    let mut config = NsxManagerConfig::new(
        manager.url.clone(),
        credentials.username,
        credentials.password,
    );
    config.insecure_skip_verify = manager.insecure_skip_verify;
    let client = NsxManagerClient::new(config)
        .map_err(|e| Error::Permanent(format!("cannot build manager client: {}", e)))?;
    Ok(UpgradeClientSet::from_client(Arc::new(client)))
}

async fn collect_best_effort(clients: &UpgradeClientSet, name: &str) -> Option<RunOutputs> {
    match collect_outputs(clients).await {
        Ok(outputs) => Some(outputs),
        Err(e) => {
            warn!(name = %name, error = %e, "Failed to collect upgrade outputs");
            None
        }
    }
}

fn record_component_metrics(ctx: &Context, namespace: &str, name: &str, outputs: &RunOutputs) {
    let Some(ref health_state) = ctx.health_state else {
        return;
    };
    for component in &outputs.state {
        health_state.metrics.set_component_upgraded(
            namespace,
            name,
            &component.component_type,
            component.status == UpgradeStatus::Success,
        );
    }
}

fn next_phase(
    sm: &RunStateMachine,
    from: RunPhase,
    event: RunEvent,
    ctx: &RunTransitionContext,
) -> Result<RunPhase, Error> {
    sm.transition(from, event, ctx)
        .map(|t| t.to)
        .ok_or_else(|| {
            Error::Permanent(format!(
                "no transition from {} on event {}",
                from, event
            ))
        })
}

/// Update the status of an NsxUpgradeRun
async fn update_status(
    api: &Api<NsxUpgradeRun>,
    name: &str,
    status: &NsxUpgradeRunStatus,
) -> Result<(), Error> {
    let patch = serde_json::json!({
        "status": status
    });
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
