//! Multi-plugin pipelines.
//!
//! A pipeline runs one request through several plugins, either one after
//! another or concurrently. Every step goes through [`Router::invoke`], so
//! each step is validated, sandboxed, and audited on its own.

use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{ROUTER_TARGET, Router};
use crate::error::InvocationFault;
use crate::evidence;
use crate::protocol::{EvidenceHashes, PluginRequest, PluginResponse, PluginStatus};
use crate::sandbox::elapsed_millis;
use crate::validator;

/// How pipeline steps are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStrategy {
    /// Steps run in list order, one at a time.
    Sequential,
    /// Steps run concurrently.
    FanOut,
}

impl PipelineStrategy {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::FanOut => "fan_out",
        }
    }
}

/// Which plugins a pipeline runs and how.
///
/// ```
/// use warden_gateway::router::{PipelinePolicy, PipelineStrategy};
///
/// let policy = PipelinePolicy::sequential(["lint", "format"]).stop_on_failure(true);
/// assert_eq!(policy.strategy(), PipelineStrategy::Sequential);
/// assert_eq!(policy.plugin_ids(), ["lint", "format"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelinePolicy {
    strategy: PipelineStrategy,
    plugin_ids: Vec<String>,
    #[serde(default)]
    stop_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
}

impl PipelinePolicy {
    /// Runs `plugin_ids` in order.
    #[must_use]
    pub fn sequential(plugin_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_strategy(PipelineStrategy::Sequential, plugin_ids)
    }

    /// Runs `plugin_ids` concurrently.
    #[must_use]
    pub fn fan_out(plugin_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_strategy(PipelineStrategy::FanOut, plugin_ids)
    }

    fn with_strategy(
        strategy: PipelineStrategy,
        plugin_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            strategy,
            plugin_ids: plugin_ids.into_iter().map(Into::into).collect(),
            stop_on_failure: false,
            timeout_ms: None,
        }
    }

    /// Stops a sequential pipeline at the first non-ok step.
    /// Fan-out pipelines ignore the flag.
    #[must_use]
    pub const fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    /// Caps every step's timeout.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Returns the scheduling strategy.
    #[must_use]
    pub const fn strategy(&self) -> PipelineStrategy {
        self.strategy
    }

    /// Returns the plugin ids in step order.
    #[must_use]
    pub fn plugin_ids(&self) -> &[String] {
        &self.plugin_ids
    }

    /// Returns whether a failing sequential step ends the pipeline.
    #[must_use]
    pub const fn stops_on_failure(&self) -> bool {
        self.stop_on_failure
    }

    /// Returns the per-step timeout cap.
    #[must_use]
    pub const fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Plugin the step invoked.
    pub plugin_id: String,
    /// The step's response.
    pub response: PluginResponse,
    /// Position of the plugin in the policy's list.
    pub step_index: usize,
}

/// Result of [`Router::invoke_pipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// Run the pipeline belongs to.
    pub run_id: String,
    /// Strategy that scheduled the steps.
    pub strategy: PipelineStrategy,
    /// Executed steps, ordered by `step_index`.
    pub steps: Vec<PipelineStep>,
    /// `ok` only when every step is `ok`. A sequential pipeline halted by
    /// `stop_on_failure` carries the failing step's status; any other
    /// failure, or a pipeline that ran nothing, is `error`.
    ///
    /// The range is therefore wider than `ok` and `error`: `timeout` and
    /// `rejected` appear here only for a halted sequential pipeline.
    pub overall_status: PluginStatus,
    /// Wall-clock time for the whole pipeline.
    pub total_duration_ms: u64,
}

impl Router {
    /// Runs `request` through every plugin named by `policy`.
    ///
    /// Step `i` runs with request id `<request_id>#<i>`. An invalid policy
    /// runs nothing and reports [`PluginStatus::Error`].
    #[must_use]
    pub fn invoke_pipeline(
        &self,
        policy: &PipelinePolicy,
        request: &PluginRequest,
    ) -> PipelineResponse {
        let started = Instant::now();
        let issues = self.validator.validate_pipeline(policy);
        let steps = if validator::has_errors(&issues) {
            warn!(
                target: ROUTER_TARGET,
                run_id = request.run_id(),
                fields = ?validator::error_fields(&issues),
                "pipeline refused"
            );
            Vec::new()
        } else {
            match policy.strategy() {
                PipelineStrategy::Sequential => self.run_sequential(policy, request),
                PipelineStrategy::FanOut => self.run_fan_out(policy, request),
            }
        };

        let overall_status = overall_status(policy, &steps);
        let total_duration_ms = elapsed_millis(started);
        info!(
            target: ROUTER_TARGET,
            run_id = request.run_id(),
            strategy = policy.strategy().as_str(),
            steps = steps.len(),
            overall_status = overall_status.as_str(),
            total_duration_ms,
            "pipeline complete"
        );
        PipelineResponse {
            run_id: request.run_id().to_owned(),
            strategy: policy.strategy(),
            steps,
            overall_status,
            total_duration_ms,
        }
    }

    fn run_sequential(&self, policy: &PipelinePolicy, request: &PluginRequest) -> Vec<PipelineStep> {
        let mut steps = Vec::with_capacity(policy.plugin_ids().len());
        for (step_index, plugin_id) in policy.plugin_ids().iter().enumerate() {
            let response = self.invoke(plugin_id, &request.for_step(step_index, policy.timeout_ms()));
            let failed = !response.status().is_ok();
            steps.push(PipelineStep {
                plugin_id: plugin_id.clone(),
                response,
                step_index,
            });
            if failed && policy.stops_on_failure() {
                break;
            }
        }
        steps
    }

    fn run_fan_out(&self, policy: &PipelinePolicy, request: &PluginRequest) -> Vec<PipelineStep> {
        thread::scope(|scope| {
            let pending: Vec<_> = policy
                .plugin_ids()
                .iter()
                .enumerate()
                .map(|(step_index, plugin_id)| {
                    let step_request = request.for_step(step_index, policy.timeout_ms());
                    let spawned = thread::Builder::new()
                        .name(format!("warden-fan-out-{step_index}"))
                        .spawn_scoped(scope, move || self.invoke(plugin_id, &step_request));
                    (step_index, plugin_id, spawned)
                })
                .collect();

            pending
                .into_iter()
                .map(|(step_index, plugin_id, spawned)| {
                    let step_request = request.for_step(step_index, policy.timeout_ms());
                    let response = match spawned {
                        Ok(handle) => handle
                            .join()
                            .unwrap_or_else(|_| panicked_step(plugin_id, &step_request)),
                        Err(source) => {
                            // Out of threads: run the step on this one.
                            warn!(target: ROUTER_TARGET, plugin = %plugin_id, %source, "fan-out spawn failed");
                            self.invoke(plugin_id, &step_request)
                        }
                    };
                    PipelineStep {
                        plugin_id: plugin_id.clone(),
                        response,
                        step_index,
                    }
                })
                .collect()
        })
    }
}

fn overall_status(policy: &PipelinePolicy, steps: &[PipelineStep]) -> PluginStatus {
    let Some(last) = steps.last() else {
        return PluginStatus::Error;
    };
    let halted = policy.strategy() == PipelineStrategy::Sequential
        && policy.stops_on_failure()
        && !last.response.status().is_ok();
    if halted {
        last.response.status()
    } else if steps.iter().all(|step| step.response.status().is_ok()) {
        PluginStatus::Ok
    } else {
        PluginStatus::Error
    }
}

fn panicked_step(plugin_id: &str, request: &PluginRequest) -> PluginResponse {
    let fault = InvocationFault::RuntimeFault {
        detail: "fan-out worker panicked".to_owned(),
    };
    warn!(target: ROUTER_TARGET, plugin = plugin_id, %fault, "fan-out step lost");
    PluginResponse::stamped(
        request.request_id(),
        plugin_id,
        fault.status(),
        Value::Null,
        EvidenceHashes {
            input_hash: evidence::content_hash(request.payload()),
            output_hash: String::new(),
        },
        0,
        fault.note(),
    )
}
