//! Preference steering: biasing a replicated workload's replacement pod
//! toward the migration target without forcing it.
//!
//! Steering mutates the workload's pod-template affinity with soft
//! preferences and stamps annotations so cleanup can later remove exactly
//! the entries it added, tolerating concurrent user edits.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    NodeSelectorRequirement, NodeSelectorTerm, PreferredSchedulingTerm,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tokio::time::Duration;
use tracing::debug;

use magnetar_cluster::{ApiClient, ClusterError};
use magnetar_core::labels;

use crate::error::Result;
use crate::naming;

/// Node identity label used in steering preferences
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Weight of the steering preference terms
pub const STEERING_WEIGHT: i32 = 100;

/// How long steering terms and temporary budgets live before cleanup
pub const STEERING_TTL: Duration = Duration::from_secs(300);

/// TTL recorded on temporary disruption budgets, in seconds
pub const TEMP_BUDGET_TTL_SECONDS: i64 = 300;

const CONFLICT_RETRIES: u32 = 3;
const CONFLICT_BACKOFF: Duration = Duration::from_secs(1);

/// Add the steering preference terms to the workload's pod template and
/// stamp the steering annotations.
pub fn apply_steering(
    deploy: &mut Deployment,
    preferred_node: &str,
    avoid_node: &str,
    now: DateTime<Utc>,
) {
    let spec = deploy.spec.get_or_insert_with(Default::default);
    let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
    let affinity = pod_spec.affinity.get_or_insert_with(Default::default);
    let node_affinity = affinity.node_affinity.get_or_insert_with(Default::default);
    let preferred = node_affinity
        .preferred_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new);

    preferred.push(steering_term("In", preferred_node));
    preferred.push(steering_term("NotIn", avoid_node));

    let annotations = deploy.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(
        labels::STEERING_MODIFIED_ANNOTATION.to_string(),
        "true".to_string(),
    );
    annotations.insert(
        labels::PREFERRED_NODE_ANNOTATION.to_string(),
        preferred_node.to_string(),
    );
    annotations.insert(
        labels::AVOID_NODE_ANNOTATION.to_string(),
        avoid_node.to_string(),
    );
    annotations.insert(
        labels::STEERING_TIME_ANNOTATION.to_string(),
        now.to_rfc3339(),
    );
}

fn steering_term(operator: &str, node: &str) -> PreferredSchedulingTerm {
    PreferredSchedulingTerm {
        weight: STEERING_WEIGHT,
        preference: NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: HOSTNAME_LABEL.to_string(),
                operator: operator.to_string(),
                values: Some(vec![node.to_string()]),
            }]),
            match_fields: None,
        },
    }
}

/// Remove exactly the steering terms and annotations this plugin added.
/// Returns false when the workload carries no steering state. Idempotent.
pub fn remove_steering(deploy: &mut Deployment) -> bool {
    let Some(annotations) = deploy.metadata.annotations.as_mut() else {
        return false;
    };
    if !annotations.contains_key(labels::STEERING_MODIFIED_ANNOTATION) {
        return false;
    }

    let preferred_node = annotations.remove(labels::PREFERRED_NODE_ANNOTATION);
    let avoid_node = annotations.remove(labels::AVOID_NODE_ANNOTATION);
    annotations.remove(labels::STEERING_MODIFIED_ANNOTATION);
    annotations.remove(labels::STEERING_TIME_ANNOTATION);

    let terms = deploy
        .spec
        .as_mut()
        .and_then(|s| s.template.spec.as_mut())
        .and_then(|ps| ps.affinity.as_mut())
        .and_then(|a| a.node_affinity.as_mut())
        .and_then(|na| {
            na.preferred_during_scheduling_ignored_during_execution
                .as_mut()
        });

    if let Some(terms) = terms {
        terms.retain(|term| {
            !is_our_term(term, "In", preferred_node.as_deref())
                && !is_our_term(term, "NotIn", avoid_node.as_deref())
        });
    }

    true
}

fn is_our_term(term: &PreferredSchedulingTerm, operator: &str, node: Option<&str>) -> bool {
    let Some(node) = node else { return false };
    if term.weight != STEERING_WEIGHT {
        return false;
    }
    term.preference
        .match_expressions
        .as_ref()
        .map(|exprs| {
            exprs.len() == 1
                && exprs[0].key == HOSTNAME_LABEL
                && exprs[0].operator == operator
                && exprs[0]
                    .values
                    .as_deref()
                    .map(|values| values.len() == 1 && values[0] == node)
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// True when the steering stamp is older than the steering TTL
pub fn steering_expired(deploy: &Deployment, now: DateTime<Utc>) -> bool {
    let Some(stamp) = deploy
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::STEERING_TIME_ANNOTATION))
    else {
        return false;
    };
    match DateTime::parse_from_rfc3339(stamp) {
        Ok(at) => (now - at.with_timezone(&Utc)).num_seconds() >= STEERING_TTL.as_secs() as i64,
        Err(_) => true,
    }
}

/// Build the temporary disruption budget protecting the workload's pods
/// while the evicted replica is recreated.
pub fn build_temporary_budget(
    deploy: &Deployment,
    fragment: &str,
) -> Option<PodDisruptionBudget> {
    let name = deploy.metadata.name.as_deref()?;
    let namespace = deploy.metadata.namespace.as_deref().unwrap_or("default");
    let selector = deploy.spec.as_ref()?.selector.clone();

    let mut budget = PodDisruptionBudget::default();
    budget.metadata.name = Some(naming::rescheduled_name(name, fragment));
    budget.metadata.namespace = Some(namespace.to_string());
    budget.metadata.labels = Some(
        [
            (
                labels::CREATED_BY_LABEL.to_string(),
                labels::CREATED_BY_RESCHEDULER.to_string(),
            ),
            (
                labels::TEMPORARY_LABEL.to_string(),
                labels::TEMPORARY_TRUE.to_string(),
            ),
        ]
        .into_iter()
        .collect(),
    );
    budget.metadata.annotations = Some(
        [(
            labels::BUDGET_TTL_ANNOTATION.to_string(),
            TEMP_BUDGET_TTL_SECONDS.to_string(),
        )]
        .into_iter()
        .collect(),
    );
    budget.spec = Some(PodDisruptionBudgetSpec {
        min_available: Some(IntOrString::Int(1)),
        selector: Some(selector),
        ..Default::default()
    });

    Some(budget)
}

/// True when a temporary budget outlived its TTL annotation
pub fn budget_expired(budget: &PodDisruptionBudget, now: DateTime<Utc>) -> bool {
    let Some(created) = budget.metadata.creation_timestamp.as_ref() else {
        return false;
    };
    let ttl = budget
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::BUDGET_TTL_ANNOTATION))
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(TEMP_BUDGET_TTL_SECONDS);
    (now - created.0).num_seconds() >= ttl
}

/// Fetch the workload, strip our steering state, and write it back with a
/// bounded conflict retry. Returns false when there was nothing to remove.
pub async fn remove_steering_from(
    api: &ApiClient,
    namespace: &str,
    name: &str,
) -> Result<bool> {
    for attempt in 0..CONFLICT_RETRIES {
        let mut deploy = match api.get_deployment(namespace, name).await {
            Ok(d) => d,
            // Deleted under us: nothing to clean up
            Err(ClusterError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if !remove_steering(&mut deploy) {
            return Ok(false);
        }

        match api.update_deployment(&deploy).await {
            Ok(_) => {
                debug!(
                    deployment = format!("{}/{}", namespace, name).as_str(),
                    "Removed steering preferences"
                );
                return Ok(true);
            }
            Err(ClusterError::Conflict { .. }) if attempt + 1 < CONFLICT_RETRIES => {
                tokio::time::sleep(CONFLICT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(false)
}
