//! Instance lookup and duplicate resolution
//!
//! An instance belongs to a machine when it carries both identity tags: the
//! machine name under `Name` and the cluster id under `clusterid`. Crashed
//! create retries can leave several such instances behind; [`select_newest`]
//! picks the one to keep.

use tracing::{info, warn};

use crate::cloud::{
    CloudClient, CloudResult, DescribeInstancesInput, Filter, Instance, InstanceState,
    InstanceStateChange,
};
use crate::names::tags;

/// Which lifecycle states a lookup cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    /// Running or pending
    Active,
    /// Stopped or stopping
    Stopped,
    Any,
}

impl StateFilter {
    fn states(&self) -> &'static [InstanceState] {
        match self {
            StateFilter::Active => &[InstanceState::Running, InstanceState::Pending],
            StateFilter::Stopped => &[InstanceState::Stopped, InstanceState::Stopping],
            StateFilter::Any => &[],
        }
    }

    fn filter(&self) -> Option<Filter> {
        let states = self.states();
        if states.is_empty() {
            None
        } else {
            Some(Filter::new(
                "instance-state-name",
                states.iter().map(InstanceState::as_str),
            ))
        }
    }
}

/// All instances tagged for the machine, flattened across reservations
pub async fn instances_for_machine(
    client: &dyn CloudClient,
    machine_name: &str,
    cluster_id: &str,
    states: StateFilter,
) -> CloudResult<Vec<Instance>> {
    let mut filters = vec![
        Filter::new(format!("tag:{}", tags::NAME), [machine_name]),
        Filter::new(format!("tag:{}", tags::CLUSTER_ID), [cluster_id]),
    ];
    filters.extend(states.filter());

    let reservations = client
        .describe_instances(&DescribeInstancesInput {
            instance_ids: Vec::new(),
            filters,
        })
        .await?;

    Ok(reservations
        .into_iter()
        .flat_map(|reservation| reservation.instances)
        .collect())
}

/// Canonical instance plus the duplicates to terminate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub newest: Instance,
    pub others: Vec<Instance>,
}

/// Keep whichever of the two launched later. An instance without a launch
/// time loses to one with it; between two without, the incumbent stays.
fn newer(incumbent: Instance, candidate: Instance) -> (Instance, Instance) {
    match (incumbent.launch_time, candidate.launch_time) {
        (None, None) => (incumbent, candidate),
        (None, Some(_)) => (candidate, incumbent),
        (Some(_), None) => (incumbent, candidate),
        (Some(a), Some(b)) if a > b => (incumbent, candidate),
        (Some(_), Some(_)) => (candidate, incumbent),
    }
}

/// Pick the most recently launched instance. `None` for an empty input.
///
/// Two instances that both lack a launch time resolve to whichever came
/// first in the input, which is only as stable as the API's ordering.
pub fn select_newest(instances: Vec<Instance>) -> Option<Selection> {
    let mut iter = instances.into_iter();
    let mut newest = iter.next()?;
    let mut others = Vec::new();

    for candidate in iter {
        let (winner, loser) = newer(newest, candidate);
        newest = winner;
        others.push(loser);
    }

    Some(Selection { newest, others })
}

/// Terminate instances in one batched call. No call is made for an empty slice.
pub async fn terminate_instances(
    client: &dyn CloudClient,
    instances: &[Instance],
) -> CloudResult<Vec<InstanceStateChange>> {
    if instances.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<String> = instances.iter().map(|i| i.instance_id.clone()).collect();
    info!(instances = ?ids, "Terminating instances");
    client.terminate_instances(&ids).await
}

/// Terminate stopped instances left over from earlier attempts
pub async fn remove_stopped_instances(
    client: &dyn CloudClient,
    machine_name: &str,
    cluster_id: &str,
) -> CloudResult<usize> {
    let stopped = instances_for_machine(client, machine_name, cluster_id, StateFilter::Stopped).await?;
    if stopped.is_empty() {
        return Ok(0);
    }

    warn!(
        machine = machine_name,
        count = stopped.len(),
        "Removing stopped instances"
    );
    terminate_instances(client, &stopped).await?;
    Ok(stopped.len())
}
