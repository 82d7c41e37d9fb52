//! Registering instances with the load balancers declared on their machine,
//! and taking them out again on delete
//!
//! Classic and network load balancers are handled by independent branches
//! that run concurrently. Within a branch every registration is attempted;
//! failures are collected and returned together. Only network load balancers
//! need explicit deregistration; classic ones drop terminated instances.

use std::collections::BTreeMap;

use ec2_actuator_models::{LoadBalancerReference, LoadBalancerType};
use tracing::{debug, error, info};

use crate::cloud::{CloudClient, Instance, TargetDescription, TargetGroup, TargetType};
use crate::error::{Error, Result};

pub async fn register_with_load_balancers(
    client: &dyn CloudClient,
    load_balancers: &[LoadBalancerReference],
    instance: &Instance,
) -> Result<()> {
    if load_balancers.is_empty() {
        debug!(instance_id = %instance.instance_id, "No load balancers to register with");
        return Ok(());
    }

    let names_of = |kind: LoadBalancerType| -> Vec<String> {
        load_balancers
            .iter()
            .filter(|lb| lb.kind == kind)
            .map(|lb| lb.name.clone())
            .collect()
    };
    let classic = names_of(LoadBalancerType::Classic);
    let network = names_of(LoadBalancerType::Network);

    let (classic_result, network_result) = tokio::join!(
        register_with_classic(client, &classic, instance),
        register_with_network(client, &network, instance),
    );

    let errors: Vec<Error> = [classic_result, network_result]
        .into_iter()
        .filter_map(|result| result.err())
        .collect();
    match Error::aggregate(errors) {
        Some(err) => {
            error!(instance_id = %instance.instance_id, error = %err, "Failed to register with load balancers");
            Err(err)
        }
        None => {
            info!(instance_id = %instance.instance_id, "Registered with load balancers");
            Ok(())
        }
    }
}

async fn register_with_classic(client: &dyn CloudClient, names: &[String], instance: &Instance) -> Result<()> {
    let instance_ids = [instance.instance_id.clone()];
    let mut errors = Vec::new();

    for name in names {
        if let Err(err) = client
            .register_instances_with_classic_load_balancer(name, &instance_ids)
            .await
        {
            errors.push(Error::update(format!(
                "{}: failed to register instance with classic load balancer {}: {}",
                instance.instance_id, name, err
            )));
        }
    }

    Error::aggregate(errors).map_or(Ok(()), Err)
}

async fn register_with_network(client: &dyn CloudClient, names: &[String], instance: &Instance) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }

    let mut errors = Vec::new();
    let target_groups = network_target_groups(client, names, &mut errors, Error::update).await?;

    for group in target_groups.values() {
        let target = match target_for(group, instance, Error::update) {
            Ok(target) => target,
            Err(err) => {
                errors.push(err);
                continue;
            }
        };
        if let Err(err) = client.register_targets(&group.arn, &[target]).await {
            errors.push(Error::update(format!(
                "{}: failed to register instance with target group {}: {}",
                instance.instance_id, group.arn, err
            )));
        }
    }

    Error::aggregate(errors).map_or(Ok(()), Err)
}

/// Remove every instance from the target groups behind the machine's network
/// load balancers. Every deregistration is attempted.
pub async fn deregister_from_load_balancers(
    client: &dyn CloudClient,
    load_balancers: &[LoadBalancerReference],
    instances: &[Instance],
) -> Result<()> {
    let names: Vec<String> = load_balancers
        .iter()
        .filter(|lb| lb.kind == LoadBalancerType::Network)
        .map(|lb| lb.name.clone())
        .collect();
    if names.is_empty() || instances.is_empty() {
        return Ok(());
    }

    let mut errors = Vec::new();
    let target_groups = network_target_groups(client, &names, &mut errors, Error::delete).await?;

    for instance in instances {
        for group in target_groups.values() {
            let target = match target_for(group, instance, Error::delete) {
                Ok(target) => target,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            if let Err(err) = client.deregister_targets(&group.arn, &[target]).await {
                errors.push(Error::delete(format!(
                    "{}: failed to deregister instance from target group {}: {}",
                    instance.instance_id, group.arn, err
                )));
            }
        }
    }

    match Error::aggregate(errors) {
        Some(err) => {
            error!(error = %err, "Failed to deregister from load balancers");
            Err(err)
        }
        None => {
            info!(instances = instances.len(), "Deregistered from load balancers");
            Ok(())
        }
    }
}

/// Target groups behind the named network load balancers, keyed by ARN.
/// Per-balancer lookup failures are pushed onto `errors`.
async fn network_target_groups(
    client: &dyn CloudClient,
    names: &[String],
    errors: &mut Vec<Error>,
    failure: fn(String) -> Error,
) -> Result<BTreeMap<String, TargetGroup>> {
    let load_balancers = client
        .describe_load_balancers(names)
        .await
        .map_err(|err| failure(format!("failed to describe load balancers {:?}: {}", names, err)))?;

    // One instance may back several listeners through the same target group
    let mut target_groups: BTreeMap<String, TargetGroup> = BTreeMap::new();
    for load_balancer in &load_balancers {
        match client.describe_target_groups(&load_balancer.arn).await {
            Ok(groups) => {
                for group in groups {
                    target_groups.entry(group.arn.clone()).or_insert(group);
                }
            }
            Err(err) => errors.push(failure(format!(
                "failed to describe target groups for {}: {}",
                load_balancer.name, err
            ))),
        }
    }
    Ok(target_groups)
}

fn target_for(group: &TargetGroup, instance: &Instance, failure: fn(String) -> Error) -> Result<TargetDescription> {
    let id = match group.target_type {
        TargetType::Instance => instance.instance_id.clone(),
        TargetType::Ip => instance.private_ip_address.clone().ok_or_else(|| {
            failure(format!(
                "{}: no private IP to target in group {}",
                instance.instance_id, group.arn
            ))
        })?,
    };
    Ok(TargetDescription { id })
}
