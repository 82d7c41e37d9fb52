//! Launching a single instance for a machine
//!
//! Every reference in the provider config is resolved to concrete ids before
//! one run request is issued. Unresolvable references are configuration
//! errors; failed lookups surface as cloud errors.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use ec2_actuator_models::{BlockDeviceMapping, ProviderConfig, ResourceReference, TagSpecification};
use tracing::{debug, info, warn};

use crate::cloud::{
    BlockDeviceMappingSpec, CloudClient, EbsSpec, Filter, IamInstanceProfile, Image, Instance,
    InstanceMarketOptions, NetworkInterfaceSpec, PlacementSpec, RunInstancesInput, Tag,
    TagSpecificationSet, TaggedResource, Tenancy,
};
use crate::error::{Error, Result};
use crate::names::tags;

/// Everything needed to launch the instance for one machine
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub machine_name: &'a str,
    pub cluster_id: &'a str,
    pub config: &'a ProviderConfig,
    /// Raw user data; encoded before sending
    pub user_data: &'a [u8],
}

pub async fn launch_instance(client: &dyn CloudClient, request: LaunchRequest<'_>) -> Result<Instance> {
    let config = request.config;

    let image_id = resolve_ami(client, &config.ami).await?;
    let security_group_ids = resolve_security_group_ids(client, &config.security_groups).await?;
    let subnet_ids =
        resolve_subnet_ids(client, &config.subnet, &config.placement.availability_zone).await?;
    if subnet_ids.len() > 1 {
        warn!(
            machine = request.machine_name,
            "More than one subnet id returned, only first one will be used"
        );
    }

    let block_device_mappings = block_device_mappings(client, &config.block_devices, &image_id).await?;

    let tag_list = build_tag_list(request.machine_name, request.cluster_id, &config.tags);

    let input = RunInstancesInput {
        image_id,
        instance_type: config.instance_type.clone(),
        key_name: config.key_name.clone(),
        iam_instance_profile: iam_instance_profile(config.iam_instance_profile.as_ref()),
        network_interfaces: vec![NetworkInterfaceSpec {
            device_index: config.device_index,
            associate_public_ip_address: config.public_ip,
            subnet_id: subnet_ids.into_iter().next(),
            groups: security_group_ids,
        }],
        tag_specifications: vec![
            TagSpecificationSet {
                resource_type: TaggedResource::Instance,
                tags: tag_list.clone(),
            },
            TagSpecificationSet {
                resource_type: TaggedResource::Volume,
                tags: tag_list,
            },
        ],
        user_data: (!request.user_data.is_empty())
            .then(|| base64::engine::general_purpose::STANDARD.encode(request.user_data)),
        placement: placement(config)?,
        block_device_mappings,
        instance_market_options: config.spot_market_options.as_ref().map(|spot| {
            InstanceMarketOptions {
                spot_max_price: spot.max_price.clone().filter(|price| !price.is_empty()),
            }
        }),
    };

    let reservation = client.run_instances(&input).await.map_err(|err| {
        if err.is_client_error() {
            info!(machine = request.machine_name, error = %err, "Error launching instance");
            Error::invalid_configuration(format!("error launching instance: {}", err.message))
        } else {
            Error::create(format!("error creating EC2 instance: {}", err))
        }
    })?;

    let count = reservation.instances.len();
    let mut instances = reservation.instances.into_iter();
    match (instances.next(), count) {
        (Some(instance), 1) => {
            info!(
                machine = request.machine_name,
                instance_id = %instance.instance_id,
                "Launched instance"
            );
            Ok(instance)
        }
        _ => Err(Error::create(format!(
            "unexpected reservation creating instance: got {} instances",
            count
        ))),
    }
}

/// Explicit id, or the newest image matching the filters
pub(crate) async fn resolve_ami(client: &dyn CloudClient, ami: &ResourceReference) -> Result<String> {
    if let Some(id) = ami.explicit_id() {
        info!(ami = id, "Using AMI");
        return Ok(id.to_string());
    }
    if ami.filters.is_empty() {
        return Err(Error::invalid_configuration("AMI ID or AMI filters need to be specified"));
    }

    debug!("Describing AMI based on filters");
    let images = client.describe_images(&[], &ami.filters).await?;
    Ok(newest_image(&images)?.image_id.clone())
}

fn creation_time(image: &Image) -> Result<DateTime<Utc>> {
    let raw = image.creation_date.as_deref().unwrap_or_default();
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| {
            Error::invalid_configuration(format!(
                "unable to parse time for {:?} AMI: {}",
                image.image_id, e
            ))
        })
}

/// Latest by creation date; an unparsable date on any candidate fails
pub(crate) fn newest_image(images: &[Image]) -> Result<&Image> {
    let (first, rest) = images
        .split_first()
        .ok_or_else(|| Error::invalid_configuration("no image for given filters not found"))?;

    let mut latest = first;
    let mut latest_time = creation_time(first)?;
    for image in rest {
        let time = creation_time(image)?;
        if latest_time < time {
            latest = image;
            latest_time = time;
        }
    }
    Ok(latest)
}

/// Explicit ids in order, plus every group matched by filter-based references
pub(crate) async fn resolve_security_group_ids(
    client: &dyn CloudClient,
    groups: &[ResourceReference],
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for group in groups {
        if let Some(id) = group.explicit_id() {
            ids.push(id.to_string());
        } else if !group.filters.is_empty() {
            debug!("Describing security groups based on filters");
            let found = client.describe_security_groups(&group.filters).await?;
            ids.extend(found.into_iter().map(|g| g.group_id));
        }
    }
    if groups.is_empty() {
        info!("No security group found");
    }
    Ok(ids)
}

/// Explicit id, or every subnet matching the filters (narrowed to the zone
/// when one is configured). At least one must resolve.
pub(crate) async fn resolve_subnet_ids(
    client: &dyn CloudClient,
    subnet: &ResourceReference,
    availability_zone: &str,
) -> Result<Vec<String>> {
    if let Some(id) = subnet.explicit_id() {
        return Ok(vec![id.to_string()]);
    }

    let mut filters = Vec::new();
    if !availability_zone.is_empty() {
        filters.push(Filter::new("availabilityZone", [availability_zone]));
    }
    filters.extend(subnet.filters.iter().cloned());

    debug!("Describing subnets based on filters");
    let ids: Vec<String> = client
        .describe_subnets(&filters)
        .await?
        .into_iter()
        .map(|s| s.subnet_id)
        .collect();

    if ids.is_empty() {
        return Err(Error::invalid_configuration("no subnet IDs were found"));
    }
    Ok(ids)
}

/// User tags, minus the reserved ones, followed by the ownership, cluster id
/// and name tags. A repeated key keeps its first position and its last value.
pub fn build_tag_list(machine_name: &str, cluster_id: &str, user_tags: &[TagSpecification]) -> Vec<Tag> {
    let raw = user_tags
        .iter()
        .filter(|tag| {
            tag.name != tags::NAME
                && tag.name != tags::CLUSTER_ID
                && !tag.name.starts_with(tags::CLUSTER_OWNERSHIP_PREFIX)
        })
        .map(|tag| Tag::new(&tag.name, &tag.value))
        .chain([
            Tag::new(tags::cluster_ownership_key(cluster_id), tags::OWNED),
            Tag::new(tags::CLUSTER_ID, cluster_id),
            Tag::new(tags::NAME, machine_name),
        ]);

    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    let mut list: Vec<Tag> = Vec::new();
    for tag in raw {
        match positions.get(&tag.key) {
            Some(&index) => list[index].value = tag.value,
            None => {
                positions.insert(tag.key.clone(), list.len());
                list.push(tag);
            }
        }
    }
    list
}

fn iam_instance_profile(profile: Option<&ResourceReference>) -> Option<IamInstanceProfile> {
    let profile = profile?;
    if let Some(arn) = profile.arn.as_deref().filter(|arn| !arn.is_empty()) {
        return Some(IamInstanceProfile {
            arn: Some(arn.to_string()),
            name: None,
        });
    }
    profile.explicit_id().map(|id| IamInstanceProfile {
        arn: None,
        name: Some(id.to_string()),
    })
}

/// An availability zone only pins placement when no explicit subnet does
fn placement(config: &ProviderConfig) -> Result<Option<PlacementSpec>> {
    let zone = &config.placement.availability_zone;
    let mut placement = (!zone.is_empty() && config.subnet.explicit_id().is_none()).then(|| PlacementSpec {
        availability_zone: Some(zone.clone()),
        tenancy: None,
    });

    let tenancy = &config.placement.tenancy;
    if !tenancy.is_empty() {
        let parsed = Tenancy::parse(tenancy).ok_or_else(|| {
            Error::create(format!(
                "invalid instance tenancy: {}. Allowed options are: default,dedicated,host",
                tenancy
            ))
        })?;
        placement.get_or_insert_with(PlacementSpec::default).tenancy = Some(parsed);
    }

    Ok(placement)
}

/// Unnamed devices take the image's root device name; only one may be unnamed
async fn block_device_mappings(
    client: &dyn CloudClient,
    devices: &[BlockDeviceMapping],
    image_id: &str,
) -> Result<Vec<BlockDeviceMappingSpec>> {
    if devices.is_empty() {
        return Ok(Vec::new());
    }

    let images = client.describe_images(&[image_id.to_string()], &[]).await?;
    let image = images
        .first()
        .ok_or_else(|| Error::invalid_configuration("no image for given AMI not found"))?;

    let mut root_found = false;
    let mut mappings = Vec::with_capacity(devices.len());
    for device in devices {
        let device_name = match device.device_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => {
                if root_found {
                    return Err(Error::invalid_configuration("non root device must have name"));
                }
                root_found = true;
                image.root_device_name.clone().unwrap_or_default()
            }
        };

        let ebs = &device.ebs;
        let kms_key_id = ebs.kms_key.as_ref().and_then(|key| {
            key.explicit_id()
                .or_else(|| key.arn.as_deref().filter(|arn| !arn.is_empty()))
                .map(str::to_string)
        });

        mappings.push(BlockDeviceMappingSpec {
            device_name,
            ebs: EbsSpec {
                volume_size: ebs.volume_size,
                volume_type: ebs.volume_type.clone(),
                iops: ebs.iops.filter(|_| ebs.volume_type.as_deref() == Some("io1")),
                encrypted: ebs.encrypted,
                kms_key_id,
                delete_on_termination: true,
            },
        });
    }
    Ok(mappings)
}
