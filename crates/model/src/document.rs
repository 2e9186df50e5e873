//! Final output-document assembly (spec §6): flattens the internal object
//! graph — already fully merged by C3–C6 — into the public `KnxProject`
//! value, applying the deterministic ordering rules from §4.6.

use indexmap::IndexMap;

use crate::project::Project;
use crate::refs::DatapointType;
use crate::style::format_address;
use crate::types::{
    ChannelNode, ComObjectInstanceRef, DeviceInstance, Function, GroupAddress, GroupRange, ModuleAttribution,
    ProjectInformation, Space,
};

/// Project-level metadata, including the two fields §6 adds beyond
/// [`ProjectInformation`] (`xknxproject_version`, `language_code`).
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    /// Project id.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Last-modified timestamp.
    pub last_modified: Option<String>,
    /// Group-address formatting style.
    pub group_address_style: crate::style::GroupAddressStyle,
    /// GUID.
    pub guid: Option<String>,
    /// Tool name.
    pub created_by: Option<String>,
    /// Schema version.
    pub schema_version: u32,
    /// ETS tool version.
    pub tool_version: Option<String>,
    /// This library's own version, `env!("CARGO_PKG_VERSION")` of the
    /// resolver crate.
    pub xknxproject_version: String,
    /// The language code actually resolved, if any.
    pub language_code: Option<String>,
}

/// A resolved communication object, keyed `"<individual-address>/<ref-id>"`
/// in [`KnxProject::communication_objects`].
#[derive(Debug, Clone)]
pub struct CommunicationObject {
    /// The owning device's individual address.
    pub device_address: String,
    /// Effective object number.
    pub number: Option<i64>,
    /// Resolved name.
    pub name: Option<String>,
    /// Resolved text.
    pub text: Option<String>,
    /// Resolved function text.
    pub function_text: Option<String>,
    /// Resolved object size.
    pub object_size: Option<String>,
    /// Resolved flags.
    pub flags: Option<crate::flags::ComObjectFlags>,
    /// Resolved datapoint types.
    pub datapoint_types: Vec<DatapointType>,
    /// Channel id, if any.
    pub channel_id: Option<String>,
    /// Linked group-address identifiers.
    pub group_address_links: Vec<String>,
    /// Module attribution, for objects cloned from a module definition.
    pub module: Option<ModuleAttribution>,
}

/// A flattened device entry.
#[derive(Debug, Clone)]
pub struct Device {
    /// `Id` attribute.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Comment.
    pub comment: Option<String>,
    /// Last-modified timestamp.
    pub last_modified: Option<String>,
    /// Manufacturer display name.
    pub manufacturer_name: Option<String>,
    /// Product display name.
    pub product_name: Option<String>,
    /// Hardware display name.
    pub hardware_name: Option<String>,
    /// Order number.
    pub order_number: Option<String>,
    /// Additional individual addresses.
    pub additional_addresses: Vec<String>,
    /// Channel nodes, with resolved text.
    pub channels: Vec<ChannelNode>,
    /// `communication_objects` keys belonging to this device.
    pub communication_object_ids: Vec<String>,
}

/// A flattened topology line.
#[derive(Debug, Clone)]
pub struct LineOutput {
    /// Address, `0..=15`.
    pub address: u8,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Medium-type reference.
    pub medium_type: Option<String>,
    /// Individual addresses of devices on this line, in ascending order.
    pub device_addresses: Vec<String>,
}

/// A flattened topology area.
#[derive(Debug, Clone)]
pub struct AreaOutput {
    /// Address, `0..=15`.
    pub address: u8,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Lines, in ascending address order.
    pub lines: Vec<LineOutput>,
}

/// A flattened location, nested recursively under `spaces`.
#[derive(Debug, Clone)]
pub struct LocationOutput {
    /// `Id` attribute.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Space type.
    pub space_type: crate::types::SpaceType,
    /// Resolved usage text.
    pub usage_text: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Individual addresses of installed devices.
    pub devices: Vec<String>,
    /// Nested locations, keyed by name.
    pub spaces: IndexMap<String, LocationOutput>,
    /// Function ids bound to this location.
    pub function_ids: Vec<String>,
}

/// A group address with its formatted text representation.
#[derive(Debug, Clone)]
pub struct GroupAddressOutput {
    /// The underlying parsed value.
    pub inner: GroupAddress,
    /// Formatted per the project's group-address style.
    pub formatted: String,
}

/// A group range, nested recursively under `ranges`.
#[derive(Debug, Clone)]
pub struct GroupRangeOutput {
    /// The underlying parsed value (nested `ranges` field is unused here;
    /// traversal uses [`GroupRangeOutput::ranges`] instead).
    pub inner: GroupRange,
    /// Nested ranges, keyed by name, sorted by start address.
    pub ranges: IndexMap<String, GroupRangeOutput>,
}

/// The resolution engine's public output document (spec §6).
#[derive(Debug, Clone)]
pub struct KnxProject {
    /// Project metadata.
    pub info: ProjectInfo,
    /// `{"<ia>/<ref-id>" -> CommunicationObject}`.
    pub communication_objects: IndexMap<String, CommunicationObject>,
    /// `{individual_address -> Device}`.
    pub devices: IndexMap<String, Device>,
    /// `{area_address -> Area}`.
    pub topology: IndexMap<String, AreaOutput>,
    /// `{space_name -> Space}`, nested recursively.
    pub locations: IndexMap<String, LocationOutput>,
    /// `{formatted_address -> GroupAddress}`.
    pub group_addresses: IndexMap<String, GroupAddressOutput>,
    /// `{range_label -> GroupRange}`, nested recursively.
    pub group_ranges: IndexMap<String, GroupRangeOutput>,
    /// `{function_id -> Function}`.
    pub functions: IndexMap<String, Function>,
}

/// Flatten `project` (already fully merged by C3–C6) into the output
/// document.
pub fn build(mut project: Project, info: ProjectInformation, language_code: Option<String>) -> KnxProject {
    let style = info.group_address_style;

    let mut communication_objects = IndexMap::new();
    let mut devices = IndexMap::new();

    project.areas.sort_by_key(|area| area.address);
    for area in &mut project.areas {
        area.lines.sort_by_key(|line| line.address);
        for line in &mut area.lines {
            line.devices.sort_by_key(|device| device.address);
        }
    }

    for area in &project.areas {
        for line in &area.lines {
            for device in &line.devices {
                let individual_address = device.individual_address();
                let ids = flatten_communication_objects(device, &individual_address, &mut communication_objects);
                devices.insert(individual_address.clone(), flatten_device(device, ids));
            }
        }
    }

    apply_datapoint_defaults(&mut communication_objects);

    let mut back_links: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, object) in &communication_objects {
        for link in &object.group_address_links {
            back_links.entry(link.clone()).or_default().push(key.clone());
        }
    }

    let mut group_addresses: IndexMap<String, GroupAddressOutput> = project
        .group_addresses
        .into_values()
        .map(|address| {
            let formatted = format_address(address.raw_address, style);
            (formatted.clone(), GroupAddressOutput { inner: address, formatted })
        })
        .collect();
    group_addresses.sort_by(|_, a, _, b| a.inner.raw_address.cmp(&b.inner.raw_address));

    inherit_group_address_datapoint_types(&mut group_addresses, &communication_objects, &back_links);

    // `back_links` above is keyed by raw group-address identifier (matching
    // `GroupAddress::identifier`), but the public `group_address_links` field
    // must hold the same formatted addresses `group_addresses` is keyed by.
    let address_formats: IndexMap<String, String> =
        group_addresses.values().map(|output| (output.inner.identifier.clone(), output.formatted.clone())).collect();
    for object in communication_objects.values_mut() {
        object.group_address_links =
            object.group_address_links.iter().filter_map(|id| address_formats.get(id).cloned()).collect();
    }

    let topology = project
        .areas
        .iter()
        .map(|area| {
            (
                area.address.to_string(),
                AreaOutput {
                    address: area.address,
                    name: area.name.clone(),
                    description: area.description.clone(),
                    lines: area
                        .lines
                        .iter()
                        .map(|line| LineOutput {
                            address: line.address,
                            name: line.name.clone(),
                            description: line.description.clone(),
                            medium_type: line.medium_type.clone(),
                            device_addresses: line.devices.iter().map(DeviceInstance::individual_address).collect(),
                        })
                        .collect(),
                },
            )
        })
        .collect();

    let locations = project.locations.iter().map(|space| (space.name.clone(), flatten_space(space))).collect();

    let group_ranges = flatten_group_ranges(project.group_ranges);

    let functions = project.functions.into_iter().map(|function| (function.identifier.clone(), function)).collect();

    KnxProject {
        info: ProjectInfo {
            project_id: info.project_id,
            name: info.name,
            last_modified: info.last_modified,
            group_address_style: info.group_address_style,
            guid: info.guid,
            created_by: info.created_by,
            schema_version: info.schema_version,
            tool_version: info.tool_version,
            xknxproject_version: env!("CARGO_PKG_VERSION").to_owned(),
            language_code,
        },
        communication_objects,
        devices,
        topology,
        locations,
        group_addresses,
        group_ranges,
        functions,
    }
}

fn flatten_communication_objects(
    device: &DeviceInstance,
    individual_address: &str,
    out: &mut IndexMap<String, CommunicationObject>,
) -> Vec<String> {
    let mut ids = Vec::new();
    for instance_ref in &device.com_object_instance_refs {
        let key = format!("{individual_address}/{}", instance_ref.ref_id);
        out.insert(key.clone(), to_communication_object(instance_ref, individual_address));
        ids.push(key);
    }
    ids
}

fn to_communication_object(instance_ref: &ComObjectInstanceRef, device_address: &str) -> CommunicationObject {
    CommunicationObject {
        device_address: device_address.to_owned(),
        number: instance_ref.number,
        name: instance_ref.name.clone(),
        text: instance_ref.text.clone(),
        function_text: instance_ref.function_text.clone(),
        object_size: instance_ref.object_size.clone(),
        flags: instance_ref.flags,
        datapoint_types: instance_ref.datapoint_types.clone(),
        channel_id: instance_ref.channel_id.clone(),
        group_address_links: instance_ref.links.clone(),
        module: instance_ref.module.clone(),
    }
}

fn flatten_device(device: &DeviceInstance, communication_object_ids: Vec<String>) -> Device {
    Device {
        identifier: device.identifier.clone(),
        name: device.name.clone(),
        description: device.description.clone(),
        comment: device.comment.clone(),
        last_modified: device.last_modified.clone(),
        manufacturer_name: device.manufacturer_name.clone(),
        product_name: device.product_name.clone(),
        hardware_name: device.hardware_name.clone(),
        order_number: device.order_number.clone(),
        additional_addresses: device.additional_addresses.clone(),
        channels: device.channels.clone(),
        communication_object_ids,
    }
}

fn flatten_space(space: &Space) -> LocationOutput {
    let mut spaces: Vec<(String, LocationOutput)> =
        space.spaces.iter().map(|child| (child.name.clone(), flatten_space(child))).collect();
    spaces.sort_by(|(a, _), (b, _)| a.cmp(b));

    LocationOutput {
        identifier: space.identifier.clone(),
        name: space.name.clone(),
        space_type: space.space_type,
        usage_text: space.usage_text.clone(),
        description: space.description.clone(),
        devices: space.devices.clone(),
        spaces: spaces.into_iter().collect(),
        function_ids: space.function_ids.clone(),
    }
}

fn flatten_group_ranges(ranges: Vec<GroupRange>) -> IndexMap<String, GroupRangeOutput> {
    let mut sorted = ranges;
    sorted.sort_by_key(|range| range.range_start);

    sorted
        .into_iter()
        .map(|range| {
            let label = range.name.clone();
            let nested = flatten_group_ranges(range.ranges.clone());
            (label, GroupRangeOutput { inner: range, ranges: nested })
        })
        .collect()
}

fn apply_datapoint_defaults(communication_objects: &mut IndexMap<String, CommunicationObject>) {
    for object in communication_objects.values_mut() {
        if !object.datapoint_types.is_empty() {
            continue;
        }
        let main = match object.object_size.as_deref() {
            Some("1 Bit") => Some(1),
            Some("2 Bit") => Some(2),
            Some("4 Bit") => Some(3),
            _ => None,
        };
        if let Some(main) = main {
            object.datapoint_types.push(DatapointType { main, sub: None });
        }
    }
}

fn inherit_group_address_datapoint_types(
    group_addresses: &mut IndexMap<String, GroupAddressOutput>,
    communication_objects: &IndexMap<String, CommunicationObject>,
    back_links: &IndexMap<String, Vec<String>>,
) {
    for output in group_addresses.values_mut() {
        output.inner.communication_object_ids = back_links.get(&output.inner.identifier).cloned().unwrap_or_default();

        if output.inner.datapoint_type.is_some() {
            continue;
        }

        let linked: Vec<DatapointType> = output
            .inner
            .communication_object_ids
            .iter()
            .filter_map(|id| communication_objects.get(id))
            .flat_map(|object| object.datapoint_types.first().copied())
            .collect();

        if linked.is_empty() {
            continue;
        }
        if linked.windows(2).all(|pair| pair[0] == pair[1]) {
            output.inner.datapoint_type = Some(linked[0]);
        } else if linked.windows(2).all(|pair| pair[0].main == pair[1].main) {
            output.inner.datapoint_type = Some(DatapointType { main: linked[0].main, sub: None });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::GroupAddressStyle;

    #[test]
    fn datapoint_defaults_fill_from_object_size() {
        let mut objects = IndexMap::new();
        objects.insert(
            "1.1.1/O-1".to_owned(),
            CommunicationObject {
                device_address: "1.1.1".to_owned(),
                number: Some(1),
                name: None,
                text: None,
                function_text: None,
                object_size: Some("1 Bit".to_owned()),
                flags: None,
                datapoint_types: Vec::new(),
                channel_id: None,
                group_address_links: Vec::new(),
                module: None,
            },
        );
        apply_datapoint_defaults(&mut objects);
        assert_eq!(objects["1.1.1/O-1"].datapoint_types, vec![DatapointType { main: 1, sub: None }]);
    }

    #[test]
    fn group_ranges_are_sorted_by_start_address() {
        let ranges = vec![
            GroupRange {
                name: "B".to_owned(),
                identifier: "GR-2".to_owned(),
                range_start: 100,
                range_end: 200,
                comment: None,
                group_address_ids: Vec::new(),
                ranges: Vec::new(),
            },
            GroupRange {
                name: "A".to_owned(),
                identifier: "GR-1".to_owned(),
                range_start: 0,
                range_end: 99,
                comment: None,
                group_address_ids: Vec::new(),
                ranges: Vec::new(),
            },
        ];
        let flattened = flatten_group_ranges(ranges);
        let keys: Vec<&String> = flattened.keys().collect();
        assert_eq!(keys, vec!["A", "B"]);
    }

    #[test]
    fn info_carries_the_crate_version_and_language_code() {
        let info = ProjectInformation {
            project_id: "P-1".to_owned(),
            name: "Demo".to_owned(),
            group_address_style: GroupAddressStyle::ThreeLevel,
            schema_version: 20,
            ..ProjectInformation::default()
        };
        let project = Project::default();
        let document = build(project, info, Some("de-DE".to_owned()));
        assert_eq!(document.info.xknxproject_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(document.info.language_code, Some("de-DE".to_owned()));
    }
}
