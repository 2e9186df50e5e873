//! C5 — project loader. Streams the project XML (`0.xml`) into the
//! internal object graph (group addresses, group ranges, topology,
//! devices, locations, functions) and the project metadata (`project.xml`
//! / `Project.xml`) into [`crate::types::ProjectInformation`].
//!
//! ETS stores every rich-text/free-text field (`Name`, `Comment`,
//! `Description`, `Text`) as a plain XML attribute rather than as element
//! text content, so this loader reads attributes exclusively; no element
//! in either document carries meaningful text-node content.

use indexmap::IndexMap;
use knxproject_errors::{Error, Result};

use crate::master::MasterData;
use crate::refs::get_dpt_type;
use crate::rtf::rtf_to_plain_text;
use crate::style::GroupAddressStyle;
use crate::types::{
    Area, ComObjectInstanceRef, DeviceInstance, Function, FunctionGroupAddressRef, GroupAddress,
    GroupRange, Line, ModuleInstance, ModuleInstanceArgument, ProjectInformation, Space, SpaceType,
};
use crate::xmltree::{self, Node};

/// Everything [`load`] collects from `0.xml`.
#[derive(Debug, Clone, Default)]
pub struct Project {
    /// `{identifier -> GroupAddress}`, insertion order matching the
    /// project's own ordering.
    pub group_addresses: IndexMap<String, GroupAddress>,
    /// Top-level group ranges (each possibly nesting further ranges).
    pub group_ranges: Vec<GroupRange>,
    /// Topology areas.
    pub areas: Vec<Area>,
    /// Top-level locations.
    pub locations: Vec<Space>,
    /// Every function found anywhere in the location tree, hoisted to
    /// project scope.
    pub functions: Vec<Function>,
}

/// Parse `0.xml` and `project.xml`/`Project.xml` together.
pub fn load(
    project_0_xml: &[u8],
    project_meta_xml: &[u8],
    schema_version: u32,
    project_id_fallback: &str,
    master: &MasterData,
) -> Result<(Project, ProjectInformation)> {
    let meta_root = xmltree::parse(project_meta_xml)?;
    let info = parse_project_information(&meta_root, schema_version, project_id_fallback);

    let root = xmltree::parse(project_0_xml)?;
    let installation = root
        .find("Installation")
        .ok_or_else(|| Error::unexpected_data("no Installation element in project XML"))?;

    let mut group_addresses = IndexMap::new();
    let mut group_address_nodes = Vec::new();
    installation.find_all("GroupAddress", &mut group_address_nodes);
    for node in &group_address_nodes {
        let address = parse_group_address(node, info.group_address_style);
        group_addresses.insert(address.identifier.clone(), address);
    }

    let group_ranges = installation
        .child("GroupAddresses")
        .and_then(|container| container.child("GroupRanges"))
        .map(|container| container.children("GroupRange").map(parse_group_range).collect())
        .unwrap_or_default();

    let areas = installation
        .child("Topology")
        .map(|topology| topology.children("Area").map(|area| parse_area(area, schema_version)).collect())
        .unwrap_or_default();

    let mut individual_addresses: IndexMap<String, String> = IndexMap::new();
    for area in &areas {
        for line in &area.lines {
            for device in &line.devices {
                individual_addresses.insert(device.identifier.clone(), device.individual_address());
            }
        }
    }

    let mut functions = Vec::new();
    let (locations_root, element_name) = match installation.find("Locations") {
        Some(node) => (Some(node), "Space"),
        None => (installation.find("Buildings"), "BuildingPart"),
    };
    let locations = locations_root
        .map(|root| {
            root.children(element_name)
                .map(|space| parse_space(space, element_name, master, &individual_addresses, &mut functions))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    for function in &mut functions {
        for group_address in &mut function.group_addresses {
            let resolved = group_addresses.get(&group_address.ref_id).ok_or_else(|| {
                Error::unexpected_data(format!(
                    "function `{}` references unknown group address `{}`",
                    function.identifier, group_address.ref_id
                ))
            })?;
            group_address.address = Some(crate::style::format_address(resolved.raw_address, info.group_address_style));
        }
    }

    Ok((Project { group_addresses, group_ranges, areas, locations, functions }, info))
}

fn parse_group_address(node: &Node, _style: GroupAddressStyle) -> GroupAddress {
    // The formatted text representation is produced lazily at output time
    // from `raw_address` plus the project's style; only the raw value is
    // kept on the model type itself.
    let raw_address: u16 = node.attr("Address").and_then(|value| value.parse().ok()).unwrap_or_default();
    GroupAddress {
        name: node.attr_or("Name", "").to_owned(),
        identifier: node.attr_or("Id", "").to_owned(),
        raw_address,
        project_uid: node.attr("Puid").and_then(|value| value.parse().ok()).unwrap_or_default(),
        datapoint_type: get_dpt_type(node.attr("DatapointType")),
        security_key: node.attr("Key").map(str::to_owned),
        description: node.attr("Description").map(rtf_to_plain_text),
        comment: node.attr("Comment").map(rtf_to_plain_text),
        communication_object_ids: Vec::new(),
    }
}

fn parse_group_range(node: &Node) -> GroupRange {
    GroupRange {
        name: node.attr_or("Name", "").to_owned(),
        identifier: node.attr_or("Id", "").to_owned(),
        range_start: node.attr("RangeStart").and_then(|value| value.parse().ok()).unwrap_or_default(),
        range_end: node.attr("RangeEnd").and_then(|value| value.parse().ok()).unwrap_or_default(),
        comment: node.attr("Comment").map(rtf_to_plain_text),
        group_address_ids: node.children("GroupAddress").map(|child| child.attr_or("Id", "").to_owned()).collect(),
        ranges: node.children("GroupRange").map(parse_group_range).collect(),
    }
}

fn parse_area(node: &Node, schema_version: u32) -> Area {
    let area_address = node.attr("Address").and_then(|value| value.parse().ok()).unwrap_or_default();
    Area {
        address: area_address,
        name: node.attr_or("Name", "").to_owned(),
        description: node.attr("Description").map(rtf_to_plain_text),
        lines: node.children("Line").map(|line| parse_line(line, schema_version, area_address)).collect(),
    }
}

fn parse_line(node: &Node, schema_version: u32, area_address: u8) -> Line {
    let medium_type = if schema_version >= 21 {
        node.child("Segment").and_then(|segment| segment.attr("MediumTypeRefId")).map(str::to_owned)
    } else {
        node.attr("MediumTypeRefId").map(str::to_owned)
    };

    let line_address = node.attr("Address").and_then(|value| value.parse().ok()).unwrap_or_default();
    let mut device_nodes = Vec::new();
    node.find_all("DeviceInstance", &mut device_nodes);

    let devices = device_nodes
        .into_iter()
        .filter_map(parse_device)
        .map(|mut device| {
            device.area_address = area_address;
            device.line_address = line_address;
            device
        })
        .collect();

    Line {
        address: line_address,
        name: node.attr_or("Name", "").to_owned(),
        description: node.attr("Description").map(rtf_to_plain_text),
        medium_type,
        devices,
    }
}

fn parse_device(node: &Node) -> Option<DeviceInstance> {
    let address: u8 = node.attr("Address")?.parse().ok()?;
    let product_ref = node.attr("ProductRefId")?.to_owned();
    let hardware_program_ref = node.attr("Hardware2ProgramRefId")?.to_owned();
    let manufacturer = product_ref.split('_').next().unwrap_or(&product_ref).to_owned();

    let additional_addresses = node
        .child("AdditionalAddresses")
        .map(|container| container.children("Address").filter_map(|child| child.attr("Address")).map(str::to_owned).collect())
        .unwrap_or_default();

    let com_object_instance_refs = node
        .child("ComObjectInstanceRefs")
        .map(|container| container.children("ComObjectInstanceRef").filter_map(parse_com_object_instance_ref).collect())
        .unwrap_or_default();

    let module_instances = node
        .child("ModuleInstances")
        .map(|container| container.children("ModuleInstance").map(parse_module_instance).collect())
        .unwrap_or_default();

    let channels = node
        .find("GroupObjectTree")
        .map(|tree| {
            let mut nodes = Vec::new();
            tree.find_all("Node", &mut nodes);
            nodes
                .into_iter()
                .filter(|n| n.attr("Type") == Some("Channel"))
                .filter_map(parse_channel_node)
                .collect()
        })
        .unwrap_or_default();

    let parameter_values = node
        .child("ParameterInstanceRefs")
        .map(|container| {
            container
                .children("ParameterInstanceRef")
                .filter_map(|child| child.attr("RefId").map(|id| (id.to_owned(), child.attr("Value").map(str::to_owned))))
                .collect()
        })
        .unwrap_or_default();

    Some(DeviceInstance {
        identifier: node.attr_or("Id", "").to_owned(),
        address,
        area_address: 0,
        line_address: 0,
        name: node.attr_or("Name", "").to_owned(),
        description: node.attr("Description").map(rtf_to_plain_text),
        comment: node.attr("Comment").map(rtf_to_plain_text),
        last_modified: node.attr("LastModified").map(str::to_owned),
        product_ref,
        hardware_program_ref,
        manufacturer,
        additional_addresses,
        channels,
        com_object_instance_refs,
        module_instances,
        parameter_values,
        application_program_id: None,
        product_name: None,
        hardware_name: None,
        order_number: None,
        manufacturer_name: None,
    })
}

fn parse_module_instance(node: &Node) -> ModuleInstance {
    ModuleInstance {
        identifier: node.attr_or("Id", "").to_owned(),
        module_def_ref: node.attr_or("RefId", "").to_owned(),
        arguments: node
            .child("Arguments")
            .map(|container| {
                container
                    .children("Argument")
                    .map(|argument| ModuleInstanceArgument {
                        ref_id: argument.attr_or("RefId", "").to_owned(),
                        value: argument.attr("Value").map(str::to_owned),
                        name: None,
                        allocates: None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn parse_channel_node(node: &Node) -> Option<crate::types::ChannelNode> {
    let instances = node.child("GroupObjectInstances")?;
    let ids: Vec<String> =
        instances.children("GroupObjectInstance").filter_map(|child| child.attr("RefId")).map(str::to_owned).collect();
    if ids.is_empty() {
        return None;
    }
    Some(crate::types::ChannelNode { ref_id: node.attr_or("RefId", "").to_owned(), text: node.attr("Text").map(str::to_owned), communication_object_ids: ids })
}

fn parse_com_object_instance_ref(node: &Node) -> Option<ComObjectInstanceRef> {
    let links = if let Some(links_attr) = node.attr("Links") {
        links_attr.split_whitespace().map(str::to_owned).collect::<Vec<_>>()
    } else {
        let mut ids = Vec::new();
        if let Some(connectors) = node.child("Connectors") {
            for direction in ["Send", "Receive"] {
                for child in connectors.children(direction) {
                    if let Some(raw) = child.attr("GroupAddressRefId") {
                        let stripped = raw.split_once('_').map(|(_, rest)| rest).unwrap_or(raw);
                        ids.push(stripped.to_owned());
                    }
                }
            }
        }
        ids
    };

    if links.is_empty() {
        return None;
    }

    let flags = parse_flags(node);

    Some(ComObjectInstanceRef {
        identifier: node.attr_or("Id", "").to_owned(),
        ref_id: node.attr_or("RefId", "").to_owned(),
        com_object_ref_id: String::new(),
        flags,
        datapoint_types: crate::refs::parse_dpt_types(node.attr_or("DatapointType", "")),
        description: node.attr("Description").map(rtf_to_plain_text),
        text: node.attr("Text").map(str::to_owned),
        function_text: node.attr("FunctionText").map(str::to_owned),
        channel_id: node.attr("ChannelId").map(str::to_owned),
        links,
        name: None,
        number: None,
        object_size: None,
        module: None,
    })
}

fn parse_flags(node: &Node) -> Option<crate::flags::ComObjectFlags> {
    use crate::flags::ComObjectFlag::*;
    let pairs = [
        ("ReadFlag", Read),
        ("WriteFlag", Write),
        ("CommunicationFlag", Communicate),
        ("TransmitFlag", Transmit),
        ("UpdateFlag", Update),
        ("ReadOnInitFlag", ReadOnInit),
    ];
    let mut present = false;
    let mut flags = crate::flags::ComObjectFlags::empty();
    for (attribute, flag) in pairs {
        if let Some(value) = node.attr(attribute) {
            present = true;
            if crate::refs::parse_xml_flag(Some(value)) {
                flags |= flag;
            }
        }
    }
    present.then_some(flags)
}

fn parse_space(
    node: &Node,
    element_name: &str,
    master: &MasterData,
    individual_addresses: &IndexMap<String, String>,
    functions: &mut Vec<Function>,
) -> Space {
    let identifier = node.attr_or("Id", "").to_owned();
    let space_type = if element_name == "Space" {
        node.attr("Type").and_then(|value| value.parse::<SpaceType>().ok()).unwrap_or(SpaceType::Room)
    } else {
        SpaceType::BuildingPart
    };

    let usage_id = node.attr("Usage").map(str::to_owned);
    let usage_text = usage_id.as_ref().and_then(|id| master.space_usages.get(id)).cloned();

    let devices = node
        .children("DeviceInstanceRef")
        .filter_map(|child| child.attr("RefId"))
        .map(|device_id| individual_addresses.get(device_id).cloned().unwrap_or_else(|| device_id.to_owned()))
        .collect();

    let mut function_ids = Vec::new();
    for function_node in node.children("Function") {
        let mut function = parse_function(function_node);
        function.space_id = Some(identifier.clone());
        function_ids.push(function.identifier.clone());
        functions.push(function);
    }

    Space {
        identifier,
        name: node.attr_or("Name", "").to_owned(),
        space_type,
        usage_id,
        usage_text,
        description: node.attr("Description").map(rtf_to_plain_text),
        devices,
        spaces: node
            .children(element_name)
            .map(|child| parse_space(child, element_name, master, individual_addresses, functions))
            .collect(),
        function_ids,
    }
}

fn parse_function(node: &Node) -> Function {
    Function {
        identifier: node.attr_or("Id", "").to_owned(),
        name: node.attr_or("Name", "").to_owned(),
        function_type: node.attr("FunctionTypeRefId").map(str::to_owned),
        group_addresses: node
            .children("GroupAddressRef")
            .map(|child| FunctionGroupAddressRef {
                ref_id: child.attr_or("RefId", "").to_owned(),
                role: child.attr("Role").map(str::to_owned),
                project_uid: child.attr("Puid").and_then(|value| value.parse().ok()),
                address: None,
            })
            .collect(),
        space_id: None,
    }
}

fn parse_project_information(meta_root: &Node, schema_version: u32, project_id_fallback: &str) -> ProjectInformation {
    let Some(info) = meta_root.find("ProjectInformation") else {
        return ProjectInformation {
            project_id: project_id_fallback.to_owned(),
            schema_version,
            ..ProjectInformation::default()
        };
    };

    ProjectInformation {
        project_id: info.attr_or("Id", project_id_fallback).to_owned(),
        name: info.attr_or("Name", "").to_owned(),
        last_modified: info.attr("LastModified").map(str::to_owned),
        group_address_style: info.attr("GroupAddressStyle").and_then(|value| value.parse().ok()).unwrap_or_default(),
        guid: info.attr("Guid").map(str::to_owned),
        created_by: info.attr("CreatedBy").or_else(|| info.attr("ToolVersion")).map(str::to_owned),
        schema_version,
        tool_version: info.attr("ToolVersion").map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT_0: &str = r#"<?xml version="1.0"?>
<Project>
  <Installation>
    <GroupAddresses>
      <GroupRanges>
        <GroupRange Id="GR-1" Name="Lights" RangeStart="0" RangeEnd="2047">
          <GroupAddress Id="GA-1" Name="Kitchen light" Address="2054" DatapointType="DPST-1-1"/>
        </GroupRange>
      </GroupRanges>
    </GroupAddresses>
    <Topology>
      <Area Address="1" Name="Area 1">
        <Line Address="1" Name="Line 1">
          <DeviceInstance Id="D-1" Address="5" ProductRefId="M-0083_H-1-1_P-1" Hardware2ProgramRefId="HP-1" Name="Actuator"/>
        </Line>
      </Area>
    </Topology>
    <Locations>
      <Space Id="SP-1" Name="Living room" Type="Room">
        <DeviceInstanceRef RefId="D-1"/>
        <Function Id="F-1" Name="Main light">
          <GroupAddressRef RefId="GA-1" Role="Trigger"/>
        </Function>
      </Space>
    </Locations>
  </Installation>
</Project>"#;

    const PROJECT_META: &str = r#"<Project><ProjectInformation Id="P-031F" Name="Demo" GroupAddressStyle="ThreeLevel"/></Project>"#;

    #[test]
    fn loads_group_addresses_ranges_topology_locations_and_functions() {
        let master = MasterData::default();
        let (project, info) = load(PROJECT_0.as_bytes(), PROJECT_META.as_bytes(), 20, "P-FALLBACK", &master).unwrap();

        assert_eq!(info.project_id, "P-031F");
        assert_eq!(info.group_address_style, GroupAddressStyle::ThreeLevel);

        let address = project.group_addresses.get("GA-1").unwrap();
        assert_eq!(address.raw_address, 2054);
        assert_eq!(address.datapoint_type, get_dpt_type(Some("DPST-1-1")));

        assert_eq!(project.group_ranges.len(), 1);
        assert_eq!(project.group_ranges[0].group_address_ids, vec!["GA-1".to_owned()]);

        assert_eq!(project.areas.len(), 1);
        assert_eq!(project.areas[0].lines[0].devices[0].identifier, "D-1");

        assert_eq!(project.locations.len(), 1);
        assert_eq!(project.locations[0].devices, vec!["D-1".to_owned()]);

        assert_eq!(project.functions.len(), 1);
        assert_eq!(project.functions[0].group_addresses[0].address, Some("1/0/6".to_owned()));
    }

    #[test]
    fn device_without_address_is_not_emitted() {
        let xml = r#"<Project><Installation><Topology><Area Address="1"><Line Address="1">
            <DeviceInstance Id="D-PS" ProductRefId="M-1_P-1" Hardware2ProgramRefId="HP-1"/>
        </Line></Area></Topology></Installation></Project>"#;
        let master = MasterData::default();
        let (project, _) = load(xml.as_bytes(), PROJECT_META.as_bytes(), 20, "P-1", &master).unwrap();
        assert!(project.areas[0].lines[0].devices.is_empty());
    }

    #[test]
    fn com_object_instance_ref_with_no_links_is_discarded() {
        let xml = r#"<Project><Installation><Topology><Area Address="1"><Line Address="1">
            <DeviceInstance Id="D-1" Address="1" ProductRefId="M-1_P-1" Hardware2ProgramRefId="HP-1">
                <ComObjectInstanceRefs>
                    <ComObjectInstanceRef Id="I-1" RefId="O-1" Links=""/>
                </ComObjectInstanceRefs>
            </DeviceInstance>
        </Line></Area></Topology></Installation></Project>"#;
        let master = MasterData::default();
        let (project, _) = load(xml.as_bytes(), PROJECT_META.as_bytes(), 20, "P-1", &master).unwrap();
        assert!(project.areas[0].lines[0].devices[0].com_object_instance_refs.is_empty());
    }
}
