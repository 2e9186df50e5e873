//! Shared data-model types (spec §3), common to the project loader (C5) and
//! the application-program loader & resolver (C6).
//!
//! Identifiers are kept as opaque owned strings, matching the grammar in
//! C2 — no newtype wrapper is introduced since the model never needs to
//! distinguish identifier "kinds" in the type system, only by prefix
//! inspection (handled entirely by [`crate::refs`]).

use crate::flags::ComObjectFlags;
use crate::refs::DatapointType;

/// A project-wide unique identifier, e.g. `MD-4_SM-1_O-3-1_R-2`.
pub type Id = String;

/// A group address, as found directly under `GroupAddresses` (spec §3,
/// "Group address"). Created at project load, never mutated after
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAddress {
    /// Display name.
    pub name: String,
    /// `Id` attribute.
    pub identifier: Id,
    /// Raw 16-bit address.
    pub raw_address: u16,
    /// Project-scoped numeric id (`Puid`).
    pub project_uid: u32,
    /// Datapoint type, when declared directly on the group address.
    pub datapoint_type: Option<DatapointType>,
    /// Data-secure key, base64 or hex as stored by ETS; opaque here.
    pub security_key: Option<String>,
    /// Rich-text description, already RTF-decoded and HTML-unescaped.
    pub description: Option<String>,
    /// Rich-text comment, already RTF-decoded and HTML-unescaped.
    pub comment: Option<String>,
    /// Identifiers of every communication object linking to this address,
    /// filled in the back-link pass (Design Notes §9).
    pub communication_object_ids: Vec<Id>,
}

/// A node of the `GroupRange` tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRange {
    /// Display name.
    pub name: String,
    /// `Id` attribute.
    pub identifier: Id,
    /// Inclusive start address.
    pub range_start: u16,
    /// Inclusive end address.
    pub range_end: u16,
    /// Comment, RTF-decoded.
    pub comment: Option<String>,
    /// Group addresses listed directly under this range (not in a child
    /// range).
    pub group_address_ids: Vec<Id>,
    /// Nested ranges.
    pub ranges: Vec<GroupRange>,
}

/// One area of the topology tree (`0..15`).
#[derive(Debug, Clone)]
pub struct Area {
    /// Address, `0..=15`.
    pub address: u8,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Lines under this area.
    pub lines: Vec<Line>,
}

/// One line of the topology tree (`0..15`), optionally carrying a
/// `Segment` indirection (schema ≥21).
#[derive(Debug, Clone)]
pub struct Line {
    /// Address, `0..=15`.
    pub address: u8,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Medium type reference id (from the line itself, or from its
    /// `Segment` child on schema ≥21).
    pub medium_type: Option<String>,
    /// Device instances on this line, `1..=255`.
    pub devices: Vec<DeviceInstance>,
}

/// A single device on the bus (spec §3, "Device instance").
#[derive(Debug, Clone)]
pub struct DeviceInstance {
    /// `Id` attribute.
    pub identifier: Id,
    /// Address on the line, `1..=255`.
    pub address: u8,
    /// Area address this device's line belongs to.
    pub area_address: u8,
    /// Line address this device belongs to.
    pub line_address: u8,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Rich-text comment.
    pub comment: Option<String>,
    /// Last-modified timestamp, as stored.
    pub last_modified: Option<String>,
    /// Product reference, e.g. `M-0083_H-1-1_P-1`.
    pub product_ref: String,
    /// Hardware-program reference.
    pub hardware_program_ref: String,
    /// The `M-xxxx` manufacturer prefix, the first segment of `product_ref`.
    pub manufacturer: String,
    /// Additional individual addresses, `area/line/addr` formatted.
    pub additional_addresses: Vec<String>,
    /// Channel nodes from the device's group-object tree.
    pub channels: Vec<ChannelNode>,
    /// Communication-object instance refs with a non-empty link list.
    pub com_object_instance_refs: Vec<ComObjectInstanceRef>,
    /// Module instances.
    pub module_instances: Vec<ModuleInstance>,
    /// Parameter-instance ref id → runtime value.
    pub parameter_values: indexmap::IndexMap<Id, Option<String>>,
    /// The application-program identifier chosen for this device (set by
    /// the hardware-catalog lookup, before application-program parsing).
    pub application_program_id: Option<Id>,
    /// Product display name (filled by the hardware-catalog loader).
    pub product_name: Option<String>,
    /// Hardware display name (filled by the hardware-catalog loader).
    pub hardware_name: Option<String>,
    /// Order number (filled by the hardware-catalog loader).
    pub order_number: Option<String>,
    /// Manufacturer display name (filled by the master-data loader).
    pub manufacturer_name: Option<String>,
}

impl DeviceInstance {
    /// The device's individual address, `area.line.device`.
    pub fn individual_address(&self) -> String {
        format!("{}.{}.{}", self.area_address, self.line_address, self.address)
    }
}

/// A channel node from a device's group-object tree.
#[derive(Debug, Clone)]
pub struct ChannelNode {
    /// Reference id pointing at a channel in the application program.
    pub ref_id: Id,
    /// Display text, possibly containing `{{0}}`/`{{0:default}}` or
    /// `{{name}}` placeholders before resolution.
    pub text: Option<String>,
    /// Group-object-instance ids used on this channel.
    pub communication_object_ids: Vec<Id>,
}

/// A module instance on a device.
#[derive(Debug, Clone)]
pub struct ModuleInstance {
    /// Identifier, possibly with a nested `SM-` sub-module segment.
    pub identifier: Id,
    /// Reference to the module definition (`MD-n`).
    pub module_def_ref: Id,
    /// Arguments bound on this instance.
    pub arguments: Vec<ModuleInstanceArgument>,
}

/// One argument of a module instance.
#[derive(Debug, Clone)]
pub struct ModuleInstanceArgument {
    /// Reference id pointing at the argument's metadata in the application
    /// program.
    pub ref_id: Id,
    /// The scalar value bound on this instance (a literal, or the local
    /// segment of an allocator id).
    pub value: Option<String>,
    /// Human-readable name, filled from the application program.
    pub name: Option<String>,
    /// Declared allocation size, filled from the application program.
    pub allocates: Option<u32>,
}

/// A communication-object instance ref on a device (spec §3).
#[derive(Debug, Clone)]
pub struct ComObjectInstanceRef {
    /// `Id` attribute.
    pub identifier: Id,
    /// Reference into the application program, after
    /// `strip_module_instance(..., "O")`.
    pub ref_id: Id,
    /// Application-program-prefixed ref id (schema ≥20 only).
    pub com_object_ref_id: Id,
    /// Flag overrides declared on the instance itself.
    pub flags: Option<ComObjectFlags>,
    /// Datapoint type overrides.
    pub datapoint_types: Vec<DatapointType>,
    /// Description override.
    pub description: Option<String>,
    /// Text override.
    pub text: Option<String>,
    /// Function-text override.
    pub function_text: Option<String>,
    /// Channel id override.
    pub channel_id: Option<Id>,
    /// Group-address links (identifiers, or raw ref ids depending on
    /// schema — normalized to group-address identifiers by the project
    /// loader).
    pub links: Vec<Id>,
    /// Inherited/resolved name, filled by the application-program resolver.
    pub name: Option<String>,
    /// Inherited/resolved number (after base-number arithmetic).
    pub number: Option<i64>,
    /// Inherited/resolved object size.
    pub object_size: Option<String>,
    /// Module attribution, present only when this instance ref was cloned
    /// from a module definition.
    pub module: Option<ModuleAttribution>,
}

/// The module a communication-object instance ref was cloned from.
#[derive(Debug, Clone)]
pub struct ModuleAttribution {
    /// The module definition id, plus optional `_SM-...` suffix.
    pub definition: Id,
    /// The `ComObject`'s original number, before the base-number offset.
    pub root_number: i64,
}

/// A building-automation location (spec §3, "Space").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceType {
    /// `Building`.
    Building,
    /// `BuildingPart`.
    BuildingPart,
    /// `Floor`.
    Floor,
    /// `Room`.
    Room,
    /// `DistributionBoard`.
    DistributionBoard,
    /// `Stairway`.
    Stairway,
    /// `Corridor`.
    Corridor,
    /// `Area`.
    Area,
    /// `Ground`.
    Ground,
    /// `Segment`.
    Segment,
}

impl std::str::FromStr for SpaceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "Building" => Self::Building,
            "BuildingPart" => Self::BuildingPart,
            "Floor" => Self::Floor,
            "Room" => Self::Room,
            "DistributionBoard" => Self::DistributionBoard,
            "Stairway" => Self::Stairway,
            "Corridor" => Self::Corridor,
            "Area" => Self::Area,
            "Ground" => Self::Ground,
            "Segment" => Self::Segment,
            other => return Err(format!("unknown space type `{other}`")),
        })
    }
}

/// A location node (`Space` on ETS 5/6, `BuildingPart` on ETS 4).
#[derive(Debug, Clone)]
pub struct Space {
    /// `Id` attribute.
    pub identifier: Id,
    /// Display name.
    pub name: String,
    /// Space type.
    pub space_type: SpaceType,
    /// Usage reference id, if any.
    pub usage_id: Option<Id>,
    /// Resolved usage text.
    pub usage_text: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Individual addresses of devices installed in this space.
    pub devices: Vec<String>,
    /// Nested spaces.
    pub spaces: Vec<Space>,
    /// Functions bound to this space.
    pub function_ids: Vec<Id>,
}

/// A group-address reference bound to a [`Function`].
#[derive(Debug, Clone)]
pub struct FunctionGroupAddressRef {
    /// Reference id pointing at a group address.
    pub ref_id: Id,
    /// The function's role for this group address (`Trigger`, `Status`, …).
    pub role: Option<String>,
    /// Project-scoped unique id.
    pub project_uid: Option<u32>,
    /// Resolved, formatted group address — filled by the project loader.
    pub address: Option<String>,
}

/// A function (spec §3, "Function").
#[derive(Debug, Clone)]
pub struct Function {
    /// `Id` attribute.
    pub identifier: Id,
    /// Display name.
    pub name: String,
    /// Function type reference, resolved against the master-data table.
    pub function_type: Option<String>,
    /// Group-address references.
    pub group_addresses: Vec<FunctionGroupAddressRef>,
    /// The space this function is bound to.
    pub space_id: Option<Id>,
}

/// Project-level metadata (spec §3, "Project information").
#[derive(Debug, Clone, Default)]
pub struct ProjectInformation {
    /// Project id, e.g. `P-031F`.
    pub project_id: String,
    /// Display name.
    pub name: String,
    /// Last-modified timestamp, as stored.
    pub last_modified: Option<String>,
    /// Group-address formatting style.
    pub group_address_style: crate::style::GroupAddressStyle,
    /// GUID.
    pub guid: Option<String>,
    /// Tool name that created the project.
    pub created_by: Option<String>,
    /// Schema version.
    pub schema_version: u32,
    /// Tool version.
    pub tool_version: Option<String>,
}
