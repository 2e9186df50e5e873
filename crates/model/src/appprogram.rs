//! C6 — application-program loader and per-device resolver.
//!
//! Each application-program file is parsed exactly once into an
//! [`ApplicationProgram`] catalog, trimmed to only the communication-object
//! refs, module-def arguments, allocators and channels that the grouped
//! devices actually reference (§4.6). The per-device merge pass then
//! inherits scalar fields down the `ComObjectInstanceRef -> ComObjectRef ->
//! ComObject` chain, resolves base-number arithmetic for module-cloned
//! instance refs, and fills channel text.

use std::collections::HashSet;

use indexmap::IndexMap;
use knxproject_errors::Result;

use crate::flags::ComObjectFlags;
use crate::master::MasterData;
use crate::refs::{
    get_module_instance_part, strip_module_instance, substitute_template, text_parameter_insert_module_instance,
    DatapointType,
};
use crate::types::{ComObjectInstanceRef, DeviceInstance, ModuleAttribution};
use crate::xmltree::{self, Node};

/// A communication object, the catalog's source of truth for `number` and
/// defaults every `ComObjectRef` and instance ref inherit from.
#[derive(Debug, Clone, Default)]
pub struct ComObject {
    /// `Id` attribute.
    pub id: String,
    /// Effective object number before any module base-number offset.
    pub number: i64,
    /// Display name.
    pub name: Option<String>,
    /// Text, overridable by translation.
    pub text: Option<String>,
    /// Function text, overridable by translation.
    pub function_text: Option<String>,
    /// Object size, e.g. `"1 Bit"`.
    pub object_size: Option<String>,
    /// The six communication flags.
    pub flags: Option<ComObjectFlags>,
    /// Datapoint types.
    pub datapoint_types: Vec<DatapointType>,
    /// Argument id supplying the base-number offset for module-cloned
    /// instances of this object.
    pub base_number_argument_ref: Option<String>,
}

/// A `ComObjectRef`, overriding (and inheriting from) a [`ComObject`].
#[derive(Debug, Clone, Default)]
pub struct ComObjectRef {
    /// `Id` attribute.
    pub id: String,
    /// The underlying `ComObject`'s id.
    pub ref_id: String,
    /// Name override.
    pub name: Option<String>,
    /// Text override.
    pub text: Option<String>,
    /// Function-text override.
    pub function_text: Option<String>,
    /// Object-size override.
    pub object_size: Option<String>,
    /// Flag overrides.
    pub flags: Option<ComObjectFlags>,
    /// Datapoint-type overrides.
    pub datapoint_types: Vec<DatapointType>,
    /// Reference to a text-parameter whose value should be substituted
    /// into `text`'s `{{0}}`/`{{0:default}}` placeholders.
    pub text_parameter_ref_id: Option<String>,
}

/// A numeric-id allocation pool used to compute module-cloned
/// communication-object numbers.
#[derive(Debug, Clone, Default)]
pub struct Allocator {
    /// `Id` attribute.
    pub id: String,
    /// The literal starting offset, when not itself delegated to another
    /// argument.
    pub start: i64,
    /// When present, the allocator's base is the value of this argument in
    /// the owning module, resolved recursively up the module chain.
    pub base_value_argument_ref: Option<String>,
}

/// Metadata for one module-def argument or dynamic `NumericArg`.
#[derive(Debug, Clone, Default)]
pub struct ArgumentMeta {
    /// Human-readable name, substituted into `{{name}}` channel
    /// placeholders.
    pub name: Option<String>,
    /// Declared allocation block size, used in base-number arithmetic.
    pub allocates: Option<u32>,
}

/// A channel definition in the application program, keyed by
/// `<app-id>_<channel-id>` in [`ApplicationProgram::channels`].
#[derive(Debug, Clone, Default)]
pub struct ChannelDef {
    /// Display text, possibly templated.
    pub text: Option<String>,
    /// Text-parameter reference for the templated text, if any.
    pub text_parameter_ref_id: Option<String>,
}

/// The trimmed catalog parsed from one application-program XML file.
#[derive(Debug, Clone, Default)]
pub struct ApplicationProgram {
    /// `{id -> ComObject}`, every object is kept regardless of use.
    pub com_objects: IndexMap<String, ComObject>,
    /// `{id -> ComObjectRef}`, trimmed to the retained set.
    pub com_object_refs: IndexMap<String, ComObjectRef>,
    /// `{id -> Allocator}`.
    pub allocators: IndexMap<String, Allocator>,
    /// `{id -> ArgumentMeta}`, trimmed to the retained set (static
    /// `Argument`s and dynamic `NumericArg`s alike).
    pub arguments: IndexMap<String, ArgumentMeta>,
    /// `{"<app-id>_<channel-id>" -> ChannelDef}`.
    pub channels: IndexMap<String, ChannelDef>,
}

/// The set of `com_object_ref_id`s every grouped device actually uses.
pub fn retained_com_object_ref_ids(devices: &[DeviceInstance]) -> HashSet<String> {
    devices
        .iter()
        .flat_map(|device| device.com_object_instance_refs.iter())
        .map(|instance_ref| instance_ref.com_object_ref_id.clone())
        .collect()
}

/// The set of prefixed module-def argument ids every grouped device's
/// module instances actually bind (§4.6's `<app-id>_<arg-id>` /
/// `<app-id>_<module-def-id>_SM-…` prefixing rule).
pub fn retained_argument_ids(app_id: &str, devices: &[DeviceInstance]) -> HashSet<String> {
    let mut retained = HashSet::new();
    for device in devices {
        for module_instance in &device.module_instances {
            for argument in &module_instance.arguments {
                let prefixed = if module_instance.identifier.contains("_SM-") {
                    format!("{app_id}_{}_{}", module_instance.module_def_ref, argument.ref_id)
                } else {
                    format!("{app_id}_{}", argument.ref_id)
                };
                retained.insert(prefixed);
            }
        }
    }
    retained
}

/// Parse one application-program file, keeping only the entries the
/// retained sets name, and apply translations for the active language.
pub fn load(
    xml: &[u8],
    app_id: &str,
    retained_refs: &HashSet<String>,
    retained_args: &HashSet<String>,
    master: &MasterData,
) -> Result<ApplicationProgram> {
    let root = xmltree::parse(xml)?;
    let mut program = ApplicationProgram::default();

    let mut com_object_nodes = Vec::new();
    root.find_all("ComObject", &mut com_object_nodes);
    for node in com_object_nodes {
        let object = parse_com_object(node);
        program.com_objects.insert(object.id.clone(), object);
    }

    let mut com_object_ref_nodes = Vec::new();
    root.find_all("ComObjectRef", &mut com_object_ref_nodes);
    for node in com_object_ref_nodes {
        let id = node.attr_or("Id", "").to_owned();
        if !retained_refs.contains(&id) {
            continue;
        }
        program.com_object_refs.insert(id.clone(), parse_com_object_ref(node, id));
    }

    let mut allocator_nodes = Vec::new();
    root.find_all("Allocator", &mut allocator_nodes);
    for node in allocator_nodes {
        let allocator = parse_allocator(node);
        program.allocators.insert(allocator.id.clone(), allocator);
    }

    let mut channel_nodes = Vec::new();
    root.find_all("Channel", &mut channel_nodes);
    for node in channel_nodes {
        let id = format!("{app_id}_{}", node.attr_or("Id", ""));
        program.channels.insert(
            id,
            ChannelDef {
                text: node.attr("Text").map(str::to_owned),
                text_parameter_ref_id: node.attr("TextParameterRefId").map(str::to_owned),
            },
        );
    }

    let mut argument_nodes = Vec::new();
    root.find_all("Argument", &mut argument_nodes);
    root.find_all("NumericArg", &mut argument_nodes);
    for node in argument_nodes {
        let id = node.attr_or("RefId", node.attr_or("Id", "")).to_owned();
        let prefixed = format!("{app_id}_{id}");
        if !retained_args.contains(&prefixed) {
            continue;
        }
        program.arguments.insert(
            prefixed,
            ArgumentMeta {
                name: node.attr("Name").map(str::to_owned),
                allocates: node.attr("Allocates").and_then(|value| value.parse().ok()),
            },
        );
    }

    apply_translations(&root, master, &mut program);

    Ok(program)
}

fn parse_com_object(node: &Node) -> ComObject {
    ComObject {
        id: node.attr_or("Id", "").to_owned(),
        number: node.attr("Number").and_then(|value| value.parse().ok()).unwrap_or_default(),
        name: node.attr("Name").map(str::to_owned),
        text: node.attr("Text").map(str::to_owned),
        function_text: node.attr("FunctionText").map(str::to_owned),
        object_size: node.attr("ObjectSize").map(str::to_owned),
        flags: parse_object_flags(node),
        datapoint_types: crate::refs::parse_dpt_types(node.attr_or("DatapointType", "")),
        base_number_argument_ref: node.attr("BaseNumberArgumentRefId").map(str::to_owned),
    }
}

fn parse_com_object_ref(node: &Node, id: String) -> ComObjectRef {
    ComObjectRef {
        id,
        ref_id: node.attr_or("RefId", "").to_owned(),
        name: node.attr("Name").map(str::to_owned),
        text: node.attr("Text").map(str::to_owned),
        function_text: node.attr("FunctionText").map(str::to_owned),
        object_size: node.attr("ObjectSize").map(str::to_owned),
        flags: parse_object_flags(node),
        datapoint_types: crate::refs::parse_dpt_types(node.attr_or("DatapointType", "")),
        text_parameter_ref_id: node.attr("TextParameterRefId").map(str::to_owned),
    }
}

fn parse_allocator(node: &Node) -> Allocator {
    Allocator {
        id: node.attr_or("Id", "").to_owned(),
        start: node.attr("Start").and_then(|value| value.parse().ok()).unwrap_or_default(),
        base_value_argument_ref: node.attr("BaseValue").map(str::to_owned),
    }
}

fn parse_object_flags(node: &Node) -> Option<ComObjectFlags> {
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
    let mut flags = ComObjectFlags::empty();
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

fn apply_translations(root: &Node, master: &MasterData, program: &mut ApplicationProgram) {
    let Some(language) = &master.resolved_language else { return };
    let Some(languages) = root.find("Languages") else { return };
    let Some(language_node) = languages.children("Language").find(|node| node.attr("Identifier") == Some(language.as_str())) else {
        return;
    };

    let mut translation_nodes = Vec::new();
    language_node.find_all("TranslationElement", &mut translation_nodes);

    for node in translation_nodes {
        let Some(ref_id) = node.attr("RefId") else { continue };
        let text = node.attr("Text").map(str::to_owned);
        let function_text = node.attr("FunctionText").map(str::to_owned);

        if let Some(object) = program.com_objects.get_mut(ref_id) {
            if let Some(text) = text.clone() {
                object.text = Some(text);
            }
            if let Some(function_text) = function_text.clone() {
                object.function_text = Some(function_text);
            }
        }
        if let Some(object_ref) = program.com_object_refs.get_mut(ref_id) {
            if let Some(text) = text {
                object_ref.text = Some(text);
            }
            if let Some(function_text) = function_text {
                object_ref.function_text = Some(function_text);
            }
        }
    }
}

/// Per-device post-parse merge (§4.6 "Per device, post-parse merge").
pub fn merge_device(device: &mut DeviceInstance, app_id: &str, program: &ApplicationProgram) {
    for module_instance in &mut device.module_instances {
        for argument in &mut module_instance.arguments {
            let prefixed = if module_instance.identifier.contains("_SM-") {
                format!("{app_id}_{}_{}", module_instance.module_def_ref, argument.ref_id)
            } else {
                format!("{app_id}_{}", argument.ref_id)
            };
            if let Some(meta) = program.arguments.get(&prefixed) {
                argument.name = meta.name.clone();
                argument.allocates = meta.allocates;
            }
        }
    }

    let module_instances = device.module_instances.clone();
    let parameter_values = device.parameter_values.clone();

    for instance_ref in &mut device.com_object_instance_refs {
        merge_instance_ref(instance_ref, app_id, program, &module_instances, &parameter_values);
    }

    for channel in &mut device.channels {
        resolve_channel_text(channel, app_id, program, &module_instances, &parameter_values);
    }
}

fn merge_instance_ref(
    instance_ref: &mut ComObjectInstanceRef,
    app_id: &str,
    program: &ApplicationProgram,
    module_instances: &[crate::types::ModuleInstance],
    parameter_values: &IndexMap<String, Option<String>>,
) {
    let Some(object_ref) = program.com_object_refs.get(&instance_ref.com_object_ref_id) else { return };
    let Some(object) = program.com_objects.get(&object_ref.ref_id) else { return };

    instance_ref.name = instance_ref.name.clone().or_else(|| object_ref.name.clone()).or_else(|| object.name.clone());
    instance_ref.text = instance_ref.text.clone().or_else(|| object_ref.text.clone()).or_else(|| object.text.clone());
    instance_ref.function_text = instance_ref
        .function_text
        .clone()
        .or_else(|| object_ref.function_text.clone())
        .or_else(|| object.function_text.clone());
    instance_ref.object_size =
        instance_ref.object_size.clone().or_else(|| object_ref.object_size.clone()).or_else(|| object.object_size.clone());
    instance_ref.flags = instance_ref.flags.or(object_ref.flags).or(object.flags);
    if instance_ref.datapoint_types.is_empty() {
        instance_ref.datapoint_types =
            if !object_ref.datapoint_types.is_empty() { object_ref.datapoint_types.clone() } else { object.datapoint_types.clone() };
    }

    if let Some(text_parameter_ref_id) = &object_ref.text_parameter_ref_id {
        let rewritten = text_parameter_insert_module_instance(&instance_ref.ref_id, "O", text_parameter_ref_id);
        let value = parameter_values.get(&rewritten).cloned().flatten();
        if let Some(text) = &instance_ref.text {
            instance_ref.text = Some(substitute_template(text, value.as_deref()));
        }
    }

    instance_ref.number = Some(object.number);

    if instance_ref.ref_id.starts_with("MD-") {
        if let Some(base_argument_ref) = &object.base_number_argument_ref {
            if let Some(offset) = resolve_base_number_offset(&instance_ref.ref_id, base_argument_ref, app_id, program, module_instances) {
                let definition = get_module_instance_part(&instance_ref.ref_id, "O");
                instance_ref.module = Some(ModuleAttribution { definition, root_number: object.number });
                instance_ref.number = Some(object.number + offset);
            }
        }
    }
}

fn resolve_base_number_offset(
    instance_ref_id: &str,
    base_argument_ref: &str,
    app_id: &str,
    program: &ApplicationProgram,
    module_instances: &[crate::types::ModuleInstance],
) -> Option<i64> {
    let owning_instance = module_instances
        .iter()
        .find(|instance| instance_ref_id.starts_with(&instance.identifier))?;

    let argument = owning_instance.arguments.iter().find(|argument| argument.ref_id == *base_argument_ref)?;
    let value = argument.value.as_deref()?;

    if let Ok(literal) = value.parse::<i64>() {
        return Some(literal);
    }

    let allocator_id = format!("{app_id}_{value}");
    let allocator = program.allocators.get(&allocator_id)?;
    let size = argument.allocates? as i64;

    let instance_marker = "_MI-";
    let index: i64 = instance_ref_id
        .find(instance_marker)
        .and_then(|position| {
            instance_ref_id[position + instance_marker.len()..]
                .split(|c: char| !c.is_ascii_digit())
                .next()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(1);

    let base = match &allocator.base_value_argument_ref {
        Some(parent_argument_ref) => {
            resolve_base_number_offset(instance_ref_id, parent_argument_ref, app_id, program, module_instances)
                .unwrap_or(allocator.start)
        }
        None => allocator.start,
    };

    Some(base + size * (index - 1))
}

fn resolve_channel_text(
    channel: &mut crate::types::ChannelNode,
    app_id: &str,
    program: &ApplicationProgram,
    module_instances: &[crate::types::ModuleInstance],
    parameter_values: &IndexMap<String, Option<String>>,
) {
    if channel.text.is_some() {
        return;
    }

    let stripped = strip_module_instance(&channel.ref_id, "CH");
    let key = format!("{app_id}_{stripped}");
    let Some(definition) = program.channels.get(&key) else { return };

    let mut text = definition.text.clone();

    if let (Some(text_parameter_ref_id), Some(current)) = (&definition.text_parameter_ref_id, &text) {
        let rewritten = text_parameter_insert_module_instance(&channel.ref_id, "CH", text_parameter_ref_id);
        let value = parameter_values.get(&rewritten).cloned().flatten();
        text = Some(substitute_template(current, value.as_deref()));
    }

    if let Some(current) = &text {
        let mut substituted = current.clone();
        for instance in module_instances {
            for argument in &instance.arguments {
                if let Some(name) = &argument.name {
                    let placeholder = format!("{{{{{name}}}}}");
                    if let Some(value) = &argument.value {
                        substituted = substituted.replace(&placeholder, value);
                    }
                }
            }
        }
        text = Some(substituted);
    }

    channel.text = text;
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: &str = r#"<?xml version="1.0"?>
<ApplicationProgram>
  <Static>
    <ComObjectTable>
      <ComObject Id="O-1" Number="1" Name="Switch" ObjectSize="1 Bit" ReadFlag="Enabled" WriteFlag="Enabled"/>
    </ComObjectTable>
    <ComObjectRefTable>
      <ComObjectRef Id="R-1" RefId="O-1" Text="Switch text"/>
    </ComObjectRefTable>
  </Static>
  <Languages>
    <Language Identifier="de-DE">
      <TranslationElement RefId="O-1" Text="Schalten"/>
    </Language>
  </Languages>
</ApplicationProgram>"#;

    #[test]
    fn loads_retained_com_objects_and_refs() {
        let retained_refs: HashSet<String> = ["R-1".to_owned()].into_iter().collect();
        let program = load(APP.as_bytes(), "M-1_A-1", &retained_refs, &HashSet::new(), &MasterData::default()).unwrap();
        assert!(program.com_objects.contains_key("O-1"));
        assert!(program.com_object_refs.contains_key("R-1"));
        assert_eq!(program.com_objects["O-1"].number, 1);
    }

    #[test]
    fn translation_overrides_com_object_text() {
        let retained_refs: HashSet<String> = ["R-1".to_owned()].into_iter().collect();
        let mut master = MasterData::default();
        master.resolved_language = Some("de-DE".to_owned());
        let program = load(APP.as_bytes(), "M-1_A-1", &retained_refs, &HashSet::new(), &master).unwrap();
        assert_eq!(program.com_objects["O-1"].text, Some("Schalten".to_owned()));
    }

    #[test]
    fn non_retained_com_object_ref_is_dropped() {
        let program = load(APP.as_bytes(), "M-1_A-1", &HashSet::new(), &HashSet::new(), &MasterData::default()).unwrap();
        assert!(program.com_object_refs.is_empty());
        assert!(program.com_objects.contains_key("O-1"));
    }
}
