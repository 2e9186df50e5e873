//! C2 — reference grammar.
//!
//! The identifiers that permeate the model are dash-and-underscore-separated
//! strings (`MD-4_M-15_MI-1_SM-1_O-3-1_R-2`). This module implements the
//! three primitives the rest of the crate builds on top of
//! ([`strip_module_instance`], [`get_module_instance_part`],
//! [`text_parameter_insert_module_instance`]), template placeholder
//! substitution, and datapoint-type token parsing.

/// Strip module/module-instance segments from `reference`, keeping only the
/// leading `MD-*` prefix (if any), the last `SM-*` segment that appears
/// before the `kind` segment (if any), and everything from the `kind`
/// segment onward.
///
/// ```
/// use knxproject_model::refs::strip_module_instance;
///
/// assert_eq!(strip_module_instance("MD-1_M-1_MI-1_CH-4", "CH"), "MD-1_CH-4");
/// assert_eq!(
///     strip_module_instance("MD-4_M-15_MI-1_SM-1_M-1_MI-1-1-2_SM-1_O-3-1_R-2", "O"),
///     "MD-4_SM-1_O-3-1_R-2"
/// );
/// ```
pub fn strip_module_instance(reference: &str, kind: &str) -> String {
    let segments: Vec<&str> = reference.split('_').collect();
    let kind_prefix = format!("{kind}-");

    let Some(kind_index) = segments.iter().position(|segment| segment.starts_with(&kind_prefix))
    else {
        return reference.to_owned();
    };

    let mut kept: Vec<&str> = Vec::with_capacity(2 + segments.len() - kind_index);

    if segments.first().is_some_and(|segment| segment.starts_with("MD-")) {
        kept.push(segments[0]);
    }

    if let Some(last_sm) = segments[..kind_index].iter().rev().find(|segment| segment.starts_with("SM-")) {
        kept.push(last_sm);
    }

    kept.extend_from_slice(&segments[kind_index..]);
    kept.join("_")
}

/// Locate the module-instance part of `reference`: the longest prefix
/// ending immediately before the first `_<next_kind>-` occurrence, provided
/// that prefix starts with an `MD-` segment. Returns the empty string when
/// no such prefix exists.
///
/// ```
/// use knxproject_model::refs::get_module_instance_part;
///
/// assert_eq!(get_module_instance_part("MD-1_M-1_MI-1_CH-4", "CH"), "MD-1_M-1_MI-1");
/// assert_eq!(get_module_instance_part("CH-SOM03", "CH"), "");
/// ```
pub fn get_module_instance_part(reference: &str, next_kind: &str) -> String {
    let marker = format!("_{next_kind}-");
    let end = reference.find(&marker).unwrap_or(reference.len());
    let prefix = &reference[..end];

    if prefix.starts_with("MD-") {
        prefix.to_owned()
    } else {
        String::new()
    }
}

/// Rebuild a parameter-instance reference id by taking the application
/// program prefix from `text_parameter_ref_id` (everything before `_MD-`),
/// splicing in the module-instance part extracted from `instance_ref`, and
/// appending the parameter segment (`P-...` or `UP-...`) of
/// `text_parameter_ref_id`.
///
/// If `text_parameter_ref_id` has no `_MD-`, it is returned unchanged.
pub fn text_parameter_insert_module_instance(
    instance_ref: &str,
    instance_next_kind: &str,
    text_parameter_ref_id: &str,
) -> String {
    let Some(md_index) = text_parameter_ref_id.find("_MD-") else {
        return text_parameter_ref_id.to_owned();
    };

    let application_prefix = &text_parameter_ref_id[..md_index];
    let module_instance_part = get_module_instance_part(instance_ref, instance_next_kind);
    let parameter_segment = text_parameter_ref_id
        .split('_')
        .rev()
        .find(|segment| segment.starts_with("P-") || segment.starts_with("UP-"))
        .unwrap_or("");

    [application_prefix, module_instance_part.as_str(), parameter_segment]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Substitute `{{0}}`/`{{0:default}}` placeholders in `text` with `value`,
/// or the placeholder's own default, or the empty string. Any other
/// placeholder (`{{1}}`, `{{XY}}`) is left literal. Substitution proceeds
/// non-overlapping, left to right.
///
/// ```
/// use knxproject_model::refs::substitute_template;
///
/// assert_eq!(substitute_template("{{0:default}}", None), "default");
/// assert_eq!(substitute_template("Hi {{0:def}} again", None), "Hi def again");
/// assert_eq!(substitute_template("{{1}}", Some("test")), "{{1}}");
/// ```
pub fn substitute_template(text: &str, value: Option<&str>) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            output.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let placeholder_body = &after_open[..close];
        rest = &after_open[close + 2..];

        if let Some(default) = placeholder_body.strip_prefix("0:") {
            output.push_str(value.unwrap_or(default));
        } else if placeholder_body == "0" {
            output.push_str(value.unwrap_or(""));
        } else {
            output.push_str("{{");
            output.push_str(placeholder_body);
            output.push_str("}}");
        }
    }

    output.push_str(rest);
    output
}

/// A datapoint-type pair, e.g. `DPST-5-1` → `{main: 5, sub: Some(1)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatapointType {
    /// The main DPT number.
    pub main: u32,
    /// The sub number, absent for a bare `DPT-<n>` token.
    pub sub: Option<u32>,
}

/// Parse whitespace-separated `DPT-<n>`/`DPST-<n>-<m>` tokens, deduplicating
/// while preserving first-seen order. Unknown tokens are logged and
/// skipped.
///
/// ```
/// use knxproject_model::refs::{parse_dpt_types, DatapointType};
///
/// assert_eq!(
///     parse_dpt_types("DPT-1 DPST-1-1"),
///     vec![
///         DatapointType { main: 1, sub: None },
///         DatapointType { main: 1, sub: Some(1) },
///     ]
/// );
/// assert_eq!(parse_dpt_types("Wrong"), Vec::new());
/// ```
pub fn parse_dpt_types(text: &str) -> Vec<DatapointType> {
    let mut seen = Vec::new();

    for token in text.split_whitespace() {
        let parsed = parse_one_dpt_token(token);

        match parsed {
            Some(dpt) if !seen.contains(&dpt) => seen.push(dpt),
            Some(_) => {}
            None => tracing::warn!(token, "unrecognized datapoint type token"),
        }
    }

    seen
}

fn parse_one_dpt_token(token: &str) -> Option<DatapointType> {
    if let Some(rest) = token.strip_prefix("DPST-") {
        let mut parts = rest.splitn(2, '-');
        let main = parts.next()?.parse().ok()?;
        let sub = parts.next()?.parse().ok()?;
        return Some(DatapointType { main, sub: Some(sub) });
    }

    if let Some(rest) = token.strip_prefix("DPT-") {
        let main = rest.parse().ok()?;
        return Some(DatapointType { main, sub: None });
    }

    None
}

/// Return the first parsed datapoint type in `text`, if any.
pub fn get_dpt_type(text: Option<&str>) -> Option<DatapointType> {
    parse_dpt_types(text.unwrap_or_default()).into_iter().next()
}

/// Parse a boolean `Enabled`/other XML flag attribute.
pub fn parse_xml_flag(value: Option<&str>) -> bool {
    value == Some("Enabled")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_module_instance_examples() {
        assert_eq!(strip_module_instance("MD-1_M-1_MI-1_CH-4", "CH"), "MD-1_CH-4");
        assert_eq!(
            strip_module_instance("MD-4_M-15_MI-1_SM-1_M-1_MI-1-1-2_SM-1_O-3-1_R-2", "O"),
            "MD-4_SM-1_O-3-1_R-2"
        );
    }

    #[test]
    fn strip_module_instance_is_idempotent() {
        let inputs = [
            "MD-1_M-1_MI-1_CH-4",
            "MD-4_M-15_MI-1_SM-1_M-1_MI-1-1-2_SM-1_O-3-1_R-2",
            "O-3-1_R-2",
            "R-2",
        ];

        for input in inputs {
            let once = strip_module_instance(input, "O");
            let twice = strip_module_instance(&once, "O");
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn get_module_instance_part_examples() {
        assert_eq!(get_module_instance_part("MD-1_M-1_MI-1_CH-4", "CH"), "MD-1_M-1_MI-1");
        assert_eq!(get_module_instance_part("CH-SOM03", "CH"), "");
    }

    #[test]
    fn template_substitution_examples() {
        assert_eq!(substitute_template("{{0:default}}", None), "default");
        assert_eq!(substitute_template("Hi {{0:def}} again", None), "Hi def again");
        assert_eq!(substitute_template("{{1}}", Some("test")), "{{1}}");
        assert_eq!(substitute_template("{{0}}", Some("value")), "value");
        assert_eq!(substitute_template("{{0}}", None), "");
    }

    #[test]
    fn dpt_parsing_examples() {
        assert_eq!(
            parse_dpt_types("DPT-1 DPST-1-1"),
            vec![DatapointType { main: 1, sub: None }, DatapointType { main: 1, sub: Some(1) }]
        );
        assert_eq!(parse_dpt_types("DPST-5-1"), vec![DatapointType { main: 5, sub: Some(1) }]);
        assert_eq!(parse_dpt_types("Wrong"), Vec::new());
    }

    #[test]
    fn dpt_parsing_empty_inputs() {
        assert_eq!(parse_dpt_types(""), Vec::new());
        assert_eq!(parse_dpt_types("   "), Vec::new());
        assert_eq!(get_dpt_type(None), None);
    }

    #[test]
    fn dpt_parsing_deduplicates_preserving_order() {
        assert_eq!(
            parse_dpt_types("DPT-1 DPT-1 DPST-1-1 DPT-1"),
            vec![DatapointType { main: 1, sub: None }, DatapointType { main: 1, sub: Some(1) }]
        );
    }
}
