//! C3 — master-data loader. Reads `knx_master.xml`: manufacturer names,
//! space-usage text, the available product-language list, function-type
//! names, and — when a caller language is active — the project-wide
//! translation table.

use indexmap::IndexMap;
use knxproject_errors::Result;
use quick_xml::events::Event;
use quick_xml::Reader;

/// The 24 built-in ETS4 product-language codes (spec §4.3); ETS4 projects
/// carry no `ProductLanguages` element, so this fixed table stands in for
/// it.
pub const PRODUCT_LANGUAGES: &[&str] = &[
    "cs-CZ", "da-DK", "de-DE", "el-GR", "en-US", "es-ES", "fi-FI", "fr-FR", "he-IL", "hu-HU", "it-IT",
    "ja-JP", "ko-KR", "nl-NL", "no-NO", "pl-PL", "pt-BR", "pt-PT", "ru-RU", "sk-SK", "sv-SE", "tr-TR",
    "zh-CN", "zh-TW",
];

/// One translated attribute set for a single `ref-id`.
pub type TranslationUnit = IndexMap<String, String>;

/// `{ref-id -> {attribute-name -> text}}`, built from the resolved
/// language's `TranslationUnit`/`TranslationElement` entries.
pub type TranslationTable = IndexMap<String, TranslationUnit>;

/// The result of loading `knx_master.xml`.
#[derive(Debug, Clone, Default)]
pub struct MasterData {
    /// `{manufacturer id -> display name}`.
    pub manufacturers: IndexMap<String, String>,
    /// `{space-usage id -> text}`. Empty for ETS4 projects.
    pub space_usages: IndexMap<String, String>,
    /// `{function-type id -> text}`.
    pub function_types: IndexMap<String, String>,
    /// Available product-language codes (ETS5+; the built-in list above
    /// for ETS4).
    pub product_languages: Vec<String>,
    /// The language code actually resolved from the caller's request, if
    /// any matched.
    pub resolved_language: Option<String>,
    /// Translations for the resolved language, empty if none resolved.
    pub translations: TranslationTable,
}

impl MasterData {
    /// Look up a translated attribute, falling back to `fallback` when no
    /// translation is active or the ref-id/attribute pair is missing.
    pub fn translate<'a>(&'a self, ref_id: &str, attribute: &str, fallback: &'a str) -> &'a str {
        self.translations
            .get(ref_id)
            .and_then(|unit| unit.get(attribute))
            .map(String::as_str)
            .unwrap_or(fallback)
    }
}

/// Resolve a caller-supplied language request against the available
/// product-language codes: exact match wins, otherwise a language sharing
/// the same two-letter prefix wins, otherwise `None`.
pub fn resolve_language(requested: &str, available: &[String]) -> Option<String> {
    if let Some(exact) = available.iter().find(|code| code.as_str() == requested) {
        return Some(exact.clone());
    }

    let prefix = requested.split('-').next().unwrap_or(requested);
    available
        .iter()
        .find(|code| code.split('-').next().unwrap_or(code.as_str()) == prefix)
        .cloned()
}

/// Parse `knx_master.xml` and, if `language` was supplied, resolve and load
/// its translation table.
pub fn load(xml: &[u8], language: Option<&str>) -> Result<MasterData> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buffer = Vec::new();

    let mut data = MasterData::default();
    let mut path: Vec<String> = Vec::new();
    let mut active_language: Option<String> = None;
    let mut current_ref_id: Option<String> = None;

    loop {
        let event = reader.read_event_into(&mut buffer)?;
        match event {
            Event::Eof => break,
            Event::Start(start) | Event::Empty(start) => {
                let is_start = matches!(event, Event::Start(_));
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();

                match name.as_str() {
                    "Manufacturer" => {
                        if let (Some(id), Some(text)) =
                            (attr(&start, "Id")?, attr(&start, "Name")?)
                        {
                            data.manufacturers.insert(id, text);
                        }
                    }
                    "SpaceUsage" => {
                        if let (Some(id), Some(text)) = (attr(&start, "Id")?, attr(&start, "Text")?) {
                            data.space_usages.insert(id, text);
                        }
                    }
                    "FunctionType" => {
                        if let (Some(id), Some(text)) = (attr(&start, "Id")?, attr(&start, "Text")?) {
                            data.function_types.insert(id, text);
                        }
                    }
                    "Language" if path.last().map(String::as_str) == Some("ProductLanguages") => {
                        if let Some(identifier) = attr(&start, "Identifier")? {
                            data.product_languages.push(identifier);
                        }
                    }
                    "Language" if path.last().map(String::as_str) == Some("Languages") => {
                        let identifier = attr(&start, "Identifier")?;
                        active_language = identifier.filter(|code| Some(code.as_str()) == language);
                    }
                    "TranslationUnit" => {
                        current_ref_id = attr(&start, "RefId")?;
                    }
                    "TranslationElement" if active_language.is_some() => {
                        if let Some(ref_id) = current_ref_id.clone() {
                            let unit = data.translations.entry(ref_id).or_default();
                            for (key, value) in [
                                ("Text", attr(&start, "Text")?),
                                ("FunctionText", attr(&start, "FunctionText")?),
                                ("Name", attr(&start, "Name")?),
                            ] {
                                if let Some(value) = value {
                                    unit.insert(key.to_owned(), value);
                                }
                            }
                        }
                    }
                    _ => {}
                }

                if is_start {
                    path.push(name);
                }
            }
            Event::End(_) => {
                path.pop();
            }
            _ => {}
        }
        buffer.clear();
    }

    if data.product_languages.is_empty() {
        data.product_languages = PRODUCT_LANGUAGES.iter().map(|code| (*code).to_owned()).collect();
    }

    data.resolved_language = language.and_then(|requested| resolve_language(requested, &data.product_languages));
    if data.resolved_language.is_none() {
        if let Some(requested) = language {
            tracing::warn!(requested, "no product language resolved, translations left empty");
        }
        data.translations.clear();
    }

    Ok(data)
}

fn attr(start: &quick_xml::events::BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attribute in start.attributes() {
        let attribute = attribute?;
        if attribute.key.as_ref() == key.as_bytes() {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<KNX xmlns="http://knx.org/xml/project/20">
  <MasterData>
    <Manufacturers>
      <Manufacturer Id="M-0083" Name="Gira"/>
    </Manufacturers>
    <SpaceUsages>
      <SpaceUsage Id="SU-1" Text="Office"/>
    </SpaceUsages>
    <ProductLanguages>
      <Language Identifier="de-DE"/>
      <Language Identifier="en-US"/>
    </ProductLanguages>
    <FunctionTypes>
      <FunctionType Id="FT-1" Text="Light switch"/>
    </FunctionTypes>
    <Languages>
      <Language Identifier="de-DE">
        <TranslationUnit RefId="M-0083_A-1">
          <TranslationElement Text="Licht"/>
        </TranslationUnit>
      </Language>
    </Languages>
  </MasterData>
</KNX>"#;

    #[test]
    fn parses_manufacturers_space_usages_and_function_types() {
        let data = load(SAMPLE.as_bytes(), None).unwrap();
        assert_eq!(data.manufacturers.get("M-0083"), Some(&"Gira".to_owned()));
        assert_eq!(data.space_usages.get("SU-1"), Some(&"Office".to_owned()));
        assert_eq!(data.function_types.get("FT-1"), Some(&"Light switch".to_owned()));
        assert_eq!(data.product_languages, vec!["de-DE".to_owned(), "en-US".to_owned()]);
    }

    #[test]
    fn ets4_projects_fall_back_to_builtin_product_languages() {
        let minimal = r#"<KNX xmlns="http://knx.org/xml/project/11"><MasterData/></KNX>"#;
        let data = load(minimal.as_bytes(), None).unwrap();
        assert_eq!(data.product_languages.len(), PRODUCT_LANGUAGES.len());
    }

    #[test]
    fn resolves_exact_and_prefix_language_matches() {
        let available = vec!["de-DE".to_owned(), "en-US".to_owned()];
        assert_eq!(resolve_language("de-DE", &available), Some("de-DE".to_owned()));
        assert_eq!(resolve_language("de-AT", &available), Some("de-DE".to_owned()));
        assert_eq!(resolve_language("fr-FR", &available), None);
    }

    #[test]
    fn loads_translation_table_for_resolved_language() {
        let data = load(SAMPLE.as_bytes(), Some("de-DE")).unwrap();
        assert_eq!(data.resolved_language, Some("de-DE".to_owned()));
        assert_eq!(data.translate("M-0083_A-1", "Text", "fallback"), "Licht");
        assert_eq!(data.translate("missing", "Text", "fallback"), "fallback");
    }
}
