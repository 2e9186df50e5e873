//! C4 — hardware-catalog loader. Parses a single manufacturer's
//! `Hardware.xml`: products (id, text, order number) and the
//! hardware-program → application-program reference table.

use indexmap::IndexMap;
use knxproject_errors::Result;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::master::MasterData;

/// One catalog product entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Display text.
    pub text: String,
    /// Manufacturer order number.
    pub order_number: String,
    /// The owning `Hardware` entry's name.
    pub hardware_name: String,
}

/// One manufacturer's parsed `Hardware.xml`.
#[derive(Debug, Clone, Default)]
pub struct HardwareCatalog {
    /// `{product id -> Product}`.
    pub products: IndexMap<String, Product>,
    /// `{hardware-program id -> application-program ref id}`.
    pub application_program_refs: IndexMap<String, String>,
}

/// Parse a manufacturer's `Hardware.xml`, applying its own `Languages`
/// block's `Product.Text` translations (§4.4) for `master`'s resolved
/// language — the manufacturer's `Hardware.xml` carries its own
/// `Languages`/`TranslationUnit` table, distinct from `knx_master.xml`'s.
pub fn load(xml: &[u8], master: &MasterData) -> Result<HardwareCatalog> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buffer = Vec::new();

    let mut catalog = HardwareCatalog::default();
    let mut current_hardware_name = String::new();
    let mut current_hardware_program_id: Option<String> = None;

    let mut path: Vec<String> = Vec::new();
    let mut active_language = false;
    let mut current_translation_ref_id: Option<String> = None;
    let mut text_translations: IndexMap<String, String> = IndexMap::new();

    loop {
        let event = reader.read_event_into(&mut buffer)?;
        match event {
            Event::Eof => break,
            Event::Start(start) | Event::Empty(start) => {
                let is_start = matches!(event, Event::Start(_));
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                match name.as_str() {
                    "Hardware" => {
                        current_hardware_name = attr(&start, "Name")?.unwrap_or_default();
                    }
                    "Product" => {
                        if let Some(id) = attr(&start, "Id")? {
                            let default_text = attr(&start, "Text")?.unwrap_or_default();
                            let order_number = attr(&start, "OrderNumber")?.unwrap_or_default();
                            catalog.products.insert(
                                id,
                                Product { text: default_text, order_number, hardware_name: current_hardware_name.clone() },
                            );
                        }
                    }
                    "Hardware2Program" => {
                        current_hardware_program_id = attr(&start, "Id")?;
                    }
                    "ApplicationProgramRef" => {
                        if let (Some(program_id), Some(ref_id)) =
                            (current_hardware_program_id.clone(), attr(&start, "RefId")?)
                        {
                            catalog.application_program_refs.insert(program_id, ref_id);
                        }
                    }
                    "Language" if path.last().map(String::as_str) == Some("Languages") => {
                        let identifier = attr(&start, "Identifier")?;
                        active_language =
                            master.resolved_language.is_some() && identifier.as_deref() == master.resolved_language.as_deref();
                    }
                    "TranslationUnit" => {
                        current_translation_ref_id = attr(&start, "RefId")?;
                    }
                    "TranslationElement" if active_language => {
                        if let (Some(ref_id), Some(text)) = (current_translation_ref_id.clone(), attr(&start, "Text")?) {
                            text_translations.insert(ref_id, text);
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

    for (id, product) in &mut catalog.products {
        if let Some(text) = text_translations.get(id) {
            product.text = text.clone();
        }
    }

    Ok(catalog)
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
<KNX>
  <Manufacturer>
    <Hardware>
      <Hardware Id="H-1" Name="Switch actuator">
        <Products>
          <Product Id="M-0083_H-1-1_P-1" Text="4-fold actuator" OrderNumber="12345"/>
        </Products>
        <Hardware2Programs>
          <Hardware2Program Id="HP-1">
            <ApplicationProgramRef RefId="M-0083_A-10-1"/>
          </Hardware2Program>
        </Hardware2Programs>
      </Hardware>
    </Hardware>
  </Manufacturer>
</KNX>"#;

    #[test]
    fn parses_products_and_application_program_refs() {
        let master = MasterData::default();
        let catalog = load(SAMPLE.as_bytes(), &master).unwrap();

        let product = catalog.products.get("M-0083_H-1-1_P-1").unwrap();
        assert_eq!(product.text, "4-fold actuator");
        assert_eq!(product.order_number, "12345");
        assert_eq!(product.hardware_name, "Switch actuator");

        assert_eq!(
            catalog.application_program_refs.get("HP-1"),
            Some(&"M-0083_A-10-1".to_owned())
        );
    }

    const SAMPLE_WITH_LANGUAGES: &str = r#"<?xml version="1.0"?>
<KNX>
  <Manufacturer>
    <Hardware>
      <Hardware Id="H-1" Name="Switch actuator">
        <Products>
          <Product Id="M-0083_H-1-1_P-1" Text="4-fold actuator" OrderNumber="12345"/>
        </Products>
        <Hardware2Programs>
          <Hardware2Program Id="HP-1">
            <ApplicationProgramRef RefId="M-0083_A-10-1"/>
          </Hardware2Program>
        </Hardware2Programs>
      </Hardware>
    </Hardware>
    <Languages>
      <Language Identifier="de-DE">
        <TranslationUnit RefId="M-0083_H-1-1_P-1">
          <TranslationElement Text="4-fach Aktor"/>
        </TranslationUnit>
      </Language>
    </Languages>
  </Manufacturer>
</KNX>"#;

    #[test]
    fn applies_its_own_languages_block_translation_to_product_text() {
        let mut master = MasterData::default();
        master.resolved_language = Some("de-DE".to_owned());

        let catalog = load(SAMPLE_WITH_LANGUAGES.as_bytes(), &master).unwrap();
        assert_eq!(catalog.products.get("M-0083_H-1-1_P-1").unwrap().text, "4-fach Aktor");
    }

    #[test]
    fn leaves_product_text_untranslated_without_a_resolved_language() {
        let master = MasterData::default();
        let catalog = load(SAMPLE_WITH_LANGUAGES.as_bytes(), &master).unwrap();
        assert_eq!(catalog.products.get("M-0083_H-1-1_P-1").unwrap().text, "4-fold actuator");
    }
}
