//! A minimal generic XML tree, built once per document with
//! `quick_xml::Reader` in streaming mode and then walked recursively.
//!
//! The project (C5) and application-program (C6) XML documents are deeply
//! nested (group ranges, location trees, module definitions) — parsing
//! into a small in-memory tree first, rather than hand-rolling a recursive
//! streaming state machine for each recursive shape, keeps the loaders
//! that walk it straightforward while still going through `quick_xml`'s
//! event reader for the actual byte-level parsing.

use indexmap::IndexMap;
use knxproject_errors::Result;
use quick_xml::events::Event;
use quick_xml::Reader;

/// One element of the tree, with its attributes and children in document
/// order.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Local tag name (namespace prefixes are not used anywhere in these
    /// documents).
    pub name: String,
    /// Attribute map, insertion-ordered.
    pub attrs: IndexMap<String, String>,
    /// Child elements, in document order.
    pub children: Vec<Node>,
}

impl Node {
    /// An attribute value, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// An attribute value, or `default` if absent.
    pub fn attr_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.attr(key).unwrap_or(default)
    }

    /// First direct child with the given tag name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }

    /// All direct children with the given tag name.
    pub fn children(&self, name: &str) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Depth-first search for the first descendant with the given tag
    /// name, at any depth.
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Depth-first collection of every descendant with the given tag
    /// name, at any depth (the node itself included if it matches).
    pub fn find_all<'a>(&'a self, name: &'a str, into: &mut Vec<&'a Node>) {
        if self.name == name {
            into.push(self);
        }
        for child in &self.children {
            child.find_all(name, into);
        }
    }
}

/// Parse a full XML document into a single root [`Node`] (synthetic if the
/// document has multiple top-level elements, which none of these do).
pub fn parse(xml: &[u8]) -> Result<Node> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buffer = Vec::new();

    let mut stack: Vec<Node> = vec![Node { name: "#document".to_owned(), ..Node::default() }];

    loop {
        match reader.read_event_into(&mut buffer)? {
            Event::Eof => break,
            Event::Start(start) => {
                stack.push(node_from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                stack.last_mut().expect("document root never popped").children.push(node);
            }
            Event::End(_) => {
                let finished = stack.pop().expect("matching Start for every End");
                stack.last_mut().expect("document root never popped").children.push(finished);
            }
            _ => {}
        }
        buffer.clear();
    }

    let mut root = stack.pop().expect("document root never popped");
    Ok(root.children.pop().unwrap_or_default())
}

fn node_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Node> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = IndexMap::new();
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        attrs.insert(key, value);
    }
    Ok(Node { name, attrs, children: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let xml = r#"<Root><A x="1"><B y="2"/></A></Root>"#;
        let root = parse(xml.as_bytes()).unwrap();
        assert_eq!(root.name, "Root");
        let a = root.child("A").unwrap();
        assert_eq!(a.attr("x"), Some("1"));
        let b = a.child("B").unwrap();
        assert_eq!(b.attr("y"), Some("2"));
    }

    #[test]
    fn find_locates_descendants_at_any_depth() {
        let xml = r#"<Root><A><B><Target id="1"/></B></A><Target id="2"/></Root>"#;
        let root = parse(xml.as_bytes()).unwrap();
        let mut all = Vec::new();
        root.find_all("Target", &mut all);
        assert_eq!(all.len(), 2);
        assert_eq!(root.find("Target").unwrap().attr("id"), Some("1"));
    }
}
