use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::collections::HashMap;

/// A namespace-resolved XML element
/// Attributes are keyed by local name (`gml:id` is stored as `id`)
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub namespace: String,
    pub local_name: String,
    pub attributes: HashMap<String, String>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse raw file bytes, honouring the encoding of the XML declaration
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement> {
        let encoding = declared_encoding(bytes).unwrap_or(encoding_rs::UTF_8);
        let (decoded, used, had_errors) = encoding.decode(bytes);
        if had_errors {
            log::warn!(
                "Input contains bytes that are not valid {}, replaced with U+FFFD",
                used.name()
            );
        }
        Self::parse_str(&decoded)
    }

    /// Parse a document and return its root element
    pub fn parse_str(xml: &str) -> Result<XmlElement> {
        let mut reader = NsReader::from_str(xml);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let position = reader.buffer_position();
            let (ns, event) = reader
                .read_resolved_event()
                .with_context(|| format!("Malformed XML near byte {}", position))?;

            let namespace = match ns {
                ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
                _ => String::new(),
            };

            match event {
                Event::Start(start) => {
                    stack.push(Self::from_start(namespace, &start)?);
                }
                Event::Empty(start) => {
                    let element = Self::from_start(namespace, &start)?;
                    Self::attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(data.as_ref()));
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().context("Closing tag without opening tag")?;
                    Self::attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            bail!("Unclosed element <{}>", open.local_name);
        }
        root.context("XML document has no root element")
    }

    fn from_start(namespace: String, start: &BytesStart) -> Result<Self> {
        let local_name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

        let mut attributes = HashMap::new();
        for attr in start.attributes() {
            let attr = attr?;
            if attr.key.as_ref().starts_with(b"xmlns") {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.insert(key, value);
        }

        Ok(XmlElement {
            namespace,
            local_name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => *root = Some(element),
        }
    }

    /// Name test, tolerant to the version suffix of the namespace
    /// (CityGML 1.0 and 2.0 files, GML 3.1 and 3.2)
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name
            && strip_version(&self.namespace) == strip_version(namespace)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    /// Trimmed text content, None when empty
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Direct children with the given name
    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children
            .iter()
            .filter(move |child| child.is(namespace, local_name))
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    /// Every element below this one in document order (self excluded)
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// First descendant with the given name
    pub fn find(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.descendants().find(|e| e.is(namespace, local_name))
    }

    /// All descendants with the given name, in document order
    pub fn find_all(&self, namespace: &str, local_name: &str) -> Vec<&XmlElement> {
        self.descendants()
            .filter(|e| e.is(namespace, local_name))
            .collect()
    }
}

/// Pre-order traversal over an element subtree
pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let element = self.stack.pop()?;
        self.stack.extend(element.children.iter().rev());
        Some(element)
    }
}

/// `http://www.opengis.net/citygml/building/2.0` -> `http://www.opengis.net/citygml/building`
fn strip_version(namespace: &str) -> &str {
    match namespace.rsplit_once('/') {
        Some((head, tail))
            if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit() || c == '.') =>
        {
            head
        }
        _ => namespace,
    }
}

/// Encoding named in `<?xml ... encoding="..."?>`
fn declared_encoding(bytes: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let declaration = head.split("?>").next()?;
    let after = declaration.split("encoding=").nth(1)?;
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let label = after[1..].split(quote).next()?;
    encoding_rs::Encoding::for_label(label.trim().as_bytes())
}
