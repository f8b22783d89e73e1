use std::{
    borrow::Cow,
    collections::HashMap,
    path::{Component, Path, PathBuf},
};

use percent_encoding::percent_decode_str;
use quick_xml::{
    NsReader,
    escape::unescape,
    events::{BytesStart, Event},
    name::{Namespace, ResolveResult},
};

use crate::error::ConvertError;

/// Resolves a relative link against a directory inside the extraction root
///
/// The link is interpreted with URL semantics: segments are separated by `/`,
/// `.` segments are dropped and `..` segments climb one directory. A link
/// starting with `/` is rooted at the extraction root instead of `base_dir`.
///
/// ## Parameters
/// - `base_dir`: The directory the link is relative to, itself relative to the root
/// - `link`: The link to resolve
///
/// ## Return
/// - `Some(PathBuf)`: The normalized path, relative to the extraction root
/// - `None`: If the link climbs out of the extraction root
pub fn resolve_relative_link(base_dir: &Path, link: &str) -> Option<PathBuf> {
    let mut segments: Vec<String> = if link.starts_with('/') {
        Vec::new()
    } else {
        base_dir
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect()
    };

    for segment in link.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                // popping past the root means the link leaks out of the container
                segments.pop()?;
            }
            segment => segments.push(segment.to_string()),
        }
    }

    Some(segments.iter().collect())
}

/// Returns the percent-decoded form of a link, if it differs from the link
pub fn percent_decoded(link: &str) -> Option<String> {
    match percent_decode_str(link).decode_utf8() {
        Ok(Cow::Owned(decoded)) => Some(decoded),
        _ => None,
    }
}

/// Checks whether the extension of `path` is one of `extensions`, ignoring case
pub fn has_extension<P: AsRef<Path>>(path: P, extensions: &[&str]) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|item| ext.eq_ignore_ascii_case(item)))
}

/// Provides functionality to decode byte data into strings
///
/// Markup and package documents are usually UTF-8, but UTF-16 documents
/// carrying a byte order mark are accepted as well.
///
/// ## Notes
/// - Data without a BOM that is not valid UTF-8 is decoded lossily.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, ConvertError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, ConvertError> {
        match self {
            [] => Err(ConvertError::EmptyDataError),

            // UTF-8 BOM
            [0xEF, 0xBB, 0xBF, rest @ ..] => {
                String::from_utf8(rest.to_vec()).map_err(ConvertError::from)
            }

            // UTF-16 BE BOM
            [0xFE, 0xFF, rest @ ..] => {
                let units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();
                String::from_utf16(&units).map_err(ConvertError::from)
            }

            // UTF-16 LE BOM
            [0xFF, 0xFE, rest @ ..] => {
                let units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();
                String::from_utf16(&units).map_err(ConvertError::from)
            }

            _ => Ok(String::from_utf8_lossy(self).to_string()),
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, ConvertError> {
        self.as_slice().decode()
    }
}

/// Represents an element node in an XML document
#[derive(Debug)]
pub struct XmlElement {
    /// The local name of the element(excluding namespace prefix)
    pub name: String,

    /// The namespace prefix of the element
    pub prefix: Option<String>,

    /// The namespace of the element
    pub namespace: Option<String>,

    /// The attributes of the element
    ///
    /// The key is the qualified attribute name (e.g. `xlink:href`),
    /// the value is the unescaped attribute value
    pub attributes: HashMap<String, String>,

    /// The children of the element
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            prefix: None,
            namespace: None,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    /// Get the full tag name of the element
    ///
    /// If the element has a namespace prefix, return "prefix:name" format;
    /// otherwise, return only the element name.
    pub fn tag_name(&self) -> String {
        if let Some(prefix) = &self.prefix {
            format!("{}:{}", prefix, self.name)
        } else {
            self.name.clone()
        }
    }

    /// Returns the value of the specified attribute
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Iterates over this element and all of its descendants in document order
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Find all elements with the specified local name, in document order
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.descendants().filter(move |element| element.name == name)
    }

    /// Find all elements with the specified name among the child elements of the current element
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }
}

/// Pre-order iterator over an element tree
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

/// XML parser used to parse XML content and build an XML element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// Comments, processing instructions, the declaration, the doctype and
    /// all text content are ignored; only the element structure is kept.
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(ConvertError)`: The document is empty, truncated or not well-formed
    pub fn parse(content: &str) -> Result<XmlElement, ConvertError> {
        if content.trim().is_empty() {
            return Err(ConvertError::EmptyDataError);
        }

        let mut reader = NsReader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;

        loop {
            match reader.read_resolved_event_into(&mut buf) {
                Ok((_, Event::Eof)) => break,

                Ok((namespace, Event::Start(e))) => {
                    let element = Self::open_element(&e, &namespace);
                    stack.push(element);
                }

                Ok((_, Event::End(_))) => {
                    if let Some(element) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(element),
                            None => root = Some(element),
                        }
                    }
                }

                Ok((namespace, Event::Empty(e))) => {
                    let element = Self::open_element(&e, &namespace);
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }

                Err(err) => return Err(err.into()),

                _ => {}
            }

            buf.clear();
        }

        if let Some(unclosed) = stack.last() {
            return Err(ConvertError::MalformedXml {
                tag: unclosed.tag_name(),
            });
        }

        root.ok_or(ConvertError::EmptyDataError)
    }

    /// Parse XML from bytes and builds the root element
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, ConvertError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    /// Builds an element from a start tag
    ///
    /// `namespace` is the resolution of the tag name in the scope of this
    /// element, so declarations on nested elements never leak upwards.
    /// Namespace declarations are not kept as attributes.
    fn open_element(start: &BytesStart, namespace: &ResolveResult) -> XmlElement {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        if let Some(prefix) = start.name().prefix() {
            element.prefix = Some(String::from_utf8_lossy(prefix.as_ref()).to_string());
        }

        if let ResolveResult::Bound(Namespace(uri)) = namespace {
            element.namespace = Some(String::from_utf8_lossy(uri).to_string());
        }

        for attr in start.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }

            let raw = String::from_utf8_lossy(&attr.value).to_string();
            let value = match unescape(&raw) {
                Ok(value) => value.into_owned(),
                Err(_) => raw,
            };
            element.attributes.insert(key, value);
        }

        element
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::{
        error::ConvertError,
        utils::{DecodeBytes, XmlReader, has_extension, percent_decoded, resolve_relative_link},
    };

    /// Test with empty data
    #[test]
    fn test_decode_empty_data() {
        let data: Vec<u8> = vec![];
        let result = data.decode();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err(), ConvertError::EmptyDataError);
    }

    /// Testing text decoding with UTF-8 BOM
    #[test]
    fn test_decode_utf8_with_bom() {
        let data: Vec<u8> = vec![0xEF, 0xBB, 0xBF, b'H', b'e', b'l', b'l', b'o'];
        assert_eq!(data.decode().unwrap(), "Hello");
    }

    /// Test text decoding with UTF-16 BE BOM
    #[test]
    fn test_decode_utf16_be_with_bom() {
        let data = vec![
            0xFE, 0xFF, // BOM
            0x00, b'<', // <
            0x00, b'a', // a
            0x00, b'/', // /
            0x00, b'>', // >
        ];
        assert_eq!(data.decode().unwrap(), "<a/>");
    }

    /// Testing text decoding with UTF-16 LE BOM
    #[test]
    fn test_decode_utf16_le_with_bom() {
        let data = vec![
            0xFF, 0xFE, // BOM
            b'H', 0x00, // H
            b'i', 0x00, // i
        ];
        assert_eq!(data.decode().unwrap(), "Hi");
    }

    #[test]
    fn test_parse_with_default_namespace() {
        let root = XmlReader::parse(
            r#"<?xml version="1.0"?>
            <package xmlns="http://www.idpf.org/2007/opf" version="3.0">
                <manifest><item id="a" href="a.xhtml"/></manifest>
            </package>"#,
        )
        .unwrap();

        assert_eq!(root.name, "package");
        assert_eq!(
            root.namespace.as_deref(),
            Some("http://www.idpf.org/2007/opf")
        );
        let item = root.find_elements_by_name("item").next().unwrap();
        assert_eq!(item.get_attr("href"), Some("a.xhtml"));
    }

    #[test]
    fn test_parse_with_prefixed_namespace() {
        let root = XmlReader::parse(
            r#"<opf:package xmlns:opf="http://www.idpf.org/2007/opf"><opf:spine/></opf:package>"#,
        )
        .unwrap();

        assert_eq!(root.tag_name(), "opf:package");
        assert_eq!(root.find_children_by_name("spine").count(), 1);
    }

    /// A default namespace declared on inline SVG only applies inside it
    #[test]
    fn test_parse_nested_default_namespace() {
        let root = XmlReader::parse(
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
                <svg xmlns="http://www.w3.org/2000/svg"><image href="a.jpg"/></svg>
                <img src="b.jpg"/>
            </body></html>"#,
        )
        .unwrap();

        let xhtml = Some("http://www.w3.org/1999/xhtml");
        let svg = Some("http://www.w3.org/2000/svg");
        assert_eq!(root.namespace.as_deref(), xhtml);
        assert_eq!(root.find_elements_by_name("image").next().unwrap().namespace.as_deref(), svg);
        assert_eq!(root.find_elements_by_name("img").next().unwrap().namespace.as_deref(), xhtml);
        assert!(root.find_elements_by_name("svg").next().unwrap().get_attr("xmlns").is_none());
    }

    /// Attribute values are unescaped and keep their qualified names
    #[test]
    fn test_parse_attributes() {
        let root = XmlReader::parse(
            r#"<svg xmlns:xlink="http://www.w3.org/1999/xlink">
                <image xlink:href="a&amp;b.jpg"/>
            </svg>"#,
        )
        .unwrap();

        let image = root.find_elements_by_name("image").next().unwrap();
        assert_eq!(image.get_attr("xlink:href"), Some("a&b.jpg"));
    }

    #[test]
    fn test_find_elements_in_document_order() {
        let root = XmlReader::parse(
            r#"<html><body>
                <div><img src="1"/></div>
                <svg><image href="2"/></svg>
                <img src="3"/>
            </body></html>"#,
        )
        .unwrap();

        let order = root
            .descendants()
            .filter(|element| element.name == "img" || element.name == "image")
            .map(|element| {
                element
                    .get_attr("src")
                    .or(element.get_attr("href"))
                    .unwrap()
                    .to_string()
            })
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_parse_truncated_document() {
        let result = XmlReader::parse(r#"<container><rootfiles><rootfile full-path="a.opf"/>"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_mismatched_tags() {
        let result = XmlReader::parse("<html><body><p></body></html>");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_empty_document() {
        let result = XmlReader::parse("   ");
        assert_eq!(result.unwrap_err(), ConvertError::EmptyDataError);
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Path::new("OEBPS/text");

        assert_eq!(
            resolve_relative_link(base, "../images/cover.jpg"),
            Some(PathBuf::from("OEBPS/images/cover.jpg"))
        );
        assert_eq!(
            resolve_relative_link(base, "./p1.xhtml"),
            Some(PathBuf::from("OEBPS/text/p1.xhtml"))
        );
        assert_eq!(
            resolve_relative_link(base, "/images/a.png"),
            Some(PathBuf::from("images/a.png"))
        );
        assert_eq!(
            resolve_relative_link(Path::new(""), "content.opf"),
            Some(PathBuf::from("content.opf"))
        );
    }

    /// Links climbing above the extraction root are rejected
    #[test]
    fn test_resolve_relative_link_leakage() {
        assert_eq!(resolve_relative_link(Path::new("OEBPS"), "../../secret"), None);
        assert_eq!(resolve_relative_link(Path::new(""), "../a.jpg"), None);
    }

    #[test]
    fn test_percent_decoded() {
        assert_eq!(percent_decoded("My%20Page.xhtml"), Some("My Page.xhtml".to_string()));
        assert_eq!(percent_decoded("plain.xhtml"), None);
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension("a/b/page.JPG", &["jpg", "png"]));
        assert!(!has_extension("a/b/page.svg", &["jpg", "png"]));
        assert!(!has_extension("a/b/page", &["jpg"]));
    }
}
