//! The package manifest document.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <image xmlns="http://olivearchive.org/xmlns/vmnetx/package" name="Windows 95">
//!   <domain path="domain.xml"/>
//!   <disk path="disk.img"/>
//!   <memory path="memory.img"/>
//! </image>
//! ```
//!
//! `domain` and `disk` are required, `memory` is optional, and they must
//! appear in that order. Nothing else is allowed.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};

use crate::error::{Error, Result};

pub const NAMESPACE: &str = "http://olivearchive.org/xmlns/vmnetx/package";

pub const MANIFEST_FILENAME: &str = "vmnetx-package.xml";
pub const DOMAIN_FILENAME: &str = "domain.xml";
pub const DISK_FILENAME: &str = "disk.img";
pub const MEMORY_FILENAME: &str = "memory.img";

const INVALID: &str = "Manifest XML does not validate";

fn invalid(detail: impl Into<String>) -> Error {
    Error::bad_container_detail(INVALID, detail)
}

fn write_err(err: impl std::fmt::Display) -> Error {
    invalid(err.to_string())
}

/// Member paths referenced by a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub domain: String,
    pub disk: String,
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
    Domain,
    Disk,
    Memory,
}

impl Slot {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"domain" => Some(Slot::Domain),
            b"disk" => Some(Slot::Disk),
            b"memory" => Some(Slot::Memory),
            _ => None,
        }
    }
}

fn check_namespace(ns: &ResolveResult<'_>, element: &str) -> Result<()> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) if *uri == NAMESPACE.as_bytes() => Ok(()),
        _ => Err(invalid(format!(
            "element <{element}> is not in namespace {NAMESPACE}"
        ))),
    }
}

/// Collect the attributes of `element`, allowing only `allowed` (plus
/// namespace declarations).
fn attributes(element: &BytesStart<'_>, name: &str, allowed: &str) -> Result<Option<String>> {
    let mut value = None;
    for attr in element.attributes() {
        let attr = attr.map_err(|e| invalid(e.to_string()))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        if attr.key.as_ref() != allowed.as_bytes() {
            return Err(invalid(format!(
                "unexpected attribute {:?} on <{name}>",
                String::from_utf8_lossy(attr.key.as_ref())
            )));
        }
        let text = attr.unescape_value().map_err(|e| invalid(e.to_string()))?;
        value = Some(text.into_owned());
    }
    Ok(value)
}

fn required(value: Option<String>, attr: &str, element: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(invalid(format!("attribute {attr} of <{element}> is empty"))),
        None => Err(invalid(format!("<{element}> is missing attribute {attr}"))),
    }
}

impl Manifest {
    /// The manifest `create` writes: canonical member names.
    pub fn canonical(name: impl Into<String>, with_memory: bool) -> Self {
        Self {
            name: name.into(),
            domain: DOMAIN_FILENAME.to_string(),
            disk: DISK_FILENAME.to_string(),
            memory: with_memory.then(|| MEMORY_FILENAME.to_string()),
        }
    }

    /// Parse and validate a manifest document.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut reader = NsReader::from_reader(xml);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        let mut name = None;
        let mut paths: [Option<String>; 3] = [None, None, None];
        let mut last_slot: Option<Slot> = None;
        // 0: before root, 1: inside root, 2: inside a child, 3: after root
        let mut depth = 0u8;

        loop {
            let (ns, event) = reader
                .read_resolved_event_into(&mut buf)
                .map_err(|e| invalid(e.to_string()))?;
            let opens_child = matches!(event, Event::Start(_));
            match (depth, event) {
                (0, Event::Start(e)) => {
                    check_namespace(&ns, "image")?;
                    if e.local_name().as_ref() != b"image" {
                        return Err(invalid(format!(
                            "root element is <{}>, expected <image>",
                            String::from_utf8_lossy(e.local_name().as_ref())
                        )));
                    }
                    name = Some(required(attributes(&e, "image", "name")?, "name", "image")?);
                    depth = 1;
                }
                (0, Event::Empty(_)) => return Err(invalid("<image> has no children")),
                (1, Event::Start(e)) | (1, Event::Empty(e)) => {
                    let local = e.local_name();
                    let element = String::from_utf8_lossy(local.as_ref()).into_owned();
                    check_namespace(&ns, &element)?;
                    let slot = Slot::from_local_name(local.as_ref())
                        .ok_or_else(|| invalid(format!("unexpected element <{element}>")))?;
                    if last_slot.is_some_and(|last| last >= slot) {
                        return Err(invalid(format!("element <{element}> out of order or repeated")));
                    }
                    if slot != Slot::Domain && paths[Slot::Domain as usize].is_none() {
                        return Err(invalid(format!("element <{element}> before <domain>")));
                    }
                    if slot == Slot::Memory && paths[Slot::Disk as usize].is_none() {
                        return Err(invalid("element <memory> before <disk>"));
                    }
                    let path = required(attributes(&e, &element, "path")?, "path", &element)?;
                    paths[slot as usize] = Some(path);
                    last_slot = Some(slot);
                    if opens_child {
                        depth = 2;
                    }
                }
                (1, Event::End(_)) => depth = 3,
                (2, Event::End(_)) => depth = 1,
                (2, Event::Start(e)) | (2, Event::Empty(e)) => {
                    return Err(invalid(format!(
                        "unexpected child <{}>",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                (3, Event::Start(_)) | (3, Event::Empty(_)) => {
                    return Err(invalid("content after root element"));
                }
                (_, Event::Text(t)) => {
                    if !t.iter().all(u8::is_ascii_whitespace) {
                        return Err(invalid("unexpected text content"));
                    }
                }
                (_, Event::CData(_)) => return Err(invalid("unexpected CDATA content")),
                (_, Event::Eof) => break,
                _ => {}
            }
            buf.clear();
        }

        if depth != 3 {
            return Err(invalid("document has no complete <image> element"));
        }
        let [domain, disk, memory] = paths;
        Ok(Self {
            name: name.unwrap_or_default(),
            domain: domain.ok_or_else(|| invalid("missing required element <domain>"))?,
            disk: disk.ok_or_else(|| invalid("missing required element <disk>"))?,
            memory,
        })
    }

    /// Serialize, checking the result against the same rules `parse` applies.
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_err)?;
        writer
            .write_event(Event::Start(
                BytesStart::new("image")
                    .with_attributes([("xmlns", NAMESPACE), ("name", self.name.as_str())]),
            ))
            .map_err(write_err)?;
        let children = [
            ("domain", Some(&self.domain)),
            ("disk", Some(&self.disk)),
            ("memory", self.memory.as_ref()),
        ];
        for (element, path) in children {
            if let Some(path) = path {
                writer
                    .write_event(Event::Empty(
                        BytesStart::new(element).with_attributes([("path", path.as_str())]),
                    ))
                    .map_err(write_err)?;
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new("image")))
            .map_err(write_err)?;

        let mut xml = writer.into_inner();
        xml.push(b'\n');
        if Self::parse(&xml)? != *self {
            return Err(invalid("generated manifest does not round-trip"));
        }
        Ok(xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<image xmlns="http://olivearchive.org/xmlns/vmnetx/package" name="Windows 95">
  <domain path="domain.xml"/>
  <disk path="disk.img"/>
  <memory path="memory.img"/>
</image>
"#;

    fn detail(err: Error) -> String {
        match err {
            Error::BadContainer { message, detail } => {
                assert_eq!(message, INVALID);
                detail.unwrap_or_default()
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(manifest, Manifest::canonical("Windows 95", true));
    }

    #[test]
    fn test_parse_without_memory() {
        let xml = SAMPLE.replace("  <memory path=\"memory.img\"/>\n", "");
        let manifest = Manifest::parse(xml.as_bytes()).unwrap();
        assert_eq!(manifest.memory, None);
        assert_eq!(manifest.disk, "disk.img");
    }

    #[test]
    fn test_prefixed_namespace() {
        let xml = r#"<p:image xmlns:p="http://olivearchive.org/xmlns/vmnetx/package" name="x"><p:domain path="d.xml"></p:domain><p:disk path="a/b.img"/></p:image>"#;
        let manifest = Manifest::parse(xml.as_bytes()).unwrap();
        assert_eq!(manifest.domain, "d.xml");
        assert_eq!(manifest.disk, "a/b.img");
    }

    #[test]
    fn test_rejects_wrong_namespace() {
        let xml = SAMPLE.replace("olivearchive.org", "example.com");
        assert!(detail(Manifest::parse(xml.as_bytes()).unwrap_err()).contains("namespace"));
    }

    #[test]
    fn test_rejects_missing_disk() {
        let xml = SAMPLE.replace("  <disk path=\"disk.img\"/>\n", "");
        let err = Manifest::parse(xml.as_bytes()).unwrap_err();
        assert!(detail(err).contains("<memory>"));

        let xml = r#"<image xmlns="http://olivearchive.org/xmlns/vmnetx/package" name="x"><domain path="d"/></image>"#;
        assert!(detail(Manifest::parse(xml.as_bytes()).unwrap_err()).contains("<disk>"));
    }

    #[test]
    fn test_rejects_out_of_order_and_repeats() {
        let xml = r#"<image xmlns="http://olivearchive.org/xmlns/vmnetx/package" name="x"><domain path="d"/><disk path="a"/><disk path="b"/></image>"#;
        assert!(Manifest::parse(xml.as_bytes()).is_err());

        let xml = r#"<image xmlns="http://olivearchive.org/xmlns/vmnetx/package" name="x"><disk path="a"/><domain path="d"/></image>"#;
        assert!(Manifest::parse(xml.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_unknown_content() {
        let extra_attr = SAMPLE.replace("disk path=", "disk size=\"3\" path=");
        assert!(detail(Manifest::parse(extra_attr.as_bytes()).unwrap_err()).contains("size"));

        let extra_element = SAMPLE.replace("</image>", "<cdrom path=\"c\"/></image>");
        assert!(Manifest::parse(extra_element.as_bytes()).is_err());

        let text = SAMPLE.replace("</image>", "hello</image>");
        assert!(Manifest::parse(text.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_missing_name_and_garbage() {
        let xml = SAMPLE.replace(" name=\"Windows 95\"", "");
        assert!(detail(Manifest::parse(xml.as_bytes()).unwrap_err()).contains("name"));
        assert!(Manifest::parse(b"not xml at all <").is_err());
        assert!(Manifest::parse(b"").is_err());
    }

    #[test]
    fn test_to_xml_escapes_and_parses_back() {
        let manifest = Manifest::canonical("Tom & Jerry's <VM>", false);
        let xml = manifest.to_xml().unwrap();
        let text = String::from_utf8(xml.clone()).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains(NAMESPACE));
        assert!(!text.contains("memory"));
        assert_eq!(Manifest::parse(&xml).unwrap(), manifest);
    }

    #[test]
    fn test_to_xml_rejects_empty_name() {
        assert!(Manifest::canonical("", true).to_xml().is_err());
    }
}
