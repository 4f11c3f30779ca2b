//! Portal descriptor document
//!
//! The descriptor is a `POETICCONFIGURATION` document whose `LISTVALUES`
//! container holds one group of four entries per publication id:
//!
//! ```xml
//! <LISTVALUES>
//!   <LISTVALUE CODE="MPLMM0000001" LIST_NAME="ES_DOWNLOAD_NAME" ... DESCRIPTION="..."/>
//!   <LISTVALUE CODE="MPLMM0000001" LIST_NAME="ES_DOWNLOAD_DESCRIPTION" ... DESCRIPTION="..."/>
//!   <LISTLOCALIZATION CODE="MPLMM0000001" LOCALIZED_DESCRIPTION="..." LIST_NAME="ES_DOWNLOAD_NAME" .../>
//!   <LISTLOCALIZATION CODE="MPLMM0000001" LOCALIZED_DESCRIPTION="..." LIST_NAME="ES_DOWNLOAD_DESCRIPTION" .../>
//! </LISTVALUES>
//! ```
//!
//! The file is parsed once into a [`DescriptorDocument`], the group for a key
//! is replaced or appended, and the document is written back in one go.
//! Attribute values are kept in their escaped on-disk form throughout.

use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::sanitize::sanitize_markup;
use super::{replace_file, SinkError};

pub const ROOT_TAG: &str = "POETICCONFIGURATION";
pub const ENVELOPE_TAG: &str = "ENVELOPE";
pub const CONTAINER_TAG: &str = "LISTVALUES";
pub const VALUE_TAG: &str = "LISTVALUE";
pub const LOCALIZATION_TAG: &str = "LISTLOCALIZATION";
pub const KEY_ATTRIBUTE: &str = "CODE";

pub const NAME_LIST: &str = "ES_DOWNLOAD_NAME";
pub const DESCRIPTION_LIST: &str = "ES_DOWNLOAD_DESCRIPTION";

/// Longest name the portal accepts without truncation
pub const MAX_NAME_LEN: usize = 80;
/// Longest description the portal accepts without truncation
pub const MAX_DESCRIPTION_LEN: usize = 1900;

/// Fixed attribute values stamped on every entry and on a fresh envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSettings {
    pub config_type: String,
    pub source: String,
    pub build_number: String,
    pub list_build_number: String,
    pub is_active: String,
    pub display_sequence: String,
    pub language_code: String,
    pub context_code: String,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        Self {
            config_type: "ListValues".to_string(),
            source: "PoeticInstance".to_string(),
            build_number: "3524.026".to_string(),
            list_build_number: "3524.026".to_string(),
            is_active: "1".to_string(),
            display_sequence: "1".to_string(),
            language_code: "en".to_string(),
            context_code: "default".to_string(),
        }
    }
}

/// One empty element with its attributes in document order.
///
/// Values are stored escaped, exactly as they appear between the quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorEntry {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
}

impl DescriptorEntry {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn to_start(&self) -> BytesStart<'_> {
        let mut element = BytesStart::new(self.tag.as_str());
        for (key, value) in &self.attributes {
            element.push_attribute(Attribute {
                key: QName(key.as_bytes()),
                value: Cow::Borrowed(value.as_bytes()),
            });
        }
        element
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorGroup {
    pub code: String,
    pub entries: Vec<DescriptorEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Replaced,
    Appended,
}

/// In-memory form of the descriptor file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDocument {
    envelope: Vec<(String, String)>,
    groups: Vec<DescriptorGroup>,
    index: HashMap<String, usize>,
}

fn attr(key: &str, value: &str) -> (String, String) {
    (key.to_string(), escape(value).into_owned())
}

fn raw_attr(key: &str, escaped: &str) -> (String, String) {
    (key.to_string(), escaped.to_string())
}

fn write_err(e: impl std::fmt::Display) -> SinkError {
    SinkError::Write(e.to_string())
}

fn read_attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>, SinkError> {
    element
        .attributes()
        .map(|attribute| {
            let attribute = attribute.map_err(|e| SinkError::Parse(e.to_string()))?;
            let key = String::from_utf8(attribute.key.as_ref().to_vec())
                .map_err(|e| SinkError::Parse(e.to_string()))?;
            let value = String::from_utf8(attribute.value.into_owned())
                .map_err(|e| SinkError::Parse(e.to_string()))?;
            Ok((key, value))
        })
        .collect()
}

impl DescriptorDocument {
    pub fn new(settings: &DescriptorSettings) -> Self {
        Self {
            envelope: vec![
                attr("CONFIGTYPE", &settings.config_type),
                attr("SOURCE", &settings.source),
                attr("BUILDNUMBER", &settings.build_number),
            ],
            groups: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn groups(&self) -> &[DescriptorGroup] {
        &self.groups
    }

    pub fn group(&self, code: &str) -> Option<&DescriptorGroup> {
        self.index.get(code).map(|&idx| &self.groups[idx])
    }

    /// Parse a descriptor. Blank input yields a fresh document.
    pub fn parse(xml: &str, settings: &DescriptorSettings) -> Result<Self, SinkError> {
        let mut document = Self::new(settings);
        if xml.trim().is_empty() {
            return Ok(document);
        }

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut in_container = false;
        let mut saw_root = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| SinkError::Parse(format!("at byte {}: {}", reader.buffer_position(), e)))?;

            match event {
                Event::Start(e) if e.name().as_ref() == ROOT_TAG.as_bytes() => saw_root = true,
                Event::Start(e) if e.name().as_ref() == CONTAINER_TAG.as_bytes() => {
                    in_container = true
                },
                Event::Empty(e) if e.name().as_ref() == CONTAINER_TAG.as_bytes() => {},
                Event::End(e) if e.name().as_ref() == CONTAINER_TAG.as_bytes() => {
                    in_container = false
                },
                Event::Empty(e) | Event::Start(e) if e.name().as_ref() == ENVELOPE_TAG.as_bytes() => {
                    document.envelope = read_attributes(&e)?;
                },
                Event::Empty(e) if in_container => {
                    let tag = String::from_utf8(e.name().as_ref().to_vec())
                        .map_err(|err| SinkError::Parse(err.to_string()))?;
                    let entry = DescriptorEntry {
                        tag,
                        attributes: read_attributes(&e)?,
                    };
                    document.push_entry(entry)?;
                },
                Event::Start(e) if in_container => {
                    return Err(SinkError::Parse(format!(
                        "unexpected nested content in <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                },
                Event::Eof => break,
                _ => {},
            }
        }

        if !saw_root {
            return Err(SinkError::Parse(format!("missing <{}> root element", ROOT_TAG)));
        }
        Ok(document)
    }

    fn push_entry(&mut self, entry: DescriptorEntry) -> Result<(), SinkError> {
        let code = entry
            .attribute(KEY_ATTRIBUTE)
            .ok_or_else(|| SinkError::Parse(format!("<{}> without {}", entry.tag, KEY_ATTRIBUTE)))?
            .to_string();

        match self.index.get(&code) {
            Some(&idx) => self.groups[idx].entries.push(entry),
            None => {
                self.index.insert(code.clone(), self.groups.len());
                self.groups.push(DescriptorGroup {
                    code,
                    entries: vec![entry],
                });
            },
        }
        Ok(())
    }

    /// Replace the group with the same code, or append it at the end.
    pub fn upsert(&mut self, group: DescriptorGroup) -> UpsertAction {
        match self.index.get(&group.code) {
            Some(&idx) => {
                self.groups[idx] = group;
                UpsertAction::Replaced
            },
            None => {
                self.index.insert(group.code.clone(), self.groups.len());
                self.groups.push(group);
                UpsertAction::Appended
            },
        }
    }

    pub fn to_xml(&self) -> Result<String, SinkError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_err)?;
        writer
            .write_event(Event::Start(BytesStart::new(ROOT_TAG)))
            .map_err(write_err)?;

        let envelope = DescriptorEntry {
            tag: ENVELOPE_TAG.to_string(),
            attributes: self.envelope.clone(),
        };
        writer
            .write_event(Event::Empty(envelope.to_start()))
            .map_err(write_err)?;

        writer
            .write_event(Event::Start(BytesStart::new(CONTAINER_TAG)))
            .map_err(write_err)?;
        for entry in self.groups.iter().flat_map(|group| &group.entries) {
            writer
                .write_event(Event::Empty(entry.to_start()))
                .map_err(write_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(CONTAINER_TAG)))
            .map_err(write_err)?;
        writer
            .write_event(Event::End(BytesEnd::new(ROOT_TAG)))
            .map_err(write_err)?;

        let mut xml = String::from_utf8(writer.into_inner())
            .map_err(|e| SinkError::Write(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }
}

/// Portal-facing name and description of one publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBlock {
    pub publication_id: String,
    pub name: String,
    pub description: String,
}

impl DescriptorBlock {
    /// Build the block for a published archive.
    ///
    /// Free text is sanitized here, so the group carries attribute-safe
    /// values.
    pub fn new(
        publication_id: &str,
        identifier: &str,
        product: &str,
        title: &str,
        md5: &str,
        dependencies: &[String],
    ) -> Self {
        let name = sanitize_markup(&format!("PEPID : {identifier} Product : {product}"));
        let mut description = format!("{} MD5: {}", sanitize_markup(title), md5);
        if !dependencies.is_empty() {
            description.push_str(" Dependent patches: ");
            description.push_str(&sanitize_markup(&dependencies.join(", ")));
        }
        Self {
            publication_id: publication_id.to_string(),
            name,
            description,
        }
    }

    pub fn into_group(self, settings: &DescriptorSettings) -> DescriptorGroup {
        let code = escape(&self.publication_id).into_owned();
        let value = |list: &str, description: &str| DescriptorEntry {
            tag: VALUE_TAG.to_string(),
            attributes: vec![
                raw_attr(KEY_ATTRIBUTE, &code),
                attr("LIST_NAME", list),
                attr("IS_ACTIVE", &settings.is_active),
                attr("DISPLAY_SEQUENCE", &settings.display_sequence),
                attr("BUILD_NUMBER", &settings.list_build_number),
                raw_attr("DESCRIPTION", description),
            ],
        };
        let localization = |list: &str, description: &str| DescriptorEntry {
            tag: LOCALIZATION_TAG.to_string(),
            attributes: vec![
                raw_attr(KEY_ATTRIBUTE, &code),
                raw_attr("LOCALIZED_DESCRIPTION", description),
                attr("LIST_NAME", list),
                attr("IS_ACTIVE", &settings.is_active),
                attr("DISPLAY_SEQUENCE", &settings.display_sequence),
                attr("BUILD_NUMBER", &settings.list_build_number),
                attr("LANGUAGE_CODE", &settings.language_code),
                attr("CONTEXT_CODE", &settings.context_code),
            ],
        };

        DescriptorGroup {
            code: self.publication_id.clone(),
            entries: vec![
                value(NAME_LIST, &self.name),
                value(DESCRIPTION_LIST, &self.description),
                localization(NAME_LIST, &self.name),
                localization(DESCRIPTION_LIST, &self.description),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorSink {
    path: PathBuf,
    settings: DescriptorSettings,
}

impl DescriptorSink {
    pub fn new(path: impl Into<PathBuf>, settings: DescriptorSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the descriptor from disk; a missing file is a fresh document.
    pub fn load(&self) -> Result<DescriptorDocument, SinkError> {
        match std::fs::read_to_string(&self.path) {
            Ok(xml) => DescriptorDocument::parse(&xml, &self.settings),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(DescriptorDocument::new(&self.settings))
            },
            Err(e) => Err(SinkError::io(&self.path, e)),
        }
    }

    pub fn upsert(&self, block: DescriptorBlock) -> Result<UpsertAction, SinkError> {
        if block.name.chars().count() > MAX_NAME_LEN {
            warn!(
                publication_id = %block.publication_id,
                length = block.name.chars().count(),
                limit = MAX_NAME_LEN,
                "Descriptor name exceeds portal limit"
            );
        }
        if block.description.chars().count() > MAX_DESCRIPTION_LEN {
            warn!(
                publication_id = %block.publication_id,
                length = block.description.chars().count(),
                limit = MAX_DESCRIPTION_LEN,
                "Descriptor description exceeds portal limit"
            );
        }

        let publication_id = block.publication_id.clone();
        let mut document = self.load()?;
        let action = document.upsert(block.into_group(&self.settings));
        replace_file(&self.path, document.to_xml()?.as_bytes())?;

        info!(
            publication_id = %publication_id,
            action = ?action,
            path = %self.path.display(),
            "Descriptor block written"
        );
        Ok(action)
    }
}
