// Copyright 2026 The takyr Developers
// This file is part of the takyr library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event as XmlEvent},
    Reader,
    Writer,
};

use std::{collections::BTreeSet, fmt, str};

/// An error raised while parsing or writing an XML document.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("xml syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("document is not valid utf-8")]
    Utf8(#[from] str::Utf8Error),
    #[error("document contains no root element")]
    NoRootElement,
    #[error("document contains trailing content after the root element")]
    TrailingContent,
    #[error("document contains a doctype declaration")]
    DocType,
}

/// An owned XML element tree.
///
/// This is the common currency between the stream decoder, the CoT data
/// model, and detail payloads that must round-trip byte-for-byte in meaning.
/// Attribute order is preserved, so writing a parsed element reproduces the
/// original document modulo quoting normalization. quick-xml performs no
/// external entity resolution, so hostile documents cannot expand entities.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlElement {
    /// The tag name.
    name: String,
    /// The attributes, in document order.
    attributes: Vec<(String, String)>,
    /// The child elements, in document order.
    children: Vec<XmlElement>,
    /// The (unescaped) character data directly inside this element, if any.
    text: Option<String>,
}

impl XmlElement {
    /// Initializes a new element with the given tag name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), children: Vec::new(), text: None }
    }

    /// Parses a complete, single-rooted XML document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XmlError> {
        let mut reader = Reader::from_reader(bytes);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event()? {
                XmlEvent::Start(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(XmlError::TrailingContent);
                    }
                    stack.push(Self::from_start(&start)?);
                }
                XmlEvent::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None if root.is_none() => root = Some(element),
                        None => return Err(XmlError::TrailingContent),
                    }
                }
                XmlEvent::End(_) => {
                    // Mismatched close tags are rejected by the reader itself.
                    let element = stack.pop().ok_or(XmlError::NoRootElement)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }
                XmlEvent::Text(text) => {
                    let unescaped = text.unescape()?;
                    if let Some(element) = stack.last_mut() {
                        element.append_text(&unescaped);
                    }
                }
                XmlEvent::CData(data) => {
                    let raw = str::from_utf8(data.as_ref())?.to_string();
                    if let Some(element) = stack.last_mut() {
                        element.append_text(&raw);
                    }
                }
                XmlEvent::DocType(_) => return Err(XmlError::DocType),
                XmlEvent::Decl(_) | XmlEvent::PI(_) | XmlEvent::Comment(_) => (),
                XmlEvent::Eof => break,
            }
        }

        root.ok_or(XmlError::NoRootElement)
    }

    /// Writes the element as an XML document fragment, with no declaration.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new(Vec::new());
        // Writing to a Vec cannot fail.
        let _ = self.write_into(&mut writer);
        writer.into_inner()
    }

    /// Returns the tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of the named attribute, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Sets the named attribute, appending it if absent.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let (name, value) = (name.into(), value.into());
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    /// Returns the character data directly inside this element, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Sets the character data of this element.
    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(text.into());
        self
    }

    /// Returns the child elements, in document order.
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    /// Appends a child element.
    pub fn push_child(&mut self, child: XmlElement) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Returns the first child with the given tag name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Returns every child with the given tag name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Returns the set of child tag names, used to discriminate detail payloads.
    pub fn child_names(&self) -> BTreeSet<&str> {
        self.children.iter().map(|child| child.name.as_str()).collect()
    }

    /// Converts a start tag into an element with its attributes unescaped.
    fn from_start(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let mut element = Self::new(str::from_utf8(start.name().as_ref())?.to_string());
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = str::from_utf8(attribute.key.as_ref())?.to_string();
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    /// Accumulates character data, dropping indentation-only runs.
    fn append_text(&mut self, text: &str) {
        if text.trim().is_empty() && self.text.is_none() {
            return;
        }
        match &mut self.text {
            Some(existing) => existing.push_str(text),
            None => self.text = Some(text.to_string()),
        }
    }

    /// Writes this element and its subtree into the given writer.
    fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), quick_xml::Error> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            writer.write_event(XmlEvent::Empty(start))?;
            return Ok(());
        }

        writer.write_event(XmlEvent::Start(start))?;
        if let Some(text) = &self.text {
            writer.write_event(XmlEvent::Text(BytesText::new(text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(XmlEvent::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}
