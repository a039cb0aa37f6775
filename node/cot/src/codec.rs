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

use crate::xml::XmlElement;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use std::io;

/// The opening of an XML declaration.
const DECL_START: &[u8] = b"<?xml ";
/// The close of an XML declaration.
const DECL_END: &[u8] = b"?>";

/// Strips `<?xml ...?>` declarations from a byte stream.
///
/// Each client sends every event as a complete XML document, usually with its
/// own declaration, and TCP may split the stream at any byte. A declaration
/// may therefore span feeds; a retained tail holds the bytes that could still
/// turn out to be the start of one.
#[derive(Debug, Default)]
pub struct DeclStrip {
    /// Bytes held back until the next feed resolves them.
    tail: Vec<u8>,
    /// Whether the cursor is currently inside a declaration.
    in_decl: bool,
}

impl DeclStrip {
    /// Initializes a new declaration stripper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk of the stream and returns the bytes that lie outside
    /// any declaration.
    pub fn feed(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.tail);
        buf.extend_from_slice(data);

        let mut out = Vec::with_capacity(buf.len());
        let mut i = 0;

        while i < buf.len() {
            if !self.in_decl {
                match find(&buf[i..], DECL_START) {
                    Some(offset) => {
                        // Found a declaration: emit up to it, then skip inside.
                        out.extend_from_slice(&buf[i..i + offset]);
                        i += offset + DECL_START.len();
                        self.in_decl = true;
                    }
                    None => {
                        // No declaration. A trailing '<' could still be the
                        // start of one; hold it (and what follows) back.
                        match rfind(&buf[i..], b'<') {
                            Some(offset) if buf.len() - (i + offset) < DECL_START.len() => {
                                out.extend_from_slice(&buf[i..i + offset]);
                                self.tail = buf[i + offset..].to_vec();
                            }
                            _ => out.extend_from_slice(&buf[i..]),
                        }
                        return out;
                    }
                }
            } else {
                match find(&buf[i..], DECL_END) {
                    Some(offset) => {
                        i += offset + DECL_END.len();
                        self.in_decl = false;
                    }
                    None => {
                        // The final byte may be the '?' of a split "?>".
                        self.tail = buf[buf.len() - 1..].to_vec();
                        return out;
                    }
                }
            }
        }

        out
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|&byte| byte == needle)
}

/// The tag scanner's position in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    /// Outside any tag.
    Text,
    /// Immediately after a `<`.
    TagOpen,
    /// Inside an open tag, tracking quoting and a possible trailing `/`.
    OpenTag { quote: Option<u8>, prev_slash: bool },
    /// Inside a `</...>` tag.
    CloseTag,
    /// Inside a processing instruction, tracking a possible trailing `?`.
    Pi { prev_question: bool },
    /// Immediately after `<!`.
    Bang,
    /// After `<!-`.
    BangDash,
    /// Inside a `<!...>` construct that is neither a comment nor CDATA.
    BangOther,
    /// Inside a comment, counting trailing dashes toward `-->`.
    Comment { dashes: u8 },
    /// Inside a CDATA section, counting trailing brackets toward `]]>`.
    CData { brackets: u8 },
}

/// Decodes a CoT byte stream into complete `<event>` elements.
///
/// The stream is a concatenation of XML documents. After declarations are
/// stripped, a quote- and comment-aware depth scan locates each complete
/// top-level element, which is then parsed whole. Content between documents
/// is discarded. A structurally broken stream (a stray close tag, an
/// unparsable document) is unrecoverable and fails the decoder, which
/// terminates the owning session.
#[derive(Debug)]
pub struct CotDecoder {
    strip: DeclStrip,
    /// Stripped bytes not yet consumed by the scanner.
    buf: Vec<u8>,
    /// The scan position within `buf`.
    pos: usize,
    state: ScanState,
    /// The nesting depth of open elements.
    depth: usize,
    /// The position of the `<` opening the current tag.
    tag_start: usize,
    /// The position of the `<` opening the current top-level element.
    element_start: Option<usize>,
}

impl Default for CotDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CotDecoder {
    /// Initializes a new stream decoder.
    pub fn new() -> Self {
        Self {
            strip: DeclStrip::new(),
            buf: Vec::new(),
            pos: 0,
            state: ScanState::Text,
            depth: 0,
            tag_start: 0,
            element_start: None,
        }
    }

    /// Scans forward for the next complete top-level element and drains it
    /// (plus anything before it) out of the buffer.
    fn scan(&mut self) -> Result<Option<Vec<u8>>, io::Error> {
        while self.pos < self.buf.len() {
            let byte = self.buf[self.pos];
            match self.state {
                ScanState::Text => {
                    if byte == b'<' {
                        self.tag_start = self.pos;
                        self.state = ScanState::TagOpen;
                    }
                }
                ScanState::TagOpen => match byte {
                    b'/' => self.state = ScanState::CloseTag,
                    b'?' => self.state = ScanState::Pi { prev_question: false },
                    b'!' => self.state = ScanState::Bang,
                    _ => {
                        if self.depth == 0 {
                            self.element_start = Some(self.tag_start);
                        }
                        self.state = ScanState::OpenTag { quote: None, prev_slash: false };
                    }
                },
                ScanState::OpenTag { quote: Some(open), .. } => {
                    if byte == open {
                        self.state = ScanState::OpenTag { quote: None, prev_slash: false };
                    }
                }
                ScanState::OpenTag { quote: None, prev_slash } => match byte {
                    b'"' | b'\'' => {
                        self.state = ScanState::OpenTag { quote: Some(byte), prev_slash: false }
                    }
                    b'/' => self.state = ScanState::OpenTag { quote: None, prev_slash: true },
                    b'>' => {
                        self.state = ScanState::Text;
                        match prev_slash {
                            // Self-closing: the depth is unchanged.
                            true if self.depth == 0 => return Ok(Some(self.take_element())),
                            true => (),
                            false => self.depth += 1,
                        }
                    }
                    _ => {
                        if prev_slash {
                            self.state = ScanState::OpenTag { quote: None, prev_slash: false };
                        }
                    }
                },
                ScanState::CloseTag => {
                    if byte == b'>' {
                        if self.depth == 0 {
                            return Err(syntax_error("close tag without an open element"));
                        }
                        self.depth -= 1;
                        self.state = ScanState::Text;
                        if self.depth == 0 {
                            return Ok(Some(self.take_element()));
                        }
                    }
                }
                ScanState::Pi { prev_question } => match byte {
                    b'>' if prev_question => self.state = ScanState::Text,
                    b'?' => self.state = ScanState::Pi { prev_question: true },
                    _ => self.state = ScanState::Pi { prev_question: false },
                },
                ScanState::Bang => match byte {
                    b'-' => self.state = ScanState::BangDash,
                    b'[' => self.state = ScanState::CData { brackets: 0 },
                    b'>' => self.state = ScanState::Text,
                    _ => self.state = ScanState::BangOther,
                },
                ScanState::BangDash => match byte {
                    b'-' => self.state = ScanState::Comment { dashes: 0 },
                    b'>' => self.state = ScanState::Text,
                    _ => self.state = ScanState::BangOther,
                },
                ScanState::BangOther => {
                    if byte == b'>' {
                        self.state = ScanState::Text;
                    }
                }
                ScanState::Comment { dashes } => match byte {
                    b'-' => self.state = ScanState::Comment { dashes: (dashes + 1).min(2) },
                    b'>' if dashes >= 2 => self.state = ScanState::Text,
                    _ => self.state = ScanState::Comment { dashes: 0 },
                },
                ScanState::CData { brackets } => match byte {
                    b']' => self.state = ScanState::CData { brackets: (brackets + 1).min(2) },
                    b'>' if brackets >= 2 => self.state = ScanState::Text,
                    _ => self.state = ScanState::CData { brackets: 0 },
                },
            }
            self.pos += 1;
        }

        // Nothing complete; shed the dead bytes in front of the live region.
        let keep_from = match self.element_start {
            Some(start) => start,
            None => match self.state {
                ScanState::Text => self.pos,
                _ => self.tag_start,
            },
        };
        if keep_from > 0 {
            self.buf.drain(..keep_from);
            self.pos -= keep_from;
            self.tag_start = self.tag_start.saturating_sub(keep_from);
            if let Some(start) = &mut self.element_start {
                *start -= keep_from;
            }
        }
        Ok(None)
    }

    /// Drains the completed element ending at `self.pos` out of the buffer.
    fn take_element(&mut self) -> Vec<u8> {
        let start = self.element_start.take().unwrap_or(self.tag_start);
        let element: Vec<u8> = self.buf[start..=self.pos].to_vec();
        self.buf.drain(..=self.pos);
        self.pos = 0;
        self.tag_start = 0;
        element
    }
}

impl Decoder for CotDecoder {
    type Error = io::Error;
    type Item = XmlElement;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split_to(src.len());
            let stripped = self.strip.feed(&chunk);
            self.buf.extend_from_slice(&stripped);
        }

        loop {
            let Some(bytes) = self.scan()? else {
                return Ok(None);
            };
            let element = XmlElement::from_bytes(&bytes)
                .map_err(|error| syntax_error(&error.to_string()))?;
            match element.name() {
                "event" => return Ok(Some(element)),
                other => trace!("Discarding a top-level <{other}> element"),
            }
        }
    }
}

fn syntax_error(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("XML Syntax Error: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECL: &[u8] = b"<?xml version='1.0' encoding='utf-8'?>";
    const EVENT: &[u8] = br#"<event data="stuff here" />"#;

    fn drain(decoder: &mut CotDecoder, src: &mut BytesMut) -> Vec<XmlElement> {
        let mut out = Vec::new();
        while let Some(element) = decoder.decode(src).unwrap() {
            out.push(element);
        }
        out
    }

    #[test]
    fn strips_a_whole_declaration() {
        let mut strip = DeclStrip::new();
        assert!(strip.feed(DECL).is_empty());
        assert_eq!(strip.feed(EVENT), EVENT);
    }

    #[test]
    fn strips_a_declaration_split_mid_start_tag() {
        let mut strip = DeclStrip::new();
        assert!(strip.feed(b"<?xm").is_empty());
        assert!(strip.feed(b"l version='1.0' encoding='utf-8'?>").is_empty());
        assert_eq!(strip.feed(EVENT), EVENT);
    }

    #[test]
    fn strips_a_declaration_split_mid_end_tag() {
        let mut strip = DeclStrip::new();
        assert!(strip.feed(b"<?xml version='1.0' encoding='utf-8'?").is_empty());
        assert!(strip.feed(b">").is_empty());
        assert_eq!(strip.feed(EVENT), EVENT);
    }

    #[test]
    fn strips_a_declaration_split_after_an_event() {
        let mut strip = DeclStrip::new();
        assert!(strip.feed(DECL).is_empty());
        let mut out = strip.feed(b"<event data=\"stuff here\" /><");
        out.extend(strip.feed(b"?xml version='1.0' encoding='utf-8'?>"));
        out.extend(strip.feed(EVENT));
        assert_eq!(out, [EVENT, EVENT].concat());
    }

    #[test]
    fn passes_split_event_data_through() {
        let mut strip = DeclStrip::new();
        assert!(strip.feed(DECL).is_empty());
        let mut out = strip.feed(br#"<event data="stuff"#);
        out.extend(strip.feed(br#" here" />"#));
        assert_eq!(out, EVENT);
    }

    #[test]
    fn decodes_a_declared_event() {
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&[DECL, EVENT].concat()[..]);
        let events = drain(&mut decoder, &mut src);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr("data"), Some("stuff here"));
    }

    #[test]
    fn decodes_nested_and_consecutive_documents() {
        let stream = br#"<?xml version="1.0"?><event uid="a"><point lat="1"/><detail><remarks>x</remarks></detail></event><?xml version="1.0"?><event uid="b"/>"#;
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&stream[..]);
        let events = drain(&mut decoder, &mut src);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].attr("uid"), Some("a"));
        assert_eq!(events[1].attr("uid"), Some("b"));
    }

    #[test]
    fn yields_the_same_events_for_every_two_way_split() {
        let stream: Vec<u8> = [
            &b"<?xml version='1.0' encoding='utf-8'?>\n"[..],
            br#"<event uid="a"><point lat="1.0"/><detail><remarks>hi &amp; bye</remarks></detail></event>"#,
            b"\n",
            &b"<?xml version='1.0' encoding='utf-8'?>"[..],
            br#"<event uid="b"/>"#,
        ]
        .concat();

        for split in 0..=stream.len() {
            let mut decoder = CotDecoder::new();
            let mut events = Vec::new();

            let mut src = BytesMut::from(&stream[..split]);
            events.extend(drain(&mut decoder, &mut src));
            let mut src = BytesMut::from(&stream[split..]);
            events.extend(drain(&mut decoder, &mut src));

            assert_eq!(events.len(), 2, "split at byte {split}");
            assert_eq!(events[0].attr("uid"), Some("a"), "split at byte {split}");
            assert_eq!(events[1].attr("uid"), Some("b"), "split at byte {split}");
        }
    }

    #[test]
    fn yields_the_same_events_fed_byte_by_byte() {
        let stream: Vec<u8> =
            [DECL, EVENT, DECL, br#"<event uid="z"><point lat="0"/></event>"#].concat();

        let mut decoder = CotDecoder::new();
        let mut events = Vec::new();
        for byte in stream {
            let mut src = BytesMut::from(&[byte][..]);
            events.extend(drain(&mut decoder, &mut src));
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].attr("uid"), Some("z"));
    }

    #[test]
    fn tolerates_quoted_angle_brackets_and_comments() {
        let stream = br#"<event uid="a>b"><!-- a > comment --><detail><remarks>1 &gt; 0</remarks></detail></event>"#;
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&stream[..]);
        let events = drain(&mut decoder, &mut src);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr("uid"), Some("a>b"));
    }

    #[test]
    fn discards_non_event_documents() {
        let stream = br#"<auth user="x"/><event uid="a"/>"#;
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&stream[..]);
        let events = drain(&mut decoder, &mut src);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr("uid"), Some("a"));
    }

    #[test]
    fn a_stray_close_tag_is_fatal() {
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&b"</event>"[..]);
        let error = decoder.decode(&mut src).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn an_unparsable_document_is_fatal() {
        // Balanced to the depth scanner, rejected by the parser.
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&br#"<event uid="a"><point></wrong></event>"#[..]);
        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn discards_text_between_documents() {
        let mut decoder = CotDecoder::new();
        let mut src = BytesMut::from(&b"\n  \n<event uid=\"a\"/>junk<event uid=\"b\"/>"[..]);
        let events = drain(&mut decoder, &mut src);
        assert_eq!(events.len(), 2);
    }
}
