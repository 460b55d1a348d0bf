//! src/services/xml_extractor.rs
//!
//! Pulls the handful of tags the viewer cares about out of an S3-style
//! listing body. This is not a general XML binding: only `MaxKeys`,
//! `NextMarker`, `IsTruncated` and the children of every `Contents` block are
//! read, and everything else is skipped.
//!
//! Matching rules:
//! - scalar tags: first occurrence anywhere wins, local name compared
//!   case-insensitively, value trimmed
//! - `Contents`: every block is collected; each immediate child with an
//!   open/close pair becomes `local_name -> trimmed text`
//! - namespace prefixes are stripped (`s3:Key` -> `Key`)

use quick_xml::{Reader, escape, events::Event};
use std::{borrow::Cow, collections::BTreeMap};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
#[error("malformed listing at byte {position}: {message}")]
pub struct ExtractError {
    pub position: u64,
    pub message: String,
}

/// Everything extracted from one listing body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub max_keys: Option<String>,
    pub next_marker: Option<String>,
    pub is_truncated: bool,
    /// `IsTruncated` said true but no marker was given to continue from.
    pub has_more_pages_indicated: bool,
    /// Distinct child tag names across all blocks, in first-seen order.
    pub child_tags: Vec<String>,
    pub contents: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scalar {
    MaxKeys,
    NextMarker,
    IsTruncated,
}

impl Scalar {
    fn from_local_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("MaxKeys") {
            Some(Scalar::MaxKeys)
        } else if name.eq_ignore_ascii_case("NextMarker") {
            Some(Scalar::NextMarker)
        } else if name.eq_ignore_ascii_case("IsTruncated") {
            Some(Scalar::IsTruncated)
        } else {
            None
        }
    }
}

/// Text buffer for an element being captured, closed when the reader leaves
/// `depth`.
struct Capture {
    depth: usize,
    text: String,
    nested: bool,
}

impl Capture {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            text: String::new(),
            nested: false,
        }
    }

    fn finish(self) -> String {
        if self.nested {
            self.text.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            self.text.trim().to_string()
        }
    }
}

struct Block {
    depth: usize,
    fields: BTreeMap<String, String>,
    child: Option<(String, Capture)>,
}

#[derive(Default)]
struct Scalars {
    max_keys: Option<String>,
    next_marker: Option<String>,
    is_truncated: Option<String>,
}

impl Scalars {
    fn is_set(&self, which: Scalar) -> bool {
        match which {
            Scalar::MaxKeys => self.max_keys.is_some(),
            Scalar::NextMarker => self.next_marker.is_some(),
            Scalar::IsTruncated => self.is_truncated.is_some(),
        }
    }

    fn set(&mut self, which: Scalar, value: String) {
        let slot = match which {
            Scalar::MaxKeys => &mut self.max_keys,
            Scalar::NextMarker => &mut self.next_marker,
            Scalar::IsTruncated => &mut self.is_truncated,
        };
        slot.get_or_insert(value);
    }
}

/// Extract listing metadata and `Contents` entries from `xml`.
pub fn extract(xml: &str) -> Result<Extraction, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.check_end_names = false;
    // A bare `&` in a key (`R&D.txt`) arrives as text instead of failing.
    config.allow_dangling_amp = true;

    let mut depth: usize = 0;
    let mut scalars = Scalars::default();
    let mut scalar: Option<(Scalar, Capture)> = None;
    let mut block: Option<Block> = None;
    let mut child_tags: Vec<String> = Vec::new();
    let mut contents: Vec<BTreeMap<String, String>> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|err| ExtractError {
            position: reader.error_position(),
            message: err.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                depth += 1;
                let local = e.local_name();
                let name = String::from_utf8_lossy(local.as_ref()).into_owned();

                if let Some(open) = block.as_mut() {
                    match open.child.as_mut() {
                        Some((_, capture)) => {
                            capture.nested = true;
                            if !capture.text.is_empty() && !capture.text.ends_with(' ') {
                                capture.text.push(' ');
                            }
                        }
                        None if depth == open.depth + 1 => {
                            open.child = Some((name.clone(), Capture::new(depth)));
                        }
                        None => {}
                    }
                } else if name.eq_ignore_ascii_case("Contents") {
                    block = Some(Block {
                        depth,
                        fields: BTreeMap::new(),
                        child: None,
                    });
                }

                match scalar.as_mut() {
                    Some((_, capture)) => capture.nested = true,
                    None => {
                        if let Some(which) = Scalar::from_local_name(&name) {
                            if !scalars.is_set(which) {
                                scalar = Some((which, Capture::new(depth)));
                            }
                        }
                    }
                }
            }
            Event::End(_) => {
                if scalar.as_ref().is_some_and(|(_, c)| c.depth == depth) {
                    if let Some((which, capture)) = scalar.take() {
                        scalars.set(which, capture.finish());
                    }
                }

                let mut closed = false;
                if let Some(open) = block.as_mut() {
                    if open.child.as_ref().is_some_and(|(_, c)| c.depth == depth) {
                        if let Some((name, capture)) = open.child.take() {
                            if !child_tags.contains(&name) {
                                child_tags.push(name.clone());
                            }
                            open.fields.insert(name, capture.finish());
                        }
                    } else if open.depth == depth {
                        closed = true;
                    }
                }
                if closed {
                    if let Some(done) = block.take() {
                        if !done.fields.is_empty() {
                            contents.push(done.fields);
                        }
                    }
                }

                depth = depth.saturating_sub(1);
            }
            Event::Text(e) => {
                let raw = String::from_utf8_lossy(e.as_ref());
                let text = escape::unescape(&raw).unwrap_or(Cow::Borrowed(raw.as_ref()));
                append_text(&mut scalar, &mut block, &text);
            }
            Event::CData(e) => {
                let text = String::from_utf8_lossy(e.as_ref());
                append_text(&mut scalar, &mut block, &text);
            }
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(e.as_ref());
                let text = resolve_reference(&name);
                append_text(&mut scalar, &mut block, &text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let next_marker = scalars.next_marker.filter(|marker| !marker.is_empty());
    let is_truncated = scalars
        .is_truncated
        .as_deref()
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let has_more_pages_indicated = is_truncated && next_marker.is_none();

    trace!(
        contents = contents.len(),
        ?child_tags,
        is_truncated,
        has_more_pages_indicated,
        "extracted listing"
    );

    Ok(Extraction {
        max_keys: scalars.max_keys,
        next_marker,
        is_truncated,
        has_more_pages_indicated,
        child_tags,
        contents,
    })
}

fn append_text(scalar: &mut Option<(Scalar, Capture)>, block: &mut Option<Block>, text: &str) {
    if let Some((_, capture)) = scalar.as_mut() {
        capture.text.push_str(text);
    }
    if let Some((_, capture)) = block.as_mut().and_then(|b| b.child.as_mut()) {
        capture.text.push_str(text);
    }
}

/// Resolve `&name;` given the text between `&` and `;`. Unknown entities are
/// kept as written.
fn resolve_reference(name: &str) -> Cow<'static, str> {
    if let Some(code) = name.strip_prefix('#') {
        let parsed = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        if let Some(ch) = parsed.and_then(char::from_u32) {
            return Cow::Owned(ch.to_string());
        }
    } else if let Some(resolved) = escape::resolve_predefined_entity(name) {
        return Cow::Borrowed(resolved);
    }
    Cow::Owned(format!("&{};", name))
}
