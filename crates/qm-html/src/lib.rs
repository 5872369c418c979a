//! HTML tokenization and tree building into a [`qm_dom::Document`].
//!
//! This is a forgiving fixture parser, not a conforming HTML5 tree
//! builder: unknown end tags are ignored, unclosed elements are closed at the
//! end of input, and whitespace-only text between tags is dropped.

use qm_dom::Document;
use qm_dom::NodeId;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Parses raw HTML into a DOM document.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    /// Parses a whole document. Content without an `<html>` root is wrapped
    /// in `html > body`.
    pub fn parse(&self, input: &str) -> Document {
        let mut doc = Document::new();
        let root = doc.root();
        let top_level = build_nodes(&mut doc, root, input);

        let has_html_root = top_level.iter().any(|node| {
            doc.element(*node)
                .is_some_and(|element| element.tag() == "html")
        });
        if has_html_root {
            for node in top_level {
                if doc.element(node).is_none_or(|element| element.tag() != "html") {
                    doc.remove(node);
                }
            }
            return doc;
        }

        let html = doc.create_element("html");
        let body = doc.create_element("body");
        if doc.append_child(root, html).is_err() || doc.append_child(html, body).is_err() {
            return doc;
        }
        for node in top_level {
            // Moving a freshly parsed node under a fresh body cannot cycle.
            let _ = doc.append_child(body, node);
        }
        doc
    }

    /// Parses `input` and appends the resulting nodes under `parent`.
    /// Returns the top-level nodes that were inserted.
    pub fn parse_fragment_into(
        &self,
        doc: &mut Document,
        parent: NodeId,
        input: &str,
    ) -> Vec<NodeId> {
        build_nodes(doc, parent, input)
    }
}

fn build_nodes(doc: &mut Document, parent: NodeId, input: &str) -> Vec<NodeId> {
    let bytes = input.as_bytes();
    let mut idx = 0_usize;
    let mut stack: Vec<(String, NodeId)> = Vec::new();
    let mut top_level = Vec::new();

    while idx < bytes.len() {
        let current_parent = stack.last().map(|(_, node)| *node).unwrap_or(parent);

        if bytes[idx] != b'<' {
            let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
            let text = decode_entities(&input[idx..next]);
            if !text.trim().is_empty() {
                let node = doc.create_text(&text);
                attach(doc, current_parent, node, stack.is_empty(), &mut top_level);
            }
            idx = next;
            continue;
        }

        if starts_with(bytes, idx, b"<!--") {
            idx = skip_comment(bytes, idx);
            continue;
        }

        if starts_with(bytes, idx, b"<!") {
            idx = skip_to_gt(bytes, idx.saturating_add(2));
            continue;
        }

        if starts_with(bytes, idx, b"<?") {
            idx = skip_processing_instruction(bytes, idx);
            continue;
        }

        let Some((tag, next_idx)) = parse_tag(input, idx) else {
            let node = doc.create_text("<");
            attach(doc, current_parent, node, stack.is_empty(), &mut top_level);
            idx = idx.saturating_add(1);
            continue;
        };

        if tag.is_end {
            if let Some(position) = stack.iter().rposition(|(name, _)| *name == tag.name) {
                stack.truncate(position);
            }
            idx = next_idx;
            continue;
        }

        let element = doc.create_element(&tag.name);
        for (name, value) in &tag.attributes {
            doc.set_attribute(element, name, value);
        }
        attach(doc, current_parent, element, stack.is_empty(), &mut top_level);

        if matches!(tag.name.as_str(), "script" | "style" | "title" | "textarea") {
            let (raw, after_raw) = read_raw_text_until_end_tag(input, next_idx, &tag.name);
            if tag.name == "title" || tag.name == "textarea" {
                let text = decode_entities(raw);
                if !text.is_empty() {
                    let node = doc.create_text(&text);
                    let _ = doc.append_child(element, node);
                }
            }
            idx = after_raw;
            continue;
        }

        if !tag.self_closing && !VOID_ELEMENTS.contains(&tag.name.as_str()) {
            stack.push((tag.name, element));
        }
        idx = next_idx;
    }

    top_level
}

fn attach(
    doc: &mut Document,
    parent: NodeId,
    node: NodeId,
    is_top_level: bool,
    top_level: &mut Vec<NodeId>,
) {
    if doc.append_child(parent, node).is_ok() && is_top_level {
        top_level.push(node);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    attributes: Vec<(String, String)>,
    is_end: bool,
    self_closing: bool,
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }

    if idx == name_start {
        return None;
    }

    let name = input[name_start..idx].to_ascii_lowercase();
    let mut attributes = Vec::new();

    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => {
                let self_closing = idx > start && bytes[idx - 1] == b'/';
                return Some((
                    ParsedTag {
                        name,
                        attributes,
                        is_end,
                        self_closing,
                    },
                    idx.saturating_add(1),
                ));
            }
            Some(b'/') => {
                idx = idx.saturating_add(1);
            }
            Some(_) => {
                let (attribute, next) = parse_attribute(input, idx)?;
                if let Some(attribute) = attribute {
                    attributes.push(attribute);
                }
                idx = next;
            }
        }
    }
}

fn parse_attribute(input: &str, start: usize) -> Option<(Option<(String, String)>, usize)> {
    let bytes = input.as_bytes();
    let mut idx = start;
    while idx < bytes.len() && !is_attribute_name_terminator(bytes[idx]) {
        idx = idx.saturating_add(1);
    }

    if idx == start {
        // Stray byte such as a lone quote; skip it.
        return Some((None, start.saturating_add(1)));
    }

    let name = input[start..idx].to_ascii_lowercase();
    idx = skip_spaces(bytes, idx);
    if bytes.get(idx).copied() != Some(b'=') {
        return Some((Some((name, String::new())), idx));
    }

    idx = skip_spaces(bytes, idx.saturating_add(1));
    match bytes.get(idx).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            let value_start = idx.saturating_add(1);
            let value_end = find_byte(bytes, value_start, quote)?;
            Some((
                Some((name, decode_entities(&input[value_start..value_end]))),
                value_end.saturating_add(1),
            ))
        }
        Some(_) => {
            let value_start = idx;
            while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                idx = idx.saturating_add(1);
            }
            Some((
                Some((name, decode_entities(&input[value_start..idx]))),
                idx,
            ))
        }
        None => None,
    }
}

fn read_raw_text_until_end_tag<'a>(
    input: &'a str,
    start: usize,
    tag_name: &str,
) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
            && tag_name_boundary(bytes, idx.saturating_add(2 + tag_bytes.len()))
        {
            if let Some((_, end_idx)) = parse_tag(input, idx) {
                return (&input[start..idx], end_idx);
            }
        }

        idx = idx.saturating_add(1);
    }

    (&input[start..], bytes.len())
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';').filter(|semi| *semi <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let decoded = match &tail[1..semi] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some('\u{a0}'),
            entity => entity
                .strip_prefix('#')
                .and_then(|code| match code.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => code.parse::<u32>().ok(),
                })
                .and_then(char::from_u32),
        };

        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    find_subslice(bytes, start.saturating_add(4), b"-->")
        .map(|end| end.saturating_add(3))
        .unwrap_or(bytes.len())
}

fn skip_processing_instruction(bytes: &[u8], start: usize) -> usize {
    if let Some(end) = find_subslice(bytes, start.saturating_add(2), b"?>") {
        return end.saturating_add(2);
    }

    skip_to_gt(bytes, start.saturating_add(2))
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }

    bytes.len()
}

fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attribute_name_terminator(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b'=' | b'>' | b'/' | b'"' | b'\'')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }

    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }

    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}
