//! Inline style declarations and the selector language used to find surfaces.

pub mod selector;

pub use selector::AttrOperator;
pub use selector::Combinator;
pub use selector::ComplexSelector;
pub use selector::CompoundSelector;
pub use selector::SelectorElement;
pub use selector::SelectorError;
pub use selector::SelectorList;
pub use selector::SimpleSelector;

/// One `name: value` pair of a style attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

/// Ordered inline style of one element, as held in its `style` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineStyle {
    declarations: Vec<Declaration>,
}

impl InlineStyle {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a style attribute. Malformed declarations are dropped and later
    /// duplicates replace earlier ones.
    pub fn parse(input: &str) -> Self {
        let sanitized = strip_comments_preserve_strings(input);
        let mut style = Self::empty();

        for declaration in split_top_level(&sanitized, ';') {
            let trimmed = declaration.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Some(colon_idx) = find_top_level_colon(trimmed) else {
                continue;
            };

            let name = normalize_ws(trimmed[..colon_idx].trim()).to_ascii_lowercase();
            let mut value = normalize_value(trimmed[colon_idx + 1..].trim());
            let important = strip_important(&mut value);
            if name.is_empty() || value.is_empty() {
                continue;
            }

            style.upsert(Declaration {
                name,
                value,
                important,
            });
        }

        style
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.declarations
            .iter()
            .find(|declaration| declaration.name.eq_ignore_ascii_case(name))
            .map(|declaration| declaration.value.as_str())
    }

    /// Sets `name` to `value`. Returns false when the value was already set.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let value = normalize_value(value);
        if value.is_empty() {
            return self.remove(name).is_some();
        }

        if self.get(name) == Some(value.as_str()) {
            return false;
        }

        self.upsert(Declaration {
            name: name.to_ascii_lowercase(),
            value,
            important: false,
        });
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .declarations
            .iter()
            .position(|declaration| declaration.name.eq_ignore_ascii_case(name))?;
        Some(self.declarations.remove(index).value)
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn to_css_text(&self) -> String {
        self.declarations
            .iter()
            .map(|declaration| {
                if declaration.important {
                    format!("{}: {} !important;", declaration.name, declaration.value)
                } else {
                    format!("{}: {};", declaration.name, declaration.value)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn upsert(&mut self, declaration: Declaration) {
        match self
            .declarations
            .iter_mut()
            .find(|existing| existing.name == declaration.name)
        {
            Some(existing) => *existing = declaration,
            None => self.declarations.push(declaration),
        }
    }
}

fn strip_important(value: &mut String) -> bool {
    let lower = value.to_ascii_lowercase();
    let Some(bang) = lower.rfind('!') else {
        return false;
    };

    if lower[bang + 1..].trim() != "important" {
        return false;
    }

    value.truncate(bang);
    let trimmed_len = value.trim_end().len();
    value.truncate(trimmed_len);
    true
}

fn strip_comments_preserve_strings(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut idx = 0_usize;
    let mut out = Vec::with_capacity(input.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut in_comment = false;
    let mut escape = false;

    while idx < bytes.len() {
        let byte = bytes[idx];
        let next = bytes.get(idx.saturating_add(1)).copied();

        if in_comment {
            if byte == b'*' && next == Some(b'/') {
                in_comment = false;
                idx = idx.saturating_add(2);
                continue;
            }
            idx = idx.saturating_add(1);
            continue;
        }

        if in_single || in_double {
            out.push(byte);
            let quote = if in_single { b'\'' } else { b'"' };
            if !escape && byte == b'\\' {
                escape = true;
            } else if !escape && byte == quote {
                in_single = false;
                in_double = false;
            } else {
                escape = false;
            }
            idx = idx.saturating_add(1);
            continue;
        }

        if byte == b'/' && next == Some(b'*') {
            in_comment = true;
            idx = idx.saturating_add(2);
            continue;
        }

        match byte {
            b'\'' => in_single = true,
            b'"' => in_double = true,
            _ => {}
        }

        out.push(byte);
        idx = idx.saturating_add(1);
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn normalize_ws(input: &str) -> String {
    input
        .split_whitespace()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scans `input` outside quotes, parentheses and brackets, calling `visit`
/// for every top-level byte until it returns true.
fn scan_top_level(input: &str, mut visit: impl FnMut(usize, u8) -> bool) {
    let bytes = input.as_bytes();
    let mut in_single = false;
    let mut in_double = false;
    let mut escape = false;
    let mut paren_depth = 0_u32;
    let mut bracket_depth = 0_u32;

    for (idx, &byte) in bytes.iter().enumerate() {
        if in_single || in_double {
            let quote = if in_single { b'\'' } else { b'"' };
            if !escape && byte == b'\\' {
                escape = true;
            } else if !escape && byte == quote {
                in_single = false;
                in_double = false;
            } else {
                escape = false;
            }
            continue;
        }

        match byte {
            b'\'' => in_single = true,
            b'"' => in_double = true,
            b'(' => paren_depth = paren_depth.saturating_add(1),
            b')' => paren_depth = paren_depth.saturating_sub(1),
            b'[' => bracket_depth = bracket_depth.saturating_add(1),
            b']' => bracket_depth = bracket_depth.saturating_sub(1),
            _ => {
                if paren_depth == 0 && bracket_depth == 0 && visit(idx, byte) {
                    return;
                }
            }
        }
    }
}

pub(crate) fn split_top_level(input: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0_usize;
    scan_top_level(input, |idx, byte| {
        if byte == delimiter as u8 {
            parts.push(&input[start..idx]);
            start = idx.saturating_add(1);
        }
        false
    });

    if start <= input.len() {
        parts.push(&input[start..]);
    }

    parts
}

fn find_top_level_colon(input: &str) -> Option<usize> {
    let mut found = None;
    scan_top_level(input, |idx, byte| {
        if byte == b':' {
            found = Some(idx);
            return true;
        }
        false
    });
    found
}

fn normalize_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut last_was_space = false;
    let mut escape = false;

    for ch in input.chars() {
        if in_single || in_double {
            out.push(ch);
            let quote = if in_single { '\'' } else { '"' };
            if !escape && ch == '\\' {
                escape = true;
            } else if !escape && ch == quote {
                in_single = false;
                in_double = false;
            } else {
                escape = false;
            }
            continue;
        }

        if ch == '\'' || ch == '"' {
            in_single = ch == '\'';
            in_double = ch == '"';
            last_was_space = false;
            out.push(ch);
            continue;
        }

        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }

        last_was_space = false;
        out.push(ch);
    }

    out.trim().to_owned()
}
