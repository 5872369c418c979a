//! Selector parsing and matching against any tree that implements
//! [`SelectorElement`].
//!
//! Supported: type, universal, `#id`, `.class`, attribute selectors with
//! `= ~= |= ^= $= *=`, `:first-child`, `:last-child`, `:not(...)`, and the
//! descendant and child combinators. Relational pseudo-classes such as
//! `:has()` and sibling combinators are rejected with
//! [`SelectorError::Unsupported`] so callers can skip them.

use crate::split_top_level;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("selector is empty")]
    Empty,
    #[error("unsupported selector syntax `{0}`")]
    Unsupported(String),
    #[error("unexpected `{found}` at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("unterminated {0}")]
    Unterminated(&'static str),
}

impl SelectorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "css.selector_empty",
            Self::Unsupported(_) => "css.selector_unsupported",
            Self::Unexpected { .. } => "css.selector_unexpected",
            Self::Unterminated(_) => "css.selector_unterminated",
        }
    }
}

/// Element view required by the matcher.
pub trait SelectorElement: Sized {
    fn local_name(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<&str>;
    fn parent_element(&self) -> Option<Self>;
    fn is_first_child(&self) -> bool;
    fn is_last_child(&self) -> bool;

    fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    fn has_class(&self, class: &str) -> bool {
        self.attribute("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|name| name == class))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOperator {
    Equals,
    Includes,
    DashMatch,
    Prefix,
    Suffix,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleSelector {
    Universal,
    Type(String),
    Id(String),
    Class(String),
    Attribute {
        name: String,
        matcher: Option<(AttrOperator, String)>,
    },
    FirstChild,
    LastChild,
    Not(Box<SelectorList>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundSelector {
    pub parts: Vec<SimpleSelector>,
}

/// Compounds joined by combinators; `combinators[i]` sits between
/// `compounds[i]` and `compounds[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub compounds: Vec<CompoundSelector>,
    pub combinators: Vec<Combinator>,
}

/// Comma separated selector group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    pub source: String,
    pub selectors: Vec<ComplexSelector>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut selectors = Vec::new();
        for part in split_top_level(trimmed, ',') {
            selectors.push(ComplexParser::new(part.trim()).parse()?);
        }

        Ok(Self {
            source: trimmed.to_owned(),
            selectors,
        })
    }

    pub fn matches<E: SelectorElement>(&self, element: &E) -> bool {
        self.selectors
            .iter()
            .any(|selector| selector.matches(element))
    }
}

impl ComplexSelector {
    pub fn matches<E: SelectorElement>(&self, element: &E) -> bool {
        match self.compounds.len() {
            0 => false,
            len => self.matches_from(len - 1, element),
        }
    }

    fn matches_from<E: SelectorElement>(&self, index: usize, element: &E) -> bool {
        if !self.compounds[index].matches(element) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match self.combinators[index - 1] {
            Combinator::Child => element
                .parent_element()
                .is_some_and(|parent| self.matches_from(index - 1, &parent)),
            Combinator::Descendant => {
                let mut current = element.parent_element();
                while let Some(ancestor) = current {
                    if self.matches_from(index - 1, &ancestor) {
                        return true;
                    }
                    current = ancestor.parent_element();
                }
                false
            }
        }
    }
}

impl CompoundSelector {
    pub fn matches<E: SelectorElement>(&self, element: &E) -> bool {
        self.parts.iter().all(|part| part.matches(element))
    }
}

impl SimpleSelector {
    fn matches<E: SelectorElement>(&self, element: &E) -> bool {
        match self {
            Self::Universal => true,
            Self::Type(name) => element.local_name().eq_ignore_ascii_case(name),
            Self::Id(id) => element.id() == Some(id.as_str()),
            Self::Class(class) => element.has_class(class),
            Self::Attribute { name, matcher } => {
                let Some(actual) = element.attribute(name) else {
                    return false;
                };
                match matcher {
                    None => true,
                    Some((operator, expected)) => attribute_matches(*operator, actual, expected),
                }
            }
            Self::FirstChild => element.is_first_child(),
            Self::LastChild => element.is_last_child(),
            Self::Not(list) => !list.matches(element),
        }
    }
}

fn attribute_matches(operator: AttrOperator, actual: &str, expected: &str) -> bool {
    match operator {
        AttrOperator::Equals => actual == expected,
        AttrOperator::Includes => actual.split_ascii_whitespace().any(|word| word == expected),
        AttrOperator::DashMatch => {
            actual == expected
                || (actual.starts_with(expected) && actual[expected.len()..].starts_with('-'))
        }
        AttrOperator::Prefix => !expected.is_empty() && actual.starts_with(expected),
        AttrOperator::Suffix => !expected.is_empty() && actual.ends_with(expected),
        AttrOperator::Substring => !expected.is_empty() && actual.contains(expected),
    }
}

struct ComplexParser {
    chars: Vec<char>,
    pos: usize,
}

impl ComplexParser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<ComplexSelector, SelectorError> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();

        loop {
            let saw_space = self.skip_ws();
            let Some(ch) = self.peek() else {
                break;
            };

            let explicit = match ch {
                '>' => {
                    self.pos += 1;
                    self.skip_ws();
                    Some(Combinator::Child)
                }
                '+' | '~' => return Err(SelectorError::Unsupported(format!("{ch} combinator"))),
                _ => None,
            };

            if !compounds.is_empty() {
                match explicit {
                    Some(combinator) => combinators.push(combinator),
                    None if saw_space => combinators.push(Combinator::Descendant),
                    None => {
                        return Err(SelectorError::Unexpected {
                            found: ch,
                            offset: self.pos,
                        });
                    }
                }
            } else if explicit.is_some() {
                return Err(SelectorError::Unexpected {
                    found: ch,
                    offset: self.pos,
                });
            }

            compounds.push(self.parse_compound()?);
        }

        if compounds.is_empty() {
            return Err(SelectorError::Empty);
        }
        if combinators.len() + 1 != compounds.len() {
            return Err(SelectorError::Unterminated("combinator"));
        }

        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn parse_compound(&mut self) -> Result<CompoundSelector, SelectorError> {
        let mut parts = Vec::new();

        while let Some(ch) = self.peek() {
            match ch {
                '*' => {
                    self.pos += 1;
                    parts.push(SimpleSelector::Universal);
                }
                '#' => {
                    self.pos += 1;
                    parts.push(SimpleSelector::Id(self.ident()?));
                }
                '.' => {
                    self.pos += 1;
                    parts.push(SimpleSelector::Class(self.ident()?));
                }
                '[' => {
                    self.pos += 1;
                    parts.push(self.attribute()?);
                }
                ':' => {
                    self.pos += 1;
                    parts.push(self.pseudo()?);
                }
                _ if is_ident_start(ch) && parts.is_empty() => {
                    parts.push(SimpleSelector::Type(self.ident()?.to_ascii_lowercase()));
                }
                _ => break,
            }
        }

        if parts.is_empty() {
            return Err(match self.peek() {
                Some(found) => SelectorError::Unexpected {
                    found,
                    offset: self.pos,
                },
                None => SelectorError::Empty,
            });
        }

        Ok(CompoundSelector { parts })
    }

    fn attribute(&mut self) -> Result<SimpleSelector, SelectorError> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();

        let operator = match (self.peek(), self.peek_at(1)) {
            (Some(']'), _) => {
                self.pos += 1;
                return Ok(SimpleSelector::Attribute {
                    name,
                    matcher: None,
                });
            }
            (Some('='), _) => {
                self.pos += 1;
                AttrOperator::Equals
            }
            (Some(prefix), Some('=')) => {
                let operator = match prefix {
                    '~' => AttrOperator::Includes,
                    '|' => AttrOperator::DashMatch,
                    '^' => AttrOperator::Prefix,
                    '$' => AttrOperator::Suffix,
                    '*' => AttrOperator::Substring,
                    other => {
                        return Err(SelectorError::Unexpected {
                            found: other,
                            offset: self.pos,
                        });
                    }
                };
                self.pos += 2;
                operator
            }
            (Some(found), _) => {
                return Err(SelectorError::Unexpected {
                    found,
                    offset: self.pos,
                });
            }
            (None, _) => return Err(SelectorError::Unterminated("attribute selector")),
        };

        self.skip_ws();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                self.quoted(quote)?
            }
            Some(_) => self.ident()?,
            None => return Err(SelectorError::Unterminated("attribute selector")),
        };
        self.skip_ws();

        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(SimpleSelector::Attribute {
                    name,
                    matcher: Some((operator, value)),
                })
            }
            Some('i' | 'I' | 's' | 'S') => Err(SelectorError::Unsupported(
                "attribute selector case flag".to_owned(),
            )),
            Some(found) => Err(SelectorError::Unexpected {
                found,
                offset: self.pos,
            }),
            None => Err(SelectorError::Unterminated("attribute selector")),
        }
    }

    fn pseudo(&mut self) -> Result<SimpleSelector, SelectorError> {
        if self.peek() == Some(':') {
            return Err(SelectorError::Unsupported("pseudo-element".to_owned()));
        }

        let name = self.ident()?.to_ascii_lowercase();
        if self.peek() != Some('(') {
            return match name.as_str() {
                "first-child" => Ok(SimpleSelector::FirstChild),
                "last-child" => Ok(SimpleSelector::LastChild),
                _ => Err(SelectorError::Unsupported(format!(":{name}"))),
            };
        }

        self.pos += 1;
        let argument = self.parenthesized()?;
        match name.as_str() {
            "not" => Ok(SimpleSelector::Not(Box::new(SelectorList::parse(&argument)?))),
            _ => Err(SelectorError::Unsupported(format!(":{name}()"))),
        }
    }

    fn parenthesized(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        let mut depth = 1_u32;
        let mut quote: Option<char> = None;

        while let Some(ch) = self.peek() {
            self.pos += 1;
            match (quote, ch) {
                (Some(open), _) if ch == open => quote = None,
                (Some(_), _) => {}
                (None, '"' | '\'') => quote = Some(ch),
                (None, '(') => depth += 1,
                (None, ')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.chars[start..self.pos - 1].iter().collect());
                    }
                }
                _ => {}
            }
        }

        Err(SelectorError::Unterminated("parenthesis"))
    }

    fn quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            self.pos += 1;
            if ch == '\\' {
                if let Some(escaped) = self.peek() {
                    out.push(escaped);
                    self.pos += 1;
                }
                continue;
            }
            if ch == quote {
                return Ok(out);
            }
            out.push(ch);
        }
        Err(SelectorError::Unterminated("string"))
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if !is_ident_char(ch) {
                break;
            }
            self.pos += 1;
        }

        if self.pos == start {
            return Err(match self.peek() {
                Some(found) => SelectorError::Unexpected {
                    found,
                    offset: self.pos,
                },
                None => SelectorError::Unterminated("identifier"),
            });
        }

        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos != start
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '-' || !ch.is_ascii()
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || !ch.is_ascii()
}
