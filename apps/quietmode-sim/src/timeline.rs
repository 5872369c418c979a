//! Scripted host-page behaviour replayed against an attached page.

use qm_core::Millis;
use qm_core::QmError;
use qm_core::QmResult;
use qm_dom::MediaState;
use qm_dom::NodeId;
use qm_page::Page;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use url::Url;

const DEFAULT_TIMELINE: &str = include_str!("../fixtures/timeline.toml");
const MEDIA_SELECTOR: &str = "#movie_player video, video";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeline {
    /// Time the session runs to after the last step.
    #[serde(default)]
    pub until_ms: u64,
    #[serde(default, rename = "step")]
    pub steps: Vec<TimelineStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimelineStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Click { selector: String },
    PushState { url: String },
    ReplaceState { url: String },
    PopState { url: String },
    /// Location change that no history hook reports.
    SetLocation { url: String },
    Remove { selector: String },
    Append {
        parent: String,
        tag: String,
        #[serde(default)]
        id: Option<String>,
    },
    SetAttribute {
        selector: String,
        name: String,
        value: String,
    },
    Media { buffering: bool },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::PushState { .. } => "push_state",
            Self::ReplaceState { .. } => "replace_state",
            Self::PopState { .. } => "pop_state",
            Self::SetLocation { .. } => "set_location",
            Self::Remove { .. } => "remove",
            Self::Append { .. } => "append",
            Self::SetAttribute { .. } => "set_attribute",
            Self::Media { .. } => "media",
        }
    }

    /// True when the step can move the page to another URL.
    pub fn navigates(&self) -> bool {
        matches!(
            self,
            Self::PushState { .. } | Self::ReplaceState { .. } | Self::PopState { .. } | Self::SetLocation { .. }
        )
    }
}

impl Timeline {
    pub fn from_toml_str(input: &str) -> QmResult<Self> {
        let mut timeline: Self = toml::from_str(input).map_err(|error| {
            QmError::new(
                "timeline.parse_failed",
                format!("invalid timeline: {error}"),
            )
        })?;
        timeline.steps.sort_by_key(|step| step.at_ms);
        Ok(timeline)
    }

    pub fn load(path: &Path) -> QmResult<Self> {
        let content = fs::read_to_string(path).map_err(|error| {
            QmError::new(
                "timeline.read_failed",
                format!("failed to read timeline `{}`: {error}", path.display()),
            )
        })?;
        Self::from_toml_str(&content)
    }

    pub fn builtin() -> QmResult<Self> {
        Self::from_toml_str(DEFAULT_TIMELINE)
    }

    /// The later of `until_ms` and the last step.
    pub fn end(&self) -> Millis {
        let last = self.steps.last().map_or(0, |step| step.at_ms);
        Millis(self.until_ms.max(last))
    }
}

/// Performs one step against the page. The clock must already be at the
/// step's time.
pub fn apply_step(page: &mut Page, action: &StepAction) -> QmResult<()> {
    match action {
        StepAction::Click { selector } => {
            let target = required(page, selector)?;
            page.click(target)?;
        }
        StepAction::PushState { url } => {
            page.push_state(parse_url(url)?);
        }
        StepAction::ReplaceState { url } => {
            page.replace_state(parse_url(url)?);
        }
        StepAction::PopState { url } => {
            page.pop_state(parse_url(url)?);
        }
        StepAction::SetLocation { url } => page.set_location(parse_url(url)?),
        StepAction::Remove { selector } => {
            let target = required(page, selector)?;
            page.mutate(|doc| doc.remove(target));
        }
        StepAction::Append { parent, tag, id } => {
            let parent = required(page, parent)?;
            page.mutate(|doc| {
                let child = doc.create_element(tag);
                if let Some(id) = id {
                    doc.set_attribute(child, "id", id);
                }
                doc.append_child(parent, child)
            })?;
        }
        StepAction::SetAttribute {
            selector,
            name,
            value,
        } => {
            let target = required(page, selector)?;
            page.mutate(|doc| doc.set_attribute(target, name, value));
        }
        StepAction::Media { buffering } => {
            let target = required(page, MEDIA_SELECTOR)?;
            let state = if *buffering {
                MediaState::buffering()
            } else {
                MediaState::ready()
            };
            page.mutate(|doc| doc.set_media_state(target, state));
        }
    }
    Ok(())
}

fn required(page: &Page, selector: &str) -> QmResult<NodeId> {
    page.doc().select(selector)?.ok_or_else(|| {
        QmError::new(
            "timeline.target_missing",
            format!("no element matches `{selector}`"),
        )
    })
}

fn parse_url(raw: &str) -> QmResult<Url> {
    Url::parse(raw).map_err(|error| {
        QmError::new("timeline.url_invalid", format!("invalid url `{raw}`: {error}"))
    })
}
