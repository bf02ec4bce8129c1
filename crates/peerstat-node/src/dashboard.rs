//! The standard analytics dashboard: four charts and one funnel.

use crate::state::StateAggregate;
use peerstat_metrics::Schema;
use std::fmt::Write;

/// Per-chart view counter, labelled by store name.
pub const VIEWS: &str = "views";
/// In-order funnel completions.
pub const FUNNEL: &str = "funnel";
/// Raw event counts.
pub const COUNTS: &str = "counts";
/// Typing speed per submitted comment (characters per minute).
pub const SPEED: &str = "speed";

pub const STEP_VIEW: &str = "view graph";
pub const STEP_CLICK: &str = "click comment box";
pub const STEP_SUBMIT: &str = "submit";

/// Funnel steps in order.
pub const FUNNEL_STEPS: [&str; 3] = [STEP_VIEW, STEP_CLICK, STEP_SUBMIT];

pub const PAGE_LOADS: &str = "page loads";
pub const SCROLLS: &str = "scrolls";
pub const TEXTBOX_CLICKS: &str = "textbox clicks";
pub const SUBMITS: &str = "submit";

/// Key code that submits a comment.
pub const ENTER_KEY: u32 = 13;

/// Declaration of one store in an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDef {
    pub name: String,
    pub title: String,
    pub axis_title: String,
    pub schema: Schema,
}

impl StoreDef {
    pub fn new(name: &str, title: &str, axis_title: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            axis_title: axis_title.to_string(),
            schema,
        }
    }
}

/// Stores of the standard dashboard, in display order.
pub fn definitions() -> Vec<StoreDef> {
    vec![
        StoreDef::new(
            VIEWS,
            "How viewed is each graph",
            "views",
            Schema::fixed([VIEWS, FUNNEL, COUNTS, SPEED]),
        ),
        StoreDef::new(
            FUNNEL,
            "A funnel",
            "occurrences of each event",
            Schema::fixed(FUNNEL_STEPS),
        ),
        StoreDef::new(
            COUNTS,
            "Let's count some events",
            "occurrences of each event",
            Schema::fixed([PAGE_LOADS, SCROLLS, TEXTBOX_CLICKS, SUBMITS]),
        ),
        StoreDef::new(
            SPEED,
            "Typing speed",
            "characters per minute spent editing",
            Schema::Open,
        ),
    ]
}

/// Plain-text rendering of every chart: title, bars, then comments.
pub fn render_text(state: &StateAggregate) -> String {
    let mut out = String::new();
    for store in state.stores() {
        let (title, axis) = state
            .definition(store.name())
            .map(|def| (def.title.as_str(), def.axis_title.as_str()))
            .unwrap_or((store.name(), ""));
        let _ = writeln!(out, "== {title} ({axis})");

        let bars = store.data_as_array();
        let width = bars.iter().map(|bar| bar.label.len()).max().unwrap_or(0);
        for bar in &bars {
            let _ = writeln!(out, "  {:<width$} {:>6}", bar.label, bar.value);
        }
        for comment in store.comments() {
            let _ = writeln!(out, "  > {comment}");
        }
    }
    out
}
