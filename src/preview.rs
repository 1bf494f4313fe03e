use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::EMISSION_FACTOR;
use crate::message::{Message, MessageBody};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreviewError {
    #[error("unknown calculator field '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Electricity,
    Transport,
    Waste,
    Water,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Electricity, Field::Transport, Field::Waste, Field::Water];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Electricity => "electricity",
            Field::Transport => "transport",
            Field::Waste => "waste",
            Field::Water => "water",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::Electricity => "Monthly Electricity Usage (kWh)",
            Field::Transport => "Monthly Transport Distance (km)",
            Field::Waste => "Monthly Waste (kg)",
            Field::Water => "Monthly Water Usage (m3)",
        }
    }
}

impl FromStr for Field {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PreviewError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the preview is highlighted, chosen from the conversation's latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewDecoration {
    Idle,
    Updating,
    HighlightVersion,
    HighlightQuestion,
    ErrorOverlay,
}

impl PreviewDecoration {
    pub fn select(latest: Option<&Message>, is_loading: bool) -> Self {
        if is_loading {
            return PreviewDecoration::Updating;
        }
        match latest.map(|m| &m.body) {
            Some(MessageBody::Version { .. }) => PreviewDecoration::HighlightVersion,
            Some(MessageBody::Clarification { .. }) => PreviewDecoration::HighlightQuestion,
            Some(MessageBody::Error) => PreviewDecoration::ErrorOverlay,
            Some(MessageBody::User) | None => PreviewDecoration::Idle,
        }
    }
}

/// Treats anything that is not a finite number as zero.
pub fn numeric_value(raw: &str) -> f64 {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Mock carbon calculator shown next to the chat.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewPanel {
    values: BTreeMap<Field, String>,
    total_emissions: f64,
    decoration: PreviewDecoration,
}

impl Default for PreviewPanel {
    fn default() -> Self {
        Self {
            values: Field::ALL.into_iter().map(|f| (f, String::new())).collect(),
            total_emissions: 0.0,
            decoration: PreviewDecoration::Idle,
        }
    }
}

impl PreviewPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the raw input and returns the recomputed total.
    pub fn set_field(&mut self, field: Field, raw: impl Into<String>) -> f64 {
        self.values.insert(field, raw.into());
        self.total_emissions = self.values.values().map(|v| numeric_value(v)).sum::<f64>() * EMISSION_FACTOR;
        self.total_emissions
    }

    pub fn set_field_by_name(&mut self, name: &str, raw: impl Into<String>) -> Result<f64, PreviewError> {
        let field = name.parse::<Field>()?;
        Ok(self.set_field(field, raw))
    }

    pub fn value(&self, field: Field) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or_default()
    }

    pub fn total_emissions(&self) -> f64 {
        self.total_emissions
    }

    pub fn display_total(&self) -> String {
        format!("{:.2}", self.total_emissions)
    }

    pub fn decoration(&self) -> PreviewDecoration {
        self.decoration
    }

    pub fn decorate(&mut self, latest: Option<&Message>, is_loading: bool) -> PreviewDecoration {
        self.decoration = PreviewDecoration::select(latest, is_loading);
        self.decoration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_for_reference_inputs() {
        let mut panel = PreviewPanel::new();
        panel.set_field(Field::Electricity, "100");
        panel.set_field(Field::Transport, "50");
        panel.set_field(Field::Waste, "10");
        panel.set_field(Field::Water, "");

        assert_eq!(panel.total_emissions(), 80.0);
        assert_eq!(panel.display_total(), "80.00");
    }

    #[test]
    fn test_setting_same_value_twice_is_stable() {
        let mut panel = PreviewPanel::new();
        let first = panel.set_field_by_name("electricity", "100").unwrap();
        let second = panel.set_field_by_name("electricity", "100").unwrap();
        assert_eq!(first, 50.0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_numeric_values_count_as_zero() {
        assert_eq!(numeric_value(""), 0.0);
        assert_eq!(numeric_value("abc"), 0.0);
        assert_eq!(numeric_value("NaN"), 0.0);
        assert_eq!(numeric_value("inf"), 0.0);
        assert_eq!(numeric_value(" 12.5 "), 12.5);
        assert_eq!(numeric_value("-4"), -4.0);

        let mut panel = PreviewPanel::new();
        panel.set_field(Field::Waste, "lots");
        assert_eq!(panel.total_emissions(), 0.0);
        assert_eq!(panel.value(Field::Waste), "lots");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mut panel = PreviewPanel::new();
        assert_eq!(
            panel.set_field_by_name("gas", "3").unwrap_err(),
            PreviewError::UnknownField("gas".to_string())
        );
        assert_eq!("Transport".parse::<Field>().unwrap(), Field::Transport);
    }

    #[test]
    fn test_decoration_follows_latest_message_without_touching_values() {
        let mut panel = PreviewPanel::new();
        panel.set_field(Field::Electricity, "10");

        assert_eq!(panel.decorate(None, false), PreviewDecoration::Idle);
        let version = Message::version("v", 1, vec![]);
        assert_eq!(panel.decorate(Some(&version), false), PreviewDecoration::HighlightVersion);
        assert_eq!(panel.decorate(Some(&version), true), PreviewDecoration::Updating);
        let question = Message::clarification("c", "q?");
        assert_eq!(panel.decorate(Some(&question), false), PreviewDecoration::HighlightQuestion);
        let error = Message::error("boom");
        assert_eq!(panel.decorate(Some(&error), false), PreviewDecoration::ErrorOverlay);

        assert_eq!(panel.total_emissions(), 5.0);
    }
}
