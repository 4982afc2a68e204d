//! One form widget for every entity, driven by a declarative field list.

use std::collections::HashMap;

use chrono::NaiveDate;
use crossterm::event::KeyCode;
use tui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Span, Spans},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    /// Positive decimal amount
    Amount,
    /// `YYYY-MM-DD`
    Date,
    /// One of a fixed set, cycled with Left/Right
    Choice(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Amount(f64),
    Date(NaiveDate),
    Choice(&'static str),
    Empty,
}

/// Parsed, validated form contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormValues {
    values: HashMap<&'static str, FieldValue>,
}

impl FormValues {
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(FieldValue::Text(value)) => Some(value.as_str()),
            Some(FieldValue::Choice(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn amount(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(FieldValue::Amount(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn date(&self, key: &str) -> Option<NaiveDate> {
        match self.values.get(key) {
            Some(FieldValue::Date(value)) => Some(*value),
            _ => None,
        }
    }
}

pub enum FormAction {
    Cancel,
    Submit(FormValues),
}

pub struct FormState {
    title: String,
    fields: &'static [FieldSpec],
    inputs: Vec<String>,
    errors: Vec<Option<String>>,
    current: usize,
    editing: bool,
}

impl FormState {
    pub fn new(title: impl Into<String>, fields: &'static [FieldSpec]) -> Self {
        let inputs = fields
            .iter()
            .map(|field| match field.kind {
                FieldKind::Choice(options) => options.first().map(|o| o.to_string()).unwrap_or_default(),
                _ => String::new(),
            })
            .collect();
        Self {
            title: title.into(),
            fields,
            inputs,
            errors: vec![None; fields.len()],
            current: 0,
            editing: false,
        }
    }

    /// Prefill a field. Unknown keys are ignored.
    pub fn with_value(mut self, key: &str, value: impl Into<String>) -> Self {
        if let Some(index) = self.fields.iter().position(|f| f.key == key) {
            self.inputs[index] = value.into();
        }
        self
    }

    pub fn input(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .position(|f| f.key == key)
            .map(|index| self.inputs[index].as_str())
    }

    pub fn current_field(&self) -> &FieldSpec {
        &self.fields[self.current]
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn toggle_editing(&mut self) {
        self.editing = !self.editing;
    }

    pub fn next_field(&mut self) {
        self.current = (self.current + 1) % self.fields.len();
    }

    pub fn previous_field(&mut self) {
        self.current = (self.current + self.fields.len() - 1) % self.fields.len();
    }

    pub fn edit_current_field(&mut self, key: KeyCode) {
        if !self.editing {
            return;
        }
        let kind = self.fields[self.current].kind;
        self.errors[self.current] = None;
        let value = &mut self.inputs[self.current];

        match (kind, key) {
            (FieldKind::Choice(options), KeyCode::Right | KeyCode::Char(' ')) => {
                *value = cycle(options, value, 1);
            }
            (FieldKind::Choice(options), KeyCode::Left) => {
                *value = cycle(options, value, options.len().saturating_sub(1));
            }
            (FieldKind::Choice(_), _) => {}
            (FieldKind::Amount, KeyCode::Char(c)) if c.is_ascii_digit() || c == '.' => value.push(c),
            (FieldKind::Date, KeyCode::Char(c)) if c.is_ascii_digit() || c == '-' => value.push(c),
            (FieldKind::Text, KeyCode::Char(c)) => value.push(c),
            (_, KeyCode::Backspace) => {
                value.pop();
            }
            _ => {}
        }
    }

    /// Parse every field, remembering per-field errors for display
    pub fn validate(&mut self) -> Result<FormValues, usize> {
        let mut values = FormValues::default();
        let mut failures = 0;

        for (index, field) in self.fields.iter().enumerate() {
            match parse_field(field, &self.inputs[index]) {
                Ok(value) => {
                    self.errors[index] = None;
                    values.values.insert(field.key, value);
                }
                Err(message) => {
                    self.errors[index] = Some(message);
                    failures += 1;
                }
            }
        }

        if failures == 0 { Ok(values) } else { Err(failures) }
    }
}

fn cycle(options: &'static [&'static str], current: &str, step: usize) -> String {
    if options.is_empty() {
        return String::new();
    }
    let index = options.iter().position(|o| *o == current).unwrap_or(0);
    options[(index + step) % options.len()].to_string()
}

fn parse_field(field: &FieldSpec, input: &str) -> Result<FieldValue, String> {
    let input = input.trim();
    if input.is_empty() {
        return if field.required {
            Err(format!("{} is required", field.label))
        } else {
            Ok(FieldValue::Empty)
        };
    }

    match field.kind {
        FieldKind::Text => Ok(FieldValue::Text(input.to_string())),
        FieldKind::Amount => match input.parse::<f64>() {
            Ok(amount) if amount.is_finite() && amount > 0.0 => Ok(FieldValue::Amount(amount)),
            _ => Err(format!("{} must be a positive number", field.label)),
        },
        FieldKind::Date => NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .map(FieldValue::Date)
            .map_err(|_| format!("{} must look like 2026-04-01", field.label)),
        FieldKind::Choice(options) => options
            .iter()
            .find(|o| **o == input)
            .map(|o| FieldValue::Choice(*o))
            .ok_or_else(|| format!("{} must be one of {}", field.label, options.join(", "))),
    }
}

pub fn render_form<B: Backend>(f: &mut Frame<B>, state: &FormState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(10),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(f.size());

    let title = Paragraph::new(state.title.as_str())
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    render_fields(f, state, chunks[1]);

    let help_text = if state.editing {
        match state.current_field().kind {
            FieldKind::Choice(_) => "Left/Right - Change | Enter - Done",
            _ => "Type to edit | Enter - Done | Esc - Stop editing",
        }
    } else {
        "Enter - Edit field | Up/Down - Navigate fields | S - Save | Esc - Cancel"
    };
    let help = Paragraph::new(help_text)
        .style(Style::default().fg(Color::Gray))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(help, chunks[2]);
}

fn render_fields<B: Backend>(f: &mut Frame<B>, state: &FormState, area: Rect) {
    let items: Vec<ListItem> = state
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let selected = i == state.current;
            let label_style = if selected {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            let marker = if field.required { "*" } else { "" };

            let mut spans = vec![Span::styled(format!("{}{}: ", field.label, marker), label_style)];
            if selected && state.editing {
                spans.push(Span::styled(
                    format!("{}|", state.inputs[i]),
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                spans.push(Span::raw(state.inputs[i].clone()));
            }
            if let Some(error) = &state.errors[i] {
                spans.push(Span::styled(format!("  {}", error), Style::default().fg(Color::Red)));
            }

            ListItem::new(Spans::from(spans))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Details"));
    f.render_widget(list, area);
}

pub fn handle_input(state: &mut FormState, key: KeyCode) -> Option<FormAction> {
    match key {
        KeyCode::Esc => {
            if state.editing {
                state.toggle_editing();
            } else {
                return Some(FormAction::Cancel);
            }
        }
        KeyCode::Enter => state.toggle_editing(),
        KeyCode::Up if !state.editing => state.previous_field(),
        KeyCode::Down | KeyCode::Tab if !state.editing => state.next_field(),
        KeyCode::Char('s') | KeyCode::Char('S') if !state.editing => {
            if let Ok(values) = state.validate() {
                return Some(FormAction::Submit(values));
            }
        }
        _ if state.editing => state.edit_current_field(key),
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLORS: &[&str] = &["red", "green", "blue"];
    const FIELDS: &[FieldSpec] = &[
        FieldSpec { key: "name", label: "Name", kind: FieldKind::Text, required: true },
        FieldSpec { key: "amount", label: "Amount", kind: FieldKind::Amount, required: true },
        FieldSpec { key: "due", label: "Due", kind: FieldKind::Date, required: false },
        FieldSpec { key: "color", label: "Color", kind: FieldKind::Choice(COLORS), required: true },
    ];

    fn type_text(state: &mut FormState, text: &str) {
        handle_input(state, KeyCode::Enter);
        for c in text.chars() {
            handle_input(state, KeyCode::Char(c));
        }
        handle_input(state, KeyCode::Enter);
    }

    #[test]
    fn submits_typed_values() {
        let mut state = FormState::new("Test", FIELDS);
        type_text(&mut state, "Asha");
        handle_input(&mut state, KeyCode::Down);
        type_text(&mut state, "12.50");
        handle_input(&mut state, KeyCode::Down);
        type_text(&mut state, "2026-04-01");
        handle_input(&mut state, KeyCode::Down);
        handle_input(&mut state, KeyCode::Enter);
        handle_input(&mut state, KeyCode::Right);
        handle_input(&mut state, KeyCode::Enter);

        let Some(FormAction::Submit(values)) = handle_input(&mut state, KeyCode::Char('s')) else {
            panic!("form should submit");
        };
        assert_eq!(values.text("name"), Some("Asha"));
        assert_eq!(values.amount("amount"), Some(12.5));
        assert_eq!(values.date("due"), NaiveDate::from_ymd_opt(2026, 4, 1));
        assert_eq!(values.text("color"), Some("green"));
    }

    #[test]
    fn amount_fields_ignore_letters() {
        let mut state = FormState::new("Test", FIELDS).with_value("name", "x");
        state.next_field();
        type_text(&mut state, "1a0");
        assert_eq!(state.input("amount"), Some("10"));
    }

    #[test]
    fn missing_required_fields_block_submit() {
        let mut state = FormState::new("Test", FIELDS);
        assert!(handle_input(&mut state, KeyCode::Char('s')).is_none());
        assert_eq!(state.validate().unwrap_err(), 2);
    }

    #[test]
    fn optional_blank_field_is_empty_not_error() {
        let mut state = FormState::new("Test", FIELDS)
            .with_value("name", "x")
            .with_value("amount", "5");
        let values = state.validate().unwrap();
        assert_eq!(values.date("due"), None);
    }

    #[test]
    fn bad_date_is_reported() {
        let mut state = FormState::new("Test", FIELDS)
            .with_value("name", "x")
            .with_value("amount", "5")
            .with_value("due", "2026-13-40");
        assert_eq!(state.validate().unwrap_err(), 1);
    }

    #[test]
    fn choice_cycles_both_ways() {
        let mut state = FormState::new("Test", FIELDS);
        state.previous_field();
        state.toggle_editing();
        state.edit_current_field(KeyCode::Left);
        assert_eq!(state.input("color"), Some("blue"));
        state.edit_current_field(KeyCode::Right);
        assert_eq!(state.input("color"), Some("red"));
    }

    #[test]
    fn escape_cancels_only_when_not_editing() {
        let mut state = FormState::new("Test", FIELDS);
        state.toggle_editing();
        assert!(handle_input(&mut state, KeyCode::Esc).is_none());
        assert!(matches!(handle_input(&mut state, KeyCode::Esc), Some(FormAction::Cancel)));
    }
}
