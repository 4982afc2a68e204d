use crossterm::event::KeyCode;
use tui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame,
};

use crate::ledger::{LedgerStore, StudentSnapshot};
use crate::models::{FeeRecord, FeeStatus};

// Represents one student's fee table
pub struct FeesState {
    student_name: String,
    section: String,
    snapshot: StudentSnapshot,
    table_state: TableState,
    show_delete_confirmation: bool,
    status: Option<String>,
}

pub enum FeesAction {
    Back,
    NewFee,
    EditFee(String),
    MarkPaid(String),
    DeleteFee(String),
    Reconcile,
    RetrySync,
}

impl FeesState {
    pub fn new(student_name: &str, section: &str, snapshot: StudentSnapshot) -> Self {
        let mut table_state = TableState::default();
        if !snapshot.records.is_empty() {
            table_state.select(Some(0));
        }
        Self {
            student_name: student_name.to_string(),
            section: section.to_string(),
            snapshot,
            table_state,
            show_delete_confirmation: false,
            status: None,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.snapshot.student_id
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    /// Pull the current snapshot from the store
    pub fn refresh(&mut self, store: &LedgerStore) {
        let selected = self.selected_record().map(|r| r.id.clone());
        self.snapshot = store.snapshot(&self.snapshot.student_id);

        let index = selected
            .and_then(|id| self.snapshot.records.iter().position(|r| r.id == id))
            .or(if self.snapshot.records.is_empty() { None } else { Some(0) });
        self.table_state.select(index);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn next(&mut self) {
        let len = self.snapshot.records.len();
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.table_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.snapshot.records.len();
        if len == 0 {
            return;
        }
        let i = match self.table_state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.table_state.select(Some(i));
    }

    pub fn toggle_delete_confirmation(&mut self) {
        self.show_delete_confirmation = !self.show_delete_confirmation;
    }

    pub fn selected_record(&self) -> Option<&FeeRecord> {
        self.table_state
            .selected()
            .and_then(|i| self.snapshot.records.get(i))
    }

    pub fn selected_record_id(&self) -> Option<String> {
        self.selected_record().map(|r| r.id.clone())
    }
}

fn status_style(status: FeeStatus) -> Style {
    match status {
        FeeStatus::Paid => Style::default().fg(Color::Green),
        FeeStatus::Pending => Style::default(),
        FeeStatus::Overdue => Style::default().fg(Color::Red),
    }
}

pub fn render_fees<B: Backend>(frame: &mut Frame<B>, state: &mut FeesState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(1),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(frame.size());

    let aggregate = state.snapshot.aggregate;
    let mut header_text = format!(
        "Total {:.2} | Paid {:.2} | Balance {:.2}",
        aggregate.total, aggregate.paid, aggregate.balance
    );
    if state.snapshot.pending_sync {
        header_text.push_str(" | unsynced changes");
    }
    let header_style = if state.snapshot.pending_sync {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let title = format!("{} ({})", state.student_name, state.section);
    let summary = Paragraph::new(header_text)
        .style(header_style)
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(summary, chunks[0]);

    let header_cells = ["Fee Type", "Amount", "Due Date", "Status", "Paid On", "Description"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows = state.snapshot.records.iter().map(|record| {
        let paid_on = record
            .paid_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let status = if record.is_pending_sync() {
            format!("{}*", record.status.as_str())
        } else {
            record.status.as_str().to_string()
        };
        let cells = vec![
            Cell::from(record.fee_type.clone()),
            Cell::from(format!("{:.2}", record.amount)),
            Cell::from(record.due_date.format("%Y-%m-%d").to_string()),
            Cell::from(status).style(status_style(record.status)),
            Cell::from(paid_on),
            Cell::from(record.description.clone()),
        ];
        Row::new(cells).height(1)
    });

    let table = Table::new(rows)
        .header(header)
        .block(Block::default().title("Fees").borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .widths(&[
            Constraint::Percentage(18),
            Constraint::Percentage(12),
            Constraint::Percentage(14),
            Constraint::Percentage(12),
            Constraint::Percentage(14),
            Constraint::Percentage(30),
        ]);
    frame.render_stateful_widget(table, chunks[1], &mut state.table_state);

    let buttons_text = if state.show_delete_confirmation {
        "Delete this fee? <Y> Yes | <Esc> No".to_string()
    } else {
        let keys = if state.selected_record().is_some() {
            "<N> New | <E> Edit | <P> Mark paid | <D> Delete | <C> Reconcile | <S> Sync now | <Esc> Back"
        } else {
            "<N> New | <C> Reconcile | <S> Sync now | <Esc> Back"
        };
        match &state.status {
            Some(status) => format!("{} | {}", status, keys),
            None => keys.to_string(),
        }
    };
    let buttons_style = if state.show_delete_confirmation {
        Style::default().fg(Color::Red)
    } else {
        Style::default().fg(Color::White)
    };
    let buttons = Paragraph::new(buttons_text)
        .block(Block::default().borders(Borders::TOP))
        .style(buttons_style);
    frame.render_widget(buttons, chunks[2]);
}

pub fn handle_input(state: &mut FeesState, key: KeyCode) -> Option<FeesAction> {
    if state.show_delete_confirmation {
        match key {
            KeyCode::Char('y') => {
                state.toggle_delete_confirmation();
                return state.selected_record_id().map(FeesAction::DeleteFee);
            }
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('q') => {
                state.toggle_delete_confirmation();
            }
            _ => {}
        }
        return None;
    }

    match key {
        KeyCode::Char('q') | KeyCode::Esc => return Some(FeesAction::Back),
        KeyCode::Char('n') => return Some(FeesAction::NewFee),
        KeyCode::Char('e') => return state.selected_record_id().map(FeesAction::EditFee),
        KeyCode::Char('p') => {
            if let Some(record) = state.selected_record()
                && !record.is_paid()
            {
                return Some(FeesAction::MarkPaid(record.id.clone()));
            }
        }
        KeyCode::Char('d') => {
            if state.selected_record().is_some() {
                state.toggle_delete_confirmation();
            }
        }
        KeyCode::Char('c') => return Some(FeesAction::Reconcile),
        KeyCode::Char('s') => return Some(FeesAction::RetrySync),
        KeyCode::Down => state.next(),
        KeyCode::Up => state.previous(),
        _ => {}
    }
    None
}
