use std::collections::BTreeMap;

use crossterm::event::KeyCode;
use tui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame,
};

use crate::ledger::{FeeAggregate, LedgerSummary};
use crate::models::{Student, StudentFeeAggregate};

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRow {
    pub student_id: String,
    pub name: String,
    pub section: String,
    pub record_count: usize,
    pub ledger: FeeAggregate,
    /// What the backend last reported, if the student was listed
    pub server: Option<StudentFeeAggregate>,
    pub pending_sync: bool,
}

impl DashboardRow {
    pub fn server_disagrees(&self) -> bool {
        self.server
            .is_some_and(|server| !server.agrees_with(&self.ledger))
    }
}

/// Students with ledger records, plus backend students that have none yet
pub fn build_rows(summary: &LedgerSummary, students: &[Student]) -> Vec<DashboardRow> {
    let mut rows: BTreeMap<String, DashboardRow> = summary
        .students
        .iter()
        .map(|s| {
            (
                s.student_id.clone(),
                DashboardRow {
                    student_id: s.student_id.clone(),
                    name: s.student_name.clone(),
                    section: s.section.clone(),
                    record_count: s.record_count,
                    ledger: s.aggregate,
                    server: None,
                    pending_sync: s.pending_sync,
                },
            )
        })
        .collect();

    for student in students {
        let row = rows
            .entry(student.id.clone())
            .or_insert_with(|| DashboardRow {
                student_id: student.id.clone(),
                name: student.name.clone(),
                section: student.section.clone(),
                record_count: 0,
                ledger: FeeAggregate::default(),
                server: None,
                pending_sync: false,
            });
        row.server = Some(student.fees);
    }

    let mut rows: Vec<DashboardRow> = rows.into_values().collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.student_id.cmp(&b.student_id)));
    rows
}

pub enum DashboardAction {
    Exit,
    Open(DashboardRow),
    ReconcileAll,
    RetryPending,
    Reload,
}

pub struct DashboardState {
    rows: Vec<DashboardRow>,
    totals: FeeAggregate,
    unsynced: usize,
    table_state: TableState,
    status: Option<String>,
}

impl DashboardState {
    pub fn new(summary: &LedgerSummary, students: &[Student]) -> Self {
        let mut state = Self {
            rows: Vec::new(),
            totals: FeeAggregate::default(),
            unsynced: 0,
            table_state: TableState::default(),
            status: None,
        };
        state.refresh(summary, students);
        state
    }

    /// Rebuild rows from a fresh summary, keeping the selection where possible
    pub fn refresh(&mut self, summary: &LedgerSummary, students: &[Student]) {
        let selected = self.selected_row().map(|r| r.student_id.clone());
        self.rows = build_rows(summary, students);
        self.totals = summary.totals;
        self.unsynced = summary.unsynced_students();

        let index = selected
            .and_then(|id| self.rows.iter().position(|r| r.student_id == id))
            .or(if self.rows.is_empty() { None } else { Some(0) });
        self.table_state.select(index);
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = Some(status.into());
    }

    pub fn next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(i) if i + 1 < self.rows.len() => i + 1,
            _ => 0,
        };
        self.table_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let i = match self.table_state.selected() {
            Some(0) | None => self.rows.len() - 1,
            Some(i) => i - 1,
        };
        self.table_state.select(Some(i));
    }

    pub fn selected_row(&self) -> Option<&DashboardRow> {
        self.table_state.selected().and_then(|i| self.rows.get(i))
    }
}

pub fn render_dashboard<B: Backend>(frame: &mut Frame<B>, state: &mut DashboardState) {
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

    let mut totals_text = format!(
        "Total {:.2} | Paid {:.2} | Balance {:.2}",
        state.totals.total, state.totals.paid, state.totals.balance
    );
    if state.unsynced > 0 {
        totals_text.push_str(&format!(" | {} student(s) with unsynced changes", state.unsynced));
    }
    let totals_style = if state.unsynced > 0 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let totals = Paragraph::new(totals_text)
        .style(totals_style)
        .block(Block::default().title("Fees Dashboard").borders(Borders::ALL));
    frame.render_widget(totals, chunks[0]);

    let header_cells = ["Student", "Section", "Fees", "Total", "Paid", "Balance", "Sync"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows = state.rows.iter().map(|row| {
        let sync = if row.pending_sync {
            "unsynced"
        } else if row.server_disagrees() {
            "mismatch"
        } else {
            "ok"
        };
        let cells = vec![
            Cell::from(row.name.clone()),
            Cell::from(row.section.clone()),
            Cell::from(row.record_count.to_string()),
            Cell::from(format!("{:.2}", row.ledger.total)),
            Cell::from(format!("{:.2}", row.ledger.paid)),
            Cell::from(format!("{:.2}", row.ledger.balance)),
            Cell::from(sync),
        ];
        Row::new(cells).height(1)
    });

    let table = Table::new(rows)
        .header(header)
        .block(Block::default().title("Students").borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .widths(&[
            Constraint::Percentage(25),
            Constraint::Percentage(10),
            Constraint::Percentage(8),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
            Constraint::Percentage(12),
        ]);
    frame.render_stateful_widget(table, chunks[1], &mut state.table_state);

    let footer = match &state.status {
        Some(status) => format!("{} | <Enter> Open | <C> Reconcile | <S> Sync now | <L> Reload | <Q> Quit", status),
        None => "<Enter> Open | <C> Reconcile | <S> Sync now | <L> Reload | <Q> Quit".to_string(),
    };
    let buttons = Paragraph::new(footer)
        .block(Block::default().borders(Borders::TOP))
        .style(Style::default().fg(Color::White));
    frame.render_widget(buttons, chunks[2]);
}

pub fn handle_input(state: &mut DashboardState, key: KeyCode) -> Option<DashboardAction> {
    match key {
        KeyCode::Char('q') | KeyCode::Esc => return Some(DashboardAction::Exit),
        KeyCode::Down => state.next(),
        KeyCode::Up => state.previous(),
        KeyCode::Enter => {
            if let Some(row) = state.selected_row() {
                return Some(DashboardAction::Open(row.clone()));
            }
        }
        KeyCode::Char('c') => return Some(DashboardAction::ReconcileAll),
        KeyCode::Char('s') => return Some(DashboardAction::RetryPending),
        KeyCode::Char('l') => return Some(DashboardAction::Reload),
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::StudentSummary;

    fn summary() -> LedgerSummary {
        LedgerSummary {
            students: vec![StudentSummary {
                student_id: "S1".into(),
                student_name: "Zara".into(),
                section: "A".into(),
                record_count: 2,
                aggregate: FeeAggregate { total: 700.0, paid: 200.0, balance: 500.0 },
                pending_sync: true,
            }],
            totals: FeeAggregate { total: 700.0, paid: 200.0, balance: 500.0 },
            version: 3,
        }
    }

    fn student(id: &str, name: &str, total: f64) -> Student {
        Student {
            id: id.into(),
            name: name.into(),
            section: "A".into(),
            fees: StudentFeeAggregate {
                total_fees: total,
                paid_fees: 0.0,
                balance_fees: total,
                transport_fees: 0.0,
            },
        }
    }

    #[test]
    fn merges_backend_students_without_records() {
        let rows = build_rows(&summary(), &[student("S2", "Asha", 0.0)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Asha");
        assert_eq!(rows[0].record_count, 0);
        assert_eq!(rows[1].student_id, "S1");
        assert!(rows[1].pending_sync);
        assert!(rows[1].server.is_none());
    }

    #[test]
    fn flags_server_totals_that_disagree() {
        let rows = build_rows(&summary(), &[student("S1", "Zara", 650.0)]);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].server_disagrees());
    }

    #[test]
    fn refresh_keeps_the_selected_student() {
        let mut state = DashboardState::new(&summary(), &[student("S2", "Asha", 0.0)]);
        state.next();
        assert_eq!(state.selected_row().map(|r| r.student_id.as_str()), Some("S1"));

        state.refresh(&summary(), &[student("S2", "Asha", 0.0), student("S0", "Aaron", 0.0)]);
        assert_eq!(state.selected_row().map(|r| r.student_id.as_str()), Some("S1"));
    }
}
