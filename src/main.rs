use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use tracing::{info, warn};
use tui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};

use fee_ledger::api::{FakeStudentApi, HttpStudentApi, StudentApi, StudentQuery};
use fee_ledger::cli::{Args, Command};
use fee_ledger::config::{self, Config, StorageBackend};
use fee_ledger::db;
use fee_ledger::error::LedgerError;
use fee_ledger::ledger::{LedgerOptions, LedgerStore, ReconcileOutcome};
use fee_ledger::models::{FeeRecord, Student};
use fee_ledger::storage::{FileStorage, LedgerStorage, MemoryStorage};
use fee_ledger::telemetry;
use fee_ledger::ui::{
    dashboard::{handle_input as handle_dashboard_input, render_dashboard, DashboardAction, DashboardState},
    fee_form::{handle_input as handle_fee_form_input, render_fee_form, FeeFormAction, FeeFormState},
    fees::{handle_input as handle_fees_input, render_fees, FeesAction, FeesState},
};

const TICK: Duration = Duration::from_millis(250);
const DEFAULT_TUI_LOG: &str = "fee-ledger.log";

// Represents the current screen in the app
#[derive(Clone, Copy, PartialEq, Eq)]
enum AppScreen {
    Dashboard,
    Fees,
    FeeForm,
}

// Main application state
struct AppState {
    store: LedgerStore,
    screen: AppScreen,
    students: Vec<Student>,
    dashboard_state: Option<DashboardState>,
    fees_state: Option<FeesState>,
    fee_form_state: Option<FeeFormState>,
    /// Set by the ledger subscription, cleared when views are rebuilt
    dirty: Arc<AtomicBool>,
}

impl AppState {
    fn new(store: LedgerStore) -> Self {
        Self {
            store,
            screen: AppScreen::Dashboard,
            students: Vec::new(),
            dashboard_state: None,
            fees_state: None,
            fee_form_state: None,
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    fn refresh_views(&mut self) {
        if let Some(state) = &mut self.dashboard_state {
            state.refresh(&self.store.summary(), &self.students);
        }
        if let Some(state) = &mut self.fees_state {
            state.refresh(&self.store);
        }
    }

    fn dashboard_status(&mut self, status: impl Into<String>) {
        if let Some(state) = &mut self.dashboard_state {
            state.set_status(status);
        }
    }

    fn fees_status(&mut self, status: impl Into<String>) {
        if let Some(state) = &mut self.fees_state {
            state.set_status(status);
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command();

    // The TUI owns the terminal, so its logs always go to a file
    let log_file = match (&command, &args.log_file) {
        (_, Some(path)) => Some(path.clone()),
        (Command::Tui, None) => Some(DEFAULT_TUI_LOG.into()),
        _ => None,
    };
    // Load configuration first so RUST_LOG from .env reaches the filter
    let config = config::init()?;
    telemetry::init(args.verbose, log_file.as_deref())?;

    let store = open_store(&config, args.offline).await?;

    match command {
        Command::Tui => run_tui(store, &config).await,
        Command::Summary => {
            print_summary(&store);
            Ok(())
        }
        Command::Reconcile { student } => reconcile(&store, student.as_deref()).await,
        Command::Retry => {
            let results = store.retry_pending().await;
            if results.is_empty() {
                println!("Nothing to sync");
            }
            for (student_id, result) in results {
                match result {
                    Ok(fees) => println!(
                        "{}: synced (total {:.2}, paid {:.2}, balance {:.2})",
                        student_id, fees.total_fees, fees.paid_fees, fees.balance_fees
                    ),
                    Err(err) => println!("{}: {}", student_id, err),
                }
            }
            Ok(())
        }
        Command::RefreshOverdue => {
            let changed = store.refresh_overdue(today()).await?;
            println!("{} fee record(s) marked overdue", changed);
            Ok(())
        }
    }
}

async fn open_storage(config: &Config) -> Result<Arc<dyn LedgerStorage>> {
    let storage: Arc<dyn LedgerStorage> = match config.ledger_backend {
        StorageBackend::File => Arc::new(FileStorage::open(&config.ledger_dir).await?),
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is not set")?;
            Arc::new(db::init(url).await?)
        }
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };
    info!(backend = ?config.ledger_backend, "ledger storage ready");
    Ok(storage)
}

async fn open_store(config: &Config, offline: bool) -> Result<LedgerStore> {
    let storage = open_storage(config).await?;
    let options = LedgerOptions {
        key: config.ledger_key.clone(),
        retry: config.retry_policy(),
    };

    if !offline {
        let api = HttpStudentApi::new(
            &config.api_base_url,
            config.api_token.clone(),
            config.request_timeout(),
        )?;
        info!(base_url = api.base_url(), "using school backend");
        return Ok(LedgerStore::open(storage, Arc::new(api), options).await?);
    }

    // Offline: a local backend that already agrees with the ledger
    let fake = Arc::new(FakeStudentApi::new());
    let api: Arc<dyn StudentApi> = fake.clone();
    let store = LedgerStore::open(storage, api, options).await?;
    for student in store.summary().students {
        fake.put_student(Student {
            id: student.student_id,
            name: student.student_name,
            section: student.section,
            fees: student.aggregate.to_student_fees(0.0),
        });
    }
    warn!("offline mode, fee totals are not sent to the school backend");
    Ok(store)
}

fn print_summary(store: &LedgerStore) {
    let summary = store.summary();
    println!(
        "{:<24} {:<8} {:>5} {:>12} {:>12} {:>12}  {}",
        "Student", "Section", "Fees", "Total", "Paid", "Balance", "Sync"
    );
    for student in &summary.students {
        println!(
            "{:<24} {:<8} {:>5} {:>12.2} {:>12.2} {:>12.2}  {}",
            student.student_name,
            student.section,
            student.record_count,
            student.aggregate.total,
            student.aggregate.paid,
            student.aggregate.balance,
            if student.pending_sync { "unsynced" } else { "ok" }
        );
    }
    println!(
        "{:<24} {:<8} {:>5} {:>12.2} {:>12.2} {:>12.2}",
        "All students",
        "",
        "",
        summary.totals.total,
        summary.totals.paid,
        summary.totals.balance
    );
}

async fn reconcile(store: &LedgerStore, student: Option<&str>) -> Result<()> {
    if let Some(student_id) = student {
        match store.reconcile_student(student_id).await? {
            ReconcileOutcome::InSync => println!("{}: in sync", student_id),
            ReconcileOutcome::Corrected { server, ledger } => println!(
                "{}: corrected total {:.2} -> {:.2}, paid {:.2} -> {:.2}, balance {:.2} -> {:.2}",
                student_id,
                server.total_fees,
                ledger.total_fees,
                server.paid_fees,
                ledger.paid_fees,
                server.balance_fees,
                ledger.balance_fees
            ),
        }
        return Ok(());
    }

    let report = store.reconcile_all().await;
    println!(
        "Checked {} student(s): {} in sync, {} corrected, {} failed",
        report.checked(),
        report.in_sync.len(),
        report.corrected.len(),
        report.failed.len()
    );
    for (student_id, err) in &report.failed {
        println!("  {}: {}", student_id, err);
    }
    Ok(())
}

async fn run_tui(store: LedgerStore, config: &Config) -> Result<()> {
    let reconciler = config
        .reconcile_interval()
        .map(|period| store.spawn_periodic_reconcile(period));

    match store.refresh_overdue(today()).await {
        Ok(0) => {}
        Ok(changed) => info!(changed, "fees past due marked overdue at startup"),
        Err(err) => warn!(error = %err, "could not refresh overdue fees"),
    }

    let mut app_state = AppState::new(store);
    let dirty = app_state.dirty.clone();
    let subscription = app_state.store.subscribe(move |_| dirty.store(true, Ordering::Release));

    load_dashboard_screen(&mut app_state).await;

    // Setup terminal
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the main app loop
    let result = run_app(&mut terminal, &mut app_state).await;

    // Restore terminal
    terminal::disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    subscription.unsubscribe();
    if let Some(task) = reconciler {
        task.abort();
    }

    // Show any error message
    if let Err(err) = &result {
        println!("Error: {}", err);
    }

    let unsynced = app_state.store.unsynced_students();
    if !unsynced.is_empty() {
        println!(
            "{} student(s) still have fee changes the server has not received; they will be retried on the next start",
            unsynced.len()
        );
    }

    result
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app_state: &mut AppState) -> Result<()> {
    loop {
        if app_state.dirty.swap(false, Ordering::AcqRel) {
            app_state.refresh_views();
        }

        // Render current screen
        terminal.draw(|f| match app_state.screen {
            AppScreen::Dashboard => {
                if let Some(state) = &mut app_state.dashboard_state {
                    render_dashboard(f, state);
                }
            }
            AppScreen::Fees => {
                if let Some(state) = &mut app_state.fees_state {
                    render_fees(f, state);
                }
            }
            AppScreen::FeeForm => {
                if let Some(state) = &app_state.fee_form_state {
                    render_fee_form(f, state);
                }
            }
        })?;

        // Wake up regularly so background syncs show up without a key press
        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        // Handle input for current screen
        let should_quit = match app_state.screen {
            AppScreen::Dashboard => handle_dashboard_screen(app_state, key.code).await,
            AppScreen::Fees => handle_fees_screen(app_state, key.code).await,
            AppScreen::FeeForm => handle_fee_form_screen(app_state, key.code).await,
        };

        if should_quit {
            break;
        }
    }

    Ok(())
}

/// Backend student list; the dashboard still works from the ledger alone when it fails
async fn load_students(app_state: &mut AppState) -> Option<String> {
    match app_state.store.students(&StudentQuery::default()).await {
        Ok(students) => {
            app_state.students = students;
            None
        }
        Err(err) => {
            warn!(error = %err, "could not load students from backend");
            Some(format!("Backend unavailable: {}", err))
        }
    }
}

async fn load_dashboard_screen(app_state: &mut AppState) {
    let status = load_students(app_state).await;

    let summary = app_state.store.summary();
    let mut state = DashboardState::new(&summary, &app_state.students);
    if let Some(status) = status {
        state.set_status(status);
    }
    app_state.dashboard_state = Some(state);
    app_state.fees_state = None;
    app_state.screen = AppScreen::Dashboard;
}

fn open_fees_screen(app_state: &mut AppState, student_id: &str, name: &str, section: &str) {
    let snapshot = app_state.store.snapshot(student_id);
    app_state.fees_state = Some(FeesState::new(name, section, snapshot));
    app_state.screen = AppScreen::Fees;
}

fn back_to_fees(app_state: &mut AppState, status: Option<String>) {
    app_state.fee_form_state = None;
    if let Some(state) = &mut app_state.fees_state {
        state.refresh(&app_state.store);
        if let Some(status) = status {
            state.set_status(status);
        }
    }
    app_state.screen = AppScreen::Fees;
}

/// Status line for a finished mutation
fn outcome_message(
    store: &LedgerStore,
    verb: &str,
    result: &Result<FeeRecord, LedgerError>,
) -> String {
    match result {
        Ok(record) if store.snapshot(&record.student_id).pending_sync => {
            format!("{}; server update pending, retrying in background", verb)
        }
        Ok(_) => verb.to_string(),
        Err(err) => format!("Error: {}", err),
    }
}

async fn handle_dashboard_screen(app_state: &mut AppState, key: KeyCode) -> bool {
    let Some(state) = &mut app_state.dashboard_state else {
        return false;
    };

    match handle_dashboard_input(state, key) {
        Some(DashboardAction::Exit) => return true,
        Some(DashboardAction::Open(row)) => {
            open_fees_screen(app_state, &row.student_id, &row.name, &row.section);
        }
        Some(DashboardAction::ReconcileAll) => {
            let report = app_state.store.reconcile_all().await;
            app_state.refresh_views();
            app_state.dashboard_status(format!(
                "Reconciled {} student(s): {} corrected, {} failed",
                report.checked(),
                report.corrected.len(),
                report.failed.len()
            ));
        }
        Some(DashboardAction::RetryPending) => {
            let results = app_state.store.retry_pending().await;
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            app_state.refresh_views();
            app_state.dashboard_status(format!(
                "Synced {} of {} student(s)",
                results.len() - failed,
                results.len()
            ));
        }
        Some(DashboardAction::Reload) => {
            let status = load_students(app_state).await;
            app_state.refresh_views();
            app_state.dashboard_status(status.unwrap_or_else(|| "Reloaded".to_string()));
        }
        None => {}
    }

    false
}

async fn handle_fees_screen(app_state: &mut AppState, key: KeyCode) -> bool {
    let Some(state) = &mut app_state.fees_state else {
        return false;
    };
    let student_id = state.student_id().to_string();

    match handle_fees_input(state, key) {
        Some(FeesAction::Back) => {
            app_state.fees_state = None;
            app_state.refresh_views();
            app_state.screen = AppScreen::Dashboard;
        }
        Some(FeesAction::NewFee) => {
            let form = FeeFormState::new(&student_id, state.student_name(), state.section(), today());
            app_state.fee_form_state = Some(form);
            app_state.screen = AppScreen::FeeForm;
        }
        Some(FeesAction::EditFee(id)) => match app_state.store.record(&id) {
            Some(record) => {
                app_state.fee_form_state = Some(FeeFormState::from_existing(&record));
                app_state.screen = AppScreen::FeeForm;
            }
            None => app_state.fees_status("That fee no longer exists"),
        },
        Some(FeesAction::MarkPaid(id)) => {
            let result = app_state.store.mark_paid(&id, today()).await;
            let status = outcome_message(&app_state.store, "Marked paid", &result);
            app_state.refresh_views();
            app_state.fees_status(status);
        }
        Some(FeesAction::DeleteFee(id)) => {
            let result = app_state.store.remove(&id).await;
            let status = match &result {
                Ok(_) if app_state.store.snapshot(&student_id).pending_sync => {
                    "Deleted; server update pending, retrying in background".to_string()
                }
                Ok(_) => "Deleted".to_string(),
                Err(err) => format!("Error: {}", err),
            };
            app_state.refresh_views();
            app_state.fees_status(status);
        }
        Some(FeesAction::Reconcile) => {
            let status = match app_state.store.reconcile_student(&student_id).await {
                Ok(ReconcileOutcome::InSync) => "Server totals match".to_string(),
                Ok(ReconcileOutcome::Corrected { server, ledger }) => format!(
                    "Server total corrected from {:.2} to {:.2}",
                    server.total_fees, ledger.total_fees
                ),
                Err(err) => format!("Error: {}", err),
            };
            app_state.refresh_views();
            app_state.fees_status(status);
        }
        Some(FeesAction::RetrySync) => {
            let results = app_state.store.retry_pending().await;
            let status = match results.iter().find(|(id, _)| *id == student_id) {
                Some((_, Ok(_))) => "Synced".to_string(),
                Some((_, Err(err))) => format!("Error: {}", err),
                None => "Nothing to sync".to_string(),
            };
            app_state.refresh_views();
            app_state.fees_status(status);
        }
        None => {}
    }

    false
}

async fn handle_fee_form_screen(app_state: &mut AppState, key: KeyCode) -> bool {
    let Some(state) = &mut app_state.fee_form_state else {
        return false;
    };

    match handle_fee_form_input(state, key) {
        Some(FeeFormAction::Cancel) => back_to_fees(app_state, None),
        Some(FeeFormAction::Create(input)) => {
            let result = app_state.store.append(input).await;
            let status = outcome_message(&app_state.store, "Fee added", &result);
            back_to_fees(app_state, Some(status));
        }
        Some(FeeFormAction::Update(id, patch)) => {
            let result = app_state.store.update(&id, patch).await;
            let status = outcome_message(&app_state.store, "Fee updated", &result);
            back_to_fees(app_state, Some(status));
        }
        None => {}
    }

    false
}
