//! Line-oriented front-end for the headless client.
//!
//! Reads commands from stdin and renders toasts/alerts to stdout as the
//! engine's observables change.

use std::collections::BTreeSet;
use std::io::BufRead;

use tokio::sync::mpsc;

use bulletin_common::types::{IdentityScope, NotificationCounts, NotificationRecord};
use bulletin_engine::{EngineOutputs, Observable};

use crate::scheduler::SchedulerHandle;

pub const HELP: &str = "commands: <enter>|dismiss, login <id>, logout, history, read, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Dismiss,
    Login(String),
    Logout,
    History,
    MarkRead,
    Quit,
    Unknown(String),
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(w, r)| (w, r.trim()))
            .unwrap_or((line, ""));

        match (word.to_ascii_lowercase().as_str(), rest) {
            ("" | "dismiss" | "ok", _) => ConsoleInput::Dismiss,
            ("login", id) if !id.is_empty() => ConsoleInput::Login(id.to_string()),
            ("logout", _) => ConsoleInput::Logout,
            ("history" | "h", _) => ConsoleInput::History,
            ("read", _) => ConsoleInput::MarkRead,
            ("quit" | "exit" | "q", _) => ConsoleInput::Quit,
            _ => ConsoleInput::Unknown(line.to_string()),
        }
    }
}

pub fn format_toast(record: &NotificationRecord) -> String {
    format!("[toast #{}] {}: {}", record.id, record.title, record.content)
}

pub fn format_alert(record: &NotificationRecord) -> String {
    format!(
        "[ALERT #{}] {}\n  {}\n  (from {}; press Enter to dismiss)",
        record.id, record.title, record.content, record.created_by
    )
}

pub fn format_history_line(record: &NotificationRecord) -> String {
    format!(
        "#{:<5} {} {:<5} {} (by {})",
        record.id,
        record.created_at_utc().format("%Y-%m-%d %H:%M:%S"),
        record.delivery_type,
        record.title,
        record.created_by
    )
}

pub fn format_counts(counts: NotificationCounts) -> String {
    format!("{} notices, {} unread", counts.total, counts.unread)
}

/// Forward stdin lines from a dedicated thread.
///
/// Tokio's stdin blocks runtime shutdown while a read is pending, so the
/// blocking read lives on its own detached thread instead.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    });
    rx
}

/// Apply console lines until EOF or `quit`, then stop the scheduler.
pub async fn read_commands(
    mut lines: mpsc::UnboundedReceiver<String>,
    handle: SchedulerHandle,
    identity: Observable<IdentityScope>,
) {
    println!("{HELP}");

    while let Some(line) = lines.recv().await {
        match ConsoleInput::parse(&line) {
            ConsoleInput::Dismiss => handle.dismiss_alert(),
            ConsoleInput::Login(id) => identity.set(IdentityScope::User(id)),
            ConsoleInput::Logout => identity.set(IdentityScope::Guest),
            ConsoleInput::History => {
                let history = handle.history().await;
                if history.is_empty() {
                    println!("No notifications yet.");
                }
                for record in &history {
                    println!("{}", format_history_line(record));
                }
            }
            ConsoleInput::MarkRead => handle.mark_read(),
            ConsoleInput::Quit => break,
            ConsoleInput::Unknown(input) => println!("unknown command {input:?}; {HELP}"),
        }
    }

    handle.shutdown();
}

/// Print toasts as they appear, the active alert whenever it changes, and
/// the unread badge.
pub async fn render(outputs: EngineOutputs) {
    let mut toasts = outputs.toasts.subscribe();
    let mut alert = outputs.active_alert.subscribe();
    let mut counts = outputs.counts.subscribe();
    let mut shown: BTreeSet<u64> = BTreeSet::new();

    loop {
        tokio::select! {
            changed = toasts.changed() => {
                if changed.is_err() {
                    break;
                }
                let visible = toasts.borrow_and_update().clone();
                for record in new_toasts(&shown, &visible) {
                    println!("{}", format_toast(record));
                }
                shown = visible.iter().map(|r| r.id).collect();
            }
            changed = alert.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(record) = alert.borrow_and_update().as_ref() {
                    println!("{}", format_alert(record));
                }
            }
            changed = counts.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *counts.borrow_and_update();
                if current.unread > 0 {
                    println!("({})", format_counts(current));
                }
            }
        }
    }
}

/// Toasts in `visible` that were not on screen before.
fn new_toasts<'a>(
    shown: &BTreeSet<u64>,
    visible: &'a [NotificationRecord],
) -> impl Iterator<Item = &'a NotificationRecord> {
    visible.iter().filter(|r| !shown.contains(&r.id))
}
