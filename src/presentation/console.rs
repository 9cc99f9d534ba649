//! Terminal observer for a control run.
//!
//! Drains the [`AppEvent`] stream and renders it as a progress bar with
//! status lines printed above it.

use crate::domain::models::{AppEvent, MessageSeverity, NotificationRecord, StatusMessage};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {msg}";

pub struct ConsoleReporter {
    bar: ProgressBar,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }

    /// A reporter that renders nothing; used when stdout is not wanted.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Consume events until the run reports completion or the sender goes
    /// away. Returns the reported outcome, if any.
    pub async fn drain(self, mut events: UnboundedReceiver<AppEvent>) -> Option<bool> {
        while let Some(event) = events.recv().await {
            if let Some(success) = self.handle(event) {
                return Some(success);
            }
        }
        self.bar.abandon();
        None
    }

    fn handle(&self, event: AppEvent) -> Option<bool> {
        match event {
            AppEvent::LogMessage(message) => {
                self.bar.println(format_status(&message));
                if message.severity != MessageSeverity::Error {
                    self.bar.set_message(message.message);
                }
            }
            AppEvent::Progress(percent) => self.bar.set_position(u64::from(percent)),
            AppEvent::StateChanged(state) => self.bar.set_message(state.to_string()),
            AppEvent::DeviceFound(device) => {
                self.bar.println(format!("       {} ({})", device.name, device.id));
            }
            AppEvent::Notification(record) => self.bar.println(format_notification(&record)),
            AppEvent::Finished { success } => {
                if success {
                    self.bar.finish_with_message("done");
                } else {
                    self.bar.abandon_with_message("failed");
                }
                return Some(success);
            }
        }
        None
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_status(message: &StatusMessage) -> String {
    let tag = match message.severity {
        MessageSeverity::Info => "[info]",
        MessageSeverity::Success => "[ ok ]",
        MessageSeverity::Warning => "[warn]",
        MessageSeverity::Error => "[fail]",
    };
    format!("{} {}", tag, message.message)
}

pub fn format_notification(record: &NotificationRecord) -> String {
    format!(
        "       device {} firmware {} {}",
        record.device_name(),
        record.firmware_title(),
        record.firmware_version()
    )
}
