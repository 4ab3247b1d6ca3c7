// Output formatting and display for CLI

use crate::ipc::protocol::ResponseData;
use crate::process::{AppStatus, LifecycleState};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started { name } => {
            println!("{}", format!("✓ {} started", name).green().bold());
        }

        ResponseData::Stopped { name } => {
            println!("{}", format!("✓ {} stopped", name).green().bold());
        }

        ResponseData::Restarted { name } => {
            println!("{}", format!("✓ {} restarted", name).green().bold());
        }

        ResponseData::Reset { name } => {
            println!(
                "{}",
                format!("✓ {} reset, restart count cleared", name)
                    .green()
                    .bold()
            );
        }

        ResponseData::Status(status) => print_detailed_status(status),

        ResponseData::AppList(apps) => {
            if apps.is_empty() {
                println!("{}", "No apps are configured".yellow());
            } else {
                print_app_table(apps);
            }
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print a formatted table of apps
fn print_app_table(apps: &[AppStatus]) {
    #[derive(Tabled)]
    struct AppRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
    }

    let rows: Vec<AppRow> = apps
        .iter()
        .map(|app| AppRow {
            name: truncate(&app.name, 20),
            state: format_state_colored(app.state),
            pid: app
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: app
                .memory_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            uptime: app
                .uptime
                .as_ref()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            restarts: app.restart_count.to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} app(s)", apps.len()).dimmed().italic()
    );
}

/// Print detailed status view for a single app
fn print_detailed_status(app: &AppStatus) {
    println!("\n{}", "App Details".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), app.name.cyan());
    println!("  {:<15} {}", "State:".bold(), format_state_colored(app.state));

    if let Some(pid) = app.pid {
        println!("  {:<15} {}", "PID:".bold(), pid);
    }
    if let Some(ref uptime) = app.uptime {
        println!("  {:<15} {}", "Uptime:".bold(), format_duration(uptime));
    }
    if let Some(bytes) = app.memory_bytes {
        println!("  {:<15} {}", "Memory:".bold(), format_memory(bytes));
    }

    println!("  {:<15} {}", "Restarts:".bold(), app.restart_count);

    if let Some(code) = app.last_exit_code {
        println!("  {:<15} {}", "Last Exit:".bold(), code);
    }
    if let Some(ref error) = app.last_error {
        println!("  {:<15} {}", "Last Error:".bold(), error.red());
    }

    println!();
}

/// Format a lifecycle state with color coding
fn format_state_colored(state: LifecycleState) -> String {
    let text = state.to_string();
    match state {
        LifecycleState::Running => text.green().to_string(),
        LifecycleState::Starting | LifecycleState::Stopping | LifecycleState::RestartPending => {
            text.yellow().to_string()
        }
        LifecycleState::Stopped => text.bright_black().to_string(),
        LifecycleState::PermanentlyStopped => text.red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Create a spinner for operations that wait on a child
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2048), "2.0KB");
        assert_eq!(format_memory(2 * 1024 * 1024), "2.0MB");
        assert_eq!(format_memory(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
    }

    #[test]
    fn test_state_text_is_kept() {
        colored::control::set_override(false);
        assert_eq!(
            format_state_colored(LifecycleState::PermanentlyStopped),
            "stopped-permanently"
        );
        assert_eq!(format_state_colored(LifecycleState::RestartPending), "restart-pending");
    }
}
