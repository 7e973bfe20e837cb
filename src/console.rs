//! Line-oriented operator surface.
//!
//! Each stdin line is either a `:command` or, while a session is running, a
//! scanned barcode. Keyboard-wedge scanners type the code followed by Enter,
//! so one line is one scan.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    db::TargetScanStyle,
    experiment::ExperimentMode,
    ledger::ExportOutcome,
    log_error, log_warn, AppState,
};

const ENABLE_LOGS: bool = true;

const HELP: &str = "\
commands:
  :user <name>       set operator name
  :style <style>     compliant | non_compliant (anything else clears it)
  :cluster <n>       expected cluster size (blank or invalid clears it)
  :start             start an experiment
  :complete          finish the experiment and save its scans
  :status            show the current session
  :stats             show stored totals
  :export            write all stored scans to CSV
  :reset             clear the form including the operator name
  :delete            permanently delete all stored scans
  :quit              exit
while running, any other non-blank line is recorded as a scan (prefix '::' for a leading ':')";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    UserName(String),
    Style(Option<TargetScanStyle>),
    ClusterSize(Option<u64>),
    Start,
    Complete,
    Status,
    Stats,
    Export,
    Reset,
    DeleteAll,
    Help,
    Quit,
    Scan(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(String),
    Silent,
    Quit,
}

pub fn parse_target_scan_style(value: &str) -> Option<TargetScanStyle> {
    value.trim().parse().ok()
}

pub fn parse_cluster_size(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// Parses one input line with its terminator already removed.
pub fn parse_line(line: &str) -> ConsoleCommand {
    if let Some(rest) = line.strip_prefix("::") {
        return ConsoleCommand::Scan(format!(":{rest}"));
    }
    let Some(command) = line.strip_prefix(':') else {
        return ConsoleCommand::Scan(line.to_string());
    };

    let (name, argument) = match command.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (command, ""),
    };

    match name {
        "user" => ConsoleCommand::UserName(argument.to_string()),
        "style" => ConsoleCommand::Style(parse_target_scan_style(argument)),
        "cluster" => ConsoleCommand::ClusterSize(parse_cluster_size(argument)),
        "start" => ConsoleCommand::Start,
        "complete" => ConsoleCommand::Complete,
        "status" => ConsoleCommand::Status,
        "stats" => ConsoleCommand::Stats,
        "export" => ConsoleCommand::Export,
        "reset" => ConsoleCommand::Reset,
        "delete" => ConsoleCommand::DeleteAll,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => ConsoleCommand::Unknown(other.to_string()),
    }
}

fn strip_line_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

pub struct Console {
    state: AppState,
}

impl Console {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn handle(&self, command: ConsoleCommand) -> Result<Reply> {
        let experiment = &self.state.experiment;

        let reply = match command {
            ConsoleCommand::UserName(name) => {
                experiment.update_user_name(&name)?;
                Reply::Message(format!("operator: {name}"))
            }
            ConsoleCommand::Style(style) => {
                experiment.update_target_scan_style(style);
                Reply::Message(format!(
                    "style: {}",
                    style.map(|s| s.as_str()).unwrap_or("unset")
                ))
            }
            ConsoleCommand::ClusterSize(size) => {
                experiment.update_target_cluster_size(size);
                Reply::Message(format!(
                    "cluster size: {}",
                    size.map(|s| s.to_string()).unwrap_or_else(|| "none".into())
                ))
            }
            ConsoleCommand::Start => match experiment.start_experiment() {
                Some(experiment_id) => Reply::Message(format!("experiment {experiment_id} running")),
                None => Reply::Message("cannot start: operator, style and cluster size are required".into()),
            },
            ConsoleCommand::Complete => {
                let saved = self.state.complete_and_save().await?;
                if saved > 0 {
                    Reply::Message(format!("Experiment completed. {saved} scans saved."))
                } else {
                    Reply::Message("Experiment completed. No scans recorded.".into())
                }
            }
            ConsoleCommand::Status => {
                let snapshot = experiment.snapshot();
                Reply::Message(serde_json::to_string_pretty(&snapshot)?)
            }
            ConsoleCommand::Stats => {
                let stats = self.state.ledger.statistics().await?;
                Reply::Message(format!(
                    "stored scans: {}, experiments: {}",
                    stats.total_scans, stats.total_experiments
                ))
            }
            ConsoleCommand::Export => match self.state.ledger.export_to_csv().await? {
                ExportOutcome::NothingToExport => Reply::Message("No data to export".into()),
                ExportOutcome::Written { path, rows } => {
                    Reply::Message(format!("exported {rows} scans to {}", path.display()))
                }
            },
            ConsoleCommand::Reset => {
                experiment.reset_form()?;
                Reply::Message("form cleared".into())
            }
            ConsoleCommand::DeleteAll => {
                self.state.delete_all_data().await?;
                Reply::Message("All data deleted.".into())
            }
            ConsoleCommand::Help => Reply::Message(HELP.into()),
            ConsoleCommand::Quit => Reply::Quit,
            ConsoleCommand::Scan(barcode) => {
                if experiment.mode() != ExperimentMode::Running || barcode.trim().is_empty() {
                    Reply::Silent
                } else {
                    match experiment.record_scan(&barcode) {
                        // Stands in for the spoken scan count.
                        Some(record) => Reply::Message(format!("{}", record.scan_index + 1)),
                        None => Reply::Silent,
                    }
                }
            }
            ConsoleCommand::Unknown(name) => {
                Reply::Message(format!("unknown command ':{name}', try :help"))
            }
        };

        Ok(reply)
    }

    /// Reads stdin until EOF or `:quit`. Failed commands are reported and the
    /// loop continues.
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");

        while let Some(line) = lines.next_line().await? {
            let command = parse_line(strip_line_terminator(&line));
            match self.handle(command).await {
                Ok(Reply::Message(message)) => println!("{message}"),
                Ok(Reply::Silent) => {}
                Ok(Reply::Quit) => break,
                Err(err) => {
                    log_error!("Command failed: {err:#}");
                    println!("error: {err:#}");
                }
            }
        }

        if self.state.experiment.mode() == ExperimentMode::Running {
            log_warn!(
                "Exiting with {} unsaved scans in the running experiment",
                self.state.experiment.scan_count()
            );
        }
        Ok(())
    }
}
