use std::io::{self, Write};

use serde::Serialize;

use crate::refresh::RefreshSummary;
use crate::scan::ScanReport;
use crate::task::{Outcome, TaskStatus};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Serialize)]
pub struct TaskReport<'a, T: Serialize> {
    pub task: &'a str,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a, T: Serialize> TaskReport<'a, T> {
    pub fn new(task: &'a str, outcome: &'a Outcome<T>) -> Self {
        let failures = match outcome {
            Outcome::Partial { failures, .. } => failures.clone(),
            _ => Vec::new(),
        };
        Self {
            task,
            status: outcome.status(),
            result: outcome.value(),
            failures,
            error: outcome.error().map(|err| err.chain()),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_refresh(task: &str, outcome: &Outcome<RefreshSummary>) -> io::Result<()> {
        Self::print_json(&TaskReport::new(task, outcome))
    }

    pub fn print_scan(task: &str, outcome: &Outcome<ScanReport>) -> io::Result<()> {
        Self::print_json(&TaskReport::new(task, outcome))
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_refresh(task: &str, outcome: &Outcome<RefreshSummary>) {
        match outcome {
            Outcome::Succeeded(summary) | Outcome::Partial { value: summary, .. } => {
                println!(
                    "{task}: {} descriptors cached in {}",
                    summary.descriptors, summary.cache_dir
                );
            }
            Outcome::Failed(err) => println!("{task}: failed: {err}"),
            Outcome::Cancelled => println!("{task}: cancelled"),
        }
    }

    pub fn print_scan(task: &str, outcome: &Outcome<ScanReport>) {
        match outcome {
            Outcome::Succeeded(report) | Outcome::Partial { value: report, .. } => {
                println!(
                    "{task}: {} projects, {} skipped entries, {} extraction failures",
                    report.projects.len(),
                    report.skipped.len(),
                    report.failures.len()
                );
                for project in &report.projects {
                    println!(
                        "  {}  dataset={}  annex={}",
                        project.path,
                        project.dataset_id.as_deref().unwrap_or("-"),
                        project.annex_uuid.as_deref().unwrap_or("-")
                    );
                }
            }
            Outcome::Failed(err) => println!("{task}: failed: {err}"),
            Outcome::Cancelled => println!("{task}: cancelled"),
        }
    }
}
