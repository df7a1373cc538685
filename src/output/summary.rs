use std::fmt::Write;

use comfy_table::Cell;

use crate::orchestrator::{RunResult, RunStatus};

use super::styling::{caution, failure, heading, link, muted, success};
use super::tables::{color_coded_outcome_cell, create_cyan_header, create_table};

/// Prints the outcome of a run to stdout.
///
/// Shows one row per job that reached a terminal outcome, in completion order,
/// followed by the verdict. On failure every failing job is listed with its
/// result and build URL, the job the run is attributed to first.
pub fn print_summary(result: &RunResult, planned_jobs: usize) {
    println!("{}", render_summary(result, planned_jobs));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", heading(emoji), heading(title).underlined());
}

fn render_summary(result: &RunResult, planned_jobs: usize) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📋", "Jobs");

    if result.completed().is_empty() {
        let _ = writeln!(output, "  {}\n", muted("No job finished."));
    } else {
        let mut table = create_table();
        table.set_header(create_cyan_header(&["#", "Job", "Result", "Finished", "Build"]));

        for report in result.completed() {
            table.add_row(vec![
                Cell::new(report.marker),
                Cell::new(&report.job_name),
                color_coded_outcome_cell(&report.outcome),
                Cell::new(report.finished_at.format("%H:%M:%S")),
                Cell::new(report.outcome.url().unwrap_or("")),
            ]);
        }

        let _ = writeln!(output, "{table}\n");
    }

    let _ = writeln!(
        output,
        "  {} {}",
        muted("Jobs finished:"),
        caution(format!("{}/{planned_jobs}", result.completed().len()))
    );

    match result.status() {
        RunStatus::Succeeded => {
            let _ = writeln!(output, "  {}", success("All jobs succeeded ✓"));
        }
        RunStatus::Interrupted => {
            let _ = writeln!(
                output,
                "  {}",
                caution("Interrupted, submitted builds may still be running")
            );
        }
        RunStatus::Failed => {
            for report in result.failures() {
                let _ = write!(
                    output,
                    "  {} {}",
                    failure(format!("Job {} failed :(", report.job_name)),
                    muted(format!("result: {}", report.outcome.result()))
                );
                match report.outcome.url() {
                    Some(url) => {
                        let _ = writeln!(output, " {}", link(url));
                    }
                    None => {
                        let _ = writeln!(output);
                    }
                }
            }
        }
    }

    output
}
