//! Terminal review loop: generate each chapter's script, then approve it or
//! iterate on feedback.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use log::warn;
use std::fmt;
use std::time::Duration;

use crate::core::state::{ApplyOutcome, ScriptRecord, ScriptStatus};
use crate::services::workflow::ScriptWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewAction {
    Approve,
    Feedback,
    Skip,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReviewAction::Approve => "Approve",
            ReviewAction::Feedback => "Give feedback",
            ReviewAction::Skip => "Skip for now",
        })
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_script(record: &ScriptRecord) {
    println!("\n=== {} ({} min, {}) ===", record.chapter_title, record.duration_minutes, record.status);
    println!("{}", record.script_content);
    if let (Some(passed), Some(analysis)) = (record.passed, &record.analysis) {
        println!("\n--- Quality check: {} ---", if passed { "passed" } else { "needs work" });
        println!("{}", analysis);
    }
    println!();
}

pub async fn run_review(workflow: &ScriptWorkflow) -> Result<()> {
    let chapters = workflow.chapters().await?;
    let existing = workflow.scripts().await?;
    let unattended = workflow.config().unattended;

    for (index, chapter) in chapters.iter().enumerate() {
        let stored = existing.get(index).cloned().flatten();
        if let Some(record) = stored.as_ref().filter(|r| r.status.is_terminal()) {
            println!("Skipping '{}' ({})", record.chapter_title, record.status);
            continue;
        }

        let mut record = match stored {
            Some(record) if record.status != ScriptStatus::Draft => record,
            _ => {
                let pb = spinner(format!("Writing script for '{}'", chapter.chapter_title));
                let generated = workflow.generate_script_for_chapter(index, None, None).await;
                pb.finish_and_clear();
                generated?
            }
        };

        if record.passed.is_none() {
            let pb = spinner("Checking script quality".to_string());
            let report = workflow.analyze_script_quality(index, None, None).await;
            pb.finish_and_clear();
            match report {
                Ok(report) => {
                    record.passed = Some(report.passed);
                    record.analysis = Some(report.analysis);
                }
                Err(e) => warn!("Quality check for '{}' failed: {}", chapter.chapter_title, e),
            }
        }

        print_script(&record);

        if unattended {
            workflow.submit_feedback(index, "", true, None).await?;
            println!("Approved '{}'", chapter.chapter_title);
            continue;
        }

        if !review_chapter(workflow, index).await? {
            println!("Stopping review as requested.");
            break;
        }
    }

    println!("Review finished.");
    Ok(())
}

/// Returns false when the user asked to stop reviewing altogether.
async fn review_chapter(workflow: &ScriptWorkflow, index: usize) -> Result<bool> {
    loop {
        let actions = vec![ReviewAction::Approve, ReviewAction::Feedback, ReviewAction::Skip];
        let action = match Select::new("What should happen with this script?", actions).prompt() {
            Ok(action) => action,
            Err(_) => return Ok(false),
        };

        match action {
            ReviewAction::Approve => {
                workflow.submit_feedback(index, "", true, None).await?;
                println!("Approved.");
                return Ok(true);
            }
            ReviewAction::Skip => return Ok(true),
            ReviewAction::Feedback => {
                let feedback = match Text::new("Feedback:").prompt() {
                    Ok(text) => text,
                    Err(_) => return Ok(false),
                };

                let pb = spinner("Improving script".to_string());
                let staged = workflow.submit_feedback(index, &feedback, false, None).await;
                pb.finish_and_clear();

                let staged = match staged {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("Improvement failed: {}", e);
                        continue;
                    }
                };

                println!("\n--- Proposed revision ---\n{}\n", staged);
                let apply = Confirm::new("Apply this revision?")
                    .with_default(true)
                    .prompt()
                    .unwrap_or(false);
                if apply {
                    let (outcome, _) = workflow.apply_improvement(index, None).await?;
                    if outcome == ApplyOutcome::Applied {
                        println!("Revision applied.");
                        return Ok(true);
                    }
                }
            }
        }
    }
}
