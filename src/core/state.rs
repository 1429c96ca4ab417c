use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::StateError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chapter {
    pub chapter_num: u32,
    pub chapter_title: String,
    pub chapter_summary: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    #[default]
    Draft,
    Review,
    Approved,
    Rejected,
    Completed,
}

impl ScriptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptStatus::Approved | ScriptStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStatus::Draft => "draft",
            ScriptStatus::Review => "review",
            ScriptStatus::Approved => "approved",
            ScriptStatus::Rejected => "rejected",
            ScriptStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated script, keyed by its chapter position within a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScriptRecord {
    pub chapter_title: String,
    pub chapter_summary: String,
    pub script_content: String,
    pub status: ScriptStatus,
    #[serde(default)]
    pub feedback: Vec<String>,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improved_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

/// What `apply_improvement` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Nothing was staged; the record went back to review.
    NothingStaged,
}

impl ScriptRecord {
    pub fn new_for_review(chapter: &Chapter, script_content: String, duration_minutes: u32) -> Self {
        Self {
            chapter_title: chapter.chapter_title.clone(),
            chapter_summary: chapter.chapter_summary.clone(),
            script_content,
            status: ScriptStatus::Review,
            feedback: Vec::new(),
            duration_minutes,
            improved_script: None,
            analysis: None,
            passed: None,
        }
    }

    pub fn approve(&mut self) -> Result<(), StateError> {
        match self.status {
            ScriptStatus::Review | ScriptStatus::Rejected => {
                self.status = ScriptStatus::Approved;
                Ok(())
            }
            from => Err(StateError { from, action: "approve" }),
        }
    }

    /// Records the feedback and drops any improvement staged by an earlier round.
    pub fn reject(&mut self, feedback: impl Into<String>) -> Result<(), StateError> {
        match self.status {
            ScriptStatus::Review | ScriptStatus::Rejected => {
                self.status = ScriptStatus::Rejected;
                self.feedback.push(feedback.into());
                self.improved_script = None;
                Ok(())
            }
            from => Err(StateError { from, action: "reject" }),
        }
    }

    pub fn stage_improvement(&mut self, improved: String) -> Result<(), StateError> {
        if self.status != ScriptStatus::Rejected {
            return Err(StateError { from: self.status, action: "stage an improvement for" });
        }
        self.improved_script = Some(improved);
        Ok(())
    }

    pub fn apply_improvement(&mut self) -> Result<ApplyOutcome, StateError> {
        if self.status.is_terminal() {
            return Err(StateError { from: self.status, action: "apply an improvement to" });
        }
        match self.improved_script.take().filter(|s| !s.is_empty()) {
            Some(improved) => {
                self.script_content = improved;
                self.status = ScriptStatus::Completed;
                Ok(ApplyOutcome::Applied)
            }
            None => {
                self.status = ScriptStatus::Review;
                Ok(ApplyOutcome::NothingStaged)
            }
        }
    }

    /// The style hint source for regeneration: most recent feedback last.
    pub fn latest_feedback(&self) -> Option<&str> {
        self.feedback.last().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter() -> Chapter {
        Chapter {
            chapter_num: 1,
            chapter_title: "Intro".to_string(),
            chapter_summary: "Basics here".to_string(),
        }
    }

    #[test]
    fn test_apply_improvement_completes_and_removes_key() {
        let mut record = ScriptRecord::new_for_review(&chapter(), "old".to_string(), 3);
        record.status = ScriptStatus::Rejected;
        record.feedback.push("more jokes".to_string());
        record.improved_script = Some("new".to_string());

        assert_eq!(record.apply_improvement().unwrap(), ApplyOutcome::Applied);
        assert_eq!(record.status, ScriptStatus::Completed);
        assert_eq!(record.script_content, "new");

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("improved_script").is_none());
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn test_apply_without_staged_returns_to_review() {
        let mut record = ScriptRecord::new_for_review(&chapter(), "old".to_string(), 3);
        record.reject("shorter").unwrap();

        assert_eq!(record.apply_improvement().unwrap(), ApplyOutcome::NothingStaged);
        assert_eq!(record.status, ScriptStatus::Review);
        assert_eq!(record.script_content, "old");
    }

    #[test]
    fn test_reject_appends_feedback_and_clears_stale_staging() {
        let mut record = ScriptRecord::new_for_review(&chapter(), "s".to_string(), 3);
        record.reject("first").unwrap();
        record.stage_improvement("draft one".to_string()).unwrap();
        record.reject("second").unwrap();

        assert_eq!(record.feedback, vec!["first", "second"]);
        assert!(record.improved_script.is_none());
        assert_eq!(record.latest_feedback(), Some("second"));
    }

    #[test]
    fn test_terminal_states_refuse_transitions() {
        let mut record = ScriptRecord::new_for_review(&chapter(), "s".to_string(), 3);
        record.approve().unwrap();

        assert!(record.reject("late").is_err());
        assert!(record.approve().is_err());
        assert!(record.apply_improvement().is_err());
        assert!(record.feedback.is_empty());
    }

    #[test]
    fn test_stage_requires_rejection() {
        let mut record = ScriptRecord::new_for_review(&chapter(), "s".to_string(), 3);
        let err = record.stage_improvement("x".to_string()).unwrap_err();
        assert_eq!(err.from, ScriptStatus::Review);
    }

    #[test]
    fn test_record_deserializes_without_optional_keys() {
        let json = r#"{
            "chapter_title": "Pricing",
            "chapter_summary": "Cost details",
            "script_content": "Reimu: hi",
            "status": "review",
            "duration_minutes": 3
        }"#;
        let record: ScriptRecord = serde_json::from_str(json).unwrap();
        assert!(record.feedback.is_empty());
        assert_eq!(record.passed, None);
    }
}
