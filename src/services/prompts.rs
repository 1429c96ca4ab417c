//! Prompt text for every model call the workflow makes.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::state::{Chapter, ScriptRecord};
use crate::utils::text::{char_len, strip_code_blocks, take_chars};

pub const DEFAULT_ANALYSIS_PROMPT: &str = "These are still frames taken from a video, in order. \
Explain the flow of the video from the beginning to the end, breaking every movement and \
change down step by step.";

const CHAPTER_FORMAT: &str = "Organize the explanation into chapters. Start each chapter with a \
line of the form `## <chapter title>` and follow it with a few lines summarizing that part of the video.";

const AFFIRMATIVE_MARKERS: &[&str] = &["yes", "はい"];
const LEGACY_VERDICT_WINDOW: usize = 50;

fn speaker_roles(speakers: &[String]) -> String {
    speakers
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let role = match i {
                0 => "narration, sets the scene",
                1 => "the explainer, polite and clear",
                2 => "the questioner, casual, asks and reacts",
                _ => "an additional voice",
            };
            format!("- {} {}", label, role)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn label_list(speakers: &[String]) -> String {
    speakers.join(", ")
}

pub fn analysis_prompt(custom: Option<&str>) -> String {
    format!("{}\n\n{}", custom.unwrap_or(DEFAULT_ANALYSIS_PROMPT), CHAPTER_FORMAT)
}

pub fn chapters_prompt(analysis_text: &str) -> String {
    format!(
        r#"Split the following video explanation into chapters.

Reply with a JSON array only, no commentary:
[{{"chapter_title": "...", "chapter_summary": "..."}}]

# Explanation
{analysis_text}"#
    )
}

pub fn script_prompt(chapter: &Chapter, duration_minutes: u32, target_chars: usize, speakers: &[String]) -> String {
    format!(
        r#"Write a dialogue script for chapter {num} of an explainer video.

# Chapter title
{title}

# Chapter summary
{summary}

# Speakers
{roles}

# Length
- The chapter runs {duration_minutes} minutes.
- The script must be at least {target_chars} characters long.

Every line starts with one of these labels: {labels}.
Reply with the script only."#,
        num = chapter.chapter_num,
        title = chapter.chapter_title,
        summary = chapter.chapter_summary,
        roles = speaker_roles(speakers),
        labels = label_list(speakers),
    )
}

pub fn quality_prompt(record: &ScriptRecord, speakers: &[String]) -> String {
    format!(
        r#"Review the following explainer video script.

# Chapter title
{title}

# Chapter summary
{summary}

# Script
{script}

Criteria:
1. The tone fits a relaxed two-host explainer.
2. Technical terms are explained.
3. Key points are emphasized.
4. Concrete advice is included.
5. Every line starts with a speaker label ({labels}).

Reply with a JSON object only:
{{"passed": true or false, "analysis": "reasons and concrete suggestions"}}"#,
        title = record.chapter_title,
        summary = record.chapter_summary,
        script = record.script_content,
        labels = label_list(speakers),
    )
}

pub fn improvement_prompt(content: &str, feedback: &str, duration_minutes: u32, target_chars: usize) -> String {
    format!(
        r#"You edit scripts for an explainer video. Improve the script below according to the feedback.

# Length (most important)
- The script is for a {duration_minutes} minute video.
- It must be at least {target_chars} characters long. It is currently {current} characters.
- If it is short, expand it with details, pros and cons, and clearer explanations of terms.

# Current script
{content}

# Feedback
{feedback}

Keep the existing speaker format. Reply with the improved script only."#,
        current = char_len(content),
    )
}

pub fn agent_prompt(
    content: &str,
    feedback: &str,
    duration_minutes: u32,
    target_chars: usize,
    speakers: &[String],
) -> String {
    format!(
        r#"You are the script editing assistant for an explainer video. Improve the script using the feedback.

# Feedback
{feedback}

# Length (most important)
- The script is for a {duration_minutes} minute video.
- It must be at least {target_chars} characters long. It is currently {current} characters.

# Speakers
{roles}

# Current script
{content}

Reply with the improved script only."#,
        current = char_len(content),
        roles = speaker_roles(speakers),
    )
}

pub fn enhanced_prompt(
    content: &str,
    last_feedback: &str,
    style_hint: Option<&str>,
    duration_minutes: u32,
    target_chars: usize,
    speakers: &[String],
) -> String {
    let style = style_hint.unwrap_or("in the same tone as the current script");
    format!(
        r#"You are a specialist script editor for an explainer video. Rewrite the script below.

# Instruction
{last_feedback}

# Style
Write the script {style}.

# Format guidelines
{roles}
- Every line starts with one of: {labels}
- Keep sentences natural and conversational.
- Explain technical terms in plain words.
- Mark key points with "!".

# Length (most important)
- The video runs {duration_minutes} minutes.
- The script must be at least {target_chars} characters long.
- If it is short, add concrete examples, detailed pros and cons, and related background.

# Current script
{content}

Reply with the script only, no preface."#,
        roles = speaker_roles(speakers),
        labels = label_list(speakers),
    )
}

pub fn supplement_prompt(
    tail: &str,
    needed_chars: usize,
    chapter_title: &str,
    speakers: &[String],
    style_hint: Option<&str>,
) -> String {
    let style = style_hint.map(|s| format!(" Write it {}.", s)).unwrap_or_default();
    format!(
        r#"The script for the chapter "{chapter_title}" is too short. Continue it from where it ends.

# Last lines of the script
{tail}

Write about {needed_chars} more characters of dialogue that follow on naturally.
Every line starts with one of: {labels}.{style}
Reply with the new lines only."#,
        labels = label_list(speakers),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub passed: bool,
    pub analysis: String,
}

/// Reads the structured verdict, falling back to an affirmative marker near
/// the start of a free-text reply.
/// ASCII markers must stand alone as a word; others match anywhere.
fn has_marker(text: &str, marker: &str) -> bool {
    if !marker.is_ascii() {
        return text.contains(marker);
    }
    text.match_indices(marker).any(|(i, m)| {
        let before = text[..i].chars().next_back();
        let after = text[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

pub fn parse_quality(reply: &str) -> QualityReport {
    let cleaned = strip_code_blocks(reply);
    if let Ok(report) = serde_json::from_str::<QualityReport>(&cleaned) {
        return report;
    }
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(report) = serde_json::from_str::<QualityReport>(&cleaned[start..=end]) {
                return report;
            }
        }
    }

    warn!("Quality reply was not JSON, using the legacy verdict heuristic");
    let head = take_chars(reply, LEGACY_VERDICT_WINDOW).to_lowercase();
    QualityReport {
        passed: AFFIRMATIVE_MARKERS.iter().any(|m| has_marker(&head, m)),
        analysis: reply.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speakers() -> Vec<String> {
        vec!["Narrator:".into(), "Reimu:".into(), "Marisa:".into()]
    }

    #[test]
    fn test_parse_quality_json() {
        let report = parse_quality("```json\n{\"passed\": false, \"analysis\": \"too dry\"}\n```");
        assert_eq!(
            report,
            QualityReport {
                passed: false,
                analysis: "too dry".to_string()
            }
        );

        let report = parse_quality("Sure. {\"passed\": true, \"analysis\": \"good\"} Done.");
        assert!(report.passed);
    }

    #[test]
    fn test_parse_quality_legacy_fallback() {
        assert!(parse_quality("Yes, the script meets the criteria.").passed);
        assert!(parse_quality("はい、基準を満たしています。").passed);
        assert!(!parse_quality("No. The tone is off.").passed);

        let late = format!("{} yes", "x".repeat(60));
        assert!(!parse_quality(&late).passed);
    }

    #[test]
    fn test_legacy_verdict_needs_whole_word() {
        assert!(!parse_quality("My eyes glaze over; the pacing drags.").passed);
        assert!(!parse_quality("Yesterday's draft was better than this.").passed);
        assert!(!parse_quality("Not ready: the eyes-only notes leak.").passed);
        assert!(parse_quality("Verdict: yes.").passed);
        assert!(parse_quality("\"Yes\" - it reads well.").passed);
    }

    #[test]
    fn test_prompts_carry_their_inputs() {
        let chapter = Chapter {
            chapter_num: 2,
            chapter_title: "Pricing".into(),
            chapter_summary: "Cost details".into(),
        };
        let prompt = script_prompt(&chapter, 3, 675, &speakers());
        assert!(prompt.contains("Pricing"));
        assert!(prompt.contains("675"));
        assert!(prompt.contains("Marisa:"));

        let prompt = enhanced_prompt("Reimu: hi", "more jokes", Some("as comedy banter"), 2, 450, &speakers());
        assert!(prompt.contains("more jokes"));
        assert!(prompt.contains("as comedy banter"));

        assert!(analysis_prompt(None).contains("## "));
        assert!(analysis_prompt(Some("Custom.")).starts_with("Custom."));
    }
}
