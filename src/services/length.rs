//! Pads short scripts up to the length their duration calls for.

use log::{info, warn};

use crate::core::config::{ScriptConfig, StyleHint};
use crate::services::inference::InferenceService;
use crate::services::prompts::supplement_prompt;
use crate::utils::text::{char_len, tail_lines};

const MIN_CHARS_PER_MINUTE: usize = 200;
const MAX_CHARS_PER_MINUTE: usize = 250;
/// How far a canned continuation may overshoot the target before it is trimmed.
const CANNED_OVERSHOOT: usize = 100;
const CONTEXT_LINES: usize = 5;

/// Spoken-length target in characters: the midpoint of 200 and 250 per minute.
pub fn target_chars(duration_minutes: u32) -> usize {
    let m = duration_minutes as usize;
    (MIN_CHARS_PER_MINUTE * m + MAX_CHARS_PER_MINUTE * m) / 2
}

/// Scans feedback oldest first; the first entry mentioning a configured
/// keyword selects that keyword's hint.
pub fn style_hint<'a>(feedback: &[String], hints: &'a [StyleHint]) -> Option<&'a str> {
    feedback.iter().find_map(|entry| {
        let entry = entry.to_lowercase();
        hints
            .iter()
            .find(|h| entry.contains(&h.keyword.to_lowercase()))
            .map(|h| h.hint.as_str())
    })
}

/// What the supplemental prompts need to know about the script being padded.
#[derive(Debug, Clone, Default)]
pub struct SupplementContext {
    pub chapter_title: String,
    pub style_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LengthEnforcer {
    max_rounds: usize,
    section_chars: usize,
}

impl Default for LengthEnforcer {
    fn default() -> Self {
        Self::from(&ScriptConfig::default())
    }
}

impl From<&ScriptConfig> for LengthEnforcer {
    fn from(config: &ScriptConfig) -> Self {
        Self::new(config.max_supplement_rounds, config.supplement_section_chars)
    }
}

impl LengthEnforcer {
    pub fn new(max_rounds: usize, section_chars: usize) -> Self {
        Self {
            max_rounds,
            section_chars: section_chars.max(1),
        }
    }

    /// Returns `text` extended towards `target` characters. The input is
    /// always a prefix of the output.
    pub async fn enforce(
        &self,
        inference: &InferenceService,
        text: &str,
        target: usize,
        context: &SupplementContext,
    ) -> String {
        let mut script = text.to_string();
        if char_len(&script) >= target {
            return script;
        }
        let speakers = inference.sanitizer().speakers().to_vec();

        for round in 1..=self.max_rounds {
            let current = char_len(&script);
            if current >= target {
                break;
            }
            let needed = (target - current).min(self.section_chars);
            info!(
                "Script for '{}' is {} chars short, supplement round {}/{}",
                context.chapter_title,
                target - current,
                round,
                self.max_rounds
            );

            let prompt = supplement_prompt(
                &tail_lines(&script, CONTEXT_LINES),
                needed,
                &context.chapter_title,
                &speakers,
                context.style_hint.as_deref(),
            );
            match inference.generate_script_text(&inference.request(prompt)).await {
                Ok(more) => {
                    script.push_str("\n\n");
                    script.push_str(&more);
                }
                Err(e) => {
                    warn!("Supplement round {} failed, using canned continuation: {}", round, e);
                    let canned = canned_continuation(&context.chapter_title, &speakers);
                    script = append_bounded(script, &canned, target + CANNED_OVERSHOOT);
                    break;
                }
            }
        }

        let final_len = char_len(&script);
        if final_len < target {
            warn!(
                "Script for '{}' is still {} chars below its {} char target",
                context.chapter_title,
                target - final_len,
                target
            );
        }
        script
    }
}

/// Appends whole lines of `extra` (after a blank line) while the total stays within `limit`.
fn append_bounded(mut script: String, extra: &str, limit: usize) -> String {
    let mut block = String::new();
    for line in extra.lines() {
        let candidate = if block.is_empty() {
            format!("\n\n{}", line)
        } else {
            format!("{}\n{}", block, line)
        };
        if char_len(&script) + char_len(&candidate) > limit {
            break;
        }
        block = candidate;
    }
    script.push_str(&block);
    script
}

/// Deterministic filler dialogue used when the model cannot supply more.
pub fn canned_continuation(chapter_title: &str, speakers: &[String]) -> String {
    let voices: &[String] = if speakers.len() > 2 { &speakers[1..] } else { speakers };
    let (host, guest) = match voices {
        [] => ("", ""),
        [only] => (only.as_str(), only.as_str()),
        [first, second, ..] => (first.as_str(), second.as_str()),
    };

    let lines = [
        (host, format!("Let's dig a little deeper into {}.", chapter_title)),
        (guest, "Sure, go ahead!".to_string()),
        (
            host,
            format!(
                "The key points of {} are worth a second look, starting with the details that are easy to miss.",
                chapter_title
            ),
        ),
        (guest, "I see! What does that mean in practice?".to_string()),
        (
            host,
            "It means checking the basics carefully and comparing the options before deciding.".to_string(),
        ),
        (
            guest,
            format!("That makes sense. Anyone looking into {} should keep that in mind!", chapter_title),
        ),
        (host, "Exactly. We'll look at more concrete examples in the next chapter.".to_string()),
    ];

    lines
        .iter()
        .map(|(label, text)| format!("{} {}", label, text).trim().to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}
