//! Cleans generated dialogue before it is persisted or shown for review.

use crate::core::config::ScriptConfig;

const OBJECT_MARKERS: &[&str] = &["EventStream", "botocore", "object at 0x"];

#[derive(Debug, Clone)]
pub struct Sanitizer {
    speakers: Vec<String>,
    aliases: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from(&ScriptConfig::default())
    }
}

impl From<&ScriptConfig> for Sanitizer {
    fn from(config: &ScriptConfig) -> Self {
        Self::new(config.speakers.clone()).with_aliases(config.speaker_aliases.clone())
    }
}

impl Sanitizer {
    pub fn new(speakers: Vec<String>) -> Self {
        Self {
            speakers,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// The prompted speaker labels; aliases are not included.
    pub fn speakers(&self) -> &[String] {
        &self.speakers
    }

    fn labels(&self) -> impl Iterator<Item = &str> {
        self.speakers.iter().chain(&self.aliases).map(String::as_str)
    }

    fn speaker_of(&self, line: &str) -> Option<&str> {
        let line = line.trim_start();
        self.labels().find(|label| line.starts_with(label))
    }

    pub fn sanitize(&self, text: &str) -> String {
        let start = self.labels().filter_map(|label| text.find(label)).min();
        let Some(start) = start else {
            return String::new();
        };

        let mut out: Vec<&str> = Vec::new();
        let mut last_speaker: Option<&str> = None;

        for line in text[start..].lines() {
            if line.trim().is_empty() || has_object_reference(line) {
                continue;
            }
            let speaker = self.speaker_of(line);
            if speaker.is_some() && has_bracketed_span(line) {
                continue;
            }
            // nothing precedes the first kept speaker line
            if speaker.is_none() && last_speaker.is_none() {
                continue;
            }
            if let Some(current) = speaker {
                if last_speaker.is_some_and(|prev| prev != current) {
                    out.push("");
                }
                last_speaker = Some(current);
            }
            out.push(line);
        }

        out.join("\n")
    }
}

fn has_object_reference(line: &str) -> bool {
    if OBJECT_MARKERS.iter().any(|m| line.contains(m)) {
        return true;
    }
    let hex_address = line.match_indices("at 0x").any(|(i, m)| {
        line[i + m.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_hexdigit())
    });
    hex_address || is_object_repr(line)
}

/// `<foo.Bar object ...>` style reprs.
fn is_object_repr(line: &str) -> bool {
    match (line.find('<'), line.rfind('>')) {
        (Some(open), Some(close)) if open < close => line[open..close].contains("object"),
        _ => false,
    }
}

fn has_bracketed_span(line: &str) -> bool {
    match (line.find('<'), line.rfind('>')) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}
