pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Length in characters, which is what spoken-duration targets are measured in.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

pub fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// The last `n` lines, used as continuation context for supplemental prompts.
pub fn tail_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Short preview for log lines.
pub fn preview(s: &str) -> String {
    let head = take_chars(s, 30);
    if char_len(s) > 30 {
        format!("{}...", head)
    } else {
        head
    }
}
