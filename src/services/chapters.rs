use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::state::Chapter;
use crate::services::inference::InferenceService;
use crate::services::prompts::chapters_prompt;
use crate::utils::text::strip_code_blocks;

#[async_trait]
pub trait ChapterExtractor: Send + Sync {
    async fn extract(&self, analysis_text: &str) -> Result<Vec<Chapter>>;
}

/// Splits markdown on `## ` headings. Text before the first heading is ignored.
pub struct HeadingChapterExtractor;

impl HeadingChapterExtractor {
    pub fn parse(analysis_text: &str) -> Vec<Chapter> {
        let mut chapters: Vec<Chapter> = Vec::new();

        for line in analysis_text.lines() {
            if let Some(title) = line.strip_prefix("## ") {
                chapters.push(Chapter {
                    chapter_num: chapters.len() as u32 + 1,
                    chapter_title: title.trim().to_string(),
                    chapter_summary: String::new(),
                });
            } else if line.trim().is_empty() || line.starts_with('#') {
                continue;
            } else if let Some(current) = chapters.last_mut() {
                if !current.chapter_summary.is_empty() {
                    current.chapter_summary.push('\n');
                }
                current.chapter_summary.push_str(line);
            }
        }

        chapters
    }
}

#[async_trait]
impl ChapterExtractor for HeadingChapterExtractor {
    async fn extract(&self, analysis_text: &str) -> Result<Vec<Chapter>> {
        let chapters = Self::parse(analysis_text);
        info!("Extracted {} chapters from headings", chapters.len());
        Ok(chapters)
    }
}

#[derive(Deserialize)]
struct RawChapter {
    chapter_title: String,
    #[serde(default)]
    chapter_summary: String,
}

/// Asks the model to split the analysis; falls back to headings when the
/// reply cannot be used.
pub struct LlmChapterExtractor {
    inference: Arc<InferenceService>,
}

impl LlmChapterExtractor {
    pub fn new(inference: Arc<InferenceService>) -> Self {
        Self { inference }
    }

    fn parse_reply(reply: &str) -> Option<Vec<Chapter>> {
        let raw: Vec<RawChapter> = serde_json::from_str(&strip_code_blocks(reply)).ok()?;
        let chapters: Vec<Chapter> = raw
            .into_iter()
            .filter(|c| !c.chapter_title.trim().is_empty())
            .enumerate()
            .map(|(i, c)| Chapter {
                chapter_num: i as u32 + 1,
                chapter_title: c.chapter_title.trim().to_string(),
                chapter_summary: c.chapter_summary.trim().to_string(),
            })
            .collect();
        (!chapters.is_empty()).then_some(chapters)
    }
}

#[async_trait]
impl ChapterExtractor for LlmChapterExtractor {
    async fn extract(&self, analysis_text: &str) -> Result<Vec<Chapter>> {
        let request = self.inference.request(chapters_prompt(analysis_text));
        match self.inference.generate(&request).await {
            Ok(reply) => match Self::parse_reply(&reply) {
                Some(chapters) => {
                    info!("Model split the analysis into {} chapters", chapters.len());
                    Ok(chapters)
                }
                None => {
                    warn!("Chapter reply was not a usable JSON array, falling back to headings");
                    HeadingChapterExtractor.extract(analysis_text).await
                }
            },
            Err(e) => {
                warn!("Chapter extraction call failed ({}), falling back to headings", e);
                HeadingChapterExtractor.extract(analysis_text).await
            }
        }
    }
}

pub fn create_extractor(config: &Config, inference: Arc<InferenceService>) -> Box<dyn ChapterExtractor> {
    match config.script.chapter_strategy.as_str() {
        "llm" => Box::new(LlmChapterExtractor::new(inference)),
        _ => Box::new(HeadingChapterExtractor),
    }
}
