use log::{info, warn};
use std::fmt;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::{LlmError, StateError, WorkflowError, WorkflowResult};
use crate::core::state::{ApplyOutcome, Chapter, ScriptRecord, ScriptStatus};
use crate::services::chapters::{create_extractor, ChapterExtractor};
use crate::services::frames::Frame;
use crate::services::inference::InferenceService;
use crate::services::length::{style_hint, target_chars, LengthEnforcer, SupplementContext};
use crate::services::llm::GenerateRequest;
use crate::services::prompts::{self, QualityReport};
use crate::services::session::{new_session_id, SessionStore};
use crate::utils::text::{char_len, preview};

const ENHANCED_TEMPERATURE: f32 = 0.7;

/// Ways of producing an improved script, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImprovementStrategy {
    Agent,
    BaseModel,
    EnhancedPrompt,
}

impl fmt::Display for ImprovementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImprovementStrategy::Agent => "agent",
            ImprovementStrategy::BaseModel => "base model",
            ImprovementStrategy::EnhancedPrompt => "enhanced prompt",
        })
    }
}

pub struct ScriptWorkflow {
    config: Config,
    inference: Arc<InferenceService>,
    extractor: Box<dyn ChapterExtractor>,
    enforcer: LengthEnforcer,
    session: SessionStore,
}

impl ScriptWorkflow {
    pub fn new(config: Config, inference: Arc<InferenceService>, session: SessionStore) -> Self {
        let extractor = create_extractor(&config, inference.clone());
        let enforcer = LengthEnforcer::from(&config.script);
        Self {
            config,
            inference,
            extractor,
            enforcer,
            session,
        }
    }

    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn speakers(&self) -> &[String] {
        &self.config.script.speakers
    }

    fn duration_or_default(&self, duration: Option<u32>) -> WorkflowResult<u32> {
        match duration {
            Some(0) => Err(WorkflowError::Validation(
                "duration_minutes must be at least 1".to_string(),
            )),
            Some(d) => Ok(d),
            None => Ok(self.config.default_duration_minutes),
        }
    }

    async fn load_record(&self, index: usize) -> WorkflowResult<ScriptRecord> {
        self.session
            .get_script(index)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("no script at index {}", index)))
    }

    /// Streams a description of the frames and stores it as the session's analysis.
    pub async fn analyze_frames(&self, frames: Vec<Frame>, prompt: Option<&str>) -> WorkflowResult<String> {
        if frames.is_empty() {
            return Err(WorkflowError::Validation("at least one frame is required".to_string()));
        }
        let custom = prompt.or(self.config.script.analysis_prompt.as_deref());
        info!("Analyzing {} frames", frames.len());

        let request = GenerateRequest::new(prompts::analysis_prompt(custom), self.config.llm.analysis_max_tokens)
            .with_images(frames)
            .streaming();
        let analysis = self.inference.generate(&request).await?;

        self.session.save_analysis(&analysis).await?;
        info!("Frame analysis done ({} chars)", char_len(&analysis));
        Ok(analysis)
    }

    pub async fn extract_chapters(&self, analysis_text: &str) -> WorkflowResult<Vec<Chapter>> {
        if analysis_text.trim().is_empty() {
            return Err(WorkflowError::Validation("analysis text is required".to_string()));
        }
        let chapters = self.extractor.extract(analysis_text).await?;
        self.session.save_chapters(&chapters).await?;
        Ok(chapters)
    }

    pub async fn chapters(&self) -> WorkflowResult<Vec<Chapter>> {
        Ok(self.session.load_chapters().await?)
    }

    /// The frame analysis stored by an earlier run of this session.
    pub async fn analysis(&self) -> WorkflowResult<Option<String>> {
        Ok(self.session.load_analysis().await?)
    }

    /// Generates the script for the chapter at `index`. Supplied chapters
    /// replace the stored chapter list first.
    pub async fn generate_script_for_chapter(
        &self,
        index: usize,
        chapters: Option<Vec<Chapter>>,
        duration_minutes: Option<u32>,
    ) -> WorkflowResult<ScriptRecord> {
        let duration = self.duration_or_default(duration_minutes)?;
        let chapters = match chapters {
            Some(chapters) => {
                self.session.save_chapters(&chapters).await?;
                chapters
            }
            None => self.session.load_chapters().await?,
        };
        let chapter = chapters
            .get(index)
            .ok_or_else(|| WorkflowError::NotFound(format!("no chapter at index {}", index)))?;

        let target = target_chars(duration);
        info!(
            "Generating script for '{}' ({} min, target {} chars)",
            chapter.chapter_title, duration, target
        );

        let prompt = prompts::script_prompt(chapter, duration, target, self.speakers());
        let text = self
            .inference
            .generate_script_text(&self.inference.request(prompt))
            .await?;
        let context = SupplementContext {
            chapter_title: chapter.chapter_title.clone(),
            style_hint: None,
        };
        let text = self.enforcer.enforce(&self.inference, &text, target, &context).await;

        info!(
            "Script for '{}' ready: {} chars (target {})",
            chapter.chapter_title,
            char_len(&text),
            target
        );
        let record = ScriptRecord::new_for_review(chapter, text, duration);
        self.session.put_script(index, record.clone()).await?;
        Ok(record)
    }

    pub async fn analyze_script_quality(
        &self,
        index: usize,
        script_content: Option<String>,
        duration_minutes: Option<u32>,
    ) -> WorkflowResult<QualityReport> {
        let mut record = self.load_record(index).await?;
        if let Some(content) = script_content {
            if record.status.is_terminal() {
                return Err(StateError {
                    from: record.status,
                    action: "replace the content of",
                }
                .into());
            }
            record.script_content = content;
        }
        if duration_minutes.is_some() {
            record.duration_minutes = self.duration_or_default(duration_minutes)?;
        }

        info!("Checking quality of '{}'", record.chapter_title);
        let request = GenerateRequest::new(
            prompts::quality_prompt(&record, self.speakers()),
            self.config.llm.analysis_max_tokens,
        );
        let reply = self.inference.generate(&request).await?;
        let report = prompts::parse_quality(&reply);

        record.analysis = Some(report.analysis.clone());
        record.passed = Some(report.passed);
        self.session.put_script(index, record).await?;
        Ok(report)
    }

    /// Approves the script, or rejects it and stages an improvement built
    /// from the feedback. Returns the staged text on rejection.
    pub async fn submit_feedback(
        &self,
        index: usize,
        feedback: &str,
        is_approved: bool,
        duration_minutes: Option<u32>,
    ) -> WorkflowResult<Option<String>> {
        let mut record = self.load_record(index).await?;
        if duration_minutes.is_some() {
            record.duration_minutes = self.duration_or_default(duration_minutes)?;
        }

        if is_approved {
            record.approve()?;
            self.session.put_script(index, record).await?;
            info!("Script {} approved", index);
            return Ok(None);
        }

        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(WorkflowError::Validation(
                "feedback is required when rejecting a script".to_string(),
            ));
        }
        record.reject(feedback)?;
        self.session.put_script(index, record.clone()).await?;
        info!("Script {} rejected: {}", index, preview(feedback));

        let improved = self.improve_script(&record, feedback).await?;
        record.stage_improvement(improved.clone())?;
        self.session.put_script(index, record).await?;
        Ok(Some(improved))
    }

    fn strategies(&self) -> Vec<ImprovementStrategy> {
        let mut strategies = Vec::with_capacity(3);
        if self.inference.client().supports_agent() {
            strategies.push(ImprovementStrategy::Agent);
        }
        strategies.push(ImprovementStrategy::BaseModel);
        strategies.push(ImprovementStrategy::EnhancedPrompt);
        strategies
    }

    fn strategy_request(&self, strategy: ImprovementStrategy, record: &ScriptRecord, feedback: &str) -> GenerateRequest {
        let duration = record.duration_minutes;
        let target = target_chars(duration);
        let content = &record.script_content;

        match strategy {
            ImprovementStrategy::Agent => self
                .inference
                .request(prompts::agent_prompt(content, feedback, duration, target, self.speakers()))
                .agent(format!("script_improvement_{}", new_session_id())),
            ImprovementStrategy::BaseModel => self
                .inference
                .request(prompts::improvement_prompt(content, feedback, duration, target)),
            ImprovementStrategy::EnhancedPrompt => {
                let instruction = record.latest_feedback().unwrap_or(feedback);
                let hint = style_hint(&record.feedback, &self.config.script.style_hints);
                self.inference
                    .request(prompts::enhanced_prompt(
                        content,
                        instruction,
                        hint,
                        duration,
                        target,
                        self.speakers(),
                    ))
                    .with_temperature(ENHANCED_TEMPERATURE)
            }
        }
    }

    /// Produces an improved, sanitized and length-enforced script. The record
    /// itself is not modified.
    pub async fn improve_script(&self, record: &ScriptRecord, feedback: &str) -> WorkflowResult<String> {
        let mut last_error: Option<LlmError> = None;

        for strategy in self.strategies() {
            info!("Improving '{}' via {}", record.chapter_title, strategy);
            let request = self.strategy_request(strategy, record, feedback);

            match self.inference.generate_script_text(&request).await {
                Ok(text) => {
                    let context = SupplementContext {
                        chapter_title: record.chapter_title.clone(),
                        style_hint: style_hint(&record.feedback, &self.config.script.style_hints)
                            .map(str::to_string),
                    };
                    let target = target_chars(record.duration_minutes);
                    let text = self.enforcer.enforce(&self.inference, &text, target, &context).await;
                    info!("Improvement via {} succeeded ({} chars)", strategy, char_len(&text));
                    return Ok(text);
                }
                Err(e) => {
                    warn!("Improvement via {} failed ({:?}): {}", strategy, e.kind(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => WorkflowError::Llm(e),
            None => WorkflowError::Validation("no improvement strategy available".to_string()),
        })
    }

    pub async fn apply_improvement(
        &self,
        index: usize,
        duration_minutes: Option<u32>,
    ) -> WorkflowResult<(ApplyOutcome, ScriptRecord)> {
        let mut record = self.load_record(index).await?;
        if duration_minutes.is_some() {
            record.duration_minutes = self.duration_or_default(duration_minutes)?;
        }

        let outcome = record.apply_improvement()?;
        match outcome {
            ApplyOutcome::Applied => info!("Improvement applied to script {}", index),
            ApplyOutcome::NothingStaged => {
                warn!("No improved script staged for {}, back to review", index)
            }
        }
        self.session.put_script(index, record.clone()).await?;
        Ok((outcome, record))
    }

    pub async fn scripts(&self) -> WorkflowResult<Vec<Option<ScriptRecord>>> {
        Ok(self.session.load_scripts().await?)
    }

    /// Writes every approved or completed script, in chapter order, to one
    /// markdown file and returns its path.
    pub async fn export_merged(&self) -> WorkflowResult<String> {
        let sections: Vec<String> = self
            .scripts()
            .await?
            .into_iter()
            .flatten()
            .filter(|r| matches!(r.status, ScriptStatus::Approved | ScriptStatus::Completed))
            .map(|r| format!("## {}\n\n{}\n", r.chapter_title, r.script_content))
            .collect();

        if sections.is_empty() {
            return Err(WorkflowError::Validation("no approved scripts to export".to_string()));
        }

        let path = format!(
            "{}/{}_script.md",
            self.config.output_folder.trim_end_matches('/'),
            self.session_id()
        );
        self.session
            .storage()
            .write(&path, sections.join("\n").as_bytes())
            .await?;
        info!("Exported {} scripts to {}", sections.len(), path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::io::NativeStorage;
    use crate::services::llm::InvokeMode;
    use crate::services::mock::{service, MockLlmClient};
    use crate::services::response::RawResponse;
    use std::fs;

    fn long_script(label: &str) -> String {
        format!("Reimu: {}\nMarisa: {}", label, "a".repeat(250))
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let root = dir.to_string_lossy();
        Config::from_yaml(&format!(
            "session_folder: {root}/sessions\noutput_folder: {root}/output\ndefault_duration_minutes: 1\nllm:\n  provider: gateway\n  gateway:\n    base_url: https://gw.example.com\n"
        ))
        .unwrap()
    }

    fn workflow(dir: &std::path::Path, mock: Arc<MockLlmClient>) -> ScriptWorkflow {
        let config = test_config(dir);
        let session = SessionStore::new(Arc::new(NativeStorage::new()), &config.session_folder, "sess");
        ScriptWorkflow::new(config, Arc::new(service(mock)), session)
    }

    fn reply(text: String) -> Result<RawResponse, LlmError> {
        Ok(RawResponse::Text(text))
    }

    const ANALYSIS: &str = "## Intro\nBasics here\n## Pricing\nCost details";

    #[tokio::test]
    async fn test_extract_then_generate_second_chapter() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::new(|req, _, _| {
            assert!(req.prompt.contains("Pricing"));
            reply(format!("Sure!\n{}", long_script("pricing")))
        }));
        let wf = workflow(dir.path(), mock.clone());

        let chapters = wf.extract_chapters(ANALYSIS).await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].chapter_summary, "Cost details");

        let record = wf.generate_script_for_chapter(1, None, None).await.unwrap();
        assert_eq!(record.status, ScriptStatus::Review);
        assert_eq!(record.duration_minutes, 1);
        assert!(record.script_content.starts_with("Reimu: pricing"));
        assert_eq!(mock.calls(), 1);

        let scripts = wf.scripts().await.unwrap();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].is_none());
        assert_eq!(scripts[1].as_ref().unwrap().chapter_title, "Pricing");
    }

    #[tokio::test]
    async fn test_missing_chapter_and_empty_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), Arc::new(MockLlmClient::text("Reimu: x")));

        let err = wf.generate_script_for_chapter(0, None, None).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = wf.extract_chapters("   ").await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = wf.generate_script_for_chapter(0, None, Some(0)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_supplied_chapters_replace_stored_ones() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), Arc::new(MockLlmClient::new(|_, _, _| reply(long_script("x")))));
        wf.extract_chapters(ANALYSIS).await.unwrap();

        let replacement = vec![Chapter {
            chapter_num: 1,
            chapter_title: "Only".into(),
            chapter_summary: "One".into(),
        }];
        let record = wf
            .generate_script_for_chapter(0, Some(replacement), Some(2))
            .await
            .unwrap();
        assert_eq!(record.chapter_title, "Only");
        assert_eq!(wf.chapters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_stage_then_apply() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::new(|req, _, _| {
            if req.prompt.contains("Improve the script") {
                reply(long_script("improved"))
            } else {
                reply(long_script("first"))
            }
        }));
        let wf = workflow(dir.path(), mock);
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        let staged = wf
            .submit_feedback(0, "more jokes", false, None)
            .await
            .unwrap()
            .unwrap();
        assert!(staged.starts_with("Reimu: improved"));

        let stored = wf.scripts().await.unwrap()[0].clone().unwrap();
        assert_eq!(stored.status, ScriptStatus::Rejected);
        assert_eq!(stored.feedback, vec!["more jokes"]);
        assert_eq!(stored.improved_script.as_deref(), Some(staged.as_str()));

        let (outcome, record) = wf.apply_improvement(0, None).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(record.status, ScriptStatus::Completed);
        assert_eq!(record.script_content, staged);

        let raw = fs::read_to_string(dir.path().join("sessions").join("sess_scripts.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value[0].get("improved_script").is_none());
        assert_eq!(value[0]["status"], "completed");
    }

    #[tokio::test]
    async fn test_apply_without_staged_returns_to_review() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), Arc::new(MockLlmClient::text("Reimu: x")));
        let chapter = Chapter {
            chapter_num: 1,
            chapter_title: "Intro".into(),
            chapter_summary: "Basics".into(),
        };
        let mut record = ScriptRecord::new_for_review(&chapter, "Reimu: old".into(), 1);
        record.reject("shorter").unwrap();
        wf.session.put_script(0, record).await.unwrap();

        let (outcome, record) = wf.apply_improvement(0, None).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::NothingStaged);
        assert_eq!(record.status, ScriptStatus::Review);
        assert_eq!(record.script_content, "Reimu: old");
    }

    #[tokio::test]
    async fn test_approved_script_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), Arc::new(MockLlmClient::new(|_, _, _| reply(long_script("x")))));
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        assert_eq!(wf.submit_feedback(0, "", true, None).await.unwrap(), None);
        let err = wf.submit_feedback(0, "change it", false, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::State(_)));
        assert_eq!(err.status_code(), 400);

        let err = wf
            .analyze_script_quality(0, Some("Reimu: new".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::State(_)));

        let stored = wf.scripts().await.unwrap()[0].clone().unwrap();
        assert_eq!(stored.status, ScriptStatus::Approved);
        assert!(stored.feedback.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_requires_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(dir.path(), Arc::new(MockLlmClient::new(|_, _, _| reply(long_script("x")))));
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        let err = wf.submit_feedback(0, "  ", false, None).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = wf.submit_feedback(5, "x", false, None).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_improvement_chain_falls_through_to_enhanced_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(
            MockLlmClient::new(|req, _, _| match &req.mode {
                InvokeMode::Agent { .. } => Err(LlmError::Transient("ThrottlingException".into())),
                InvokeMode::Model if req.prompt.contains("You edit scripts") => {
                    Err(LlmError::InvalidRequest {
                        status: 400,
                        message: "bad".into(),
                    })
                }
                InvokeMode::Model if req.temperature == Some(0.7) => reply(long_script("enhanced")),
                InvokeMode::Model => reply(long_script("first")),
            })
            .with_agent(),
        );
        let wf = workflow(dir.path(), mock.clone());
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        let staged = wf
            .submit_feedback(0, "make it comedy", false, None)
            .await
            .unwrap()
            .unwrap();
        assert!(staged.starts_with("Reimu: enhanced"));

        let requests = mock.requests.lock().unwrap();
        // generate, agent + 2 retries, base model, enhanced
        assert_eq!(requests.len(), 6);
        let agent_sessions: Vec<String> = requests
            .iter()
            .filter_map(|(r, attempt)| match &r.mode {
                InvokeMode::Agent { session_id } => Some(attempt.session_id(session_id)),
                InvokeMode::Model => None,
            })
            .collect();
        assert_eq!(agent_sessions.len(), 3);
        assert!(agent_sessions[1].ends_with("_retry1"));
        assert!(requests[5].0.prompt.contains("comedy banter"));
    }

    #[tokio::test]
    async fn test_all_strategies_failing_leaves_no_staged_text() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::new(|req, _, _| {
            if req.prompt.contains("Write a dialogue script") {
                reply(long_script("first"))
            } else {
                Ok(RawResponse::Text("I cannot help with that.".into()))
            }
        }));
        let wf = workflow(dir.path(), mock);
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        let err = wf.submit_feedback(0, "shorter", false, None).await.unwrap_err();
        match err {
            WorkflowError::Llm(e) => assert_eq!(e.kind(), ErrorKind::NoContent),
            other => panic!("unexpected error: {other}"),
        }

        let stored = wf.scripts().await.unwrap()[0].clone().unwrap();
        assert_eq!(stored.status, ScriptStatus::Rejected);
        assert!(stored.improved_script.is_none());
        assert!(stored.script_content.starts_with("Reimu: first"));
    }

    #[tokio::test]
    async fn test_quality_check_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::new(|req, _, _| {
            if req.prompt.contains("Review the following") {
                reply(r#"{"passed": true, "analysis": "Clear and lively."}"#.to_string())
            } else {
                reply(long_script("x"))
            }
        }));
        let wf = workflow(dir.path(), mock);
        wf.extract_chapters(ANALYSIS).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();

        let report = wf
            .analyze_script_quality(0, Some("Reimu: edited".into()), Some(2))
            .await
            .unwrap();
        assert!(report.passed);

        let stored = wf.scripts().await.unwrap()[0].clone().unwrap();
        assert_eq!(stored.passed, Some(true));
        assert_eq!(stored.analysis.as_deref(), Some("Clear and lively."));
        assert_eq!(stored.script_content, "Reimu: edited");
        assert_eq!(stored.duration_minutes, 2);
    }

    #[tokio::test]
    async fn test_analyze_frames_streams_with_images() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::text("## Intro\nThe video opens."));
        let wf = workflow(dir.path(), mock.clone());

        let err = wf.analyze_frames(Vec::new(), None).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let frames = vec![Frame::from_bytes("image/jpeg", b"a"), Frame::from_bytes("image/png", b"b")];
        let analysis = wf.analyze_frames(frames, None).await.unwrap();
        assert!(analysis.starts_with("## Intro"));

        let (stream, images) = {
            let requests = mock.requests.lock().unwrap();
            (requests[0].0.stream, requests[0].0.images.len())
        };
        assert!(stream);
        assert_eq!(images, 2);
        assert_eq!(wf.session.load_analysis().await.unwrap().as_deref(), Some(analysis.as_str()));
    }

    #[tokio::test]
    async fn test_export_merges_approved_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockLlmClient::new(|req, _, _| {
            if req.prompt.contains("Intro") {
                reply(long_script("intro"))
            } else {
                reply(long_script("pricing"))
            }
        }));
        let wf = workflow(dir.path(), mock);
        wf.extract_chapters(ANALYSIS).await.unwrap();

        assert!(wf.export_merged().await.is_err());

        wf.generate_script_for_chapter(1, None, None).await.unwrap();
        wf.generate_script_for_chapter(0, None, None).await.unwrap();
        wf.submit_feedback(1, "", true, None).await.unwrap();
        wf.submit_feedback(0, "", true, None).await.unwrap();

        let path = wf.export_merged().await.unwrap();
        assert!(path.ends_with("sess_script.md"));
        let merged = fs::read_to_string(&path).unwrap();
        let intro = merged.find("## Intro").unwrap();
        let pricing = merged.find("## Pricing").unwrap();
        assert!(intro < pricing);
    }
}
