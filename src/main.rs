use anyhow::{bail, Result};
use std::sync::Arc;

use video2script::core::config::Config;
use video2script::core::error::WorkflowError;
use video2script::core::io::{NativeStorage, Storage};
use video2script::services::frames::load_frames;
use video2script::services::inference::InferenceService;
use video2script::services::llm::create_llm;
use video2script::services::review::run_review;
use video2script::services::session::{new_session_id, SessionStore};
use video2script::services::workflow::ScriptWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load Config
    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

    // 2. Initialize LLM
    let client = create_llm(&config)?;
    let inference = Arc::new(InferenceService::from_config(client, &config));

    // 3. Open or start a session
    let session_id = config.session_id.clone().unwrap_or_else(new_session_id);
    println!("Session: {}", session_id);
    let session = SessionStore::new(storage.clone(), &config.session_folder, &session_id);
    let workflow = ScriptWorkflow::new(config.clone(), inference, session);

    // 4. Chapters, from a stored or provided analysis, else from the frames
    if workflow.chapters().await?.is_empty() {
        let analysis_path = format!("{}/analysis.md", config.input_folder);
        let analysis = if let Some(stored) = workflow.analysis().await? {
            stored
        } else if storage.exists(&analysis_path).await? {
            println!("Using analysis from {}", analysis_path);
            String::from_utf8_lossy(&storage.read(&analysis_path).await?).into_owned()
        } else {
            let frames = load_frames(storage.as_ref(), &config.frames.folder, config.frames.max_images).await?;
            workflow.analyze_frames(frames, None).await?
        };

        let chapters = workflow.extract_chapters(&analysis).await?;
        if chapters.is_empty() {
            bail!("The analysis has no '## ' chapter headings to work from");
        }
        println!("Found {} chapters", chapters.len());
    }

    // 5. Review and export
    run_review(&workflow).await?;

    match workflow.export_merged().await {
        Ok(path) => println!("Merged script written to {}", path),
        Err(WorkflowError::Validation(msg)) => println!("Nothing exported: {}", msg),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
