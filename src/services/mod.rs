pub mod chapters;
pub mod classify;
pub mod frames;
pub mod inference;
pub mod length;
pub mod llm;
pub mod prompts;
pub mod response;
pub mod retry;
pub mod review;
pub mod sanitize;
pub mod session;
pub mod workflow;

#[cfg(test)]
pub(crate) mod mock;
