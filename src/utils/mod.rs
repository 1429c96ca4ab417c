pub mod sse;
pub mod text;
