pub mod accounting;
pub mod cache;
pub mod dedup;
pub mod openai;
pub mod pipeline;
pub mod text_extraction;
