// Chat Infrastructure - Adapters

pub mod llm;
