pub mod config;
pub mod generate;
pub mod message;
pub mod models;
pub mod preset;
pub mod prompt;
pub mod relay;
pub mod respondent;
pub mod store;
pub mod template;
