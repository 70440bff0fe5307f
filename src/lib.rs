//! Mail Tasks: turns tenant mailboxes into classified, deduplicated tasks.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod oauth;
pub mod pipeline;
pub mod store;
pub mod tasks;
pub mod tenants;
pub mod vault;
