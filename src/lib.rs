pub mod agent;
pub mod alerts;
pub mod config;
pub mod db;
pub mod llm;
pub mod sqlguard;
pub mod stats;
pub mod util;
pub mod web;
