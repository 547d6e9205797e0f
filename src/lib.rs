pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod manifest;
pub mod metadata;
pub mod order;
pub mod output;
pub mod pipeline;
pub mod scanner;
pub mod scheduler;
pub mod stages;
