//! A drop-in crond replacement: crontab parsing, a minute-aligned scheduler,
//! process-tree-aware task supervision, and SLA alerting over email.

pub mod alert;
pub mod clock;
pub mod config;
pub mod crontab;
pub mod hostname;
pub mod job;
pub mod policy;
pub mod proctree;
pub mod scheduler;
