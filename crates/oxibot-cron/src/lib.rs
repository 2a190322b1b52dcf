//! Durable cron scheduler — persisted job store + tick-driven dispatcher.
//!
//! Replaces nanobot's `cron/scheduler.py`.

pub mod service;
pub mod types;

pub use service::CronService;
pub use types::{
    validate_cron_expr, CronJob, CronPayload, CronSchedule, CronStore, JobStatus, ScheduleKind,
};
