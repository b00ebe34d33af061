//! Crawler module: scheduling, orchestration and the collaborators steps use
//!
//! This module contains:
//! - The time-gated worker pool ([`Scheduler`])
//! - The step orchestrator and its execution lock ([`Orchestrator`])
//! - The HTTP client collaborator with cookie jar and response cache
//! - The logger collaborator
//! - HTML link extraction for link-following steps

mod fetcher;
mod logger;
mod orchestrator;
mod parser;
mod scheduler;

pub use fetcher::{HttpClient, Page, ResponseCache};
pub use logger::{Logger, TracingLogger};
pub use orchestrator::{Chain, Cursor, Orchestrator, StepRef};
pub use parser::{parse_page, ParsedPage};
pub use scheduler::{ScheduledTask, Scheduler};
