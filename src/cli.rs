//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceName {
    /// The Admission API (axum HTTP server).
    Api,
    /// The lifecycle scheduler: tick loop, per-meeting timers, outbox flusher.
    Scheduler,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Api => "api",
            ServiceName::Scheduler => "scheduler",
        }
    }

    pub fn all() -> Vec<ServiceName> {
        vec![ServiceName::Api, ServiceName::Scheduler]
    }
}

#[derive(Parser, Debug)]
#[command(name = "talktime", about = "Meeting lifecycle engine")]
pub struct Args {
    /// Which services to run in this process.
    #[arg(long, value_enum, num_args = 1.., value_delimiter = ',', default_values_t = ServiceName::all())]
    pub services: Vec<ServiceName>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    pub tracing: TracingFormat,

    /// Run pending database migrations and exit without starting any service.
    #[arg(long, default_value_t = false)]
    pub migrate_only: bool,
}
