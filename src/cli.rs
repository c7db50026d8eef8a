use crate::modules::jobs::domain::entities::JobKind;
use clap::{Parser, Subcommand};

/// jobwatch - follow long-running backend jobs from the terminal
#[derive(Parser, Debug)]
#[command(name = "jobwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Track transcription, analysis and video generation jobs", long_about = None)]
pub struct Cli {
    /// Job API base URL (overrides JOBWATCH_API_URL)
    #[arg(short = 'u', long = "url", global = true)]
    pub url: Option<String>,

    /// Push endpoint (overrides JOBWATCH_PUSH_URL)
    #[arg(long = "push-url", global = true)]
    pub push_url: Option<String>,

    /// Poll only, even if a push endpoint is configured
    #[arg(long = "no-push", global = true)]
    pub no_push: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Follow jobs until they finish, printing every update as a JSON line
    Track {
        /// Job kind: transcription, analysis or video_generation
        #[arg(short = 'k', long = "kind", default_value = "analysis")]
        kind: JobKind,

        /// Backend job ids
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Submit a new job and follow it
    Start {
        #[arg(short = 'k', long = "kind")]
        kind: JobKind,

        /// Job parameters as a JSON object
        #[arg(short = 'p', long = "params", default_value = "{}")]
        params: String,
    },

    /// Fetch the current state of a job once
    Status { job_id: String },

    /// Ask the backend to cancel a job
    Cancel { job_id: String },
}
