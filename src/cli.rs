use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// approval-gate: skip the manual IAM approval when a deploy changes no IAM
#[derive(Parser)]
#[command(name = "approval-gate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server that receives pipeline jobs
    Serve {
        /// Port to bind (defaults to APPROVAL_GATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Decide whether a job event can be auto-approved and print the outcome
    Evaluate {
        /// Path to a CodePipeline job event (JSON)
        #[arg(long)]
        event: PathBuf,
    },

    /// Approve the pending manual approval action once
    Approve {
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long)]
        stage: Option<String>,
        #[arg(long)]
        action: Option<String>,
    },

    /// Run the whole workflow for a job event in the foreground
    Run {
        /// Path to a CodePipeline job event (JSON)
        #[arg(long)]
        event: PathBuf,
    },

    /// Print the workflow as an Amazon States Language definition
    Definition {
        /// Task resource of the evaluation step
        #[arg(long)]
        evaluate_resource: String,
        /// Task resource of the approval step
        #[arg(long)]
        approve_resource: String,
    },
}
