//! Read access to fine-tuning jobs.
use either::Either;
use serde::{Deserialize, Serialize};

use crate::{client::OpenAiClient, wire_enum, ApiResponseOrError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FineTuneJob {
    pub id: String,
    pub object: String,
    pub model: String,
    pub created_at: Option<u64>,
    pub finished_at: Option<u64>,
    /// Only set once the job has succeeded.
    pub fine_tuned_model: Option<String>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub result_files: Vec<String>,
    pub status: JobStatus,
    pub validation_file: Option<String>,
    pub training_file: String,
    pub hyperparameters: Option<HyperParameters>,
    pub trained_tokens: Option<u64>,
}

wire_enum! {
    pub enum JobStatus {
        NotStarted,
        ValidatingFiles,
        Queued,
        Running,
        Succeeded,
        Failed,
        Cancelled,
    }
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HyperParameters {
    /// A count, or a mode such as `"auto"`.
    #[serde(default, with = "either::serde_untagged_optional")]
    pub n_epochs: Option<Either<u32, String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FineTuneEvent {
    pub id: String,
    pub created_at: u64,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
}

impl OpenAiClient {
    pub async fn get_fine_tuning_job(&self, job_id: &str) -> ApiResponseOrError<FineTuneJob> {
        self.get(format!("fine_tuning/jobs/{job_id}")).await
    }

    pub async fn list_fine_tuning_jobs(&self, after: Option<String>) -> ApiResponseOrError<Vec<FineTuneJob>> {
        self.list("fine_tuning/jobs", after).await
    }

    pub async fn list_fine_tuning_events(&self, job_id: &str) -> ApiResponseOrError<Vec<FineTuneEvent>> {
        self.list(format!("fine_tuning/jobs/{job_id}/events"), None)
            .await
    }
}
