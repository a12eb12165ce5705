use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{runs::CreateThreadRequest, ToolResources};
use crate::{
    client::{Deleted, OpenAiClient},
    ApiResponseOrError,
};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Thread {
    pub id: String,
    pub object: Option<String>,
    pub created_at: Option<u64>,
    /// Resources made available to the assistant's tools in this thread.
    pub tool_resources: Option<ToolResources>,
    pub metadata: Option<HashMap<String, String>>,
}

impl OpenAiClient {
    pub async fn create_thread(&self, request: CreateThreadRequest) -> ApiResponseOrError<Thread> {
        self.post("threads", request).await
    }

    pub async fn get_thread(&self, thread_id: &str) -> ApiResponseOrError<Thread> {
        self.get(format!("threads/{thread_id}")).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> ApiResponseOrError<Deleted> {
        self.delete(format!("threads/{thread_id}")).await
    }
}
