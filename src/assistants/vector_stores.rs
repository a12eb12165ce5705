use std::collections::HashMap;

use serde::{de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
    client::OpenAiClient,
    codec::{decode_union, take_payload, TaggedUnion},
    wire_enum, ApiResponseOrError,
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VectorStore {
    pub id: String,
    pub object: String,
    pub created_at: u64,
    pub name: Option<String>,
    #[serde(default)]
    pub usage_bytes: u64,
    pub file_counts: Option<FileCounts>,
    pub status: VectorStoreStatus,
    pub expires_after: Option<ExpiresAfter>,
    pub expires_at: Option<u64>,
    pub last_active_at: Option<u64>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub total: u32,
}

wire_enum! {
    pub enum VectorStoreStatus {
        InProgress,
        Completed,
        Expired,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExpiresAfter {
    /// Currently only `last_active_at`.
    pub anchor: String,
    pub days: u32,
}

wire_enum! {
    pub enum ChunkingStrategyType {
        Auto,
        Static,
    }
}

/// How files are split into chunks when they are added to a vector store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkingStrategy {
    #[default]
    Auto,
    Static(StaticChunking),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StaticChunking {
    /// Between 100 and 4096.
    pub max_chunk_size_tokens: u32,
    /// At most half of `max_chunk_size_tokens`.
    pub chunk_overlap_tokens: u32,
}

impl Default for StaticChunking {
    fn default() -> Self {
        StaticChunking {
            max_chunk_size_tokens: 800,
            chunk_overlap_tokens: 400,
        }
    }
}

impl ChunkingStrategy {
    /// `Static` gets the server's default chunk sizes.
    pub fn new(kind: ChunkingStrategyType) -> Self {
        match kind {
            ChunkingStrategyType::Auto => ChunkingStrategy::Auto,
            ChunkingStrategyType::Static => ChunkingStrategy::Static(StaticChunking::default()),
        }
    }
}

impl TaggedUnion for ChunkingStrategy {
    type Kind = ChunkingStrategyType;

    fn fallback() -> Self {
        ChunkingStrategy::Auto
    }

    fn from_parts(kind: ChunkingStrategyType, mut body: Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ChunkingStrategyType::Auto => ChunkingStrategy::Auto,
            ChunkingStrategyType::Static => {
                ChunkingStrategy::Static(take_payload(&mut body, "static")?.unwrap_or_default())
            }
        })
    }

    fn kind(&self) -> ChunkingStrategyType {
        match self {
            ChunkingStrategy::Auto => ChunkingStrategyType::Auto,
            ChunkingStrategy::Static(_) => ChunkingStrategyType::Static,
        }
    }
}

impl Serialize for ChunkingStrategy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind())?;
        if let ChunkingStrategy::Static(chunking) = self {
            map.serialize_entry("static", chunking)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChunkingStrategy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        decode_union(Value::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct CreateVectorStoreRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<ExpiresAfter>,
    /// Only applies when `file_ids` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking_strategy: Option<ChunkingStrategy>,
}

impl OpenAiClient {
    pub async fn create_vector_store(&self, request: CreateVectorStoreRequest) -> ApiResponseOrError<VectorStore> {
        self.post("vector_stores", request).await
    }

    pub async fn get_vector_store(&self, vector_store_id: &str) -> ApiResponseOrError<VectorStore> {
        self.get(format!("vector_stores/{vector_store_id}")).await
    }
}
