use std::collections::HashMap;

use derive_builder::Builder;
use schemars::JsonSchema;
use serde::{de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
    client::{Deleted, OpenAiClient},
    codec::{decode_union, take_payload, TaggedUnion},
    response_format::{generate_json_schema, ResponseFormat},
    wire_enum, ApiResponseOrError, Result,
};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Assistant {
    pub id: String,
    pub object: String,
    pub created_at: u64,
    /// The name of the assistant. The maximum length is 256 characters.
    pub name: Option<String>,
    pub description: Option<String>,
    /// ID of the model to use.
    pub model: String,
    /// The system instructions that the assistant uses. The maximum length is 256,000 characters.
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Resources used by the assistant's tools: files for `code_interpreter`,
    /// vector stores for `file_search`.
    pub tool_resources: Option<ToolResources>,
    pub metadata: Option<HashMap<String, String>>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// `null`, `"auto"` and unknown shapes all decode to [`ResponseFormat::Auto`].
    #[serde(default)]
    pub response_format: ResponseFormat,
}

wire_enum! {
    /// The `type` of a tool. Shared by tool definitions and tool choices.
    pub enum ToolType {
        Other,
        CodeInterpreter,
        FileSearch,
        Function,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    CodeInterpreter,
    FileSearch {
        file_search: Option<FileSearch>,
    },
    Function {
        function: FunctionDefinition,
    },
    /// A tool type this client does not know, kept as received.
    Other(Map<String, Value>),
}

impl Tool {
    pub fn function(function: FunctionDefinition) -> Self {
        Tool::Function { function }
    }

    pub fn file_search() -> Self {
        Tool::FileSearch { file_search: None }
    }
}

impl TaggedUnion for Tool {
    type Kind = ToolType;

    fn fallback() -> Self {
        Tool::Other(Map::new())
    }

    fn from_parts(kind: ToolType, mut body: Map<String, Value>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ToolType::CodeInterpreter => Tool::CodeInterpreter,
            ToolType::FileSearch => Tool::FileSearch {
                file_search: take_payload(&mut body, "file_search")?,
            },
            ToolType::Function => Tool::Function {
                function: take_payload(&mut body, "function")?
                    .ok_or_else(|| <serde_json::Error as de::Error>::missing_field("function"))?,
            },
            ToolType::Other => Tool::Other(body),
        })
    }

    fn kind(&self) -> ToolType {
        match self {
            Tool::CodeInterpreter => ToolType::CodeInterpreter,
            Tool::FileSearch { .. } => ToolType::FileSearch,
            Tool::Function { .. } => ToolType::Function,
            Tool::Other(_) => ToolType::Other,
        }
    }
}

impl Serialize for Tool {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Tool::Other(body) = self {
            return body.serialize(serializer);
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind())?;
        match self {
            Tool::FileSearch {
                file_search: Some(file_search),
            } => map.serialize_entry("file_search", file_search)?,
            Tool::Function { function } => map.serialize_entry("function", function)?,
            _ => {}
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Tool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        decode_union(Value::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FunctionDefinition {
    /// Must be a-z, A-Z, 0-9, or contain underscores and dashes, with a maximum length of 64.
    pub name: String,
    /// Used by the model to choose when and how to call the function.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The parameters as a JSON Schema object. Omitted means no parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl FunctionDefinition {
    /// Describes a function whose parameters are the fields of `T`.
    pub fn from_type<T: JsonSchema>(strict: bool) -> Result<Self> {
        let (schema, description) = generate_json_schema::<T>()?;
        Ok(FunctionDefinition {
            name: T::schema_name(),
            description,
            parameters: Some(schema),
            strict: Some(strict),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileSearch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_num_results: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ToolResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_interpreter: Option<CodeInterpreterResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_search: Option<FileSearchResources>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CodeInterpreterResources {
    /// At most 20 files.
    #[serde(default)]
    pub file_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FileSearchResources {
    /// At most one vector store.
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
}

#[derive(Serialize, Builder, Default, Debug, Clone)]
#[builder(pattern = "owned")]
#[builder(name = "CreateAssistantBuilder")]
#[builder(setter(strip_option, into))]
pub struct CreateAssistantRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub response_format: Option<ResponseFormat>,
}

impl OpenAiClient {
    pub async fn create_assistant(&self, request: CreateAssistantRequest) -> ApiResponseOrError<Assistant> {
        self.post("assistants", request).await
    }

    pub async fn get_assistant(&self, assistant_id: &str) -> ApiResponseOrError<Assistant> {
        self.get(format!("assistants/{assistant_id}")).await
    }

    pub async fn update_assistant(
        &self,
        assistant_id: &str,
        request: CreateAssistantRequest,
    ) -> ApiResponseOrError<Assistant> {
        self.post(format!("assistants/{assistant_id}"), request)
            .await
    }

    pub async fn delete_assistant(&self, assistant_id: &str) -> ApiResponseOrError<Deleted> {
        self.delete(format!("assistants/{assistant_id}")).await
    }
}
