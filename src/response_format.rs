//! The `response_format` union shared by assistants and runs.
use std::mem::take;

use schemars::JsonSchema as GenerateSchema;
use serde::{
    de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{Map, Value};

use crate::{
    codec::{decode_union, take_payload, TaggedUnion, WireEnum},
    wire_enum, Error, Result,
};

wire_enum! {
    pub enum ResponseFormatType {
        Auto,
        Text,
        Json = "json_object",
        JsonSchema,
    }
}

/// The format the model must output.
///
/// `null` or any bare string on the wire decodes to [`ResponseFormat::Auto`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseFormat {
    #[default]
    Auto,
    Text,
    /// JSON mode: the model emits valid JSON with no schema constraint.
    Json,
    /// Structured outputs constrained by a JSON schema.
    JsonSchema(JsonSchema),
}

impl ResponseFormat {
    /// Builds a payload-free format.
    ///
    /// [`ResponseFormatType::JsonSchema`] needs a schema and is rejected; use
    /// [`ResponseFormat::json_schema`] instead.
    pub fn new(kind: ResponseFormatType) -> Result<Self> {
        match kind {
            ResponseFormatType::Auto => Ok(Self::Auto),
            ResponseFormatType::Text => Ok(Self::Text),
            ResponseFormatType::Json => Ok(Self::Json),
            ResponseFormatType::JsonSchema => Err(Error::InvalidVariant(
                "a json_schema response format needs a schema, use ResponseFormat::json_schema",
            )),
        }
    }

    pub fn json_schema(schema: JsonSchema) -> Self {
        Self::JsonSchema(schema)
    }

    pub fn schema(&self) -> Option<&JsonSchema> {
        match self {
            Self::JsonSchema(schema) => Some(schema),
            _ => None,
        }
    }
}

impl TaggedUnion for ResponseFormat {
    type Kind = ResponseFormatType;

    fn fallback() -> Self {
        Self::Auto
    }

    fn from_parts(kind: ResponseFormatType, mut body: Map<String, Value>) -> Result<Self, serde_json::Error> {
        match kind {
            ResponseFormatType::JsonSchema => take_payload(&mut body, "json_schema")?
                .map(Self::JsonSchema)
                .ok_or_else(|| de::Error::missing_field("json_schema")),
            ResponseFormatType::Auto => Ok(Self::Auto),
            ResponseFormatType::Text => Ok(Self::Text),
            ResponseFormatType::Json => Ok(Self::Json),
        }
    }

    fn kind(&self) -> ResponseFormatType {
        match self {
            Self::Auto => ResponseFormatType::Auto,
            Self::Text => ResponseFormatType::Text,
            Self::Json => ResponseFormatType::Json,
            Self::JsonSchema(_) => ResponseFormatType::JsonSchema,
        }
    }
}

impl Serialize for ResponseFormat {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if let Self::Auto = self {
            return serializer.serialize_str(self.kind().wire_name());
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind())?;
        if let Self::JsonSchema(schema) = self {
            map.serialize_entry("json_schema", schema)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        decode_union(raw).map_err(de::Error::custom)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct JsonSchema {
    /// The name of the response format. Must be a-z, A-Z, 0-9, or contain underscores and dashes, with a maximum length of 64.
    pub name: String,
    /// A description of what the response format is for, used by the model to determine how to respond in the format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The schema for the response format, described as a JSON Schema object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Whether to enable strict schema adherence when generating the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

impl JsonSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        JsonSchema {
            name: name.into(),
            description: None,
            schema: Some(schema),
            strict: None,
        }
    }

    /// Generates the schema of `T` in the dialect structured outputs accept.
    pub fn from_type<T: GenerateSchema>(strict: bool) -> Result<Self> {
        let (schema, description) = generate_json_schema::<T>()?;
        Ok(JsonSchema {
            name: T::schema_name(),
            description,
            schema: Some(schema),
            strict: Some(strict),
        })
    }
}

fn structured_output_post_process(schema: &mut Value) {
    let obj = match schema {
        Value::Object(obj) => obj,
        _ => return,
    };
    // structured outputs accept `anyOf` but not `oneOf`
    if let Some(v) = obj.remove("oneOf") {
        obj.insert("anyOf".to_string(), v);
    }
    if let Some(Value::Array(objs)) = obj.get_mut("anyOf") {
        for v in objs.iter_mut() {
            structured_output_post_process(v);
        }
    }
    let ty = match obj.get("type") {
        Some(Value::String(s)) => s.clone(),
        _ => return,
    };
    match ty.as_str() {
        "array" => {
            if let Some(v) = obj.get_mut("items") {
                structured_output_post_process(v);
            }
        }
        "object" => {
            let properties = if let Some(Value::Object(p)) = obj.get_mut("properties") {
                p
            } else {
                return;
            };
            let mut required = Vec::new();
            for (k, v) in properties.iter_mut() {
                structured_output_post_process(v);
                required.push(Value::String(k.clone()));
            }
            // every property must be listed as required
            obj.insert("required".to_string(), Value::Array(required));
            if obj.get("additionalProperties").is_none() {
                obj.insert("additionalProperties".to_string(), Value::Bool(false));
            }
        }
        "string" => {
            *obj = take(obj)
                .into_iter()
                .filter(|(k, _)| ["type", "enum", "description"].contains(&k.as_str()))
                .collect();
        }
        "number" | "integer" => {
            // `format`, `minimum` and `multipleOf` are rejected
            *obj = take(obj)
                .into_iter()
                .filter(|(k, _)| ["type", "description"].contains(&k.as_str()))
                .collect();
        }
        _ => {}
    }
}

/// Generates the JSON schema of `T` and its top-level description.
///
/// Numeric width constraints cannot be expressed: every integer is an `i64`
/// and every float an `f64` as far as the model is concerned.
pub fn generate_json_schema<T: GenerateSchema>() -> Result<(Value, Option<String>)> {
    let mut settings = schemars::r#gen::SchemaSettings::default();
    settings.option_nullable = false;
    settings.option_add_null_type = true;
    settings.inline_subschemas = true;
    let mut generator = schemars::r#gen::SchemaGenerator::new(settings);
    let mut schema = T::json_schema(&mut generator).into_object();
    let description = schema.metadata().description.clone();
    let mut schema = serde_json::to_value(schema)?;
    structured_output_post_process(&mut schema);
    Ok((schema, description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_bare_strings_are_auto() {
        let format: ResponseFormat = serde_json::from_value(json!(null)).unwrap();
        assert_eq!(format, ResponseFormat::Auto);

        let format: ResponseFormat = serde_json::from_value(json!("auto")).unwrap();
        assert_eq!(format, ResponseFormat::Auto);

        let format: ResponseFormat = serde_json::from_value(json!("text")).unwrap();
        assert_eq!(format, ResponseFormat::Auto);
    }

    #[test]
    fn decodes_object_variants() {
        let format: ResponseFormat = serde_json::from_value(json!({"type": "text"})).unwrap();
        assert_eq!(format, ResponseFormat::Text);

        let format: ResponseFormat =
            serde_json::from_value(json!({"type": "json_object"})).unwrap();
        assert_eq!(format, ResponseFormat::Json);

        let format: ResponseFormat =
            serde_json::from_value(json!({"type": "something_newer"})).unwrap();
        assert_eq!(format, ResponseFormat::Auto);
    }

    #[test]
    fn decodes_schema_variant_with_payload() {
        let format: ResponseFormat = serde_json::from_value(json!({
            "type": "json_schema",
            "json_schema": {
                "name": "weather",
                "schema": {"type": "object", "properties": {}},
                "strict": true
            }
        }))
        .unwrap();

        let schema = format.schema().unwrap();
        assert_eq!(schema.name, "weather");
        assert_eq!(schema.strict, Some(true));
        assert_eq!(schema.schema, Some(json!({"type": "object", "properties": {}})));
    }

    #[test]
    fn schema_variant_without_payload_fails_to_decode() {
        let result = serde_json::from_value::<ResponseFormat>(json!({"type": "json_schema"}));
        assert!(result.is_err());
    }

    #[test]
    fn schema_kind_cannot_be_built_without_schema() {
        assert!(matches!(
            ResponseFormat::new(ResponseFormatType::JsonSchema),
            Err(Error::InvalidVariant(_))
        ));
        assert_eq!(
            ResponseFormat::new(ResponseFormatType::Json).unwrap(),
            ResponseFormat::Json
        );
    }

    #[test]
    fn encodes_wire_shapes() {
        assert_eq!(serde_json::to_value(ResponseFormat::Auto).unwrap(), json!("auto"));
        assert_eq!(
            serde_json::to_value(ResponseFormat::Json).unwrap(),
            json!({"type": "json_object"})
        );

        let format = ResponseFormat::json_schema(JsonSchema::new("answer", json!({"type": "object"})));
        assert_eq!(
            serde_json::to_value(format).unwrap(),
            json!({
                "type": "json_schema",
                "json_schema": {"name": "answer", "schema": {"type": "object"}}
            })
        );
    }

    #[derive(schemars::JsonSchema)]
    #[allow(dead_code)]
    struct Forecast {
        city: String,
        high: i32,
        note: Option<String>,
    }

    #[test]
    fn generated_schema_requires_every_property() {
        let schema = JsonSchema::from_type::<Forecast>(true).unwrap();
        let body = schema.schema.unwrap();

        assert_eq!(schema.name, "Forecast");
        assert_eq!(body["additionalProperties"], json!(false));
        let required = body["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
        assert_eq!(body["properties"]["high"], json!({"type": "integer"}));
    }
}
