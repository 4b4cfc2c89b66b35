use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AssistantError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }

    /// Map an OpenAPI/JSON-Schema primitive type name.
    pub fn from_schema_type(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ParamType::String),
            "integer" => Some(ParamType::Integer),
            "number" => Some(ParamType::Number),
            "boolean" => Some(ParamType::Boolean),
            _ => None,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: Some(description.into()),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            description: Some(description.into()),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declaration of one remote operation the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// Path on the knowledge-graph API, or an absolute URL.
    pub endpoint: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AssistantError::Schema("tool name must not be empty".into()));
        }
        if self.description.trim().is_empty() {
            return Err(AssistantError::Schema(format!(
                "tool `{}` has no description",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(AssistantError::Schema(format!(
                    "tool `{}` declares parameter `{}` twice",
                    self.name, param.name
                )));
            }
            if !param.required {
                continue;
            }
            let described = param
                .description
                .as_deref()
                .map(|d| !d.trim().is_empty())
                .unwrap_or(false);
            if !described {
                return Err(AssistantError::Schema(format!(
                    "required parameter `{}` of tool `{}` has no description",
                    param.name, self.name
                )));
            }
            if param.default.is_some() {
                return Err(AssistantError::Schema(format!(
                    "required parameter `{}` of tool `{}` must not declare a default",
                    param.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// JSON Schema object for the function-calling protocol.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.ty.as_str()));
            if let Some(description) = &param.description {
                prop.insert("description".into(), json!(description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check model-supplied arguments against the declared parameters and
    /// encode them as query pairs in declaration order.
    pub fn bind_arguments(&self, arguments: &Value) -> Result<Vec<(String, String)>> {
        let empty = Map::new();
        let args = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(AssistantError::Protocol(format!(
                    "arguments for `{}` must be a JSON object, got `{other}`",
                    self.name
                )))
            }
        };

        for key in args.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                tracing::debug!(tool = %self.name, argument = %key, "ignoring undeclared argument");
            }
        }

        let mut query = Vec::new();
        for param in &self.parameters {
            let value = match args.get(&param.name).filter(|v| !v.is_null()) {
                Some(value) => value,
                None => match &param.default {
                    Some(default) => default,
                    None if param.required => {
                        return Err(AssistantError::Protocol(format!(
                            "missing required argument `{}` for `{}`",
                            param.name, self.name
                        )))
                    }
                    None => continue,
                },
            };
            if !param.ty.accepts(value) {
                return Err(AssistantError::Protocol(format!(
                    "argument `{}` for `{}` must be of type {}, got `{value}`",
                    param.name,
                    self.name,
                    param.ty.as_str()
                )));
            }
            let encoded = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            query.push((param.name.clone(), encoded));
        }
        Ok(query)
    }
}

/// Static description of a tool handed to the language model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Add a tool declaration. On error the registry is left untouched.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.tools.contains_key(&spec.name) {
            return Err(AssistantError::DuplicateTool(spec.name));
        }
        spec.validate()?;
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolSpec> {
        self.tools
            .get(name)
            .ok_or_else(|| AssistantError::ToolNotFound(name.to_string()))
    }

    /// Register the operations named in `callable` from an OpenAPI document.
    ///
    /// Operations are matched by `operationId`; each must be a GET with a
    /// `description`, and only query parameters are supported. Either every
    /// listed operation is registered or none is.
    pub fn register_openapi(&mut self, document: &Value, callable: &[&str]) -> Result<usize> {
        let paths = document
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| AssistantError::Schema("OpenAPI document has no `paths` object".into()))?;

        let mut operations: HashMap<&str, (&str, &str, &Value)> = HashMap::new();
        for (path, item) in paths {
            let Some(methods) = item.as_object() else {
                continue;
            };
            for (method, operation) in methods {
                if let Some(id) = operation.get("operationId").and_then(Value::as_str) {
                    operations.insert(id, (path.as_str(), method.as_str(), operation));
                }
            }
        }

        let mut specs: Vec<ToolSpec> = Vec::with_capacity(callable.len());
        for name in callable {
            let (path, method, operation) = operations.get(name).copied().ok_or_else(|| {
                AssistantError::Schema(format!(
                    "operation `{name}` has no matching operationId in the OpenAPI document"
                ))
            })?;
            if !method.eq_ignore_ascii_case("get") {
                return Err(AssistantError::Schema(format!(
                    "operation `{name}` uses {}; only GET operations can be called",
                    method.to_ascii_uppercase()
                )));
            }
            let description = operation
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    AssistantError::Schema(format!("operation `{name}` has no description"))
                })?;

            let mut spec = ToolSpec::new(*name, path, description);
            let declared = operation.get("parameters").and_then(Value::as_array);
            for raw in declared.into_iter().flatten() {
                spec = spec.param(openapi_parameter(name, raw)?);
            }
            if self.tools.contains_key(&spec.name) || specs.iter().any(|s| s.name == spec.name) {
                return Err(AssistantError::DuplicateTool(spec.name));
            }
            spec.validate()?;
            specs.push(spec);
        }

        let count = specs.len();
        for spec in specs {
            tracing::debug!(tool = %spec.name, endpoint = %spec.endpoint, "registered OpenAPI operation");
            self.tools.insert(spec.name.clone(), spec);
        }
        Ok(count)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.json_schema()),
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }
}

fn openapi_parameter(operation: &str, raw: &Value) -> Result<ParameterSpec> {
    let name = raw.get("name").and_then(Value::as_str).ok_or_else(|| {
        AssistantError::Schema(format!("operation `{operation}` has a parameter without a name"))
    })?;
    let location = raw.get("in").and_then(Value::as_str).unwrap_or("query");
    if location != "query" {
        return Err(AssistantError::Schema(format!(
            "parameter `{name}` of `{operation}` is passed in {location}; only query parameters are supported"
        )));
    }
    let schema = raw.get("schema").unwrap_or(&Value::Null);
    let ty = schema_type(schema).ok_or_else(|| {
        AssistantError::Schema(format!(
            "parameter `{name}` of `{operation}` has no supported type"
        ))
    })?;
    let description = raw
        .get("description")
        .or_else(|| schema.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ParameterSpec {
        name: name.to_string(),
        ty,
        required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
        description,
        default: schema.get("default").filter(|v| !v.is_null()).cloned(),
    })
}

/// Primitive type of a parameter schema; nullable `anyOf` unions resolve to
/// their first non-null member.
fn schema_type(schema: &Value) -> Option<ParamType> {
    if let Some(name) = schema.get("type").and_then(Value::as_str) {
        return ParamType::from_schema_type(name);
    }
    schema
        .get("anyOf")
        .and_then(Value::as_array)?
        .iter()
        .find_map(schema_type)
}
