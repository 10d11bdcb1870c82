//! Tool dispatcher
//!
//! A static registry mapping function names to local handlers. The registry is
//! built once at startup and is also the source of the tool list advertised in
//! the session configuration, so the handlers and the schemas the model sees
//! cannot drift apart.

pub mod builtin;

use crate::error::{RealtimeError, Result};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

pub use builtin::{builtin_tools, LightState, Lights};

/// Future returned by a tool handler. Handlers never fail: errors are folded
/// into the result text so the model can react to them in conversation.
pub type ToolFuture = BoxFuture<'static, String>;

/// A local capability the model can invoke by name.
pub trait ToolHandler: Send + Sync {
    fn call(&self, args: Value) -> ToolFuture;
}

impl<F> ToolHandler for F
where
    F: Fn(Value) -> ToolFuture + Send + Sync,
{
    fn call(&self, args: Value) -> ToolFuture {
        self(args)
    }
}

/// JSON types understood by the parameter schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Boolean,
    Number,
    String,
    Object,
}

impl JsonType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A single named property of a tool's parameter object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: JsonType,
    pub description: String,
}

/// Parameter object of a tool. Always serialized with
/// `additionalProperties: false`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    kind: JsonType,
    properties: BTreeMap<String, Property>,
    required: Vec<String>,
    #[serde(rename = "additionalProperties")]
    additional_properties: bool,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: JsonType::Object,
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

impl ParameterSchema {
    /// An empty parameter object (the tool takes no arguments).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required property.
    pub fn required(mut self, name: &str, kind: JsonType, description: &str) -> Self {
        self.required.push(name.to_string());
        self.optional(name, kind, description)
    }

    /// Add a property the model may omit.
    pub fn optional(mut self, name: &str, kind: JsonType, description: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            Property {
                kind,
                description: description.to_string(),
            },
        );
        self
    }

    /// Check parsed arguments against this schema.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        let object = args
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;

        for name in &self.required {
            if !object.contains_key(name) {
                return Err(format!("missing required property `{}`", name));
            }
        }

        for (name, value) in object {
            let property = self
                .properties
                .get(name)
                .ok_or_else(|| format!("unexpected property `{}`", name))?;
            if !property.kind.matches(value) {
                return Err(format!("property `{}` must be a {}", name, property.kind));
            }
        }

        Ok(())
    }
}

/// Kind tag of an advertised tool. The realtime API only knows functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Function,
}

/// Tool description advertised to the model in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolSchema {
    pub fn function(name: &str, description: &str, parameters: ParameterSchema) -> Self {
        Self {
            kind: ToolKind::Function,
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Outcome of looking up and preparing a function call.
pub enum Dispatch {
    /// No handler is registered under that name.
    Unknown,
    /// The arguments were rejected before reaching the handler; carries the
    /// text to report back to the model.
    Rejected(String),
    /// The handler was invoked; await the future for its result.
    Call(ToolFuture),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("Unknown"),
            Self::Rejected(reason) => f.debug_tuple("Rejected").field(reason).finish(),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

struct RegisteredTool {
    schema: ToolSchema,
    handler: Box<dyn ToolHandler>,
}

/// Registry of tools keyed by exact function name
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under the schema's name.
    pub fn register<H>(&mut self, schema: ToolSchema, handler: H) -> Result<()>
    where
        H: ToolHandler + 'static,
    {
        if self.index.contains_key(&schema.name) {
            return Err(RealtimeError::ToolRegistry(format!(
                "duplicate tool `{}`",
                schema.name
            )));
        }
        debug!("Registering tool {}", schema.name);
        self.index.insert(schema.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            schema,
            handler: Box::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schemas in registration order, ready to advertise.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema.clone()).collect()
    }

    /// Check that an advertised tool list matches the registered handlers:
    /// same names, same parameter shapes.
    pub fn verify_advertised(&self, advertised: &[ToolSchema]) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = Vec::with_capacity(advertised.len());

        for schema in advertised {
            if seen.contains(&schema.name.as_str()) {
                problems.push(format!("`{}` advertised twice", schema.name));
                continue;
            }
            seen.push(schema.name.as_str());

            match self.index.get(&schema.name) {
                None => problems.push(format!("`{}` has no local handler", schema.name)),
                Some(&i) if self.tools[i].schema.parameters != schema.parameters => {
                    problems.push(format!("`{}` parameter shape differs", schema.name))
                }
                Some(_) => {}
            }
        }

        for tool in &self.tools {
            if !seen.contains(&tool.schema.name.as_str()) {
                problems.push(format!("`{}` is not advertised", tool.schema.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RealtimeError::ToolRegistry(problems.join("; ")))
        }
    }

    /// Look up `name`, validate `arguments` and invoke the handler.
    pub fn dispatch(&self, name: &str, arguments: &str) -> Dispatch {
        let Some(&i) = self.index.get(name) else {
            return Dispatch::Unknown;
        };
        let tool = &self.tools[i];

        // An argument-less call may arrive with an empty arguments string
        let args = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(args) => args,
                Err(e) => {
                    warn!("Arguments for {} are not valid JSON: {}", name, e);
                    return Dispatch::Rejected(format!("invalid arguments for {}: {}", name, e));
                }
            }
        };

        if let Err(reason) = tool.schema.parameters.validate(&args) {
            warn!("Arguments for {} rejected: {}", name, reason);
            return Dispatch::Rejected(format!("invalid arguments for {}: {}", name, reason));
        }

        debug!("Invoking tool {} with {}", name, args);
        Dispatch::Call(tool.handler.call(args))
    }
}
