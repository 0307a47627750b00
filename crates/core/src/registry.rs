// Immutable tool and resource registries, validated once at startup

use crate::resolver::template_placeholders;
use crate::types::{ResourceEntry, ToolDefinition};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("duplicate resource URI: {0}")]
    DuplicateResource(String),

    #[error("tool {tool}: {reason}")]
    InvalidTemplate { tool: String, reason: String },

    #[error("tool {tool}: path parameter '{placeholder}' is not a required property of its input schema")]
    UndeclaredPlaceholder { tool: String, placeholder: String },

    #[error("tool {tool}: linked resource {uri} is not a registered UI resource")]
    UnknownLinkedResource { tool: String, uri: String },

    #[error("tool {tool}: invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// A tool together with its compiled argument validator
pub struct RegisteredTool {
    definition: ToolDefinition,
    validator: Validator,
}

impl RegisteredTool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Check call arguments against the input schema, returning every violation
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|err| err.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

fn schema_required(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|required| required.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn schema_declares(schema: &Value, property: &str) -> bool {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|properties| properties.contains_key(property))
}

fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

/// Resource table keyed by URI
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Vec<ResourceEntry>,
    by_uri: HashMap<String, usize>,
}

impl ResourceRegistry {
    pub fn build(entries: Vec<ResourceEntry>) -> Result<Self, RegistryError> {
        let mut by_uri = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if by_uri.insert(entry.uri.clone(), index).is_some() {
                return Err(RegistryError::DuplicateResource(entry.uri.clone()));
            }
        }
        Ok(Self { entries, by_uri })
    }

    pub fn get(&self, uri: &str) -> Option<&ResourceEntry> {
        self.by_uri.get(uri).map(|&index| &self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tool table keyed by name. Listing preserves catalog order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Validate and index the catalog. Linked resources are checked against
    /// `resources`, so that registry has to be built first.
    pub fn build(
        tools: Vec<ToolDefinition>,
        resources: &ResourceRegistry,
    ) -> Result<Self, RegistryError> {
        let mut registered = Vec::with_capacity(tools.len());
        let mut by_name = HashMap::with_capacity(tools.len());

        for definition in tools {
            let name = definition.name.clone();
            if by_name.contains_key(&name) {
                return Err(RegistryError::DuplicateTool(name));
            }

            let placeholders = template_placeholders(&definition.endpoint_template).map_err(
                |err| RegistryError::InvalidTemplate {
                    tool: name.clone(),
                    reason: err.to_string(),
                },
            )?;
            let required = schema_required(&definition.input_schema);
            for placeholder in placeholders {
                if !required.contains(&placeholder.as_str())
                    || !schema_declares(&definition.input_schema, &placeholder)
                {
                    return Err(RegistryError::UndeclaredPlaceholder {
                        tool: name,
                        placeholder,
                    });
                }
            }

            if let Some(uri) = &definition.linked_resource_uri {
                if !resources.get(uri).is_some_and(ResourceEntry::is_ui) {
                    return Err(RegistryError::UnknownLinkedResource {
                        tool: name,
                        uri: uri.clone(),
                    });
                }
            }

            let validator = compile_schema(&definition.input_schema).map_err(|reason| {
                RegistryError::InvalidSchema {
                    tool: name.clone(),
                    reason,
                }
            })?;

            by_name.insert(name, registered.len());
            registered.push(RegisteredTool {
                definition,
                validator,
            });
        }

        Ok(Self {
            tools: registered,
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(RegisteredTool::definition)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
