//! Tool descriptors as advertised by the remote capability list.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Argument record passed to a tool: parameter name to value.
///
/// A `null` value means "present but unknown".
pub type ToolArguments = serde_json::Map<String, JsonValue>;

/// Definition of a remotely callable tool.
///
/// Immutable once fetched for a run; the catalog may change between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for input parameters (`properties` + `required`).
    pub input_schema: JsonValue,
}

impl ToolDescriptor {
    /// Creates a descriptor with an empty input schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({}),
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Looks up a tool by exact name.
#[must_use]
pub fn find_tool<'a>(catalog: &'a [ToolDescriptor], name: &str) -> Option<&'a ToolDescriptor> {
    catalog.iter().find(|tool| tool.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_tool_is_exact_match() {
        let catalog = vec![
            ToolDescriptor::new("search_flights", "Search flights"),
            ToolDescriptor::new("search_flights_v2", "Search flights, newer"),
        ];

        assert_eq!(
            find_tool(&catalog, "search_flights").map(|t| t.description.as_str()),
            Some("Search flights")
        );
        assert!(find_tool(&catalog, "Search_Flights").is_none());
        assert!(find_tool(&catalog, "search").is_none());
    }

    #[test]
    fn descriptor_builder_sets_schema() {
        let tool = ToolDescriptor::new("weather", "Current weather").with_input_schema(
            serde_json::json!({"properties": {"city": {"type": "string"}}, "required": ["city"]}),
        );
        assert_eq!(tool.input_schema["required"][0], "city");
    }
}
