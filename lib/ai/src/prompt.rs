//! Prompt templates.
//!
//! Templates use `{{variable_name}}` placeholders. Every placeholder must be
//! bound at render time: a template rendered with a missing variable is an
//! error, never a prompt with a literal `{{...}}` left in it.

use crate::error::PromptError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
});

/// Variable bindings for rendering.
pub type PromptVariables<'a> = HashMap<&'a str, String>;

/// A named prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    /// Template name, used in error reports.
    pub name: &'static str,
    /// Template content with placeholders.
    pub content: &'static str,
}

impl PromptTemplate {
    /// Creates a template.
    #[must_use]
    pub const fn new(name: &'static str, content: &'static str) -> Self {
        Self { name, content }
    }

    /// Returns the distinct placeholder names, in order of first appearance.
    #[must_use]
    pub fn variables(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for captures in PLACEHOLDER.captures_iter(self.content) {
            if let Some(name) = captures.get(1).map(|m| m.as_str())
                && !names.contains(&name)
            {
                names.push(name);
            }
        }
        names
    }

    /// Renders the template with the given variables.
    ///
    /// Substituted values are inserted verbatim and are not themselves
    /// scanned for placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`PromptError::MissingVariable`] for the first placeholder
    /// with no binding.
    pub fn render(&self, variables: &PromptVariables<'_>) -> Result<String, PromptError> {
        let mut rendered = String::with_capacity(self.content.len());
        let mut last = 0;

        for captures in PLACEHOLDER.captures_iter(self.content) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = variables
                .get(name.as_str())
                .ok_or_else(|| PromptError::MissingVariable {
                    template: self.name.to_string(),
                    variable: name.as_str().to_string(),
                })?;
            rendered.push_str(&self.content[last..whole.start()]);
            rendered.push_str(value);
            last = whole.end();
        }
        rendered.push_str(&self.content[last..]);

        Ok(rendered)
    }
}

/// Picks the best tool for a request, or answers `no_tool_found`.
///
/// Variables: `user_question`, `available_tools`.
pub const TOOL_SELECTION: PromptTemplate = PromptTemplate::new(
    "tool_selection",
    r#"You are a tool selection agent.

## Objective
Select the most suitable tool from the list below for the user's request.

## Inputs
- User request: {{user_question}}
- Available tools with descriptions:
{{available_tools}}

## Guidelines
1. Analyze the intent behind the user request carefully.
2. Match the request against what each tool does.
3. Select only the single most suitable tool.
4. If no tool is appropriate, answer "no_tool_found".

## Output format
Return only the tool name as plain text, or "no_tool_found"."#,
);

/// Fills a tool's input schema from the conversation.
///
/// Variables: `tool_schema`, `user_conversation`.
pub const PARAMETER_EXTRACTION: PromptTemplate = PromptTemplate::new(
    "parameter_extraction",
    r#"You fill JSON schemas using information from a user conversation.

## Tool schema
```json
{{tool_schema}}
```

## User conversation
```
{{user_conversation}}
```

## Instructions
1. Read the schema's `properties`, `type`, and `required` entries.
2. Find a value for each declared property in the conversation.
3. Respect the declared types: arrays are `[]`, objects are `{}`.
4. If a value cannot be found in the conversation, use `NaN` as its value.
5. Convert relative dates ("tomorrow", "next week") to `YYYY-MM-DD`.
6. Where airport codes such as IST or ESB are needed, infer them from city names.

## Output format
Return only the populated JSON object, with no explanation."#,
);

/// Writes the final user-facing answer.
///
/// Variables: `user_conversation`, `tool_result`, `guidance`.
pub const ANSWER_GENERATION: PromptTemplate = PromptTemplate::new(
    "answer_generation",
    r#"You are a response generation agent.

## Objective
Write a clear, natural-language reply to the user based on the conversation
and the result returned by a tool.

## Inputs
- User conversation:
{{user_conversation}}
- Tool result: {{tool_result}}

## For this reply
{{guidance}}

## Guidelines
1. Interpret the user's intent from the conversation.
2. If the tool result is a "validation_error" caused by missing information,
   ask one clear, simple question for the missing details.
3. If no suitable tool was found, politely say that you cannot help with this
   request with your current capabilities.
4. Summarize a successful tool result in simple, helpful language.
5. For any other error, explain the problem in a friendly, transparent way.

Respond only with the final user-facing text. Do not include JSON."#,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering() {
        let template = PromptTemplate::new(
            "classify",
            "Classify into one of: {{categories}}\n\nText: {{ text }}",
        );

        let vars = PromptVariables::from([
            ("categories", "flight, weather, other".to_string()),
            ("text", "Is it raining in Izmir?".to_string()),
        ]);

        let rendered = template.render(&vars).expect("render");
        assert_eq!(
            rendered,
            "Classify into one of: flight, weather, other\n\nText: Is it raining in Izmir?"
        );
    }

    #[test]
    fn missing_variable_is_an_error() {
        let vars = PromptVariables::from([("user_question", "hi".to_string())]);
        let err = TOOL_SELECTION.render(&vars).unwrap_err();
        assert_eq!(
            err,
            PromptError::MissingVariable {
                template: "tool_selection".to_string(),
                variable: "available_tools".to_string(),
            }
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let template = PromptTemplate::new("t", "{{a}} / {{b}}");
        let vars = PromptVariables::from([
            ("a", "{{b}}".to_string()),
            ("b", "B".to_string()),
        ]);
        assert_eq!(template.render(&vars).unwrap(), "{{b}} / B");
    }

    #[test]
    fn literal_braces_in_schema_examples_survive() {
        // The extraction prompt mentions `{}` and `[]` literally.
        let vars = PromptVariables::from([
            ("tool_schema", "{\"properties\":{}}".to_string()),
            ("user_conversation", "Human: hi".to_string()),
        ]);
        let rendered = PARAMETER_EXTRACTION.render(&vars).unwrap();
        assert!(rendered.contains("objects are `{}`"));
        assert!(rendered.contains("{\"properties\":{}}"));
    }

    #[test]
    fn builtin_templates_declare_expected_variables() {
        assert_eq!(
            TOOL_SELECTION.variables(),
            vec!["user_question", "available_tools"]
        );
        assert_eq!(
            PARAMETER_EXTRACTION.variables(),
            vec!["tool_schema", "user_conversation"]
        );
        assert_eq!(
            ANSWER_GENERATION.variables(),
            vec!["user_conversation", "tool_result", "guidance"]
        );
    }
}
