use jsonschema::JSONSchema;
use serde_json::{json, Value};

use crate::error::{AdapterError, AdapterErrorCode};
use crate::thinking::extract_thinking;

pub fn compile_response_schema(schema: &Value) -> Result<JSONSchema, AdapterError> {
    JSONSchema::compile(schema).map_err(|error| {
        AdapterError::new(
            AdapterErrorCode::SchemaInvalid,
            format!("Invalid response JSON schema: {error}"),
        )
        .with_details(json!({ "schema": schema }))
    })
}

/// Parses completed model output as JSON and validates it against `schema`.
///
/// Inline thinking markup and a surrounding markdown code fence are ignored.
pub fn validate_structured_output(schema: &Value, content: &str) -> Result<Value, AdapterError> {
    let compiled = compile_response_schema(schema)?;
    let visible = extract_thinking(content).content;
    let candidate = strip_code_fence(&visible);

    let parsed: Value = serde_json::from_str(candidate).map_err(|error| {
        AdapterError::new(
            AdapterErrorCode::OutputInvalid,
            format!("Model output is not valid JSON: {error}"),
        )
        .with_details(json!({ "output": candidate }))
    })?;

    if let Err(errors) = compiled.validate(&parsed) {
        let validation_errors = errors
            .map(|error| {
                json!({
                    "path": error.instance_path.to_string(),
                    "message": error.to_string(),
                })
            })
            .collect::<Vec<_>>();

        return Err(AdapterError::new(
            AdapterErrorCode::OutputInvalid,
            "Model output does not match the response schema",
        )
        .with_details(json!({
            "output": parsed,
            "validationErrors": validation_errors,
        })));
    }

    Ok(parsed)
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.split_once('\n') {
        Some((language, inner)) if !language.trim().contains(char::is_whitespace) => inner.trim(),
        _ => body.trim(),
    }
}
