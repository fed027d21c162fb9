//! Schema-validated recipe extraction.
//!
//! The model returns free text that should contain a recipe JSON object. The
//! text is parsed and checked against the embedded recipe schema; malformed or
//! invalid output is retried a bounded number of times.

use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;
use tracing::warn;

use super::{ExtractionRequest, RecipeExtractor, ServiceError};
use crate::recipe::RecipeData;

const RECIPE_SCHEMA_JSON: &str = include_str!("../../schema/recipe-v1.json");

/// Raw text generation from the AI model.
#[async_trait]
pub trait RecipeModel: Send + Sync {
    /// Produces recipe JSON text for `request`.
    ///
    /// `previous_error` describes why the last answer was rejected, so the
    /// prompt can ask the model to correct it.
    async fn generate(
        &self,
        request: &ExtractionRequest,
        previous_error: Option<&str>,
    ) -> Result<String, ServiceError>;
}

/// The compiled recipe JSON Schema.
pub struct RecipeSchema {
    validator: Validator,
}

impl RecipeSchema {
    pub fn load() -> Result<Self, ServiceError> {
        let schema: Value = serde_json::from_str(RECIPE_SCHEMA_JSON).map_err(|e| {
            ServiceError::Validation(format!("invalid embedded schema JSON: {}", e))
        })?;
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            ServiceError::Validation(format!("failed to compile recipe schema: {}", e))
        })?;
        Ok(Self { validator })
    }

    /// Checks `value` against the schema, joining all violations.
    pub fn validate(&self, value: &Value) -> Result<(), ServiceError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(errors.join("; ")))
        }
    }

    /// Parses model output into recipe data.
    pub fn parse(&self, text: &str) -> Result<RecipeData, ServiceError> {
        let value: Value = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| ServiceError::Validation(format!("response is not JSON: {}", e)))?;
        self.validate(&value)?;
        serde_json::from_value(value).map_err(|e| ServiceError::Validation(e.to_string()))
    }
}

/// Removes a surrounding Markdown code fence (```json ... ```), if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// [`RecipeExtractor`] over a [`RecipeModel`].
///
/// Model errors are returned as-is; only unparseable or invalid answers are
/// retried here, up to `max_attempts` generations in total.
pub struct SchemaExtractor<M> {
    model: M,
    schema: RecipeSchema,
    max_attempts: u32,
}

impl<M: RecipeModel> SchemaExtractor<M> {
    pub fn new(model: M, max_attempts: u32) -> Result<Self, ServiceError> {
        Ok(Self {
            model,
            schema: RecipeSchema::load()?,
            max_attempts: max_attempts.max(1),
        })
    }
}

#[async_trait]
impl<M: RecipeModel> RecipeExtractor for SchemaExtractor<M> {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RecipeData, ServiceError> {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let text = self
                .model
                .generate(request, last_error.as_deref())
                .await?;

            match self.schema.parse(&text) {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(
                        "Extraction attempt {}/{} rejected: {}",
                        attempt, self.max_attempts, e
                    );
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ServiceError::Validation(format!(
            "no valid recipe after {} attempts: {}",
            self.max_attempts,
            last_error.unwrap_or_default()
        )))
    }
}
