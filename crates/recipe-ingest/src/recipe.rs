//! Recipe records produced by successful imports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured recipe returned by the extraction service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecipeData {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cook_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Fields for a new recipe; the store assigns `id` and `created_at`.
///
/// Denormalizes the scraped post next to the extracted data so the recipe
/// stays readable without the job that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipe {
    pub job_id: String,
    pub source_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    pub data: RecipeData,
}

/// A persisted recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    #[serde(flatten)]
    pub fields: NewRecipe,
    pub created_at: DateTime<Utc>,
}

impl Recipe {
    /// Assigns an id and creation time to `fields`.
    pub fn from_new(fields: NewRecipe) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fields,
            created_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        &self.fields.data.title
    }
}
