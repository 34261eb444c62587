use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::ServiceResult;
use crate::database::Transaction;
use crate::middleware::binder::FormInput;
use crate::middleware::validators::is_slug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
}

fn slug_format(value: &str) -> Result<(), ValidationError> {
    if !is_slug(value) {
        let mut err = ValidationError::new("slug");
        err.message = Some("must be lowercase words separated by dashes".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCategory {
    #[validate(length(min = 1))]
    pub name: String,
    /// Derived from the name when absent
    #[validate(custom(function = "slug_format"))]
    pub slug: Option<String>,
    pub parent_id: Option<i64>,
}

impl FormInput for CreateCategory {}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCategory {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    #[validate(custom(function = "slug_format"))]
    pub slug: Option<String>,
    pub parent_id: Option<i64>,
}

impl FormInput for UpdateCategory {}

/// Lowercase the name and join its words with dashes
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
pub trait CategoryService: Send + Sync {
    async fn list(&self, tx: &mut dyn Transaction) -> ServiceResult<Vec<Category>>;

    async fn create(&self, tx: &mut dyn Transaction, input: &CreateCategory) -> ServiceResult<Category>;

    async fn update(&self, tx: &mut dyn Transaction, slug: &str, input: &UpdateCategory) -> ServiceResult<Category>;

    async fn delete(&self, tx: &mut dyn Transaction, slug: &str) -> ServiceResult<Category>;
}
