use async_trait::async_trait;

use super::MemoryBackend;
use crate::database::Transaction;
use crate::services::categories::{slugify, Category, CategoryService, CreateCategory, UpdateCategory};
use crate::services::{ServiceError, ServiceResult};

#[async_trait]
impl CategoryService for MemoryBackend {
    async fn list(&self, _tx: &mut dyn Transaction) -> ServiceResult<Vec<Category>> {
        let mut categories = self.state.read().await.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn create(&self, tx: &mut dyn Transaction, input: &CreateCategory) -> ServiceResult<Category> {
        let mut state = self.write(tx).await;
        let slug = input.slug.clone().unwrap_or_else(|| slugify(&input.name));
        if state.categories.iter().any(|c| c.slug == slug || c.name == input.name) {
            return Err(ServiceError::AlreadyExists(format!("Category [{}] already exists", input.name)));
        }
        if let Some(parent) = input.parent_id {
            if !state.categories.iter().any(|c| c.id == parent) {
                return Err(ServiceError::Invalid(format!("Parent category [{}] does not exist", parent)));
            }
        }
        let category = Category {
            id: state.next_id(),
            name: input.name.clone(),
            slug,
            parent_id: input.parent_id,
        };
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn update(&self, tx: &mut dyn Transaction, slug: &str, input: &UpdateCategory) -> ServiceResult<Category> {
        let mut state = self.write(tx).await;
        let idx = state
            .categories
            .iter()
            .position(|c| c.slug == slug)
            .ok_or_else(|| ServiceError::not_found(format!("Category [{}] not found", slug)))?;
        if let Some(new_slug) = &input.slug {
            if state.categories.iter().enumerate().any(|(i, c)| i != idx && &c.slug == new_slug) {
                return Err(ServiceError::AlreadyExists(format!("Category [{}] already exists", new_slug)));
            }
        }

        let category = &mut state.categories[idx];
        if let Some(name) = &input.name {
            category.name = name.clone();
        }
        if let Some(new_slug) = &input.slug {
            category.slug = new_slug.clone();
        }
        if input.parent_id.is_some() {
            category.parent_id = input.parent_id;
        }
        Ok(category.clone())
    }

    async fn delete(&self, tx: &mut dyn Transaction, slug: &str) -> ServiceResult<Category> {
        let mut state = self.write(tx).await;
        let idx = state
            .categories
            .iter()
            .position(|c| c.slug == slug)
            .ok_or_else(|| ServiceError::not_found(format!("Category [{}] not found", slug)))?;
        Ok(state.categories.remove(idx))
    }
}
