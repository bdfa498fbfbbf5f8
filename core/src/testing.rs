//! Scriptable collaborator for exercising the mutation engine.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::api::{CategoryEndpoints, Endpoints, RecipeEndpoints};
use crate::catalog::{Catalog, CatalogItem};
use crate::error::{ApiError, Operation};
use crate::models::{NewRecipe, Recipe, RecipePatch, ServerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub body: String,
}

/// Wraps a [`Catalog`] and can fail chosen operations or hold writes in flight.
#[derive(Debug, Default)]
pub struct FlakyApi {
    pub catalog: Catalog,
    failing: Mutex<HashSet<Operation>>,
    fail_all: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<Vec<Call>>,
}

impl FlakyApi {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    /// Writes block until [`FlakyApi::release`] hands out permits.
    pub fn gated(catalog: Catalog) -> Self {
        Self {
            catalog,
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn release(&self, writes: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(writes);
        }
    }

    pub fn fail(&self, operation: Operation) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    pub fn fail_everything(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !c.operation.is_read())
            .collect()
    }

    async fn check(&self, operation: Operation, body: impl Serialize) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                operation,
                body: serde_json::to_string(&body).unwrap_or_default(),
            });
        if let (Some(gate), false) = (&self.gate, operation.is_read()) {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let failing = self.fail_all.load(Ordering::SeqCst)
            || self
                .failing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&operation);
        if failing {
            return Err(ApiError::Status {
                operation,
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl<T: CatalogItem> Endpoints<T> for FlakyApi {
    async fn fetch_all(&self) -> Result<Vec<T>, ApiError> {
        self.check(Operation::list(T::COLLECTION), ()).await?;
        Ok(self.catalog.list_items())
    }

    async fn fetch_one(&self, id: &ServerId) -> Result<T, ApiError> {
        self.check(Operation::get(T::COLLECTION), id).await?;
        self.catalog.get_item(id)
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, ApiError> {
        self.check(Operation::create(T::COLLECTION), draft).await?;
        self.catalog.create_item(draft)
    }

    async fn update(&self, id: &ServerId, patch: &T::Patch) -> Result<T, ApiError> {
        self.check(Operation::update(T::COLLECTION), patch).await?;
        self.catalog.update_item(id, patch)
    }

    async fn delete(&self, id: &ServerId) -> Result<(), ApiError> {
        self.check(Operation::delete(T::COLLECTION), id).await?;
        self.catalog.delete_item::<T>(id)
    }
}

impl Endpoints<Recipe> for FlakyApi {
    async fn fetch_all(&self) -> Result<Vec<Recipe>, ApiError> {
        self.check(Operation::ListRecipes, ()).await?;
        Ok(self.catalog.list_recipes())
    }

    async fn fetch_one(&self, id: &ServerId) -> Result<Recipe, ApiError> {
        self.check(Operation::GetRecipe, id).await?;
        self.catalog.get_recipe(id)
    }

    async fn create(&self, draft: &NewRecipe) -> Result<Recipe, ApiError> {
        self.check(Operation::CreateRecipe, draft).await?;
        self.catalog.create_recipe(draft)
    }

    async fn update(&self, id: &ServerId, patch: &RecipePatch) -> Result<Recipe, ApiError> {
        self.check(Operation::UpdateRecipe, patch).await?;
        self.catalog.update_recipe(id, patch)
    }

    async fn delete(&self, id: &ServerId) -> Result<(), ApiError> {
        self.check(Operation::DeleteRecipe, id).await?;
        self.catalog.delete_recipe(id)
    }
}

impl RecipeEndpoints for FlakyApi {
    async fn link_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        self.check(Operation::LinkIngredient, name).await?;
        self.catalog.link_ingredient(recipe, name)
    }

    async fn unlink_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        self.check(Operation::UnlinkIngredient, name).await?;
        self.catalog.unlink_ingredient(recipe, name)
    }

    async fn add_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        self.check(Operation::AddTag, tag).await?;
        self.catalog.add_tag(recipe, tag)
    }

    async fn remove_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        self.check(Operation::RemoveTag, tag).await?;
        self.catalog.remove_tag(recipe, tag)
    }

    async fn add_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        self.check(Operation::AddSource, source).await?;
        self.catalog.add_source(recipe, source)
    }

    async fn remove_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        self.check(Operation::RemoveSource, source).await?;
        self.catalog.remove_source(recipe, source)
    }
}

impl CategoryEndpoints for FlakyApi {
    async fn ingredient_categories(&self) -> Result<Vec<String>, ApiError> {
        self.check(Operation::IngredientCategories, ()).await?;
        Ok(self.catalog.categories::<crate::models::Ingredient>())
    }

    async fn consumable_categories(&self) -> Result<Vec<String>, ApiError> {
        self.check(Operation::ConsumableCategories, ()).await?;
        Ok(self.catalog.categories::<crate::models::Consumable>())
    }
}
