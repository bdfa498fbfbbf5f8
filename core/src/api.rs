//! Remote collaborator contract.
//!
//! The server is an external REST service. The core only sees it through
//! these traits; the CLI provides an HTTP implementation and
//! [`crate::catalog::Catalog`] an in-process one.

use std::future::Future;

use crate::error::ApiError;
use crate::models::{Entity, ServerId};

/// CRUD endpoints for one entity collection.
pub trait Endpoints<T: Entity>: Send + Sync {
    fn fetch_all(&self) -> impl Future<Output = Result<Vec<T>, ApiError>> + Send;

    fn fetch_one(&self, id: &ServerId) -> impl Future<Output = Result<T, ApiError>> + Send;

    fn create(&self, draft: &T::Draft) -> impl Future<Output = Result<T, ApiError>> + Send;

    fn update(
        &self,
        id: &ServerId,
        patch: &T::Patch,
    ) -> impl Future<Output = Result<T, ApiError>> + Send;

    fn delete(&self, id: &ServerId) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Recipe sub-resources. Adding a present value or removing an absent one succeeds.
pub trait RecipeEndpoints: Send + Sync {
    /// Link by ingredient name; the server creates the ingredient when it does not exist.
    fn link_ingredient(
        &self,
        recipe: &ServerId,
        name: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn unlink_ingredient(
        &self,
        recipe: &ServerId,
        name: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn add_tag(
        &self,
        recipe: &ServerId,
        tag: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn remove_tag(
        &self,
        recipe: &ServerId,
        tag: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn add_source(
        &self,
        recipe: &ServerId,
        source: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn remove_source(
        &self,
        recipe: &ServerId,
        source: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// Distinct categories the server knows about.
pub trait CategoryEndpoints: Send + Sync {
    fn ingredient_categories(&self) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;

    fn consumable_categories(&self) -> impl Future<Output = Result<Vec<String>, ApiError>> + Send;
}

/// Everything the pantry client needs from its server.
pub trait PantryApi:
    Endpoints<crate::models::Ingredient>
    + Endpoints<crate::models::Consumable>
    + Endpoints<crate::models::Recipe>
    + RecipeEndpoints
    + CategoryEndpoints
    + 'static
{
}

impl<A> PantryApi for A where
    A: Endpoints<crate::models::Ingredient>
        + Endpoints<crate::models::Consumable>
        + Endpoints<crate::models::Recipe>
        + RecipeEndpoints
        + CategoryEndpoints
        + 'static
{
}
