use std::fmt;

use thiserror::Error;

use crate::models::{CollectionKey, EntityId};

/// A single call against the pantry REST API, named for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListIngredients,
    GetIngredient,
    CreateIngredient,
    UpdateIngredient,
    DeleteIngredient,
    IngredientCategories,
    ListRecipes,
    GetRecipe,
    CreateRecipe,
    UpdateRecipe,
    DeleteRecipe,
    LinkIngredient,
    UnlinkIngredient,
    AddTag,
    RemoveTag,
    AddSource,
    RemoveSource,
    ListConsumables,
    GetConsumable,
    CreateConsumable,
    UpdateConsumable,
    DeleteConsumable,
    ConsumableCategories,
}

impl Operation {
    #[must_use]
    pub fn list(key: CollectionKey) -> Self {
        match key {
            CollectionKey::Ingredients => Self::ListIngredients,
            CollectionKey::Recipes => Self::ListRecipes,
            CollectionKey::Consumables => Self::ListConsumables,
        }
    }

    #[must_use]
    pub fn get(key: CollectionKey) -> Self {
        match key {
            CollectionKey::Ingredients => Self::GetIngredient,
            CollectionKey::Recipes => Self::GetRecipe,
            CollectionKey::Consumables => Self::GetConsumable,
        }
    }

    #[must_use]
    pub fn create(key: CollectionKey) -> Self {
        match key {
            CollectionKey::Ingredients => Self::CreateIngredient,
            CollectionKey::Recipes => Self::CreateRecipe,
            CollectionKey::Consumables => Self::CreateConsumable,
        }
    }

    #[must_use]
    pub fn update(key: CollectionKey) -> Self {
        match key {
            CollectionKey::Ingredients => Self::UpdateIngredient,
            CollectionKey::Recipes => Self::UpdateRecipe,
            CollectionKey::Consumables => Self::UpdateConsumable,
        }
    }

    #[must_use]
    pub fn delete(key: CollectionKey) -> Self {
        match key {
            CollectionKey::Ingredients => Self::DeleteIngredient,
            CollectionKey::Recipes => Self::DeleteRecipe,
            CollectionKey::Consumables => Self::DeleteConsumable,
        }
    }

    /// Verb phrase used in "Failed to ..." messages.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::ListIngredients => "fetch ingredients",
            Self::GetIngredient => "fetch ingredient",
            Self::CreateIngredient => "create ingredient",
            Self::UpdateIngredient => "update ingredient",
            Self::DeleteIngredient => "delete ingredient",
            Self::IngredientCategories => "fetch categories",
            Self::ListRecipes => "fetch recipes",
            Self::GetRecipe => "fetch recipe",
            Self::CreateRecipe => "create recipe",
            Self::UpdateRecipe => "update recipe",
            Self::DeleteRecipe => "delete recipe",
            Self::LinkIngredient => "link ingredient to recipe",
            Self::UnlinkIngredient => "unlink ingredient from recipe",
            Self::AddTag => "add tag to recipe",
            Self::RemoveTag => "remove tag from recipe",
            Self::AddSource => "add source to recipe",
            Self::RemoveSource => "remove source from recipe",
            Self::ListConsumables => "fetch consumables",
            Self::GetConsumable => "fetch consumable",
            Self::CreateConsumable => "create consumable",
            Self::UpdateConsumable => "update consumable",
            Self::DeleteConsumable => "delete consumable",
            Self::ConsumableCategories => "fetch consumable categories",
        }
    }

    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ListIngredients
                | Self::GetIngredient
                | Self::IngredientCategories
                | Self::ListRecipes
                | Self::GetRecipe
                | Self::ListConsumables
                | Self::GetConsumable
                | Self::ConsumableCategories
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Failure talking to the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Failed to {operation}: HTTP {status}: {message}")]
    Status {
        operation: Operation,
        status: u16,
        message: String,
    },
    #[error("Failed to {operation}: {message}")]
    Transport { operation: Operation, message: String },
    #[error("Failed to {operation}: invalid response: {message}")]
    Decode { operation: Operation, message: String },
}

impl ApiError {
    pub fn not_found(operation: Operation, message: impl Into<String>) -> Self {
        Self::Status {
            operation,
            status: 404,
            message: message.into(),
        }
    }

    pub fn bad_request(operation: Operation, message: impl Into<String>) -> Self {
        Self::Status {
            operation,
            status: 400,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Status { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Decode { operation, .. } => *operation,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Input rejected before any cache patch or network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("ingredient name must not be empty")]
    EmptyIngredientName,
    #[error("tag must not be empty")]
    EmptyTag,
    #[error("source must not be empty")]
    EmptySource,
    #[error("at least one field must be provided")]
    EmptyPatch,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0} has not been saved yet")]
    Pending(EntityId),
    #[error("{0} is not in the cache")]
    NotFound(EntityId),
}
