use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Suggested categories offered alongside the ones already in use.
pub const CANONICAL_CATEGORIES: &[&str] = &[
    "bakery",
    "beverages",
    "canned goods",
    "dairy",
    "frozen",
    "household",
    "meat",
    "pantry",
    "produce",
    "seafood",
    "spices",
];

// --- Identifiers ---

/// Identifier assigned by the server. Only saved ids may be sent back to it.
///
/// Servers may hand out strings or integers; both are kept in string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ServerIdVisitor;

        impl Visitor<'_> for ServerIdVisitor {
            type Value = ServerId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ServerId, E> {
                Ok(ServerId::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<ServerId, E> {
                Ok(ServerId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ServerId, E> {
                Ok(ServerId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ServerId, E> {
                Ok(ServerId(v.to_string()))
            }
        }

        deserializer.deserialize_any(ServerIdVisitor)
    }
}

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local token for an entity the server has not acknowledged yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingId {
    pending: Uuid,
}

impl PendingId {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            pending: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Saved(ServerId),
    Pending(PendingId),
}

impl EntityId {
    pub fn saved(&self) -> Option<&ServerId> {
        match self {
            Self::Saved(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl From<ServerId> for EntityId {
    fn from(id: ServerId) -> Self {
        Self::Saved(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved(id) => write!(f, "{id}"),
            Self::Pending(token) => write!(f, "pending-{}", token.pending),
        }
    }
}

// --- Collections ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKey {
    Ingredients,
    Recipes,
    Consumables,
}

impl CollectionKey {
    pub const ALL: [CollectionKey; 3] = [Self::Ingredients, Self::Consumables, Self::Recipes];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingredients => "ingredients",
            Self::Recipes => "recipes",
            Self::Consumables => "consumables",
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Ingredient,
    Consumable,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingredient => f.write_str("ingredient"),
            Self::Consumable => f.write_str("consumable"),
        }
    }
}

// --- Traits ---

pub trait Named {
    fn name(&self) -> &str;
}

impl<T: Named + ?Sized> Named for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// An entity type with its own cached collection and CRUD endpoints.
pub trait Entity: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    type Draft: Clone + fmt::Debug + Send + Sync;
    type Patch: Clone + fmt::Debug + Send + Sync;

    const COLLECTION: CollectionKey;
    /// Collections that embed or derive from this one and must be refetched after it changes.
    const DEPENDENTS: &'static [CollectionKey];

    fn id(&self) -> &EntityId;

    /// Canonical form of a draft, or the reason it cannot be submitted.
    fn normalize_draft(draft: &Self::Draft) -> Result<Self::Draft, ValidationError>;

    fn normalize_patch(patch: &Self::Patch) -> Result<Self::Patch, ValidationError>;

    fn provisional(draft: &Self::Draft, id: PendingId, now: DateTime<Utc>) -> Self;

    #[must_use]
    fn apply_patch(&self, patch: &Self::Patch, now: DateTime<Utc>) -> Self;
}

/// Grocery-list items: ingredients and consumables share this shape.
pub trait Needable: Entity<Draft = NewItem, Patch = ItemPatch> + Named {
    const KIND: ItemKind;

    fn category(&self) -> &str;
    fn needed(&self) -> bool;
    fn from_draft(id: EntityId, draft: &NewItem, now: DateTime<Utc>) -> Self;
}

// --- Ingredients and consumables ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub needed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumable {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub needed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub needed: bool,
}

impl NewItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            needed: false,
        }
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn needed(mut self, needed: bool) -> Self {
        self.needed = needed;
        self
    }

    pub fn normalized(&self) -> Result<Self, ValidationError> {
        let name = normalize_name(&self.name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        Ok(Self {
            name,
            category: normalize_name(&self.category),
            needed: self.needed,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needed: Option<bool>,
}

impl ItemPatch {
    #[must_use]
    pub fn needed(needed: bool) -> Self {
        Self {
            needed: Some(needed),
            ..Self::default()
        }
    }

    pub fn normalized(&self) -> Result<Self, ValidationError> {
        if self.name.is_none() && self.category.is_none() && self.needed.is_none() {
            return Err(ValidationError::EmptyPatch);
        }
        let name = match self.name.as_deref().map(normalize_name) {
            Some(name) if name.is_empty() => return Err(ValidationError::EmptyName),
            other => other,
        };
        Ok(Self {
            name,
            category: self.category.as_deref().map(normalize_name),
            needed: self.needed,
        })
    }
}

fn patch_item(
    name: &mut String,
    category: &mut String,
    needed: &mut bool,
    patch: &ItemPatch,
) {
    if let Some(n) = &patch.name {
        name.clone_from(n);
    }
    if let Some(c) = &patch.category {
        category.clone_from(c);
    }
    if let Some(n) = patch.needed {
        *needed = n;
    }
}

impl Named for Ingredient {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Entity for Ingredient {
    type Draft = NewItem;
    type Patch = ItemPatch;

    const COLLECTION: CollectionKey = CollectionKey::Ingredients;
    const DEPENDENTS: &'static [CollectionKey] = &[CollectionKey::Recipes];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn normalize_draft(draft: &NewItem) -> Result<NewItem, ValidationError> {
        draft.normalized()
    }

    fn normalize_patch(patch: &ItemPatch) -> Result<ItemPatch, ValidationError> {
        patch.normalized()
    }

    fn provisional(draft: &NewItem, id: PendingId, now: DateTime<Utc>) -> Self {
        Self::from_draft(EntityId::Pending(id), draft, now)
    }

    fn apply_patch(&self, patch: &ItemPatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        patch_item(&mut next.name, &mut next.category, &mut next.needed, patch);
        next.updated_at = now;
        next
    }
}

impl Needable for Ingredient {
    const KIND: ItemKind = ItemKind::Ingredient;

    fn category(&self) -> &str {
        &self.category
    }

    fn needed(&self) -> bool {
        self.needed
    }

    fn from_draft(id: EntityId, draft: &NewItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            category: draft.category.clone(),
            needed: draft.needed,
            updated_at: now,
        }
    }
}

impl Named for Consumable {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Entity for Consumable {
    type Draft = NewItem;
    type Patch = ItemPatch;

    const COLLECTION: CollectionKey = CollectionKey::Consumables;
    const DEPENDENTS: &'static [CollectionKey] = &[];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn normalize_draft(draft: &NewItem) -> Result<NewItem, ValidationError> {
        draft.normalized()
    }

    fn normalize_patch(patch: &ItemPatch) -> Result<ItemPatch, ValidationError> {
        patch.normalized()
    }

    fn provisional(draft: &NewItem, id: PendingId, now: DateTime<Utc>) -> Self {
        Self::from_draft(EntityId::Pending(id), draft, now)
    }

    fn apply_patch(&self, patch: &ItemPatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        patch_item(&mut next.name, &mut next.category, &mut next.needed, patch);
        next.updated_at = now;
        next
    }
}

impl Needable for Consumable {
    const KIND: ItemKind = ItemKind::Consumable;

    fn category(&self) -> &str {
        &self.category
    }

    fn needed(&self) -> bool {
        self.needed
    }

    fn from_draft(id: EntityId, draft: &NewItem, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            category: draft.category.clone(),
            needed: draft.needed,
            updated_at: now,
        }
    }
}

// --- Recipes ---

/// A recipe with its ingredients embedded, as presented to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire and storage form of a recipe: ingredients by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: ServerId,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub ingredient_ids: Vec<ServerId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecipeRecord {
    /// Embed ingredients by id. Ids with no matching ingredient are dropped.
    #[must_use]
    pub fn expand(self, ingredients: &[Ingredient]) -> Recipe {
        let by_id: HashMap<&ServerId, &Ingredient> = ingredients
            .iter()
            .filter_map(|i| i.id.saved().map(|id| (id, i)))
            .collect();
        let embedded = self
            .ingredient_ids
            .iter()
            .filter_map(|id| by_id.get(id).map(|i| (*i).clone()))
            .collect();
        Recipe {
            id: EntityId::Saved(self.id),
            name: self.name,
            notes: self.notes,
            tags: self.tags,
            sources: self.sources,
            ingredients: embedded,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl Recipe {
    /// Storage form of a saved recipe; pending recipes and pending ingredients are skipped.
    #[must_use]
    pub fn to_record(&self) -> Option<RecipeRecord> {
        let id = self.id.saved()?.clone();
        Some(RecipeRecord {
            id,
            name: self.name.clone(),
            notes: self.notes.clone(),
            tags: self.tags.clone(),
            sources: self.sources.clone(),
            ingredient_ids: self
                .ingredients
                .iter()
                .filter_map(|i| i.id.saved().cloned())
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    #[must_use]
    pub fn has_ingredient_named(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.ingredients.iter().any(|i| i.name == name)
    }

    #[must_use]
    pub fn with_ingredient(&self, ingredient: Ingredient) -> Self {
        let mut next = self.clone();
        if !next.has_ingredient_named(&ingredient.name) {
            next.ingredients.push(ingredient);
        }
        next
    }

    #[must_use]
    pub fn without_ingredient_named(&self, name: &str) -> Self {
        let name = normalize_name(name);
        let mut next = self.clone();
        next.ingredients.retain(|i| i.name != name);
        next
    }

    #[must_use]
    pub fn without_ingredient(&self, id: &EntityId) -> Self {
        let mut next = self.clone();
        next.ingredients.retain(|i| &i.id != id);
        next
    }

    #[must_use]
    pub fn with_tag(&self, tag: &str) -> Self {
        let mut next = self.clone();
        next.tags.insert(tag.to_string());
        next
    }

    #[must_use]
    pub fn without_tag(&self, tag: &str) -> Self {
        let mut next = self.clone();
        next.tags.remove(tag);
        next
    }

    #[must_use]
    pub fn with_source(&self, source: &str) -> Self {
        let mut next = self.clone();
        if !next.sources.iter().any(|s| s == source) {
            next.sources.push(source.to_string());
        }
        next
    }

    #[must_use]
    pub fn without_source(&self, source: &str) -> Self {
        let mut next = self.clone();
        next.sources.retain(|s| s != source);
        next
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    #[serde(default)]
    pub notes: String,
    /// Ingredient names; unknown names are created by the server.
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl NewRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ingredient(mut self, name: impl Into<String>) -> Self {
        self.ingredients.push(name.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn normalized(&self) -> Result<Self, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let mut ingredients: Vec<String> = Vec::new();
        for raw in &self.ingredients {
            let n = normalize_name(raw);
            if !n.is_empty() && !ingredients.contains(&n) {
                ingredients.push(n);
            }
        }
        let mut sources: Vec<String> = Vec::new();
        for raw in &self.sources {
            let s = raw.trim();
            if !s.is_empty() && !sources.iter().any(|existing| existing == s) {
                sources.push(s.to_string());
            }
        }
        Ok(Self {
            name,
            notes: self.notes.clone(),
            ingredients,
            tags: self
                .tags
                .iter()
                .map(|t| normalize_name(t))
                .filter(|t| !t.is_empty())
                .collect(),
            sources,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl RecipePatch {
    pub fn normalized(&self) -> Result<Self, ValidationError> {
        if self.name.is_none() && self.notes.is_none() {
            return Err(ValidationError::EmptyPatch);
        }
        let name = match self.name.as_deref().map(str::trim) {
            Some("") => return Err(ValidationError::EmptyName),
            other => other.map(str::to_string),
        };
        Ok(Self {
            name,
            notes: self.notes.clone(),
        })
    }
}

impl Named for Recipe {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Entity for Recipe {
    type Draft = NewRecipe;
    type Patch = RecipePatch;

    const COLLECTION: CollectionKey = CollectionKey::Recipes;
    // Creating a recipe or linking by name can create ingredients server-side.
    const DEPENDENTS: &'static [CollectionKey] = &[CollectionKey::Ingredients];

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn normalize_draft(draft: &NewRecipe) -> Result<NewRecipe, ValidationError> {
        draft.normalized()
    }

    fn normalize_patch(patch: &RecipePatch) -> Result<RecipePatch, ValidationError> {
        patch.normalized()
    }

    fn provisional(draft: &NewRecipe, id: PendingId, now: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::Pending(id),
            name: draft.name.clone(),
            notes: draft.notes.clone(),
            tags: draft.tags.clone(),
            sources: draft.sources.clone(),
            ingredients: draft
                .ingredients
                .iter()
                .map(|name| {
                    Ingredient::from_draft(
                        EntityId::Pending(PendingId::generate()),
                        &NewItem::new(name.clone()),
                        now,
                    )
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&self, patch: &RecipePatch, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name.clone_from(name);
        }
        if let Some(notes) = &patch.notes {
            next.notes.clone_from(notes);
        }
        next.updated_at = now;
        next
    }
}

/// Join row: this ingredient is used in this recipe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipeIngredient {
    pub recipe_id: ServerId,
    pub ingredient_id: ServerId,
}

// --- Persisted snapshot ---

/// The slice of the cache mirrored to local storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub recipes: Vec<RecipeRecord>,
    pub ingredients: Vec<Ingredient>,
    pub consumables: Vec<Consumable>,
    pub recipe_ingredients: Vec<RecipeIngredient>,
}

impl PersistedState {
    /// Build a snapshot, deriving the join rows from each recipe's ingredient ids.
    #[must_use]
    pub fn from_parts(
        recipes: Vec<RecipeRecord>,
        ingredients: Vec<Ingredient>,
        consumables: Vec<Consumable>,
    ) -> Self {
        let recipe_ingredients = recipes
            .iter()
            .flat_map(|r| {
                r.ingredient_ids.iter().map(|ingredient_id| RecipeIngredient {
                    recipe_id: r.id.clone(),
                    ingredient_id: ingredient_id.clone(),
                })
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self {
            recipes,
            ingredients,
            consumables,
            recipe_ingredients,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
            && self.ingredients.is_empty()
            && self.consumables.is_empty()
            && self.recipe_ingredients.is_empty()
    }

    #[must_use]
    pub fn expanded_recipes(&self) -> Vec<Recipe> {
        self.recipes
            .iter()
            .cloned()
            .map(|r| r.expand(&self.ingredients))
            .collect()
    }
}

// --- Normalization ---

/// Canonical storage form for item names, categories and tags.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Split a comma separated tag string into normalized tags.
#[must_use]
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(normalize_name) {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(id: &str) -> EntityId {
        EntityId::Saved(ServerId::new(id))
    }

    fn ingredient(id: &str, name: &str) -> Ingredient {
        Ingredient {
            id: saved(id),
            name: name.to_string(),
            category: String::new(),
            needed: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_item_lowercases_name_and_category() {
        let item = NewItem::new("  Tomato ")
            .category(" Produce")
            .normalized()
            .unwrap();
        assert_eq!(item.name, "tomato");
        assert_eq!(item.category, "produce");
        assert!(!item.needed);
    }

    #[test]
    fn test_new_item_rejects_empty_name() {
        assert_eq!(
            NewItem::new("   ").normalized(),
            Err(ValidationError::EmptyName)
        );
    }

    #[test]
    fn test_item_patch_requires_a_field() {
        assert_eq!(
            ItemPatch::default().normalized(),
            Err(ValidationError::EmptyPatch)
        );
        let patch = ItemPatch {
            name: Some(String::new()),
            ..ItemPatch::default()
        };
        assert_eq!(patch.normalized(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_entity_id_wire_format() {
        let id: EntityId = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(id, saved("abc-123"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-123\"");

        let pending = EntityId::Pending(PendingId::generate());
        let json = serde_json::to_string(&pending).unwrap();
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pending);
        assert!(back.is_pending());
        assert!(back.saved().is_none());
    }

    #[test]
    fn test_integer_ids_decode_as_saved() {
        let json = r#"{"id":7,"name":"salt","updated_at":"2024-01-01T00:00:00Z"}"#;
        let ingredient: Ingredient = serde_json::from_str(json).unwrap();
        assert_eq!(ingredient.id, saved("7"));
        assert_eq!(serde_json::to_string(&ingredient.id).unwrap(), "\"7\"");

        let record: RecipeRecord = serde_json::from_str(
            r#"{"id":3,"name":"soup","ingredient_ids":[7,"8"],
                "created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(record.id, ServerId::new("3"));
        assert_eq!(record.ingredient_ids, vec![ServerId::new("7"), ServerId::new("8")]);

        assert!(serde_json::from_str::<ServerId>("1.5").is_err());
        assert!(serde_json::from_str::<ServerId>("true").is_err());
    }

    #[test]
    fn test_ingredient_deserializes_without_category() {
        let json = r#"{"id":"1","name":"salt","needed":true,"updated_at":"2024-01-01T00:00:00Z"}"#;
        let ingredient: Ingredient = serde_json::from_str(json).unwrap();
        assert_eq!(ingredient.category, "");
        assert!(ingredient.needed);
    }

    #[test]
    fn test_expand_drops_unknown_ingredient_ids() {
        let now = Utc::now();
        let record = RecipeRecord {
            id: ServerId::new("r1"),
            name: "Pasta".to_string(),
            notes: String::new(),
            tags: BTreeSet::new(),
            sources: Vec::new(),
            ingredient_ids: vec![ServerId::new("i1"), ServerId::new("missing")],
            created_at: now,
            updated_at: now,
        };
        let recipe = record.expand(&[ingredient("i1", "tomato"), ingredient("i2", "garlic")]);
        assert_eq!(recipe.ingredients.len(), 1);
        assert_eq!(recipe.ingredients[0].name, "tomato");

        let back = recipe.to_record().unwrap();
        assert_eq!(back.ingredient_ids, vec![ServerId::new("i1")]);
    }

    #[test]
    fn test_recipe_ingredient_helpers_are_idempotent() {
        let now = Utc::now();
        let recipe = RecipeRecord {
            id: ServerId::new("r1"),
            name: "Pasta".to_string(),
            notes: String::new(),
            tags: BTreeSet::new(),
            sources: Vec::new(),
            ingredient_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
        .expand(&[]);

        let once = recipe.with_ingredient(ingredient("i1", "tomato"));
        let twice = once.with_ingredient(ingredient("i1", "tomato"));
        assert_eq!(once, twice);
        assert_eq!(twice.ingredients.len(), 1);

        let removed = twice.without_ingredient_named("garlic");
        assert_eq!(removed, twice);
        assert!(removed.without_ingredient_named("Tomato").ingredients.is_empty());
    }

    #[test]
    fn test_new_recipe_normalizes_ingredients_and_tags() {
        let draft = NewRecipe::new(" Pasta ")
            .ingredient("Tomato")
            .ingredient("tomato ")
            .ingredient("")
            .tag(" Italian")
            .source("https://example.com/pasta")
            .source("https://example.com/pasta");
        let draft = draft.normalized().unwrap();
        assert_eq!(draft.name, "Pasta");
        assert_eq!(draft.ingredients, vec!["tomato".to_string()]);
        assert!(draft.tags.contains("italian"));
        assert_eq!(draft.sources.len(), 1);
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(
            parse_tags("Italian, quick,, italian ,"),
            vec!["italian".to_string(), "quick".to_string()]
        );
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn test_persisted_state_derives_unique_joins() {
        let now = Utc::now();
        let record = RecipeRecord {
            id: ServerId::new("r1"),
            name: "Pasta".to_string(),
            notes: String::new(),
            tags: BTreeSet::new(),
            sources: Vec::new(),
            ingredient_ids: vec![ServerId::new("i1"), ServerId::new("i1")],
            created_at: now,
            updated_at: now,
        };
        let state = PersistedState::from_parts(vec![record], Vec::new(), Vec::new());
        assert_eq!(state.recipe_ingredients.len(), 1);
        assert!(!state.is_empty());
        assert!(PersistedState::default().is_empty());
    }
}
