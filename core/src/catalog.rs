//! In-process source of truth for the pantry REST contract.
//!
//! Backs the reference server and tests. Names are stored lowercased, join
//! pairs are unique, and deleting a recipe or an ingredient drops its pairs.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::api::{CategoryEndpoints, Endpoints, RecipeEndpoints};
use crate::error::{ApiError, Operation, ValidationError};
use crate::models::{
    Consumable, Entity, EntityId, Ingredient, ItemKind, ItemPatch, NewItem, NewRecipe, Needable,
    PersistedState, Recipe, RecipeIngredient, RecipePatch, RecipeRecord, ServerId, normalize_name,
};

#[derive(Debug, Default)]
pub struct CatalogState {
    ingredients: Vec<Ingredient>,
    consumables: Vec<Consumable>,
    recipes: Vec<RecipeRecord>,
    joins: Vec<RecipeIngredient>,
}

impl CatalogState {
    fn recipe_index(&self, op: Operation, id: &ServerId) -> Result<usize, ApiError> {
        self.recipes
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| ApiError::not_found(op, "Recipe not found"))
    }

    fn expand(&self, record: &RecipeRecord) -> Recipe {
        let mut record = record.clone();
        record.ingredient_ids = self
            .joins
            .iter()
            .filter(|j| j.recipe_id == record.id)
            .map(|j| j.ingredient_id.clone())
            .collect();
        record.expand(&self.ingredients)
    }

    /// Find an ingredient by name, creating it when missing.
    fn ensure_ingredient(&mut self, name: &str) -> ServerId {
        if let Some(existing) = self.ingredients.iter().find(|i| i.name == name) {
            if let Some(id) = existing.id.saved() {
                return id.clone();
            }
        }
        let id = ServerId::generate();
        self.ingredients.push(Ingredient::from_draft(
            EntityId::Saved(id.clone()),
            &NewItem::new(name),
            Utc::now(),
        ));
        id
    }

    fn join(&mut self, recipe_id: &ServerId, ingredient_id: ServerId) {
        let pair = RecipeIngredient {
            recipe_id: recipe_id.clone(),
            ingredient_id,
        };
        if !self.joins.contains(&pair) {
            self.joins.push(pair);
        }
    }

    fn touch_recipe(&mut self, index: usize) {
        self.recipes[index].updated_at = Utc::now();
    }
}

/// Item collections served by the catalog.
pub trait CatalogItem: Needable {
    fn items(state: &CatalogState) -> &Vec<Self>;
    fn items_mut(state: &mut CatalogState) -> &mut Vec<Self>;

    fn not_found() -> &'static str;
    fn duplicate() -> &'static str;

    fn on_removed(_state: &mut CatalogState, _id: &ServerId) {}
}

impl CatalogItem for Ingredient {
    fn items(state: &CatalogState) -> &Vec<Self> {
        &state.ingredients
    }

    fn items_mut(state: &mut CatalogState) -> &mut Vec<Self> {
        &mut state.ingredients
    }

    fn not_found() -> &'static str {
        "Ingredient not found"
    }

    fn duplicate() -> &'static str {
        "Ingredient with this name already exists"
    }

    fn on_removed(state: &mut CatalogState, id: &ServerId) {
        state.joins.retain(|j| &j.ingredient_id != id);
    }
}

impl CatalogItem for Consumable {
    fn items(state: &CatalogState) -> &Vec<Self> {
        &state.consumables
    }

    fn items_mut(state: &mut CatalogState) -> &mut Vec<Self> {
        &mut state.consumables
    }

    fn not_found() -> &'static str {
        "Consumable not found"
    }

    fn duplicate() -> &'static str {
        "Consumable with this name already exists"
    }
}

fn invalid(op: Operation, err: &ValidationError) -> ApiError {
    ApiError::bad_request(op, err.to_string())
}

#[derive(Debug, Default)]
pub struct Catalog {
    state: Mutex<CatalogState>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_state(persisted: PersistedState) -> Self {
        let mut state = CatalogState {
            ingredients: persisted.ingredients,
            consumables: persisted.consumables,
            recipes: Vec::with_capacity(persisted.recipes.len()),
            joins: Vec::new(),
        };
        for pair in persisted.recipe_ingredients {
            state.join(&pair.recipe_id, pair.ingredient_id);
        }
        for mut record in persisted.recipes {
            for ingredient_id in std::mem::take(&mut record.ingredient_ids) {
                state.join(&record.id, ingredient_id);
            }
            state.recipes.push(record);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn to_state(&self) -> PersistedState {
        self.with_state(|state| {
            let recipes = state
                .recipes
                .iter()
                .filter_map(|r| state.expand(r).to_record())
                .collect();
            PersistedState::from_parts(recipes, state.ingredients.clone(), state.consumables.clone())
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    // --- Items ---

    pub fn list_items<T: CatalogItem>(&self) -> Vec<T> {
        self.with_state(|s| T::items(s).clone())
    }

    pub fn get_item<T: CatalogItem>(&self, id: &ServerId) -> Result<T, ApiError> {
        let op = Operation::get(T::COLLECTION);
        self.with_state(|s| {
            T::items(s)
                .iter()
                .find(|i| i.id().saved() == Some(id))
                .cloned()
                .ok_or_else(|| ApiError::not_found(op, T::not_found()))
        })
    }

    pub fn create_item<T: CatalogItem>(&self, draft: &NewItem) -> Result<T, ApiError> {
        let op = Operation::create(T::COLLECTION);
        let draft = draft.normalized().map_err(|e| invalid(op, &e))?;
        self.with_state(|s| {
            if T::items(s).iter().any(|i| i.name() == draft.name) {
                return Err(ApiError::bad_request(op, T::duplicate()));
            }
            let item = T::from_draft(EntityId::Saved(ServerId::generate()), &draft, Utc::now());
            T::items_mut(s).push(item.clone());
            Ok(item)
        })
    }

    pub fn update_item<T: CatalogItem>(&self, id: &ServerId, patch: &ItemPatch) -> Result<T, ApiError> {
        let op = Operation::update(T::COLLECTION);
        let patch = patch.normalized().map_err(|e| invalid(op, &e))?;
        self.with_state(|s| {
            let items = T::items_mut(s);
            let index = items
                .iter()
                .position(|i| i.id().saved() == Some(id))
                .ok_or_else(|| ApiError::not_found(op, T::not_found()))?;
            if let Some(name) = &patch.name {
                if items
                    .iter()
                    .enumerate()
                    .any(|(n, i)| n != index && i.name() == name)
                {
                    return Err(ApiError::bad_request(op, T::duplicate()));
                }
            }
            let next = items[index].apply_patch(&patch, Utc::now());
            items[index] = next.clone();
            Ok(next)
        })
    }

    pub fn delete_item<T: CatalogItem>(&self, id: &ServerId) -> Result<(), ApiError> {
        let op = Operation::delete(T::COLLECTION);
        self.with_state(|s| {
            let items = T::items_mut(s);
            let before = items.len();
            items.retain(|i| i.id().saved() != Some(id));
            if items.len() == before {
                return Err(ApiError::not_found(op, T::not_found()));
            }
            T::on_removed(s, id);
            Ok(())
        })
    }

    /// Distinct non-empty categories in use, sorted.
    pub fn categories<T: CatalogItem>(&self) -> Vec<String> {
        self.with_state(|s| {
            T::items(s)
                .iter()
                .map(|i| i.category().trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
    }

    // --- Recipes ---

    #[must_use]
    pub fn list_recipes(&self) -> Vec<Recipe> {
        self.with_state(|s| s.recipes.iter().map(|r| s.expand(r)).collect())
    }

    pub fn get_recipe(&self, id: &ServerId) -> Result<Recipe, ApiError> {
        self.with_state(|s| {
            let index = s.recipe_index(Operation::GetRecipe, id)?;
            Ok(s.expand(&s.recipes[index]))
        })
    }

    pub fn create_recipe(&self, draft: &NewRecipe) -> Result<Recipe, ApiError> {
        let op = Operation::CreateRecipe;
        let draft = draft.normalized().map_err(|e| invalid(op, &e))?;
        self.with_state(|s| {
            let now = Utc::now();
            let id = ServerId::generate();
            s.recipes.push(RecipeRecord {
                id: id.clone(),
                name: draft.name.clone(),
                notes: draft.notes.clone(),
                tags: draft.tags.clone(),
                sources: draft.sources.clone(),
                ingredient_ids: Vec::new(),
                created_at: now,
                updated_at: now,
            });
            for name in &draft.ingredients {
                let ingredient_id = s.ensure_ingredient(name);
                s.join(&id, ingredient_id);
            }
            let index = s.recipes.len() - 1;
            Ok(s.expand(&s.recipes[index]))
        })
    }

    pub fn update_recipe(&self, id: &ServerId, patch: &RecipePatch) -> Result<Recipe, ApiError> {
        let op = Operation::UpdateRecipe;
        let patch = patch.normalized().map_err(|e| invalid(op, &e))?;
        self.with_state(|s| {
            let index = s.recipe_index(op, id)?;
            let record = &mut s.recipes[index];
            if let Some(name) = &patch.name {
                record.name.clone_from(name);
            }
            if let Some(notes) = &patch.notes {
                record.notes.clone_from(notes);
            }
            s.touch_recipe(index);
            Ok(s.expand(&s.recipes[index]))
        })
    }

    pub fn delete_recipe(&self, id: &ServerId) -> Result<(), ApiError> {
        self.with_state(|s| {
            let index = s.recipe_index(Operation::DeleteRecipe, id)?;
            s.recipes.remove(index);
            s.joins.retain(|j| &j.recipe_id != id);
            Ok(())
        })
    }

    pub fn link_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        let op = Operation::LinkIngredient;
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(invalid(op, &ValidationError::EmptyIngredientName));
        }
        self.with_state(|s| {
            let index = s.recipe_index(op, recipe)?;
            let ingredient_id = s.ensure_ingredient(&name);
            s.join(recipe, ingredient_id);
            s.touch_recipe(index);
            Ok(())
        })
    }

    pub fn unlink_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        let name = normalize_name(name);
        self.with_state(|s| {
            let index = s.recipe_index(Operation::UnlinkIngredient, recipe)?;
            let ingredient_id = s
                .ingredients
                .iter()
                .find(|i| i.name == name)
                .and_then(|i| i.id.saved().cloned());
            if let Some(ingredient_id) = ingredient_id {
                s.joins
                    .retain(|j| !(&j.recipe_id == recipe && j.ingredient_id == ingredient_id));
            }
            s.touch_recipe(index);
            Ok(())
        })
    }

    pub fn add_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        let op = Operation::AddTag;
        let tag = normalize_name(tag);
        if tag.is_empty() {
            return Err(invalid(op, &ValidationError::EmptyTag));
        }
        self.with_state(|s| {
            let index = s.recipe_index(op, recipe)?;
            s.recipes[index].tags.insert(tag);
            s.touch_recipe(index);
            Ok(())
        })
    }

    pub fn remove_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        let tag = normalize_name(tag);
        self.with_state(|s| {
            let index = s.recipe_index(Operation::RemoveTag, recipe)?;
            s.recipes[index].tags.remove(&tag);
            s.touch_recipe(index);
            Ok(())
        })
    }

    pub fn add_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        let op = Operation::AddSource;
        let source = source.trim();
        if source.is_empty() {
            return Err(invalid(op, &ValidationError::EmptySource));
        }
        self.with_state(|s| {
            let index = s.recipe_index(op, recipe)?;
            let sources = &mut s.recipes[index].sources;
            if !sources.iter().any(|existing| existing == source) {
                sources.push(source.to_string());
            }
            s.touch_recipe(index);
            Ok(())
        })
    }

    pub fn remove_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        let source = source.trim();
        self.with_state(|s| {
            let index = s.recipe_index(Operation::RemoveSource, recipe)?;
            s.recipes[index].sources.retain(|existing| existing != source);
            s.touch_recipe(index);
            Ok(())
        })
    }

    #[must_use]
    pub fn kind_count(&self, kind: ItemKind) -> usize {
        self.with_state(|s| match kind {
            ItemKind::Ingredient => s.ingredients.len(),
            ItemKind::Consumable => s.consumables.len(),
        })
    }
}

impl<T: CatalogItem> Endpoints<T> for Catalog {
    async fn fetch_all(&self) -> Result<Vec<T>, ApiError> {
        Ok(self.list_items())
    }

    async fn fetch_one(&self, id: &ServerId) -> Result<T, ApiError> {
        self.get_item(id)
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, ApiError> {
        self.create_item(draft)
    }

    async fn update(&self, id: &ServerId, patch: &T::Patch) -> Result<T, ApiError> {
        self.update_item(id, patch)
    }

    async fn delete(&self, id: &ServerId) -> Result<(), ApiError> {
        self.delete_item::<T>(id)
    }
}

impl Endpoints<Recipe> for Catalog {
    async fn fetch_all(&self) -> Result<Vec<Recipe>, ApiError> {
        Ok(self.list_recipes())
    }

    async fn fetch_one(&self, id: &ServerId) -> Result<Recipe, ApiError> {
        self.get_recipe(id)
    }

    async fn create(&self, draft: &NewRecipe) -> Result<Recipe, ApiError> {
        self.create_recipe(draft)
    }

    async fn update(&self, id: &ServerId, patch: &RecipePatch) -> Result<Recipe, ApiError> {
        self.update_recipe(id, patch)
    }

    async fn delete(&self, id: &ServerId) -> Result<(), ApiError> {
        self.delete_recipe(id)
    }
}

impl RecipeEndpoints for Catalog {
    async fn link_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        Catalog::link_ingredient(self, recipe, name)
    }

    async fn unlink_ingredient(&self, recipe: &ServerId, name: &str) -> Result<(), ApiError> {
        Catalog::unlink_ingredient(self, recipe, name)
    }

    async fn add_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        Catalog::add_tag(self, recipe, tag)
    }

    async fn remove_tag(&self, recipe: &ServerId, tag: &str) -> Result<(), ApiError> {
        Catalog::remove_tag(self, recipe, tag)
    }

    async fn add_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        Catalog::add_source(self, recipe, source)
    }

    async fn remove_source(&self, recipe: &ServerId, source: &str) -> Result<(), ApiError> {
        Catalog::remove_source(self, recipe, source)
    }
}

impl CategoryEndpoints for Catalog {
    async fn ingredient_categories(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.categories::<Ingredient>())
    }

    async fn consumable_categories(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.categories::<Consumable>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved_id<T: Entity>(entity: &T) -> ServerId {
        entity.id().saved().cloned().unwrap()
    }

    #[test]
    fn test_create_item_lowercases_and_rejects_duplicates() {
        let catalog = Catalog::new();
        let salt: Ingredient = catalog
            .create_item(&NewItem::new("Salt").category("Spices"))
            .unwrap();
        assert_eq!(salt.name, "salt");
        assert_eq!(salt.category, "spices");

        let err = catalog
            .create_item::<Ingredient>(&NewItem::new("SALT"))
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.operation(), Operation::CreateIngredient);

        // Consumables are a separate namespace.
        assert!(catalog.create_item::<Consumable>(&NewItem::new("salt")).is_ok());
    }

    #[test]
    fn test_create_item_rejects_blank_name() {
        let catalog = Catalog::new();
        let err = catalog
            .create_item::<Consumable>(&NewItem::new("  "))
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(catalog.kind_count(ItemKind::Consumable), 0);
    }

    #[test]
    fn test_update_and_get_item() {
        let catalog = Catalog::new();
        let salt: Ingredient = catalog.create_item(&NewItem::new("salt")).unwrap();
        let id = saved_id(&salt);

        let updated: Ingredient = catalog
            .update_item(&id, &ItemPatch::needed(true))
            .unwrap();
        assert!(updated.needed);
        assert_eq!(catalog.get_item::<Ingredient>(&id).unwrap(), updated);

        let missing = catalog
            .get_item::<Ingredient>(&ServerId::new("nope"))
            .unwrap_err();
        assert_eq!(missing.status(), Some(404));
    }

    #[test]
    fn test_update_rejects_rename_onto_existing() {
        let catalog = Catalog::new();
        let _: Ingredient = catalog.create_item(&NewItem::new("salt")).unwrap();
        let pepper: Ingredient = catalog.create_item(&NewItem::new("pepper")).unwrap();
        let patch = ItemPatch {
            name: Some("Salt".to_string()),
            ..ItemPatch::default()
        };
        let err = catalog
            .update_item::<Ingredient>(&saved_id(&pepper), &patch)
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_create_recipe_creates_missing_ingredients() {
        let catalog = Catalog::new();
        let _: Ingredient = catalog.create_item(&NewItem::new("salt")).unwrap();
        let recipe = catalog
            .create_recipe(&NewRecipe::new("Soup").ingredient("Salt").ingredient("leek"))
            .unwrap();
        assert_eq!(recipe.ingredients.len(), 2);
        assert_eq!(catalog.kind_count(ItemKind::Ingredient), 2);
    }

    #[test]
    fn test_link_is_idempotent() {
        let catalog = Catalog::new();
        let recipe = catalog.create_recipe(&NewRecipe::new("Soup")).unwrap();
        let id = saved_id(&recipe);

        catalog.link_ingredient(&id, "leek").unwrap();
        catalog.link_ingredient(&id, "Leek").unwrap();
        assert_eq!(catalog.get_recipe(&id).unwrap().ingredients.len(), 1);
        assert_eq!(catalog.to_state().recipe_ingredients.len(), 1);

        catalog.unlink_ingredient(&id, "leek").unwrap();
        catalog.unlink_ingredient(&id, "leek").unwrap();
        catalog.unlink_ingredient(&id, "never-existed").unwrap();
        assert!(catalog.get_recipe(&id).unwrap().ingredients.is_empty());
    }

    #[test]
    fn test_delete_recipe_drops_joins() {
        let catalog = Catalog::new();
        let recipe = catalog
            .create_recipe(&NewRecipe::new("Soup").ingredient("leek"))
            .unwrap();
        catalog.delete_recipe(&saved_id(&recipe)).unwrap();

        let state = catalog.to_state();
        assert!(state.recipes.is_empty());
        assert!(state.recipe_ingredients.is_empty());
        assert_eq!(state.ingredients.len(), 1);
    }

    #[test]
    fn test_delete_ingredient_drops_joins() {
        let catalog = Catalog::new();
        let recipe = catalog
            .create_recipe(&NewRecipe::new("Soup").ingredient("leek").ingredient("salt"))
            .unwrap();
        let leek = recipe.ingredients[0].clone();
        catalog.delete_item::<Ingredient>(&saved_id(&leek)).unwrap();

        let recipe = catalog.get_recipe(&saved_id(&recipe)).unwrap();
        assert_eq!(recipe.ingredients.len(), 1);
        assert_eq!(recipe.ingredients[0].name, "salt");
        assert_eq!(catalog.to_state().recipe_ingredients.len(), 1);
    }

    #[test]
    fn test_tags_and_sources() {
        let catalog = Catalog::new();
        let recipe = catalog.create_recipe(&NewRecipe::new("Soup")).unwrap();
        let id = saved_id(&recipe);

        catalog.add_tag(&id, " Quick").unwrap();
        catalog.add_tag(&id, "quick").unwrap();
        catalog.add_source(&id, "https://example.com/soup").unwrap();
        catalog.add_source(&id, "https://example.com/soup").unwrap();
        let recipe = catalog.get_recipe(&id).unwrap();
        assert_eq!(recipe.tags.len(), 1);
        assert_eq!(recipe.sources.len(), 1);

        assert_eq!(catalog.add_tag(&id, " ").unwrap_err().status(), Some(400));
        catalog.remove_tag(&id, "quick").unwrap();
        catalog.remove_source(&id, "https://example.com/soup").unwrap();
        let recipe = catalog.get_recipe(&id).unwrap();
        assert!(recipe.tags.is_empty());
        assert!(recipe.sources.is_empty());
    }

    #[test]
    fn test_state_round_trip_preserves_joins() {
        let catalog = Catalog::new();
        catalog
            .create_recipe(&NewRecipe::new("Soup").ingredient("leek").tag("winter"))
            .unwrap();
        let _: Consumable = catalog
            .create_item(&NewItem::new("soap").needed(true))
            .unwrap();

        let restored = Catalog::from_state(catalog.to_state());
        assert_eq!(restored.to_state(), catalog.to_state());
        assert_eq!(restored.list_recipes()[0].ingredients[0].name, "leek");
    }

    #[test]
    fn test_categories_distinct_sorted() {
        let catalog = Catalog::new();
        for (name, category) in [("milk", "dairy"), ("leek", "produce"), ("salt", ""), ("cheese", "dairy")] {
            let _: Ingredient = catalog
                .create_item(&NewItem::new(name).category(category))
                .unwrap();
        }
        assert_eq!(catalog.categories::<Ingredient>(), vec!["dairy", "produce"]);
        assert!(catalog.categories::<Consumable>().is_empty());
    }
}
