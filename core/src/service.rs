use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::api::{CategoryEndpoints, Endpoints, PantryApi};
use crate::db::Database;
use crate::error::{ApiError, MutationError};
use crate::models::{
    Consumable, EntityId, Ingredient, ItemKind, Named, NewItem, Needable, Recipe,
    RecipeIngredient, normalize_name,
};
use crate::mutation::{EntityMutations, MutationEngine, RecipeMutations};
use crate::persist::{self, Persistence, SnapshotStorage};
use crate::store::{Cached, EntityStore};
use crate::views::{self, CategoryGroup, GroceryItem};

/// Application root: one store, the engine that writes to it, and its local mirror.
///
/// Reads come from the cache and never wait for the network. Call
/// [`Pantry::sync`] to reconcile with the server.
pub struct Pantry<A, S = Database> {
    engine: MutationEngine<A>,
    persistence: Arc<Mutex<Persistence<S>>>,
}

impl<A: PantryApi, S: SnapshotStorage + 'static> Pantry<A, S> {
    /// Build the store and seed it from the last saved snapshot.
    pub fn new(api: Arc<A>, persistence: Persistence<S>) -> Self {
        let store = EntityStore::new();
        store.hydrate(persistence.load_all());
        Self {
            engine: MutationEngine::new(store, api),
            persistence: Arc::new(Mutex::new(persistence)),
        }
    }

    pub fn store(&self) -> &EntityStore {
        self.engine.store()
    }

    pub fn entity<T>(&self) -> EntityMutations<'_, T, A>
    where
        T: Cached,
        A: Endpoints<T>,
    {
        self.engine.entity()
    }

    pub fn recipe_ops(&self) -> RecipeMutations<'_, A> {
        self.engine.recipes()
    }

    /// Refetch every collection from the server.
    pub async fn sync(&self) -> Result<(), ApiError> {
        self.engine.refresh_all().await
    }

    /// True once any collection has been loaded, from disk or the server.
    pub fn is_loaded(&self) -> bool {
        self.store().get_list::<Ingredient>().is_some()
            || self.store().get_list::<Consumable>().is_some()
            || self.store().get_list::<Recipe>().is_some()
    }

    /// Write the current cache to local storage. Returns whether it was stored.
    pub fn save_now(&self) -> bool {
        let state = self.store().persisted_state();
        self.persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save_state(&state)
    }

    /// Background task that saves the cache after changes. Ends when the pantry is dropped.
    pub fn flusher(&self, throttle: Duration) -> impl Future<Output = ()> + Send + 'static {
        persist::flush_on_change(
            self.store().downgrade(),
            self.store().subscribe(),
            Arc::clone(&self.persistence),
            throttle,
        )
    }

    // --- Reads ---

    fn list<T: Cached>(&self) -> Vec<Arc<T>> {
        self.store().get_list::<T>().unwrap_or_default()
    }

    pub fn ingredients(&self) -> Vec<Arc<Ingredient>> {
        self.list()
    }

    pub fn consumables(&self) -> Vec<Arc<Consumable>> {
        self.list()
    }

    pub fn recipes(&self) -> Vec<Arc<Recipe>> {
        self.list()
    }

    pub fn groups<T: Cached + Needable>(&self) -> Vec<CategoryGroup<Arc<T>>> {
        views::group_by_category(&self.list::<T>(), |i| i.category())
    }

    pub fn grocery_list(&self) -> Vec<CategoryGroup<GroceryItem>> {
        views::grocery_list(&self.ingredients(), &self.consumables())
    }

    pub fn tags(&self) -> Vec<String> {
        views::tag_vocabulary(&self.recipes())
    }

    pub fn recipes_tagged(&self, filter: &BTreeSet<String>) -> Vec<Arc<Recipe>> {
        views::filter_by_tags(&self.recipes(), filter)
    }

    pub fn recipes_using(&self, ingredient: &EntityId) -> Vec<Arc<Recipe>> {
        views::recipes_using(&self.recipes(), ingredient)
    }

    /// Recipe/ingredient pairs implied by the cached recipes.
    pub fn recipe_ingredients(&self) -> BTreeSet<RecipeIngredient> {
        views::recipe_ingredient_pairs(&self.recipes())
    }

    pub fn find<T: Cached + Named>(&self, name: &str) -> Option<Arc<T>> {
        views::find_by_name(&self.list::<T>(), name)
    }

    /// Category suggestions from the cache alone.
    pub fn categories(&self, kind: ItemKind) -> Vec<String> {
        match kind {
            ItemKind::Ingredient => {
                let items = self.ingredients();
                views::category_vocabulary(items.iter().map(|i| i.category.as_str()))
            }
            ItemKind::Consumable => {
                let items = self.consumables();
                views::category_vocabulary(items.iter().map(|c| c.category.as_str()))
            }
        }
    }

    /// Category suggestions including the server's list. Falls back to the cache.
    pub async fn category_suggestions(&self, kind: ItemKind) -> Vec<String> {
        let remote = match kind {
            ItemKind::Ingredient => self.engine.api().ingredient_categories().await,
            ItemKind::Consumable => self.engine.api().consumable_categories().await,
        };
        let mut merged = self.categories(kind);
        match remote {
            Ok(categories) => {
                merged.extend(categories.iter().map(|c| normalize_name(c)));
                merged.retain(|c| !c.is_empty());
                merged.sort();
                merged.dedup();
            }
            Err(e) => log::warn!("{e}; using cached categories"),
        }
        merged
    }

    /// Fetch one entity and cache it as a detail view.
    pub async fn load_detail<T>(&self, id: &EntityId) -> Result<Arc<T>, MutationError>
    where
        T: Cached,
        A: Endpoints<T>,
    {
        let server_id = id
            .saved()
            .ok_or_else(|| MutationError::Pending(id.clone()))?;
        let fresh = <A as Endpoints<T>>::fetch_one(self.engine.api(), server_id).await?;
        self.store().set_detail(fresh);
        self.store()
            .get_detail::<T>(id)
            .ok_or_else(|| MutationError::NotFound(id.clone()))
    }

    // --- Writes ---

    /// Create a grocery item unless one with the same name is already cached.
    ///
    /// Returns the entity and whether it was newly created.
    pub async fn add_item<T>(&self, draft: &NewItem) -> Result<(T, bool), MutationError>
    where
        T: Cached + Needable,
        A: Endpoints<T>,
    {
        let name = normalize_name(&draft.name);
        if let Some(existing) = self.find::<T>(&name) {
            log::debug!("{} {name} already exists", T::KIND);
            return Ok((T::clone(&existing), false));
        }
        let created = self.entity::<T>().create(draft).await?;
        Ok((created, true))
    }
}
