use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;

use crate::models::{
    CollectionKey, Consumable, Entity, EntityId, Ingredient, Named, PersistedState, Recipe,
};

/// Cached copy of one collection: the list view and the per-id detail views.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    list: Option<Vec<Arc<T>>>,
    details: HashMap<EntityId, Arc<T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            list: None,
            details: HashMap::new(),
        }
    }
}

impl<T: Entity> Collection<T> {
    fn position(&self, id: &EntityId) -> Option<usize> {
        self.list.as_ref()?.iter().position(|e| e.id() == id)
    }

    fn patch_list(&mut self, id: &EntityId, f: impl FnOnce(&T) -> T) {
        let Some(index) = self.position(id) else {
            return;
        };
        if let Some(list) = self.list.as_mut() {
            let next = f(list[index].as_ref());
            list[index] = Arc::new(next);
        }
    }

    fn patch_detail(&mut self, id: &EntityId, f: impl FnOnce(&T) -> T) {
        if let Some(current) = self.details.get_mut(id) {
            let next = f(current.as_ref());
            *current = Arc::new(next);
        }
    }

    fn remove(&mut self, id: &EntityId) {
        if let Some(list) = self.list.as_mut() {
            list.retain(|e| e.id() != id);
        }
        self.details.remove(id);
    }

    /// Replace the list wholesale; cached details follow their refetched entity or are dropped.
    fn replace(&mut self, fresh: Vec<T>) {
        let fresh: Vec<Arc<T>> = fresh.into_iter().map(Arc::new).collect();
        let by_id: HashMap<&EntityId, &Arc<T>> = fresh.iter().map(|e| (e.id(), e)).collect();
        self.details = self
            .details
            .keys()
            .filter_map(|id| by_id.get(id).map(|e| (id.clone(), Arc::clone(e))))
            .collect();
        self.list = Some(fresh);
    }
}

/// Every cached collection. Only reachable through [`EntityStore`].
#[derive(Debug, Default)]
pub struct CacheState {
    ingredients: Collection<Ingredient>,
    recipes: Collection<Recipe>,
    consumables: Collection<Consumable>,
}

/// Binds an entity type to its slot in the cache.
pub trait Cached: Entity {
    /// Collections rewritten by [`Cached::cascade_delete`].
    const CASCADES: &'static [CollectionKey] = &[];

    fn slot(state: &CacheState) -> &Collection<Self>;
    fn slot_mut(state: &mut CacheState) -> &mut Collection<Self>;

    /// Swap placeholder parts of a provisional entity for cached ones.
    #[must_use]
    fn resolve_provisional(_state: &CacheState, entity: Self) -> Self {
        entity
    }

    /// Drop references to a deleted entity from other collections.
    fn cascade_delete(_state: &mut CacheState, _id: &EntityId) {}
}

impl Cached for Ingredient {
    const CASCADES: &'static [CollectionKey] = &[CollectionKey::Recipes];

    fn slot(state: &CacheState) -> &Collection<Self> {
        &state.ingredients
    }

    fn slot_mut(state: &mut CacheState) -> &mut Collection<Self> {
        &mut state.ingredients
    }

    fn cascade_delete(state: &mut CacheState, id: &EntityId) {
        let recipes = &mut state.recipes;
        if let Some(list) = recipes.list.as_mut() {
            for recipe in list.iter_mut() {
                if recipe.ingredients.iter().any(|i| &i.id == id) {
                    *recipe = Arc::new(recipe.without_ingredient(id));
                }
            }
        }
        for recipe in recipes.details.values_mut() {
            if recipe.ingredients.iter().any(|i| &i.id == id) {
                *recipe = Arc::new(recipe.without_ingredient(id));
            }
        }
    }
}

impl Cached for Consumable {
    fn slot(state: &CacheState) -> &Collection<Self> {
        &state.consumables
    }

    fn slot_mut(state: &mut CacheState) -> &mut Collection<Self> {
        &mut state.consumables
    }
}

impl Cached for Recipe {
    fn slot(state: &CacheState) -> &Collection<Self> {
        &state.recipes
    }

    fn slot_mut(state: &mut CacheState) -> &mut Collection<Self> {
        &mut state.recipes
    }

    fn resolve_provisional(state: &CacheState, mut entity: Self) -> Self {
        let Some(known) = state.ingredients.list.as_ref() else {
            return entity;
        };
        for placeholder in &mut entity.ingredients {
            if let Some(existing) = known.iter().find(|i| i.name() == placeholder.name) {
                *placeholder = Ingredient::clone(existing);
            }
        }
        entity
    }
}

/// Rollback target for a single entity: its list and detail cache as they were.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    id: EntityId,
    list: Option<Vec<Arc<T>>>,
    detail: Option<Arc<T>>,
}

impl<T: Entity> Snapshot<T> {
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The entity as it was when the snapshot was taken.
    pub fn entity(&self) -> Option<&T> {
        self.detail.as_deref().or_else(|| {
            self.list
                .as_ref()?
                .iter()
                .find(|e| e.id() == &self.id)
                .map(|e| &**e)
        })
    }
}

/// Rollback target for a whole collection.
#[derive(Debug, Clone)]
pub enum CollectionSnapshot {
    Ingredients(Collection<Ingredient>),
    Recipes(Collection<Recipe>),
    Consumables(Collection<Consumable>),
}

/// Shared handle to the in-memory cache.
///
/// Cloning is cheap and every clone sees the same state. Each write bumps a
/// revision counter that [`EntityStore::subscribe`] receivers observe.
#[derive(Debug, Clone)]
pub struct EntityStore {
    state: Arc<Mutex<CacheState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            revision: Arc::new(revision),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&CacheState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let out = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.revision.send_modify(|r| *r += 1);
        out
    }

    // --- Reads ---

    /// The list view, or `None` before the collection was first loaded.
    pub fn get_list<T: Cached>(&self) -> Option<Vec<Arc<T>>> {
        self.read(|s| T::slot(s).list.clone())
    }

    pub fn get_detail<T: Cached>(&self, id: &EntityId) -> Option<Arc<T>> {
        self.read(|s| T::slot(s).details.get(id).cloned())
    }

    /// Detail view if cached, otherwise the list entry.
    pub fn find<T: Cached>(&self, id: &EntityId) -> Option<Arc<T>> {
        self.read(|s| {
            let slot = T::slot(s);
            slot.details.get(id).cloned().or_else(|| {
                slot.list
                    .as_ref()?
                    .iter()
                    .find(|e| e.id() == id)
                    .cloned()
            })
        })
    }

    pub(crate) fn resolve_provisional<T: Cached>(&self, entity: T) -> T {
        self.read(|s| T::resolve_provisional(s, entity))
    }

    // --- Writes ---

    pub fn set_list<T: Cached>(&self, list: Vec<T>) {
        self.write(|s| T::slot_mut(s).list = Some(list.into_iter().map(Arc::new).collect()));
    }

    pub fn set_detail<T: Cached>(&self, entity: T) {
        self.write(|s| {
            T::slot_mut(s)
                .details
                .insert(entity.id().clone(), Arc::new(entity));
        });
    }

    /// Apply `f` to the matching list entry. No-op when the id is not listed.
    pub fn patch_list<T: Cached>(&self, id: &EntityId, f: impl FnOnce(&T) -> T) {
        self.write(|s| T::slot_mut(s).patch_list(id, f));
    }

    pub fn patch_detail<T: Cached>(&self, id: &EntityId, f: impl FnOnce(&T) -> T) {
        self.write(|s| T::slot_mut(s).patch_detail(id, f));
    }

    /// Apply `f` to both the list entry and the detail entry.
    pub fn patch<T: Cached>(&self, id: &EntityId, f: impl Fn(&T) -> T) {
        self.write(|s| {
            let slot = T::slot_mut(s);
            slot.patch_list(id, &f);
            slot.patch_detail(id, &f);
        });
    }

    /// Append to the list, starting one if the collection was never loaded.
    pub fn append_to_list<T: Cached>(&self, entity: T) {
        self.write(|s| {
            T::slot_mut(s)
                .list
                .get_or_insert_with(Vec::new)
                .push(Arc::new(entity));
        });
    }

    pub fn remove_from_list<T: Cached>(&self, id: &EntityId) {
        self.write(|s| {
            if let Some(list) = T::slot_mut(s).list.as_mut() {
                list.retain(|e| e.id() != id);
            }
        });
    }

    /// Remove list and detail entries, then drop references held by other collections.
    pub fn remove<T: Cached>(&self, id: &EntityId) {
        self.write(|s| {
            T::slot_mut(s).remove(id);
            T::cascade_delete(s, id);
        });
    }

    /// Install a refetched collection.
    pub fn replace_collection<T: Cached>(&self, fresh: Vec<T>) {
        self.write(|s| T::slot_mut(s).replace(fresh));
    }

    // --- Snapshots ---

    pub fn snapshot<T: Cached>(&self, id: &EntityId) -> Snapshot<T> {
        self.read(|s| {
            let slot = T::slot(s);
            Snapshot {
                id: id.clone(),
                list: slot.list.clone(),
                detail: slot.details.get(id).cloned(),
            }
        })
    }

    pub fn restore<T: Cached>(&self, snapshot: Snapshot<T>) {
        self.write(|s| {
            let slot = T::slot_mut(s);
            slot.list = snapshot.list;
            match snapshot.detail {
                Some(detail) => {
                    slot.details.insert(snapshot.id, detail);
                }
                None => {
                    slot.details.remove(&snapshot.id);
                }
            }
        });
    }

    #[must_use]
    pub fn snapshot_collection(&self, key: CollectionKey) -> CollectionSnapshot {
        self.read(|s| match key {
            CollectionKey::Ingredients => CollectionSnapshot::Ingredients(s.ingredients.clone()),
            CollectionKey::Recipes => CollectionSnapshot::Recipes(s.recipes.clone()),
            CollectionKey::Consumables => CollectionSnapshot::Consumables(s.consumables.clone()),
        })
    }

    pub fn restore_collection(&self, snapshot: CollectionSnapshot) {
        self.write(|s| match snapshot {
            CollectionSnapshot::Ingredients(c) => s.ingredients = c,
            CollectionSnapshot::Recipes(c) => s.recipes = c,
            CollectionSnapshot::Consumables(c) => s.consumables = c,
        });
    }

    // --- Persistence ---

    /// Seed the cache from a persisted snapshot. An empty snapshot leaves collections unloaded.
    pub fn hydrate(&self, state: PersistedState) {
        if state.is_empty() {
            return;
        }
        let recipes = state.expanded_recipes();
        self.write(|s| {
            s.ingredients.list = Some(state.ingredients.into_iter().map(Arc::new).collect());
            s.consumables.list = Some(state.consumables.into_iter().map(Arc::new).collect());
            s.recipes.list = Some(recipes.into_iter().map(Arc::new).collect());
        });
    }

    /// The saved slice of the cache. Pending entities never leave memory.
    #[must_use]
    pub fn persisted_state(&self) -> PersistedState {
        self.read(|s| {
            let saved = |id: &EntityId| !id.is_pending();
            let ingredients: Vec<Ingredient> = s
                .ingredients
                .list
                .iter()
                .flatten()
                .filter(|i| saved(&i.id))
                .map(|i| Ingredient::clone(i))
                .collect();
            let consumables = s
                .consumables
                .list
                .iter()
                .flatten()
                .filter(|c| saved(&c.id))
                .map(|c| Consumable::clone(c))
                .collect();
            let recipes = s
                .recipes
                .list
                .iter()
                .flatten()
                .filter_map(|r| r.to_record())
                .collect();
            PersistedState::from_parts(recipes, ingredients, consumables)
        })
    }

    // --- Change notification ---

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// A handle that does not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            state: Arc::downgrade(&self.state),
            revision: Arc::downgrade(&self.revision),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WeakStore {
    state: Weak<Mutex<CacheState>>,
    revision: Weak<watch::Sender<u64>>,
}

impl WeakStore {
    #[must_use]
    pub fn upgrade(&self) -> Option<EntityStore> {
        Some(EntityStore {
            state: self.state.upgrade()?,
            revision: self.revision.upgrade()?,
        })
    }
}
