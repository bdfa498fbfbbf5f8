//! Optimistic mutations.
//!
//! Every write follows the same sequence: snapshot the affected cache
//! entries, patch them, call the collaborator, restore the snapshot if the
//! call fails, and finally refetch the affected collections whatever the
//! outcome. Snapshot and patch run before the first await, so no other
//! mutation can interleave between them.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::Utc;

use crate::api::{Endpoints, PantryApi, RecipeEndpoints};
use crate::error::{ApiError, MutationError, ValidationError};
use crate::models::{
    CollectionKey, Consumable, Entity, EntityId, Ingredient, ItemPatch, NewItem, Needable,
    PendingId, Recipe, ServerId, normalize_name,
};
use crate::store::{Cached, EntityStore, Snapshot};
use crate::views;

fn saved_id(id: &EntityId) -> Result<&ServerId, MutationError> {
    id.saved().ok_or_else(|| MutationError::Pending(id.clone()))
}

pub struct MutationEngine<A> {
    store: EntityStore,
    api: Arc<A>,
}

impl<A: PantryApi> MutationEngine<A> {
    pub fn new(store: EntityStore, api: Arc<A>) -> Self {
        Self { store, api }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Mutations for one entity type.
    pub fn entity<T>(&self) -> EntityMutations<'_, T, A>
    where
        T: Cached,
        A: Endpoints<T>,
    {
        EntityMutations {
            engine: self,
            _entity: PhantomData,
        }
    }

    /// Tag, source and ingredient-link mutations on recipes.
    pub fn recipes(&self) -> RecipeMutations<'_, A> {
        RecipeMutations { engine: self }
    }

    /// Refetch one collection and install it wholesale.
    pub async fn refresh(&self, key: CollectionKey) -> Result<(), ApiError> {
        match key {
            CollectionKey::Ingredients => self.refresh_collection::<Ingredient>().await,
            CollectionKey::Consumables => self.refresh_collection::<Consumable>().await,
            CollectionKey::Recipes => self.refresh_collection::<Recipe>().await,
        }
    }

    /// Refetch every collection. Returns the first failure after trying them all.
    pub async fn refresh_all(&self) -> Result<(), ApiError> {
        let mut first_error = None;
        for key in CollectionKey::ALL {
            if let Err(e) = self.refresh(key).await {
                log::warn!("Refetch of {key} failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn refresh_collection<T>(&self) -> Result<(), ApiError>
    where
        T: Cached,
        A: Endpoints<T>,
    {
        let fresh = <A as Endpoints<T>>::fetch_all(&self.api).await?;
        log::debug!("Refetched {} ({} entries)", T::COLLECTION, fresh.len());
        self.store.replace_collection(fresh);
        Ok(())
    }

    /// Refetch the touched collections. Failures are logged and leave the cache as is.
    async fn settle(&self, primary: CollectionKey, dependents: &[CollectionKey]) {
        let mut keys = vec![primary];
        for key in dependents {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        for key in keys {
            if let Err(e) = self.refresh(key).await {
                log::warn!("Refetch of {key} failed: {e}");
            }
        }
    }

    /// Patch, dispatch, roll back on failure, then settle.
    async fn commit<T, R>(
        &self,
        snapshot: Snapshot<T>,
        patch: impl Fn(&T) -> T,
        dispatch: impl Future<Output = Result<R, ApiError>>,
        dependents: &[CollectionKey],
    ) -> Result<R, MutationError>
    where
        T: Cached,
    {
        let id = snapshot.id().clone();
        self.store.patch(&id, patch);
        let result = dispatch.await;
        if let Err(e) = &result {
            log::warn!("{e}; rolling back {id}");
            self.store.restore(snapshot);
        }
        self.settle(T::COLLECTION, dependents).await;
        Ok(result?)
    }
}

/// Create, update and delete for one entity type, plus `toggle_needed` for grocery items.
pub struct EntityMutations<'a, T, A> {
    engine: &'a MutationEngine<A>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, A> EntityMutations<'_, T, A>
where
    T: Cached,
    A: PantryApi + Endpoints<T>,
{
    /// Append a provisional entity, then create it remotely.
    ///
    /// The provisional entity carries a pending id and gets no detail entry;
    /// the refetch after the call replaces it with the server's copy.
    pub async fn create(&self, draft: &T::Draft) -> Result<T, MutationError> {
        let draft = T::normalize_draft(draft)?;
        let engine = self.engine;
        let store = &engine.store;

        let provisional = T::provisional(&draft, PendingId::generate(), Utc::now());
        let provisional = store.resolve_provisional(provisional);
        let snapshot = store.snapshot::<T>(provisional.id());
        log::debug!("Creating {} as {}", T::COLLECTION, provisional.id());
        store.append_to_list(provisional);

        let result = <A as Endpoints<T>>::create(&engine.api, &draft).await;
        if let Err(e) = &result {
            log::warn!("{e}; removing provisional entry");
            store.restore(snapshot);
        }
        engine.settle(T::COLLECTION, T::DEPENDENTS).await;
        Ok(result?)
    }

    pub async fn update(&self, id: &EntityId, patch: &T::Patch) -> Result<T, MutationError> {
        let patch = T::normalize_patch(patch)?;
        let server_id = saved_id(id)?;
        let engine = self.engine;
        let snapshot = engine.store.snapshot::<T>(id);
        let now = Utc::now();
        engine
            .commit(
                snapshot,
                |current: &T| current.apply_patch(&patch, now),
                <A as Endpoints<T>>::update(&engine.api, server_id, &patch),
                T::DEPENDENTS,
            )
            .await
    }

    /// Drop the entity from list and detail caches, then delete remotely.
    pub async fn delete(&self, id: &EntityId) -> Result<(), MutationError> {
        let server_id = saved_id(id)?;
        let engine = self.engine;
        let store = &engine.store;

        let snapshot = store.snapshot::<T>(id);
        let cascaded: Vec<_> = T::CASCADES
            .iter()
            .map(|key| store.snapshot_collection(*key))
            .collect();
        store.remove::<T>(id);

        let result = <A as Endpoints<T>>::delete(&engine.api, server_id).await;
        if let Err(e) = &result {
            log::warn!("{e}; restoring {id}");
            store.restore(snapshot);
            for collection in cascaded {
                store.restore_collection(collection);
            }
        }
        engine.settle(T::COLLECTION, T::DEPENDENTS).await;
        Ok(result?)
    }
}

impl<T, A> EntityMutations<'_, T, A>
where
    T: Cached + Needable,
    A: PantryApi + Endpoints<T>,
{
    /// Flip `needed`.
    ///
    /// The new value is computed from the cache at the moment this call
    /// starts and sent as an absolute value, so two quick toggles send
    /// `!x` then `x`.
    pub async fn toggle_needed(&self, id: &EntityId) -> Result<T, MutationError> {
        let server_id = saved_id(id)?;
        let engine = self.engine;
        let snapshot = engine.store.snapshot::<T>(id);
        let current = snapshot
            .entity()
            .ok_or_else(|| MutationError::NotFound(id.clone()))?
            .needed();
        let patch = ItemPatch::needed(!current);
        let now = Utc::now();
        log::debug!("Toggling {id} needed -> {}", !current);
        engine
            .commit(
                snapshot,
                |item: &T| item.apply_patch(&patch, now),
                <A as Endpoints<T>>::update(&engine.api, server_id, &patch),
                T::DEPENDENTS,
            )
            .await
    }
}

/// Recipe sub-resource mutations.
pub struct RecipeMutations<'a, A> {
    engine: &'a MutationEngine<A>,
}

impl<A: PantryApi> RecipeMutations<'_, A> {
    pub async fn add_tag(&self, id: &EntityId, tag: &str) -> Result<(), MutationError> {
        let tag = normalize_name(tag);
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        engine
            .commit(
                engine.store.snapshot::<Recipe>(id),
                |r: &Recipe| r.with_tag(&tag),
                engine.api.add_tag(server_id, &tag),
                &[],
            )
            .await
    }

    pub async fn remove_tag(&self, id: &EntityId, tag: &str) -> Result<(), MutationError> {
        let tag = normalize_name(tag);
        if tag.is_empty() {
            return Err(ValidationError::EmptyTag.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        engine
            .commit(
                engine.store.snapshot::<Recipe>(id),
                |r: &Recipe| r.without_tag(&tag),
                engine.api.remove_tag(server_id, &tag),
                &[],
            )
            .await
    }

    pub async fn add_source(&self, id: &EntityId, source: &str) -> Result<(), MutationError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ValidationError::EmptySource.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        engine
            .commit(
                engine.store.snapshot::<Recipe>(id),
                |r: &Recipe| r.with_source(source),
                engine.api.add_source(server_id, source),
                &[],
            )
            .await
    }

    pub async fn remove_source(&self, id: &EntityId, source: &str) -> Result<(), MutationError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(ValidationError::EmptySource.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        engine
            .commit(
                engine.store.snapshot::<Recipe>(id),
                |r: &Recipe| r.without_source(source),
                engine.api.remove_source(server_id, source),
                &[],
            )
            .await
    }

    /// Link an ingredient by name. Linking a name already on the recipe changes nothing locally.
    pub async fn link_ingredient(&self, id: &EntityId, name: &str) -> Result<(), MutationError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(ValidationError::EmptyIngredientName.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        let store = &engine.store;

        // Server creates unknown ingredients; show a placeholder until the refetch.
        let ingredient = store
            .get_list::<Ingredient>()
            .and_then(|list| views::find_by_name(&list, &name))
            .map_or_else(
                || {
                    Ingredient::from_draft(
                        EntityId::Pending(PendingId::generate()),
                        &NewItem::new(name.clone()),
                        Utc::now(),
                    )
                },
                |found| Ingredient::clone(&found),
            );

        engine
            .commit(
                store.snapshot::<Recipe>(id),
                |r: &Recipe| r.with_ingredient(ingredient.clone()),
                engine.api.link_ingredient(server_id, &name),
                &[CollectionKey::Ingredients],
            )
            .await
    }

    pub async fn unlink_ingredient(&self, id: &EntityId, name: &str) -> Result<(), MutationError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(ValidationError::EmptyIngredientName.into());
        }
        let server_id = saved_id(id)?;
        let engine = self.engine;
        engine
            .commit(
                engine.store.snapshot::<Recipe>(id),
                |r: &Recipe| r.without_ingredient_named(&name),
                engine.api.unlink_ingredient(server_id, &name),
                &[],
            )
            .await
    }
}
