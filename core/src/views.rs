//! Pure projections over cached collections. Nothing here touches the store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::models::{
    CANONICAL_CATEGORIES, EntityId, ItemKind, Named, Needable, Recipe, RecipeIngredient,
    normalize_name,
};

/// Bucket name for items without a category. Always the last group.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryGroup<T> {
    pub category: String,
    pub items: Vec<T>,
}

/// Group items by trimmed category.
///
/// Groups are ordered case-insensitively with [`UNCATEGORIZED`] last; items
/// within a group are ordered case-insensitively by name.
pub fn group_by_category<T, F>(items: &[T], category: F) -> Vec<CategoryGroup<T>>
where
    T: Named + Clone,
    F: Fn(&T) -> &str,
{
    // Keyed by (folded, original) so buckets sort the same way their items do.
    let mut buckets: BTreeMap<(String, String), Vec<T>> = BTreeMap::new();
    for item in items {
        let key = match category(item).trim() {
            "" => UNCATEGORIZED.to_string(),
            trimmed => trimmed.to_string(),
        };
        buckets
            .entry((key.to_lowercase(), key))
            .or_default()
            .push(item.clone());
    }

    let mut uncategorized = None;
    let mut groups = Vec::with_capacity(buckets.len());
    for ((_, category), mut items) in buckets {
        items.sort_by_cached_key(|i| i.name().to_lowercase());
        let group = CategoryGroup { category, items };
        if group.category == UNCATEGORIZED {
            uncategorized = Some(group);
        } else {
            groups.push(group);
        }
    }
    groups.extend(uncategorized);
    groups
}

/// One row of the grocery list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroceryItem {
    pub kind: ItemKind,
    pub id: EntityId,
    pub name: String,
    pub category: String,
}

impl Named for GroceryItem {
    fn name(&self) -> &str {
        &self.name
    }
}

fn needed_rows<T: Needable>(items: &[Arc<T>]) -> impl Iterator<Item = GroceryItem> + '_ {
    items.iter().filter(|i| i.needed()).map(|i| GroceryItem {
        kind: T::KIND,
        id: i.id().clone(),
        name: i.name().to_string(),
        category: i.category().to_string(),
    })
}

/// Needed ingredients and needed consumables, grouped by category.
///
/// An ingredient and a consumable sharing a name stay two rows.
pub fn grocery_list<I, C>(ingredients: &[Arc<I>], consumables: &[Arc<C>]) -> Vec<CategoryGroup<GroceryItem>>
where
    I: Needable,
    C: Needable,
{
    let rows: Vec<GroceryItem> = needed_rows(ingredients)
        .chain(needed_rows(consumables))
        .collect();
    group_by_category(&rows, |row| row.category.as_str())
}

/// Every distinct tag across recipes, sorted.
#[must_use]
pub fn tag_vocabulary(recipes: &[Arc<Recipe>]) -> Vec<String> {
    recipes
        .iter()
        .flat_map(|r| r.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// True when the recipe carries every tag in `filter`. An empty filter matches.
#[must_use]
pub fn matches_tags(recipe: &Recipe, filter: &BTreeSet<String>) -> bool {
    filter.is_subset(&recipe.tags)
}

#[must_use]
pub fn filter_by_tags(recipes: &[Arc<Recipe>], filter: &BTreeSet<String>) -> Vec<Arc<Recipe>> {
    recipes
        .iter()
        .filter(|r| matches_tags(r, filter))
        .cloned()
        .collect()
}

/// Recipes whose embedded ingredients include `ingredient`.
#[must_use]
pub fn recipes_using(recipes: &[Arc<Recipe>], ingredient: &EntityId) -> Vec<Arc<Recipe>> {
    recipes
        .iter()
        .filter(|r| r.ingredients.iter().any(|i| &i.id == ingredient))
        .cloned()
        .collect()
}

/// The join table implied by the recipe list. Pending ids have no pairs yet.
#[must_use]
pub fn recipe_ingredient_pairs(recipes: &[Arc<Recipe>]) -> BTreeSet<RecipeIngredient> {
    recipes
        .iter()
        .filter_map(|r| r.id.saved().map(|id| (id, r)))
        .flat_map(|(recipe_id, r)| {
            r.ingredients.iter().filter_map(move |i| {
                i.id.saved().map(|ingredient_id| RecipeIngredient {
                    recipe_id: recipe_id.clone(),
                    ingredient_id: ingredient_id.clone(),
                })
            })
        })
        .collect()
}

/// Suggested categories plus every category already in use, sorted and deduplicated.
pub fn category_vocabulary<'a>(in_use: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    CANONICAL_CATEGORIES
        .iter()
        .map(|c| (*c).to_string())
        .chain(in_use.into_iter().map(normalize_name))
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Case-insensitive lookup by name.
pub fn find_by_name<T: Named>(items: &[Arc<T>], name: &str) -> Option<Arc<T>> {
    let wanted = normalize_name(name);
    items
        .iter()
        .find(|i| i.name().to_lowercase() == wanted)
        .cloned()
}
