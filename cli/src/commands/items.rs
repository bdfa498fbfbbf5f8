use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use pantry_core::Pantry;
use pantry_core::api::{Endpoints, PantryApi};
use pantry_core::models::{Entity, ItemKind, ItemPatch, Named, Needable, NewItem};
use pantry_core::store::Cached;
use pantry_core::views::UNCATEGORIZED;

use super::helpers::{confirm, owned_groups, print_item_table, print_json};

/// Ingredients and consumables: everything the item commands need.
pub(crate) trait Item: Cached + Needable + Serialize {}

impl<T: Cached + Needable + Serialize> Item for T {}

fn title(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Ingredient => "Ingredient",
        ItemKind::Consumable => "Consumable",
    }
}

pub(super) fn lookup_item<T: Item, A: PantryApi>(pantry: &Pantry<A>, name: &str) -> Result<Arc<T>> {
    pantry
        .find::<T>(name)
        .with_context(|| format!("No {} named '{}'", T::KIND, name.trim()))
}

pub(crate) async fn cmd_item_add<T, A>(
    pantry: &Pantry<A>,
    name: &str,
    category: &str,
    needed: bool,
    json: bool,
) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    let draft = NewItem::new(name).category(category).needed(needed);
    let (item, created) = pantry.add_item::<T>(&draft).await?;

    if json {
        return print_json(&item);
    }
    if created {
        let category = match item.category() {
            "" => String::new(),
            c => format!(" to {c}"),
        };
        println!("Added {} '{}'{category}", T::KIND, item.name());
    } else {
        println!("{} '{}' already exists", title(T::KIND), item.name());
    }
    Ok(())
}

pub(crate) fn cmd_item_list<T: Item, A: PantryApi>(
    pantry: &Pantry<A>,
    needed_only: bool,
    json: bool,
) -> Result<()> {
    let mut groups = pantry.groups::<T>();
    if needed_only {
        for group in &mut groups {
            group.items.retain(|i| i.needed());
        }
        groups.retain(|g| !g.items.is_empty());
    }

    if json {
        return print_json(&owned_groups(groups));
    }
    if groups.is_empty() {
        println!("No {} found.", T::COLLECTION);
    } else {
        print_item_table(&groups);
    }
    Ok(())
}

pub(crate) async fn cmd_item_show<T, A>(
    pantry: &Pantry<A>,
    name: &str,
    offline: bool,
    json: bool,
) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    let cached = lookup_item::<T, A>(pantry, name)?;
    let item = if offline {
        cached
    } else {
        match pantry.load_detail::<T>(cached.id()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                log::warn!("{e}; showing cached copy");
                cached
            }
        }
    };
    let used_in = pantry.recipes_using(item.id());

    if json {
        #[derive(Serialize)]
        struct Detail<'a, T> {
            #[serde(flatten)]
            item: &'a T,
            used_in: Vec<&'a str>,
        }
        return print_json(&Detail {
            item: &*item,
            used_in: used_in.iter().map(|r| r.name.as_str()).collect(),
        });
    }

    let category = match item.category() {
        "" => UNCATEGORIZED,
        c => c,
    };
    println!("{}:     {}", title(T::KIND), item.name());
    println!("Category:   {category}");
    println!("Needed:     {}", if item.needed() { "yes" } else { "no" });
    println!("ID:         {}", item.id());
    if !used_in.is_empty() {
        let names: Vec<&str> = used_in.iter().map(|r| r.name.as_str()).collect();
        println!("Used in:    {}", names.join(", "));
    }
    Ok(())
}

pub(crate) async fn cmd_item_toggle<T, A>(pantry: &Pantry<A>, name: &str, json: bool) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    let item = lookup_item::<T, A>(pantry, name)?;
    let updated = pantry.entity::<T>().toggle_needed(item.id()).await?;

    if json {
        return print_json(&updated);
    }
    let state = if updated.needed() { "needed" } else { "not needed" };
    println!("{}: {state}", updated.name());
    Ok(())
}

pub(crate) async fn cmd_item_edit<T, A>(
    pantry: &Pantry<A>,
    name: &str,
    patch: ItemPatch,
    json: bool,
) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    let item = lookup_item::<T, A>(pantry, name)?;
    let updated = pantry.entity::<T>().update(item.id(), &patch).await?;

    if json {
        return print_json(&updated);
    }
    println!("Updated {} '{}'", T::KIND, updated.name());
    Ok(())
}

pub(crate) async fn cmd_item_delete<T, A>(
    pantry: &Pantry<A>,
    name: &str,
    yes: bool,
    json: bool,
) -> Result<()>
where
    T: Item,
    A: PantryApi + Endpoints<T>,
{
    let item = lookup_item::<T, A>(pantry, name)?;

    if !yes {
        let used_in = pantry.recipes_using(item.id());
        if !used_in.is_empty() {
            eprintln!(
                "'{}' is used by {} recipe(s) and will be removed from them.",
                item.name(),
                used_in.len()
            );
        }
        if !confirm(&format!("Delete {} '{}'?", T::KIND, item.name()))? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    pantry.entity::<T>().delete(item.id()).await?;

    if json {
        return print_json(&serde_json::json!({ "deleted": item.name() }));
    }
    println!("Deleted {} '{}'", T::KIND, item.name());
    Ok(())
}
