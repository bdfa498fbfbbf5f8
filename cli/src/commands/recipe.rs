use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use pantry_core::Pantry;
use pantry_core::api::PantryApi;
use pantry_core::models::{Entity, NewRecipe, Recipe, RecipePatch, normalize_name, parse_tags};

use super::helpers::{confirm, needed_mark, owned, print_json, print_recipe_table};

fn lookup_recipe<A: PantryApi>(pantry: &Pantry<A>, name: &str) -> Result<Arc<Recipe>> {
    pantry
        .find::<Recipe>(name)
        .with_context(|| format!("No recipe named '{}'", name.trim()))
}

pub(crate) struct RecipeDraft<'a> {
    pub name: &'a str,
    pub notes: &'a str,
    pub ingredients: &'a [String],
    pub tags: Option<&'a str>,
    pub sources: &'a [String],
}

pub(crate) async fn cmd_recipe_add<A: PantryApi>(
    pantry: &Pantry<A>,
    draft: RecipeDraft<'_>,
    json: bool,
) -> Result<()> {
    let mut new = NewRecipe::new(draft.name).notes(draft.notes);
    for ingredient in draft.ingredients {
        new = new.ingredient(ingredient.as_str());
    }
    for tag in draft.tags.map(parse_tags).unwrap_or_default() {
        new = new.tag(tag);
    }
    for source in draft.sources {
        new = new.source(source.as_str());
    }

    let recipe = pantry.entity::<Recipe>().create(&new).await?;

    if json {
        return print_json(&recipe);
    }
    println!(
        "Created recipe '{}' with {} ingredient(s)",
        recipe.name,
        recipe.ingredients.len()
    );
    Ok(())
}

pub(crate) fn cmd_recipe_list<A: PantryApi>(
    pantry: &Pantry<A>,
    tags: &[String],
    json: bool,
) -> Result<()> {
    let filter: BTreeSet<String> = tags
        .iter()
        .map(|t| normalize_name(t))
        .filter(|t| !t.is_empty())
        .collect();
    let recipes = pantry.recipes_tagged(&filter);

    if json {
        return print_json(&owned(&recipes));
    }
    if recipes.is_empty() {
        if filter.is_empty() {
            println!("No recipes found.");
        } else {
            let wanted: Vec<&str> = filter.iter().map(String::as_str).collect();
            println!("No recipes tagged {}.", wanted.join(" + "));
        }
        return Ok(());
    }
    print_recipe_table(&recipes);
    Ok(())
}

pub(crate) async fn cmd_recipe_show<A: PantryApi>(
    pantry: &Pantry<A>,
    name: &str,
    offline: bool,
    json: bool,
) -> Result<()> {
    let cached = lookup_recipe(pantry, name)?;
    let recipe = if offline {
        cached
    } else {
        match pantry.load_detail::<Recipe>(cached.id()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                log::warn!("{e}; showing cached copy");
                cached
            }
        }
    };

    if json {
        return print_json(&*recipe);
    }

    println!("Recipe: {}", recipe.name);
    if !recipe.tags.is_empty() {
        let tags: Vec<&str> = recipe.tags.iter().map(String::as_str).collect();
        println!("Tags:   {}", tags.join(", "));
    }
    if !recipe.notes.trim().is_empty() {
        println!("\n{}", recipe.notes.trim());
    }

    println!("\nIngredients:");
    if recipe.ingredients.is_empty() {
        println!("  (none)");
    }
    for ingredient in &recipe.ingredients {
        let mark = match needed_mark(ingredient.needed) {
            "" => String::new(),
            mark => format!(" {mark}"),
        };
        println!("  - {}{mark}", ingredient.name);
    }

    if !recipe.sources.is_empty() {
        println!("\nSources:");
        for source in &recipe.sources {
            println!("  - {source}");
        }
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_edit<A: PantryApi>(
    pantry: &Pantry<A>,
    name: &str,
    patch: RecipePatch,
    json: bool,
) -> Result<()> {
    let recipe = lookup_recipe(pantry, name)?;
    let updated = pantry.entity::<Recipe>().update(recipe.id(), &patch).await?;

    if json {
        return print_json(&updated);
    }
    println!("Updated recipe '{}'", updated.name);
    Ok(())
}

/// One change to a recipe's tags, sources or ingredient links.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RecipeEdit<'a> {
    AddTag(&'a str),
    RemoveTag(&'a str),
    AddSource(&'a str),
    RemoveSource(&'a str),
    Link(&'a str),
    Unlink(&'a str),
}

pub(crate) async fn cmd_recipe_change<A: PantryApi>(
    pantry: &Pantry<A>,
    name: &str,
    edit: RecipeEdit<'_>,
    json: bool,
) -> Result<()> {
    let recipe = lookup_recipe(pantry, name)?;
    let id = recipe.id();
    let ops = pantry.recipe_ops();
    let done = match edit {
        RecipeEdit::AddTag(tag) => {
            ops.add_tag(id, tag).await?;
            format!("Tagged '{}' with {}", recipe.name, normalize_name(tag))
        }
        RecipeEdit::RemoveTag(tag) => {
            ops.remove_tag(id, tag).await?;
            format!("Removed tag {} from '{}'", normalize_name(tag), recipe.name)
        }
        RecipeEdit::AddSource(source) => {
            ops.add_source(id, source).await?;
            format!("Added source to '{}'", recipe.name)
        }
        RecipeEdit::RemoveSource(source) => {
            ops.remove_source(id, source).await?;
            format!("Removed source from '{}'", recipe.name)
        }
        RecipeEdit::Link(ingredient) => {
            ops.link_ingredient(id, ingredient).await?;
            format!("Added {} to '{}'", normalize_name(ingredient), recipe.name)
        }
        RecipeEdit::Unlink(ingredient) => {
            ops.unlink_ingredient(id, ingredient).await?;
            format!("Removed {} from '{}'", normalize_name(ingredient), recipe.name)
        }
    };

    if json {
        let fresh = pantry
            .store()
            .find::<Recipe>(id)
            .unwrap_or_else(|| Arc::clone(&recipe));
        return print_json(&*fresh);
    }
    println!("{done}");
    Ok(())
}

pub(crate) async fn cmd_recipe_delete<A: PantryApi>(
    pantry: &Pantry<A>,
    name: &str,
    yes: bool,
    json: bool,
) -> Result<()> {
    let recipe = lookup_recipe(pantry, name)?;
    if !yes && !confirm(&format!("Delete recipe '{}'?", recipe.name))? {
        println!("Cancelled.");
        return Ok(());
    }

    pantry.entity::<Recipe>().delete(recipe.id()).await?;

    if json {
        return print_json(&serde_json::json!({ "deleted": recipe.name }));
    }
    println!("Deleted recipe '{}'", recipe.name);
    Ok(())
}
