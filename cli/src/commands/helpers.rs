use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pantry_core::models::{Entity, Named, Needable, Recipe};
use pantry_core::views::{CategoryGroup, GroceryItem};

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Drop the shared pointers so groups serialize as plain values.
pub(crate) fn owned_groups<T: Clone>(groups: Vec<CategoryGroup<Arc<T>>>) -> Vec<CategoryGroup<T>> {
    groups
        .into_iter()
        .map(|g| CategoryGroup {
            category: g.category,
            items: g.items.iter().map(|i| T::clone(i)).collect(),
        })
        .collect()
}

pub(crate) fn owned<T: Clone>(items: &[Arc<T>]) -> Vec<T> {
    items.iter().map(|i| T::clone(i)).collect()
}

pub(crate) fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N]: ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub(crate) fn needed_mark(needed: bool) -> &'static str {
    if needed { "✓" } else { "" }
}

pub(crate) fn print_item_table<T: Needable>(groups: &[CategoryGroup<Arc<T>>]) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Needed")]
        needed: &'static str,
        #[tabled(rename = "ID")]
        id: String,
    }

    let rows: Vec<ItemRow> = groups
        .iter()
        .flat_map(|g| {
            g.items.iter().map(|item| ItemRow {
                category: g.category.clone(),
                name: truncate(item.name(), 35),
                needed: needed_mark(item.needed()),
                id: truncate(&item.id().to_string(), 12),
            })
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_recipe_table(recipes: &[Arc<Recipe>]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Tags")]
        tags: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "Sources")]
        sources: usize,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            name: truncate(&r.name, 35),
            tags: truncate(&r.tags.iter().cloned().collect::<Vec<_>>().join(", "), 30),
            ingredients: r.ingredients.len(),
            sources: r.sources.len(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_grocery_table(groups: &[CategoryGroup<GroceryItem>]) {
    #[derive(Tabled)]
    struct GroceryRow {
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Kind")]
        kind: String,
    }

    let rows: Vec<GroceryRow> = groups
        .iter()
        .flat_map(|g| {
            g.items.iter().map(|row| GroceryRow {
                category: g.category.clone(),
                name: truncate(&row.name, 35),
                kind: row.kind.to_string(),
            })
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
