use anyhow::Result;
use serde::Serialize;

use pantry_core::Pantry;
use pantry_core::api::PantryApi;
use pantry_core::models::ItemKind;

use super::helpers::{print_grocery_table, print_json};

pub(crate) fn cmd_grocery<A: PantryApi>(pantry: &Pantry<A>, json: bool) -> Result<()> {
    let groups = pantry.grocery_list();

    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("Nothing needed.");
        return Ok(());
    }
    print_grocery_table(&groups);
    let total: usize = groups.iter().map(|g| g.items.len()).sum();
    println!("{total} item(s) to buy");
    Ok(())
}

pub(crate) fn cmd_tags<A: PantryApi>(pantry: &Pantry<A>, json: bool) -> Result<()> {
    let tags = pantry.tags();

    if json {
        return print_json(&tags);
    }
    if tags.is_empty() {
        println!("No tags yet.");
    }
    for tag in &tags {
        println!("{tag}");
    }
    Ok(())
}

pub(crate) async fn cmd_categories<A: PantryApi>(
    pantry: &Pantry<A>,
    kind: ItemKind,
    offline: bool,
    json: bool,
) -> Result<()> {
    let categories = if offline {
        pantry.categories(kind)
    } else {
        pantry.category_suggestions(kind).await
    };

    if json {
        return print_json(&categories);
    }
    for category in &categories {
        println!("{category}");
    }
    Ok(())
}

pub(crate) async fn cmd_sync<A: PantryApi>(pantry: &Pantry<A>, json: bool) -> Result<()> {
    #[derive(Serialize)]
    struct Counts {
        ingredients: usize,
        consumables: usize,
        recipes: usize,
        recipe_links: usize,
    }

    pantry.sync().await?;
    let counts = Counts {
        ingredients: pantry.ingredients().len(),
        consumables: pantry.consumables().len(),
        recipes: pantry.recipes().len(),
        recipe_links: pantry.recipe_ingredients().len(),
    };

    if json {
        return print_json(&counts);
    }
    println!(
        "Synced {} ingredients, {} consumables, {} recipes ({} ingredient links)",
        counts.ingredients, counts.consumables, counts.recipes, counts.recipe_links
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use pantry_core::catalog::Catalog;
    use pantry_core::db::Database;
    use pantry_core::models::{Consumable, Ingredient, NewItem, NewRecipe};
    use pantry_core::persist::Persistence;

    fn offline_pantry(catalog: Catalog) -> Pantry<Catalog> {
        Pantry::new(
            Arc::new(catalog),
            Persistence::new(Database::open_in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_sync_loads_everything() {
        let catalog = Catalog::new();
        catalog
            .create_item::<Ingredient>(&NewItem::new("rice").needed(true))
            .unwrap();
        catalog
            .create_item::<Consumable>(&NewItem::new("sponges").needed(true))
            .unwrap();
        catalog
            .create_recipe(&NewRecipe::new("Risotto").ingredient("rice").tag("dinner"))
            .unwrap();

        let pantry = offline_pantry(catalog);
        assert!(!pantry.is_loaded());
        cmd_sync(&pantry, false).await.unwrap();

        assert!(pantry.is_loaded());
        assert_eq!(pantry.recipes().len(), 1);
        assert_eq!(pantry.tags(), vec!["dinner".to_string()]);
        let links = pantry.recipe_ingredients();
        assert_eq!(links.len(), 1);
        let rice = pantry.find::<Ingredient>("rice").unwrap();
        assert_eq!(Some(&links.first().unwrap().ingredient_id), rice.id.saved());
        let rows: usize = pantry.grocery_list().iter().map(|g| g.items.len()).sum();
        assert_eq!(rows, 2);

        cmd_grocery(&pantry, false).unwrap();
        cmd_grocery(&pantry, true).unwrap();
        cmd_tags(&pantry, false).unwrap();
    }

    #[tokio::test]
    async fn test_categories_offline_uses_cache() {
        let catalog = Catalog::new();
        catalog
            .create_item::<Ingredient>(&NewItem::new("saffron").category("Rare Spices"))
            .unwrap();
        let pantry = offline_pantry(catalog);
        pantry.sync().await.unwrap();

        let cached = pantry.categories(ItemKind::Ingredient);
        assert!(cached.contains(&"rare spices".to_string()));
        assert!(cached.contains(&"produce".to_string()));

        cmd_categories(&pantry, ItemKind::Ingredient, true, true)
            .await
            .unwrap();
        cmd_categories(&pantry, ItemKind::Consumable, false, false)
            .await
            .unwrap();
    }
}
