use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};

use crate::models::{Consumable, EntityId, Ingredient, PersistedState, RecipeRecord, ServerId};

/// Local snapshot storage: the saved slice of the cache, rewritten wholesale on every save.
pub struct Database {
    conn: Connection,
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    index: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS ingredients (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    needed INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipes (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    notes TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    recipe_id TEXT NOT NULL,
                    ingredient_id TEXT NOT NULL,
                    PRIMARY KEY (recipe_id, ingredient_id)
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_ingredient
                    ON recipe_ingredients(ingredient_id);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Rows written before categories existed read back as uncategorized.
            self.conn.execute_batch(
                "ALTER TABLE ingredients ADD COLUMN category TEXT;
                 UPDATE ingredients SET category = '' WHERE category IS NULL;
                 PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS consumables (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    category TEXT NOT NULL DEFAULT '',
                    needed INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 3;",
            )?;
        }

        if version < 4 {
            self.conn.execute_batch(
                "ALTER TABLE recipes ADD COLUMN tags TEXT NOT NULL DEFAULT '[]';
                 ALTER TABLE recipes ADD COLUMN sources TEXT NOT NULL DEFAULT '[]';
                 PRAGMA user_version = 4;",
            )?;
        }

        Ok(())
    }

    #[cfg(test)]
    fn schema_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: EntityId::Saved(ServerId::new(row.get::<_, String>(0)?)),
            name: row.get(1)?,
            category: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            needed: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn consumable_from_row(row: &rusqlite::Row) -> rusqlite::Result<Consumable> {
        Ok(Consumable {
            id: EntityId::Saved(ServerId::new(row.get::<_, String>(0)?)),
            name: row.get(1)?,
            category: row.get(2)?,
            needed: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    // Expects columns:
    // 0: id, 1: name, 2: notes, 3: tags, 4: sources, 5: created_at, 6: updated_at
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeRecord> {
        Ok(RecipeRecord {
            id: ServerId::new(row.get::<_, String>(0)?),
            name: row.get(1)?,
            notes: row.get(2)?,
            tags: json_column(row, 3)?,
            sources: json_column(row, 4)?,
            ingredient_ids: Vec::new(),
            created_at: row.get::<_, DateTime<Utc>>(5)?,
            updated_at: row.get::<_, DateTime<Utc>>(6)?,
        })
    }

    /// Everything stored. Join rows come back in insertion order per recipe.
    pub fn load_all(&self) -> Result<PersistedState> {
        let ingredients = self
            .conn
            .prepare(
                "SELECT id, name, category, needed, updated_at FROM ingredients ORDER BY rowid",
            )?
            .query_map([], Self::ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read ingredients")?;

        let consumables = self
            .conn
            .prepare(
                "SELECT id, name, category, needed, updated_at FROM consumables ORDER BY rowid",
            )?
            .query_map([], Self::consumable_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read consumables")?;

        let mut recipes = self
            .conn
            .prepare(
                "SELECT id, name, notes, tags, sources, created_at, updated_at
                 FROM recipes ORDER BY rowid",
            )?
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read recipes")?;

        let joins = self
            .conn
            .prepare("SELECT recipe_id, ingredient_id FROM recipe_ingredients ORDER BY rowid")?
            .query_map([], |row| {
                Ok((
                    ServerId::new(row.get::<_, String>(0)?),
                    ServerId::new(row.get::<_, String>(1)?),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read recipe ingredients")?;

        for recipe in &mut recipes {
            recipe.ingredient_ids = joins
                .iter()
                .filter(|(recipe_id, _)| recipe_id == &recipe.id)
                .map(|(_, ingredient_id)| ingredient_id.clone())
                .collect();
        }

        Ok(PersistedState::from_parts(recipes, ingredients, consumables))
    }

    /// Replace everything stored with `state` in one transaction.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM recipe_ingredients;
             DELETE FROM recipes;
             DELETE FROM ingredients;
             DELETE FROM consumables;",
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO ingredients (id, name, category, needed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for i in &state.ingredients {
                let Some(id) = i.id.saved() else { continue };
                stmt.execute(params![id.as_str(), i.name, i.category, i.needed, i.updated_at])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO consumables (id, name, category, needed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for c in &state.consumables {
                let Some(id) = c.id.saved() else { continue };
                stmt.execute(params![id.as_str(), c.name, c.category, c.needed, c.updated_at])?;
            }

            let mut recipe_stmt = tx.prepare(
                "INSERT INTO recipes (id, name, notes, tags, sources, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut join_stmt = tx.prepare(
                "INSERT OR IGNORE INTO recipe_ingredients (recipe_id, ingredient_id)
                 VALUES (?1, ?2)",
            )?;
            for r in &state.recipes {
                recipe_stmt.execute(params![
                    r.id.as_str(),
                    r.name,
                    r.notes,
                    serde_json::to_string(&r.tags)?,
                    serde_json::to_string(&r.sources)?,
                    r.created_at,
                    r.updated_at,
                ])?;
                for ingredient_id in &r.ingredient_ids {
                    join_stmt.execute(params![r.id.as_str(), ingredient_id.as_str()])?;
                }
            }
            for pair in &state.recipe_ingredients {
                join_stmt.execute(params![pair.recipe_id.as_str(), pair.ingredient_id.as_str()])?;
            }
        }

        tx.commit().context("Failed to commit snapshot")?;
        Ok(())
    }
}
