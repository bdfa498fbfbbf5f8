mod grocery;
mod helpers;
mod items;
mod recipe;

pub(crate) use grocery::{cmd_categories, cmd_grocery, cmd_sync, cmd_tags};
pub(crate) use helpers::json_error;
pub(crate) use items::{
    Item, cmd_item_add, cmd_item_delete, cmd_item_edit, cmd_item_list, cmd_item_show,
    cmd_item_toggle,
};
pub(crate) use recipe::{
    RecipeDraft, RecipeEdit, cmd_recipe_add, cmd_recipe_change, cmd_recipe_delete,
    cmd_recipe_edit, cmd_recipe_list, cmd_recipe_show,
};
