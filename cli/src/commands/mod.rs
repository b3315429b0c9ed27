mod helpers;
mod recipe;
mod sync;

use anyhow::{Result, bail};

use recipehub_core::RecipeHub;
use recipehub_core::error::Error;
use recipehub_core::models::{Recipe, RecipeFilter};

pub(crate) use recipe::{
    RecipeEdit, RecipeFields, cmd_add, cmd_categories, cmd_delete, cmd_edit, cmd_favorite,
    cmd_list, cmd_show,
};
pub(crate) use sync::{cmd_queue, cmd_status, cmd_sync};

/// Resolve a recipe by key (`local-…` or server id), falling back to an exact
/// case-insensitive name match among cached recipes.
pub(super) async fn resolve_recipe(hub: &RecipeHub, query: &str) -> Result<Recipe> {
    match hub.get_recipe(query).await {
        Ok(recipe) => return Ok(recipe),
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let needle = query.trim().to_lowercase();
    let mut matches = Vec::new();
    for filter in [RecipeFilter::default(), RecipeFilter::shared()] {
        matches.extend(
            hub.get_recipes(&filter)
                .await?
                .into_iter()
                .filter(|r| r.name.to_lowercase() == needle),
        );
    }

    match matches.len() {
        0 => bail!("No recipe found for '{query}'"),
        1 => Ok(matches.remove(0)),
        n => bail!("{n} recipes are named '{query}'. Use the id from `recipehub list` instead"),
    }
}
