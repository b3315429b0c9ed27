use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use recipehub_core::RecipeHub;
use recipehub_core::cache::{WriteRoute, Written};
use recipehub_core::models::{NewRecipe, Recipe, RecipeFilter, RecipePatch};

use super::helpers::{
    describe_route, format_minutes, json_error, parse_ingredients, parse_steps, truncate,
};
use super::resolve_recipe;

/// Recipe fields collected from the command line.
#[derive(Debug, Default)]
pub(crate) struct RecipeFields {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub prep: Option<u32>,
    pub cook: Option<u32>,
    pub servings: Option<u32>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
}

/// Changes requested by `edit`. Empty lists leave the children untouched.
#[derive(Debug, Default)]
pub(crate) struct RecipeEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub clear_description: bool,
    pub category: Option<String>,
    pub clear_category: bool,
    pub prep: Option<u32>,
    pub cook: Option<u32>,
    pub servings: Option<u32>,
    pub ingredients: Vec<String>,
    pub steps: Vec<String>,
}

impl RecipeEdit {
    fn patch(&self) -> RecipePatch {
        RecipePatch {
            name: self.name.clone(),
            description: if self.clear_description {
                Some(None)
            } else {
                self.description.clone().map(Some)
            },
            category_id: if self.clear_category {
                Some(None)
            } else {
                self.category.clone().map(Some)
            },
            prep_time_minutes: self.prep.map(Some),
            cook_time_minutes: self.cook.map(Some),
            servings: self.servings.map(Some),
            is_favorite: None,
        }
    }
}

pub(crate) async fn cmd_list(hub: &RecipeHub, filter: &RecipeFilter, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "★")]
        favorite: &'static str,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "Total time")]
        total_time: String,
        #[tabled(rename = "Servings")]
        servings: String,
    }

    let recipes = hub.get_recipes(filter).await?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: truncate(&r.id.key(), 20),
            name: truncate(&r.name, 30),
            favorite: if r.is_favorite { "★" } else { "" },
            ingredients: r.ingredients.len(),
            total_time: format_minutes(r.total_time_minutes()),
            servings: r.servings.map_or("-".into(), |s| s.to_string()),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) async fn cmd_show(hub: &RecipeHub, query: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(hub, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
        return Ok(());
    }

    print_recipe(&recipe);
    Ok(())
}

fn print_recipe(recipe: &Recipe) {
    let name = &recipe.name;
    let star = if recipe.is_favorite { " ★" } else { "" };
    println!("=== {name}{star} ===");
    println!("  ID: {}", recipe.id);
    if recipe.shared {
        println!("  Shared with you (read-only)");
    }
    if let Some(description) = &recipe.description {
        println!("  {description}");
    }
    let prep = format_minutes(recipe.prep_time_minutes);
    let cook = format_minutes(recipe.cook_time_minutes);
    let servings = recipe.servings.map_or("-".into(), |s| s.to_string());
    println!("  Prep: {prep}  |  Cook: {cook}  |  Servings: {servings}");
    if let Some(image) = recipe.primary_image() {
        println!("  Image: {image}");
    }

    if !recipe.ingredients.is_empty() {
        println!("\n  INGREDIENTS:");
        for ing in &recipe.ingredients {
            let amount = [ing.quantity.as_deref(), ing.unit.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if amount.is_empty() {
                println!("    {}", ing.name);
            } else {
                println!("    {amount} {}", ing.name);
            }
        }
    }

    if !recipe.steps.is_empty() {
        println!("\n  STEPS:");
        for step in &recipe.steps {
            let n = step.step_number;
            let text = &step.instruction;
            match step.time_minutes {
                Some(m) => println!("    {n}. {text} ({m} min)"),
                None => println!("    {n}. {text}"),
            }
        }
    }
}

fn print_written(verb: &str, written: &Written<Recipe>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&written.value)?);
    } else {
        let name = &written.value.name;
        let id = &written.value.id;
        let route = describe_route(written.route);
        println!("{verb} recipe: {name} (id: {id}, {route})");
    }
    Ok(())
}

pub(crate) async fn cmd_add(hub: &RecipeHub, fields: RecipeFields, json: bool) -> Result<()> {
    let draft = NewRecipe {
        name: fields.name,
        description: fields.description,
        category_id: fields.category,
        prep_time_minutes: fields.prep,
        cook_time_minutes: fields.cook,
        servings: fields.servings,
        ingredients: parse_ingredients(&fields.ingredients)?,
        steps: parse_steps(&fields.steps)?,
    };
    let written = hub.create_recipe(draft).await?;
    print_written("Created", &written, json)
}

pub(crate) async fn cmd_edit(
    hub: &RecipeHub,
    query: &str,
    edit: RecipeEdit,
    json: bool,
) -> Result<()> {
    let patch = edit.patch();
    if patch.is_empty() && edit.ingredients.is_empty() && edit.steps.is_empty() {
        bail!("Nothing to update. Pass at least one field to change");
    }
    let ingredients = parse_ingredients(&edit.ingredients)?;
    let steps = parse_steps(&edit.steps)?;

    let recipe = resolve_recipe(hub, query).await?;
    let mut key = recipe.id.key();
    let mut written = None;

    if !patch.is_empty() {
        let w = hub.update_recipe(&key, patch).await?;
        key = w.value.id.key();
        written = Some(w);
    }
    if !ingredients.is_empty() {
        let w = hub.replace_ingredients(&key, ingredients).await?;
        key = w.value.id.key();
        written = Some(w);
    }
    if !steps.is_empty() {
        written = Some(hub.replace_steps(&key, steps).await?);
    }

    match written {
        Some(w) => print_written("Updated", &w, json),
        None => bail!("Nothing to update"),
    }
}

pub(crate) async fn cmd_favorite(
    hub: &RecipeHub,
    query: &str,
    value: Option<bool>,
    json: bool,
) -> Result<()> {
    let recipe = resolve_recipe(hub, query).await?;
    let key = recipe.id.key();
    let written = match value {
        Some(v) => hub.set_favorite(&key, v).await?,
        None => hub.toggle_favorite(&key).await?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&written.value)?);
    } else {
        let name = &written.value.name;
        let state = if written.value.is_favorite {
            "Marked as favorite"
        } else {
            "Removed from favorites"
        };
        let route = describe_route(written.route);
        println!("{state}: {name} ({route})");
    }
    Ok(())
}

pub(crate) async fn cmd_delete(hub: &RecipeHub, query: &str, json: bool) -> Result<()> {
    let recipe = match resolve_recipe(hub, query).await {
        Ok(recipe) => recipe,
        Err(e) => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
            }
            process::exit(2);
        }
    };
    let route = hub.delete_recipe(&recipe.id.key()).await?;
    if json {
        let synced = route == WriteRoute::Remote;
        println!(
            "{}",
            serde_json::json!({ "deleted": recipe.id.key(), "synced": synced })
        );
    } else {
        let name = &recipe.name;
        println!("Deleted recipe: {name} ({})", describe_route(route));
    }
    Ok(())
}

pub(crate) async fn cmd_categories(hub: &RecipeHub, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct CategoryRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Icon")]
        icon: String,
        #[tabled(rename = "Color")]
        color: String,
    }

    let categories = hub.get_categories().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&categories)?);
        return Ok(());
    }
    if categories.is_empty() {
        eprintln!("No categories found");
        return Ok(());
    }

    let rows: Vec<CategoryRow> = categories
        .iter()
        .map(|c| CategoryRow {
            id: truncate(&c.id, 20),
            name: truncate(&c.name, 30),
            icon: c.icon.clone().unwrap_or_default(),
            color: c.color.clone().unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    Ok(())
}
