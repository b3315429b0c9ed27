use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One row as exchanged with the remote store.
pub type Row = serde_json::Map<String, Value>;

/// Identity of a cached entity.
///
/// Records created while offline carry a client-generated `Temporary` id until the
/// replay engine learns the server-assigned one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityId {
    Temporary(Uuid),
    Persisted(String),
}

impl EntityId {
    #[must_use]
    pub fn temporary() -> Self {
        Self::Temporary(Uuid::new_v4())
    }

    pub fn persisted(id: impl Into<String>) -> Self {
        Self::Persisted(id.into())
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub fn as_persisted(&self) -> Option<&str> {
        match self {
            Self::Persisted(id) => Some(id),
            Self::Temporary(_) => None,
        }
    }

    /// Storage key of the entity in the local store.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(uuid) => write!(f, "local-{uuid}"),
            Self::Persisted(id) => f.write_str(id),
        }
    }
}

/// Remote tables the client reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Recipes,
    Categories,
    Ingredients,
    PreparationSteps,
    RecipeImages,
    SharedRecipes,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Recipes,
        Table::Categories,
        Table::Ingredients,
        Table::PreparationSteps,
        Table::RecipeImages,
        Table::SharedRecipes,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Categories => "categories",
            Self::Ingredients => "ingredients",
            Self::PreparationSteps => "preparation_steps",
            Self::RecipeImages => "recipe_images",
            Self::SharedRecipes => "shared_recipes",
        }
    }

    /// Inserts into the primary entity table produce ids other rows refer to.
    #[must_use]
    pub fn is_primary(self) -> bool {
        self == Self::Recipes
    }

    /// Tables whose rows are soft-deleted through an `is_active` flag.
    #[must_use]
    pub fn has_active_flag(self) -> bool {
        matches!(self, Self::Recipes | Self::Categories)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::NotFound(format!("table '{s}'")))
    }
}

// --- Recipes ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub order_index: u32,
}

impl Ingredient {
    pub fn named(name: impl Into<String>, order_index: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            quantity: None,
            unit: None,
            order_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub step_number: u32,
    pub instruction: String,
    #[serde(default)]
    pub time_minutes: Option<u32>,
}

impl PreparationStep {
    pub fn new(step_number: u32, instruction: impl Into<String>) -> Self {
        Self {
            id: None,
            step_number,
            instruction: instruction.into(),
            time_minutes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub image_url: String,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub order_index: u32,
}

/// A recipe as cached locally, with its associations embedded so it can be read
/// offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: EntityId,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub prep_time_minutes: Option<u32>,
    #[serde(default)]
    pub cook_time_minutes: Option<u32>,
    #[serde(default)]
    pub servings: Option<u32>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub images: Vec<RecipeImage>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<PreparationStep>,
    /// Sourced from another user's share rather than owned.
    #[serde(default)]
    pub shared: bool,
    /// Bumped on every local edit; guards against stale server responses.
    #[serde(default)]
    pub revision: u64,
    /// Temporary id the recipe was created under while offline, kept after the
    /// server id is known so queued children can still be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Uuid>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_true() -> bool {
    true
}

/// Scalar columns of the remote `recipes` table.
#[derive(Debug, Serialize, Deserialize)]
struct RecipeRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    user_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    prep_time_minutes: Option<u32>,
    #[serde(default)]
    cook_time_minutes: Option<u32>,
    #[serde(default)]
    servings: Option<u32>,
    #[serde(default)]
    is_favorite: bool,
    #[serde(default = "default_true")]
    is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl Recipe {
    /// The remote representation of this recipe. Temporary ids are never sent.
    pub fn to_row(&self) -> Result<Row> {
        let row = RecipeRow {
            id: self.id.as_persisted().map(String::from),
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category_id: self.category_id.clone(),
            prep_time_minutes: self.prep_time_minutes,
            cook_time_minutes: self.cook_time_minutes,
            servings: self.servings,
            is_favorite: self.is_favorite,
            is_active: self.is_active,
            created_at: None,
            updated_at: None,
        };
        to_row(&row)
    }

    /// Build a cached recipe from a remote row. Associations start empty.
    pub fn from_row(row: &Row) -> Result<Self> {
        let parsed: RecipeRow = from_row(row.clone())?;
        let id = parsed
            .id
            .ok_or_else(|| Error::Malformed("recipe row without id".to_string()))?;
        Ok(Self {
            id: EntityId::Persisted(id),
            user_id: parsed.user_id,
            name: parsed.name,
            description: parsed.description,
            category_id: parsed.category_id,
            prep_time_minutes: parsed.prep_time_minutes,
            cook_time_minutes: parsed.cook_time_minutes,
            servings: parsed.servings,
            is_favorite: parsed.is_favorite,
            is_active: parsed.is_active,
            images: Vec::new(),
            ingredients: Vec::new(),
            steps: Vec::new(),
            shared: false,
            revision: 0,
            origin: None,
            created_at: parsed.created_at.unwrap_or_default(),
            updated_at: parsed.updated_at.unwrap_or_default(),
        })
    }

    /// Take the server's scalar fields (and id) while keeping local associations.
    pub fn merge_server_row(&mut self, row: &Row) -> Result<()> {
        let server = Self::from_row(row)?;
        self.id = server.id;
        self.user_id = server.user_id;
        self.name = server.name;
        self.description = server.description;
        self.category_id = server.category_id;
        self.prep_time_minutes = server.prep_time_minutes;
        self.cook_time_minutes = server.cook_time_minutes;
        self.servings = server.servings;
        self.is_favorite = server.is_favorite;
        self.is_active = server.is_active;
        if !server.created_at.is_empty() {
            self.created_at = server.created_at;
        }
        if !server.updated_at.is_empty() {
            self.updated_at = server.updated_at;
        }
        Ok(())
    }

    #[must_use]
    pub fn primary_image(&self) -> Option<&str> {
        self.images
            .iter()
            .find(|img| img.is_primary)
            .map(|img| img.image_url.as_str())
    }

    #[must_use]
    pub fn total_time_minutes(&self) -> Option<u32> {
        match (self.prep_time_minutes, self.cook_time_minutes) {
            (None, None) => None,
            (prep, cook) => Some(prep.unwrap_or(0) + cook.unwrap_or(0)),
        }
    }
}

/// Fields for a recipe created by the user.
#[derive(Debug, Clone, Default)]
pub struct NewRecipe {
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<String>,
    pub prep_time_minutes: Option<u32>,
    pub cook_time_minutes: Option<u32>,
    pub servings: Option<u32>,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<PreparationStep>,
}

impl NewRecipe {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_recipe_name(&self.name)?;
        if self.servings == Some(0) {
            return Err(Error::Malformed(
                "servings must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The local record for this draft, owned by `user_id`, under `id`.
    #[must_use]
    pub fn into_recipe(self, id: EntityId, user_id: &str) -> Recipe {
        let now = chrono::Utc::now().to_rfc3339();
        let origin = match &id {
            EntityId::Temporary(uuid) => Some(*uuid),
            EntityId::Persisted(_) => None,
        };
        Recipe {
            id,
            user_id: user_id.to_string(),
            name: self.name.trim().to_string(),
            description: self.description,
            category_id: self.category_id,
            prep_time_minutes: self.prep_time_minutes,
            cook_time_minutes: self.cook_time_minutes,
            servings: self.servings,
            is_favorite: false,
            is_active: true,
            images: Vec::new(),
            ingredients: self.ingredients,
            steps: self.steps,
            shared: false,
            revision: 1,
            origin,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

pub fn validate_recipe_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Malformed("recipe name must not be empty".to_string()));
    }
    Ok(())
}

/// A partial update of a recipe's scalar fields.
///
/// The outer `Option` says whether the field is touched; for nullable fields the
/// inner `Option` is the new value.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(clippy::option_option)]
pub struct RecipePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category_id: Option<Option<String>>,
    pub prep_time_minutes: Option<Option<u32>>,
    pub cook_time_minutes: Option<Option<u32>>,
    pub servings: Option<Option<u32>>,
    pub is_favorite: Option<bool>,
}

impl RecipePatch {
    #[must_use]
    pub fn favorite(value: bool) -> Self {
        Self {
            is_favorite: Some(value),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_recipe_name(name)?;
        }
        if self.servings == Some(Some(0)) {
            return Err(Error::Malformed(
                "servings must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply(&self, recipe: &mut Recipe) {
        if let Some(name) = &self.name {
            recipe.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            recipe.description.clone_from(description);
        }
        if let Some(category_id) = &self.category_id {
            recipe.category_id.clone_from(category_id);
        }
        if let Some(prep) = self.prep_time_minutes {
            recipe.prep_time_minutes = prep;
        }
        if let Some(cook) = self.cook_time_minutes {
            recipe.cook_time_minutes = cook;
        }
        if let Some(servings) = self.servings {
            recipe.servings = servings;
        }
        if let Some(favorite) = self.is_favorite {
            recipe.is_favorite = favorite;
        }
    }

    /// The remote patch body: only touched columns, nulls for cleared values.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        if let Some(name) = &self.name {
            row.insert("name".into(), Value::from(name.trim()));
        }
        if let Some(description) = &self.description {
            row.insert("description".into(), Value::from(description.clone()));
        }
        if let Some(category_id) = &self.category_id {
            row.insert("category_id".into(), Value::from(category_id.clone()));
        }
        if let Some(prep) = self.prep_time_minutes {
            row.insert("prep_time_minutes".into(), Value::from(prep));
        }
        if let Some(cook) = self.cook_time_minutes {
            row.insert("cook_time_minutes".into(), Value::from(cook));
        }
        if let Some(servings) = self.servings {
            row.insert("servings".into(), Value::from(servings));
        }
        if let Some(favorite) = self.is_favorite {
            row.insert("is_favorite".into(), Value::from(favorite));
        }
        row
    }

    /// Recover the recipe columns a remote patch body touches.
    pub fn from_row(row: &Row) -> Result<Self> {
        fn nullable<T: DeserializeOwned>(row: &Row, key: &str) -> Result<Option<Option<T>>> {
            row.get(key)
                .map(|v| serde_json::from_value::<Option<T>>(v.clone()))
                .transpose()
                .map_err(Error::from)
        }
        Ok(Self {
            name: row
                .get("name")
                .map(|v| serde_json::from_value::<String>(v.clone()))
                .transpose()?,
            description: nullable(row, "description")?,
            category_id: nullable(row, "category_id")?,
            prep_time_minutes: nullable(row, "prep_time_minutes")?,
            cook_time_minutes: nullable(row, "cook_time_minutes")?,
            servings: nullable(row, "servings")?,
            is_favorite: row
                .get("is_favorite")
                .map(|v| serde_json::from_value::<bool>(v.clone()))
                .transpose()?,
        })
    }
}

// --- Categories ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub order_index: i64,
}

// --- Filters ---

/// Local filters for the recipe listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeFilter {
    /// Case-insensitive substring of the name or description.
    pub search: Option<String>,
    pub category_id: Option<String>,
    pub favorite: Option<bool>,
    /// Select recipes shared with the user instead of owned ones.
    pub shared: bool,
}

impl RecipeFilter {
    #[must_use]
    pub fn favorites() -> Self {
        Self {
            favorite: Some(true),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn shared() -> Self {
        Self {
            shared: true,
            ..Self::default()
        }
    }

    /// True for the plain "all my recipes" listing.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.search.as_deref().is_none_or(|s| s.trim().is_empty())
            && self.category_id.is_none()
            && self.favorite.is_none()
            && !self.shared
    }

    #[must_use]
    pub fn matches(&self, recipe: &Recipe) -> bool {
        if recipe.shared != self.shared || !recipe.is_active {
            return false;
        }
        if let Some(category_id) = &self.category_id {
            if recipe.category_id.as_ref() != Some(category_id) {
                return false;
            }
        }
        if let Some(favorite) = self.favorite {
            if recipe.is_favorite != favorite {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                let needle = search.to_lowercase();
                let in_name = recipe.name.to_lowercase().contains(&needle);
                let in_description = recipe
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle));
                if !in_name && !in_description {
                    return false;
                }
            }
        }
        true
    }

    pub fn apply<'a>(&self, recipes: impl IntoIterator<Item = &'a Recipe>) -> Vec<Recipe> {
        let mut out: Vec<Recipe> = recipes
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        // Newest first, the same order the remote listing uses.
        out.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
        out
    }
}

fn created_at(recipe: &Recipe) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    chrono::DateTime::parse_from_rfc3339(&recipe.created_at).ok()
}

// --- Row helpers ---

pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Malformed(format!("expected an object, got {other}"))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_recipe() -> Recipe {
        NewRecipe {
            name: "Tortilla de patatas".to_string(),
            description: Some("Classic Spanish omelette".to_string()),
            category_id: Some("cat-1".to_string()),
            prep_time_minutes: Some(15),
            cook_time_minutes: Some(20),
            servings: Some(4),
            ingredients: vec![Ingredient::named("Eggs", 0)],
            steps: vec![PreparationStep::new(1, "Fry the potatoes")],
        }
        .into_recipe(EntityId::temporary(), "user-1")
    }

    #[test]
    fn test_entity_id_display_and_key() {
        let id = EntityId::persisted("srv_42");
        assert_eq!(id.key(), "srv_42");
        assert!(!id.is_temporary());

        let temp = EntityId::temporary();
        assert!(temp.is_temporary());
        assert!(temp.key().starts_with("local-"));
        assert!(temp.as_persisted().is_none());
    }

    #[test]
    fn test_entity_id_serde_is_tagged() {
        let id = EntityId::persisted("abc");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, json!({"kind": "persisted", "value": "abc"}));
        let back: EntityId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_table_from_str() {
        assert_eq!(
            "preparation_steps".parse::<Table>().unwrap(),
            Table::PreparationSteps
        );
        assert!("users".parse::<Table>().is_err());
        assert!(Table::Recipes.is_primary());
        assert!(!Table::Ingredients.is_primary());
    }

    #[test]
    fn test_recipe_to_row_omits_temporary_id_and_associations() {
        let recipe = sample_recipe();
        let row = recipe.to_row().unwrap();
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("ingredients"));
        assert!(!row.contains_key("shared"));
        assert_eq!(row["name"], "Tortilla de patatas");
        assert_eq!(row["user_id"], "user-1");
        assert_eq!(row["is_active"], true);
    }

    #[test]
    fn test_recipe_from_row_requires_id() {
        let row = to_row(&json!({"name": "Gazpacho", "user_id": "u"})).unwrap();
        assert!(matches!(Recipe::from_row(&row), Err(Error::Malformed(_))));

        let row = to_row(&json!({
            "id": "srv_1",
            "name": "Gazpacho",
            "user_id": "u",
            "is_favorite": true,
            "created_at": "2024-06-01T10:00:00Z"
        }))
        .unwrap();
        let recipe = Recipe::from_row(&row).unwrap();
        assert_eq!(recipe.id, EntityId::persisted("srv_1"));
        assert!(recipe.is_favorite);
        assert!(recipe.is_active);
        assert!(recipe.ingredients.is_empty());
    }

    #[test]
    fn test_merge_server_row_keeps_associations() {
        let mut recipe = sample_recipe();
        let row = to_row(&json!({
            "id": "srv_42",
            "name": "Tortilla española",
            "user_id": "user-1",
            "updated_at": "2024-06-01T10:00:00Z"
        }))
        .unwrap();
        recipe.merge_server_row(&row).unwrap();
        assert_eq!(recipe.id, EntityId::persisted("srv_42"));
        assert_eq!(recipe.name, "Tortilla española");
        assert_eq!(recipe.ingredients.len(), 1);
        assert_eq!(recipe.updated_at, "2024-06-01T10:00:00Z");
    }

    #[test]
    fn test_new_recipe_validation() {
        assert!(NewRecipe::named("  ").validate().is_err());
        let mut draft = NewRecipe::named("Paella");
        assert!(draft.validate().is_ok());
        draft.servings = Some(0);
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_patch_apply_and_row() {
        let mut recipe = sample_recipe();
        let patch = RecipePatch {
            name: Some("Tortilla".to_string()),
            description: Some(None),
            is_favorite: Some(true),
            ..RecipePatch::default()
        };
        patch.apply(&mut recipe);
        assert_eq!(recipe.name, "Tortilla");
        assert!(recipe.description.is_none());
        assert!(recipe.is_favorite);
        assert_eq!(recipe.servings, Some(4));

        let row = patch.to_row();
        assert_eq!(row.len(), 3);
        assert_eq!(row["description"], Value::Null);
        assert_eq!(RecipePatch::from_row(&row).unwrap(), patch);
    }

    #[test]
    fn test_empty_patch() {
        assert!(RecipePatch::default().is_empty());
        assert!(!RecipePatch::favorite(false).is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let mut recipe = sample_recipe();
        assert!(RecipeFilter::default().matches(&recipe));
        assert!(RecipeFilter::default().is_unfiltered());

        let search = RecipeFilter {
            search: Some("SPANISH".to_string()),
            ..RecipeFilter::default()
        };
        assert!(search.matches(&recipe));
        assert!(!search.is_unfiltered());

        let wrong_category = RecipeFilter {
            category_id: Some("cat-2".to_string()),
            ..RecipeFilter::default()
        };
        assert!(!wrong_category.matches(&recipe));

        assert!(!RecipeFilter::favorites().matches(&recipe));
        recipe.is_favorite = true;
        assert!(RecipeFilter::favorites().matches(&recipe));

        assert!(!RecipeFilter::shared().matches(&recipe));
        recipe.shared = true;
        assert!(RecipeFilter::shared().matches(&recipe));
        assert!(!RecipeFilter::default().matches(&recipe));
    }

    #[test]
    fn test_filter_lists_newest_first() {
        let mut old = sample_recipe();
        old.name = "Apple pie".to_string();
        old.created_at = "2024-01-01T08:00:00Z".to_string();
        let mut new = sample_recipe();
        new.name = "Zucchini soup".to_string();
        new.created_at = "2024-03-01T09:00:00+01:00".to_string();
        let mut undated = sample_recipe();
        undated.name = "Bread".to_string();
        undated.created_at = String::new();

        let listed = RecipeFilter::default().apply([&undated, &old, &new]);
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Zucchini soup", "Apple pie", "Bread"]);
    }

    #[test]
    fn test_blank_search_is_unfiltered() {
        let filter = RecipeFilter {
            search: Some("   ".to_string()),
            ..RecipeFilter::default()
        };
        assert!(filter.is_unfiltered());
    }

    #[test]
    fn test_primary_image_and_total_time() {
        let mut recipe = sample_recipe();
        assert_eq!(recipe.total_time_minutes(), Some(35));
        assert!(recipe.primary_image().is_none());
        recipe.images.push(RecipeImage {
            id: None,
            image_url: "https://img/1.jpg".to_string(),
            is_primary: true,
            order_index: 0,
        });
        assert_eq!(recipe.primary_image(), Some("https://img/1.jpg"));
    }
}
