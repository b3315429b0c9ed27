use anyhow::{Result, bail};
use serde::Serialize;

use recipehub_core::cache::WriteRoute;
use recipehub_core::models::{Ingredient, PreparationStep};

/// Parse an ingredient given as `name`, `name=quantity` or `name=quantity unit`.
pub(crate) fn parse_ingredient(s: &str, order_index: u32) -> Result<Ingredient> {
    let (name, amount) = match s.split_once('=') {
        Some((name, amount)) => (name.trim(), Some(amount.trim())),
        None => (s.trim(), None),
    };
    if name.is_empty() {
        bail!("Invalid ingredient '{s}'. Use 'name', 'name=3' or 'name=200 g'");
    }
    let mut ingredient = Ingredient::named(name, order_index);
    if let Some(amount) = amount.filter(|a| !a.is_empty()) {
        match amount.split_once(char::is_whitespace) {
            Some((quantity, unit)) => {
                ingredient.quantity = Some(quantity.to_string());
                ingredient.unit = Some(unit.trim().to_string());
            }
            None => ingredient.quantity = Some(amount.to_string()),
        }
    }
    Ok(ingredient)
}

pub(crate) fn parse_ingredients(items: &[String]) -> Result<Vec<Ingredient>> {
    items
        .iter()
        .zip(0..)
        .map(|(s, i)| parse_ingredient(s, i))
        .collect()
}

/// Steps are numbered in the order given.
pub(crate) fn parse_steps(items: &[String]) -> Result<Vec<PreparationStep>> {
    items
        .iter()
        .zip(1..)
        .map(|(s, n)| -> Result<PreparationStep> {
            let text = s.trim();
            if text.is_empty() {
                bail!("Step {n} is empty");
            }
            Ok(PreparationStep::new(n, text))
        })
        .collect()
}

pub(crate) fn describe_route(route: WriteRoute) -> &'static str {
    match route {
        WriteRoute::Remote => "synced",
        WriteRoute::Queued => "queued for sync",
        WriteRoute::Local => "never synced, nothing to send",
    }
}

pub(crate) fn format_minutes(minutes: Option<u32>) -> String {
    match minutes {
        None => "-".to_string(),
        Some(m) if m < 60 => format!("{m} min"),
        Some(m) if m % 60 == 0 => format!("{}h", m / 60),
        Some(m) => format!("{}h {:02}m", m / 60, m % 60),
    }
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
        let end = s.char_indices().nth(max.saturating_sub(3)).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
