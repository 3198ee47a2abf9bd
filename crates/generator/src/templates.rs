//! Template loading and management

use apb_packager_common::{PackagerError, Result};
use std::collections::HashMap;
use tera::{Tera, Value};

/// Load all templates
pub fn load_templates() -> Result<Tera> {
    let mut tera = Tera::default();

    tera.register_filter("cell", cell_filter);
    tera.register_filter("or_dash", or_dash_filter);

    tera.add_raw_template("README.md", include_str!("../templates/README.md.tera"))
        .map_err(|e| PackagerError::Render(format!("Failed to load README.md template: {}", e)))?;

    Ok(tera)
}

/// Filter making a string safe inside a markdown table cell
fn cell_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("cell filter expects a string"))?;

    let flattened = s
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(Value::String(flattened.replace('|', "\\|")))
}

/// Filter replacing an empty string with a dash
fn or_dash_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("or_dash filter expects a string"))?;

    if s.trim().is_empty() {
        return Ok(Value::String("-".to_string()));
    }
    Ok(Value::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_templates() {
        let tera = load_templates().unwrap();
        assert!(tera.get_template_names().any(|name| name == "README.md"));
    }

    #[test]
    fn test_cell_filter() {
        let args = HashMap::new();
        let value = Value::String("first line\n  second | part\n\n".to_string());
        assert_eq!(
            cell_filter(&value, &args).unwrap(),
            Value::String("first line second \\| part".to_string())
        );
        assert!(cell_filter(&Value::Bool(true), &args).is_err());
    }

    #[test]
    fn test_or_dash_filter() {
        let args = HashMap::new();
        assert_eq!(
            or_dash_filter(&Value::String(" ".to_string()), &args).unwrap(),
            Value::String("-".to_string())
        );
        assert_eq!(
            or_dash_filter(&Value::String("x".to_string()), &args).unwrap(),
            Value::String("x".to_string())
        );
    }
}
