//! `{{path}}` placeholder substitution
//!
//! `{{ target.fields.amount }}` walks the render context by dotted path.
//! Strings are inserted as-is, other JSON values in their compact form, and
//! paths that resolve to nothing render as an empty string.

use crate::collaborators::TemplateError;
use serde_json::Value;

pub fn render_placeholders(template: &str, context: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or_else(|| TemplateError::Render(format!("unclosed placeholder at byte {}", template.len() - rest.len() + start)))?;

        let path = after_open[..end].trim();
        if path.is_empty() {
            return Err(TemplateError::Render("empty placeholder".to_string()));
        }
        match lookup(context, path) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }

        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
