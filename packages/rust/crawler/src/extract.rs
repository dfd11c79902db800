//! CSS-selector extraction of repeated items (search results, listings).

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use paperpipe_shared::{PaperpipeError, Result};

/// How a field's value is read from the matched element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Attribute,
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    /// Relative to the base element; empty selects the base element itself.
    #[serde(default)]
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

/// One JSON object per element matching `base_selector`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "baseSelector")]
    pub base_selector: String,
    pub fields: Vec<SchemaField>,
}

impl ExtractionSchema {
    /// Deserialize and check every selector compiles.
    pub fn from_value(value: Value) -> Result<Self> {
        let schema: Self = serde_json::from_value(value)
            .map_err(|e| PaperpipeError::parse(format!("extraction schema: {e}")))?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        compile(&self.base_selector)?;
        for field in &self.fields {
            if !field.selector.trim().is_empty() {
                compile(&field.selector)?;
            }
            if field.kind == FieldKind::Attribute && field.attribute.is_none() {
                return Err(PaperpipeError::validation(format!(
                    "field '{}' is an attribute field without an attribute name",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Run the schema over a page. Fields that match nothing are left out;
    /// elements where no field matched produce no item.
    pub fn apply(&self, html: &str) -> Result<Vec<Value>> {
        let base = compile(&self.base_selector)?;
        let fields = self
            .fields
            .iter()
            .map(|f| -> Result<(&SchemaField, Option<Selector>)> {
                let selector = if f.selector.trim().is_empty() {
                    None
                } else {
                    Some(compile(&f.selector)?)
                };
                Ok((f, selector))
            })
            .collect::<Result<Vec<_>>>()?;

        let document = Html::parse_document(html);
        let mut items = Vec::new();
        for element in document.select(&base) {
            let mut item = Map::new();
            for (field, selector) in &fields {
                let target = match selector {
                    Some(sel) => element.select(sel).next(),
                    None => Some(element),
                };
                if let Some(value) = target.and_then(|el| read_field(el, field)) {
                    item.insert(field.name.clone(), Value::String(value));
                }
            }
            if !item.is_empty() {
                items.push(Value::Object(item));
            }
        }
        Ok(items)
    }
}

fn read_field(element: ElementRef<'_>, field: &SchemaField) -> Option<String> {
    let value = match field.kind {
        FieldKind::Text => element
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
        FieldKind::Attribute => element.value().attr(field.attribute.as_deref()?)?.trim().to_string(),
        FieldKind::Html => element.inner_html().trim().to_string(),
    };
    (!value.is_empty()).then_some(value)
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| PaperpipeError::parse(format!("invalid selector '{selector}': {e}")))
}
