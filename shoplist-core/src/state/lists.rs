//! Shopping lists as stored under the `lists` state key.
//!
//! The whole collection is persisted as one JSON array. Fields this model
//! does not know about are kept and written back unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::identity::generate_id;

/// One entry on a shopping list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    /// Free-form, so "2" and "a few" both work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub checked: bool,
}

impl ListItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_id("item"),
            name: name.into(),
            quantity: None,
            unit: None,
            checked: false,
        }
    }

    /// Empty quantity or unit strings are treated as absent.
    pub fn with_quantity(
        name: impl Into<String>,
        quantity: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        let qty = quantity.into();
        let u = unit.into();
        Self {
            quantity: if qty.is_empty() { None } else { Some(qty) },
            unit: if u.is_empty() { None } else { Some(u) },
            ..Self::new(name)
        }
    }
}

impl fmt::Display for ListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let check = if self.checked { "[x]" } else { "[ ]" };
        match (&self.quantity, &self.unit) {
            (Some(qty), Some(unit)) => write!(f, "{} {} {} {}", check, qty, unit, self.name),
            (Some(qty), None) => write!(f, "{} {} {}", check, qty, self.name),
            (None, Some(unit)) => write!(f, "{} {} ({})", check, self.name, unit),
            (None, None) => write!(f, "{} {}", check, self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Fields written by other clients, preserved as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ShoppingList {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id("list"),
            name: name.into(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }

    /// Builds a new list from a caller-supplied object.
    ///
    /// A fresh id and both timestamps are always assigned; `name` is required
    /// and every other field is kept.
    pub fn from_draft(draft: Value) -> Result<Self, String> {
        let Value::Object(mut fields) = draft else {
            return Err("expected an object".to_string());
        };
        let name = match fields.remove("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err("a non-empty name is required".to_string()),
        };
        let items = match fields.remove("items") {
            Some(items) => serde_json::from_value(items).map_err(|e| e.to_string())?,
            None => Vec::new(),
        };
        for field in ["id", "createdAt", "updatedAt"] {
            fields.remove(field);
        }

        Ok(Self {
            items,
            extra: fields,
            ..Self::new(name)
        })
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Adds an item unless one with the same name exists (case-insensitive).
    /// Returns true if the item was added.
    pub fn add_item(&mut self, item: ListItem) -> bool {
        if self.find_item(&item.name).is_some() {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove an item by name (case-insensitive).
    /// Returns true if an item was removed.
    pub fn remove_item(&mut self, name: &str) -> bool {
        let name_lower = name.to_lowercase();
        let len_before = self.items.len();
        self.items.retain(|i| i.name.to_lowercase() != name_lower);
        self.items.len() != len_before
    }

    pub fn find_item(&self, name: &str) -> Option<&ListItem> {
        let name_lower = name.to_lowercase();
        self.items.iter().find(|i| i.name.to_lowercase() == name_lower)
    }

    fn find_item_mut(&mut self, name: &str) -> Option<&mut ListItem> {
        let name_lower = name.to_lowercase();
        self.items
            .iter_mut()
            .find(|i| i.name.to_lowercase() == name_lower)
    }

    pub fn is_checked(&self, name: &str) -> bool {
        self.find_item(name).is_some_and(|i| i.checked)
    }

    /// Returns false if there is no such item.
    pub fn check(&mut self, name: &str) -> bool {
        self.set_checked(name, true)
    }

    pub fn uncheck(&mut self, name: &str) -> bool {
        self.set_checked(name, false)
    }

    /// Flips an item's checked state, returning the new state.
    pub fn toggle(&mut self, name: &str) -> Option<bool> {
        let item = self.find_item_mut(name)?;
        item.checked = !item.checked;
        Some(item.checked)
    }

    fn set_checked(&mut self, name: &str, checked: bool) -> bool {
        match self.find_item_mut(name) {
            Some(item) => {
                item.checked = checked;
                true
            }
            None => false,
        }
    }

    /// Unchecks every item.
    pub fn clear_checked(&mut self) {
        for item in &mut self.items {
            item.checked = false;
        }
    }

    pub fn checked_count(&self) -> usize {
        self.items.iter().filter(|i| i.checked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_draft_assigns_identity() {
        let list = ShoppingList::from_draft(json!({"name": "Groceries", "color": "green"})).unwrap();
        assert!(list.id.starts_with("list_"));
        assert_eq!(list.name, "Groceries");
        assert_eq!(list.created_at, list.updated_at);
        assert_eq!(list.extra.get("color"), Some(&json!("green")));
    }

    #[test]
    fn test_from_draft_ignores_caller_identity() {
        let list = ShoppingList::from_draft(json!({"name": "X", "id": "mine", "createdAt": 1}))
            .unwrap();
        assert_ne!(list.id, "mine");
        assert!(!list.extra.contains_key("createdAt"));
    }

    #[test]
    fn test_from_draft_rejects_bad_input() {
        assert!(ShoppingList::from_draft(json!("Groceries")).is_err());
        assert!(ShoppingList::from_draft(json!({"name": "  "})).is_err());
        assert!(ShoppingList::from_draft(json!({"name": "X", "items": 3})).is_err());
    }

    #[test]
    fn test_items_are_case_insensitive() {
        let mut list = ShoppingList::new("Groceries");
        assert!(list.add_item(ListItem::new("Eggs")));
        assert!(!list.add_item(ListItem::new("eggs")));
        assert_eq!(list.items.len(), 1);

        assert!(list.check("EGGS"));
        assert!(list.is_checked("eggs"));
        assert!(list.uncheck("Eggs"));
        assert!(!list.is_checked("eggs"));
        assert!(!list.check("milk"));

        assert!(list.remove_item("eGGs"));
        assert!(list.items.is_empty());
    }

    #[test]
    fn test_toggle_and_clear_checked() {
        let mut list = ShoppingList::new("Groceries");
        list.add_item(ListItem::new("Eggs"));
        list.add_item(ListItem::new("Milk"));

        assert_eq!(list.toggle("eggs"), Some(true));
        assert_eq!(list.toggle("milk"), Some(true));
        assert_eq!(list.toggle("milk"), Some(false));
        assert_eq!(list.toggle("bread"), None);
        assert_eq!(list.checked_count(), 1);

        list.clear_checked();
        assert_eq!(list.checked_count(), 0);
    }

    #[test]
    fn test_item_display() {
        let mut item = ListItem::with_quantity("Paper towels", "2", "rolls");
        assert_eq!(item.to_string(), "[ ] 2 rolls Paper towels");
        item.checked = true;
        assert_eq!(item.to_string(), "[x] 2 rolls Paper towels");
        assert_eq!(ListItem::with_quantity("Soap", "", "").to_string(), "[ ] Soap");
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let stored = json!({
            "id": "list_1",
            "name": "Hardware",
            "items": [{"id": "item_1", "name": "Nails", "checked": true}],
            "createdAt": "2026-01-11T10:00:00Z",
            "updatedAt": "2026-01-12T10:00:00Z",
            "sharedWith": ["bob"]
        });
        let list: ShoppingList = serde_json::from_value(stored.clone()).unwrap();
        assert!(list.is_checked("nails"));
        assert_eq!(serde_json::to_value(&list).unwrap(), stored);
    }
}
