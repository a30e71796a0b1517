//! Shopping list CLI commands.
//!
//! Lists are addressed by id or by name (case-insensitive).

use chrono::Local;
use clap::{Args, Subcommand};
use serde_json::json;
use shoplist_core::{ListItem, ShoppingList};

use super::OutputFormat;
use crate::services::Services;

#[derive(Args)]
pub struct ListCommand {
    #[command(subcommand)]
    pub command: ListSubcommand,
}

#[derive(Subcommand)]
pub enum ListSubcommand {
    /// Show all lists, or the items of one list
    Show {
        /// List id or name
        list: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Create a new list
    Add {
        /// List name
        name: String,
    },

    /// Remove a list
    Remove {
        /// List id or name
        list: String,
    },

    /// Rename a list
    Rename {
        /// List id or name
        list: String,

        /// New name
        name: String,
    },

    /// Add an item to a list
    ItemAdd {
        /// List id or name
        list: String,

        /// Item name
        name: String,

        /// Quantity (optional)
        #[arg(long, short)]
        qty: Option<String>,

        /// Unit (optional, e.g., "rolls", "bags")
        #[arg(long, short)]
        unit: Option<String>,
    },

    /// Check an item, or uncheck it if already checked
    ItemCheck {
        /// List id or name
        list: String,

        /// Item name
        name: String,
    },

    /// Remove an item from a list
    ItemRemove {
        /// List id or name
        list: String,

        /// Item name
        name: String,
    },
}

impl ListCommand {
    pub async fn run(&self, services: &Services) -> Result<(), Box<dyn std::error::Error>> {
        let state = &services.state;

        match &self.command {
            ListSubcommand::Show { list: None, format } => {
                let lists = state.get_lists();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&lists)?);
                    }
                    OutputFormat::Text => {
                        if lists.is_empty() {
                            println!("No shopping lists.");
                            return Ok(());
                        }
                        for list in &lists {
                            println!(
                                "{:<25} {:>3}/{:<3} {}",
                                list.name,
                                list.checked_count(),
                                list.items.len(),
                                list.id
                            );
                        }
                    }
                }
                Ok(())
            }

            ListSubcommand::Show {
                list: Some(list),
                format,
            } => {
                let list = resolve(services, list)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&list)?);
                    }
                    OutputFormat::Text => print_list(&list),
                }
                Ok(())
            }

            ListSubcommand::Add { name } => {
                if name.trim().is_empty() {
                    return Err("List name cannot be empty".into());
                }
                let list = state.add_list(json!({ "name": name.trim() })).await?;
                println!("Created list '{}' ({})", list.name, list.id);
                Ok(())
            }

            ListSubcommand::Remove { list } => {
                let list = resolve(services, list)?;
                state.remove_list(&list.id).await?;
                println!("Removed list '{}'", list.name);
                Ok(())
            }

            ListSubcommand::Rename { list, name } => {
                if name.trim().is_empty() {
                    return Err("List name cannot be empty".into());
                }
                let list = resolve(services, list)?;
                let new_name = name.trim().to_string();
                state
                    .update_list(&list.id, |l| l.name = new_name.clone())
                    .await?;
                println!("Renamed '{}' to '{}'", list.name, new_name);
                Ok(())
            }

            ListSubcommand::ItemAdd {
                list,
                name,
                qty,
                unit,
            } => {
                if name.trim().is_empty() {
                    return Err("Item name cannot be empty".into());
                }
                let list = resolve(services, list)?;
                let item = ListItem::with_quantity(
                    name.trim(),
                    qty.clone().unwrap_or_default(),
                    unit.clone().unwrap_or_default(),
                );

                match state.add_list_item(&list.id, item).await? {
                    Some(true) => println!("Added '{}' to '{}'", name.trim(), list.name),
                    _ => println!(
                        "Warning: '{}' already exists in '{}', skipping",
                        name.trim(),
                        list.name
                    ),
                }
                Ok(())
            }

            ListSubcommand::ItemCheck { list, name } => {
                let list = resolve(services, list)?;
                match state.toggle_list_item(&list.id, name).await? {
                    Some(true) => println!("Checked '{}'", name),
                    Some(false) => println!("Unchecked '{}'", name),
                    None => {
                        return Err(format!("Item '{}' not found in '{}'", name, list.name).into())
                    }
                }
                Ok(())
            }

            ListSubcommand::ItemRemove { list, name } => {
                let list = resolve(services, list)?;
                match state.remove_list_item(&list.id, name).await? {
                    Some(true) => println!("Removed '{}' from '{}'", name, list.name),
                    _ => {
                        return Err(format!("Item '{}' not found in '{}'", name, list.name).into())
                    }
                }
                Ok(())
            }
        }
    }
}

fn resolve(services: &Services, list: &str) -> Result<ShoppingList, Box<dyn std::error::Error>> {
    services
        .state
        .find_list(list)
        .ok_or_else(|| format!("List not found: {}", list).into())
}

fn print_list(list: &ShoppingList) {
    println!("{}", list.name);
    println!("{}", "=".repeat(44));

    if list.items.is_empty() {
        println!("No items.");
    } else {
        // Unchecked first, then alphabetical
        let mut items: Vec<&ListItem> = list.items.iter().collect();
        items.sort_by(|a, b| {
            a.checked
                .cmp(&b.checked)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        for item in items {
            println!("{}", item);
        }
    }

    println!("{}", "-".repeat(44));
    println!(
        "{} of {} items checked, updated {}",
        list.checked_count(),
        list.items.len(),
        list.updated_at
            .with_timezone(&Local)
            .format("%b %d, %Y %H:%M")
    );
}
