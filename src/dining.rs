// In-room dining: a room's menu and the guest's running order

use crate::catalog::Room;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum DiningError {
    #[error("Unknown menu item: {0}")]
    UnknownItem(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuCategory {
    Breakfast,
    Lunch,
    Dinner,
    Snacks,
    Drinks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: u64,
    pub category: MenuCategory,
    pub description: String,
}

// Distinct categories in order of first appearance on the menu
pub fn categories(menu: &[MenuItem]) -> Vec<MenuCategory> {
    let mut seen = Vec::new();
    for item in menu {
        if !seen.contains(&item.category) {
            seen.push(item.category);
        }
    }
    seen
}

// `None` means every category
pub fn filter_by_category(menu: &[MenuItem], category: Option<MenuCategory>) -> Vec<&MenuItem> {
    menu.iter()
        .filter(|item| category.map_or(true, |c| item.category == c))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub item_id: String,
    pub name: String,
    pub unit_price: u64,
    pub quantity: u32,
    pub line_total: u64,
}

#[derive(Debug, Clone)]
pub struct DiningOrder {
    menu: Vec<MenuItem>,
    quantities: BTreeMap<String, u32>,
}

impl DiningOrder {
    pub fn new(menu: Vec<MenuItem>) -> Self {
        Self {
            menu,
            quantities: BTreeMap::new(),
        }
    }

    pub fn for_room(room: &Room) -> Self {
        Self::new(room.menu.clone())
    }

    pub fn menu(&self) -> &[MenuItem] {
        &self.menu
    }

    pub fn add(&mut self, item_id: &str) -> Result<u32, DiningError> {
        self.lookup(item_id)?;
        let quantity = self.quantities.entry(item_id.to_string()).or_insert(0);
        *quantity += 1;
        debug!(item_id, quantity = *quantity, "Added to order");
        Ok(*quantity)
    }

    // Decrements; the line disappears when it reaches zero
    pub fn remove(&mut self, item_id: &str) -> Result<u32, DiningError> {
        self.lookup(item_id)?;
        let remaining = match self.quantities.get_mut(item_id) {
            Some(quantity) if *quantity > 1 => {
                *quantity -= 1;
                *quantity
            }
            Some(_) => {
                self.quantities.remove(item_id);
                0
            }
            None => 0,
        };
        Ok(remaining)
    }

    pub fn quantity(&self, item_id: &str) -> u32 {
        self.quantities.get(item_id).copied().unwrap_or(0)
    }

    pub fn total_items(&self) -> u32 {
        self.quantities.values().sum()
    }

    pub fn total_price(&self) -> u64 {
        self.lines().iter().map(|line| line.line_total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    pub fn lines(&self) -> Vec<OrderLine> {
        // menu order, not insertion order
        self.menu
            .iter()
            .filter_map(|item| {
                let quantity = self.quantity(&item.id);
                (quantity > 0).then(|| OrderLine {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    unit_price: item.price,
                    quantity,
                    line_total: item.price.saturating_mul(u64::from(quantity)),
                })
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.quantities.clear();
    }

    fn lookup(&self, item_id: &str) -> Result<&MenuItem, DiningError> {
        self.menu
            .iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| DiningError::UnknownItem(item_id.to_string()))
    }
}
