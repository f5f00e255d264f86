// Room catalog: immutable room records loaded once at startup

use crate::dining::MenuItem;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

pub const BUILTIN_CATALOG_JSON: &str = include_str!("../data/rooms.json");

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("Catalog parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Duplicate room id: {0}")]
    DuplicateRoom(String),

    #[error("Invalid room {room_id}: {reason}")]
    InvalidRoom { room_id: String, reason: String },

    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Room not available: {0}")]
    RoomUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: String,
    // Per night, whole currency units
    pub price: u64,
    pub capacity: u32,
    pub size: String,
    pub amenities: Vec<String>,
    pub available: bool,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

impl Room {
    pub fn menu_item(&self, item_id: &str) -> Option<&MenuItem> {
        self.menu.iter().find(|item| item.id == item_id)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidRoom {
            room_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id"));
        }
        if self.price == 0 {
            return Err(invalid("price must be positive"));
        }
        if self.capacity == 0 {
            return Err(invalid("capacity must be positive"));
        }

        let mut item_ids = HashSet::new();
        for item in &self.menu {
            if !item_ids.insert(item.id.as_str()) {
                return Err(invalid(&format!("duplicate menu item {}", item.id)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    rooms: Vec<Room>,
}

#[derive(Debug, Clone)]
pub struct RoomCatalog {
    rooms: Vec<Room>,
}

impl RoomCatalog {
    pub fn new(rooms: Vec<Room>) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for room in &rooms {
            room.validate()?;
            if !ids.insert(room.id.clone()) {
                return Err(CatalogError::DuplicateRoom(room.id.clone()));
            }
        }

        debug!(rooms = rooms.len(), "Loaded room catalog");
        Ok(Self { rooms })
    }

    /// The three-room catalog bundled with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG_JSON)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::ParseError(e.to_string()))?;
        Self::new(file.rooms)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CatalogError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    pub fn available_rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter().filter(|room| room.available)
    }

    // Rooms a booking wizard may be opened for
    pub fn bookable(&self, room_id: &str) -> Result<&Room, CatalogError> {
        let room = self
            .get(room_id)
            .ok_or_else(|| CatalogError::UnknownRoom(room_id.to_string()))?;
        if !room.available {
            return Err(CatalogError::RoomUnavailable(room_id.to_string()));
        }
        Ok(room)
    }
}
