use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::{CatalogId, Entity};

/// Display rank of a coordinate or card that has not been ordered yet.
pub const UNSET_ORDER: f64 = i32::MAX as f64;

pub fn unset_order() -> f64 {
    UNSET_ORDER
}

fn is_unset_order(v: &f64) -> bool {
    *v == UNSET_ORDER
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i16(v: &i16) -> bool {
    *v == 0
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

// --- Chapters ---

/// A validity window on either the outfit track or the card track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Entity for Chapter {
    type Id = String;
    const KIND: &'static str = "chapter";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn owner(&self) -> Option<CatalogId> {
        self.owner
    }

    fn set_owner(&mut self, owner: Option<CatalogId>) {
        self.owner = owner;
    }

    fn is_well_formed(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty()
    }
}

// --- Brands, categories, characters ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub id: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

/// Slot label of a worn piece ("Tops", "Shoes", ...). Part categories share the shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i32,
    pub name: String,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: i32,
    pub name: String,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: i32,
    pub name: String,
    /// Derived from every card referencing the song.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub singer_ids: Vec<i32>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: i32,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub category_id: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

// --- Outfits ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star: Option<u8>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
    #[serde(default = "unset_order", skip_serializing_if = "is_unset_order")]
    pub order: f64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_chance: bool,
    /// Items stored under another coordinate that this outfit also wears.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_item_ids: Vec<i32>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

impl Default for Coordinate {
    fn default() -> Self {
        Self {
            id: 0,
            chapter_id: None,
            brand_id: None,
            kind: None,
            group: None,
            star: None,
            name: String::new(),
            image_url: None,
            thumbnail_url: None,
            start: None,
            end: None,
            order: UNSET_ORDER,
            has_chance: false,
            linked_item_ids: Vec::new(),
            owner: None,
        }
    }
}

/// A worn piece of one coordinate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateItem {
    pub id: i32,
    pub coordinate_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal_id: Option<String>,
    pub category_id: i32,
    #[serde(default, skip_serializing_if = "is_zero_i16")]
    pub point: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

// --- Cards ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default = "unset_order", skip_serializing_if = "is_unset_order")]
    pub order: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub seal_id: String,
    /// Free-text coordinate name printed on the card.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coordinate: String,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub character_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub song_id: i32,
    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub star: u8,
    #[serde(default, skip_serializing_if = "is_zero_i16")]
    pub point: i16,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_chance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image1_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image2_url: Option<String>,
    #[serde(skip)]
    owner: Option<CatalogId>,
}

impl Default for Card {
    fn default() -> Self {
        Self {
            id: 0,
            chapter_id: None,
            order: UNSET_ORDER,
            seal_id: String::new(),
            coordinate: String::new(),
            character_id: 0,
            variant: None,
            song_id: 0,
            star: 0,
            point: 0,
            is_chance: false,
            image1_url: None,
            image2_url: None,
            owner: None,
        }
    }
}

// --- Entity impls for integer-keyed records ---

macro_rules! int_entity {
    ($ty:ty, $kind:literal, |$e:ident| $well_formed:expr) => {
        impl $ty {
            /// A detached record with only its id set.
            pub fn with_id(id: i32) -> Self {
                Self {
                    id,
                    ..Default::default()
                }
            }
        }

        impl Entity for $ty {
            type Id = i32;
            const KIND: &'static str = $kind;

            fn id(&self) -> i32 {
                self.id
            }

            fn owner(&self) -> Option<CatalogId> {
                self.owner
            }

            fn set_owner(&mut self, owner: Option<CatalogId>) {
                self.owner = owner;
            }

            fn is_well_formed(&self) -> bool {
                let $e = self;
                $e.id > 0 && $well_formed
            }
        }
    };
}

int_entity!(Brand, "brand", |e| !e.name.is_empty());
int_entity!(Category, "category", |e| !e.name.is_empty());
int_entity!(Character, "character", |e| !e.name.is_empty());
int_entity!(Song, "song", |e| !e.name.is_empty());
int_entity!(Part, "part", |e| !e.name.is_empty());
int_entity!(Coordinate, "coordinate", |e| !e.name.is_empty());
int_entity!(CoordinateItem, "coordinate_item", |e| e.coordinate_id > 0
    && e.category_id > 0);
int_entity!(Card, "card", |e| !e.coordinate.is_empty() && e.character_id > 0);
