// Observation tuples handed to the reconciler, one page at a time, plus the
// small text helpers that turn page strings into catalog fields.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;

static RE_ITEM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Item_ID(\d+)\.webp$").expect("valid regex"));
static RE_PERIOD_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)年(\d+)月(\d+)日（[日月火水木金土]）～").expect("valid regex")
});
static RE_PERIOD_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"～(\d{0,4})年?(\d+)月(\d+)日（[日月火水木金土]）$").expect("valid regex")
});

/// One outfit chapter page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutfitPage {
    pub chapter_id: String,
    pub chapter_name: String,
    pub outfits: Vec<OutfitTuple>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutfitTuple {
    pub title: String,
    pub star: Option<u8>,
    pub brand: Option<BrandTuple>,
    pub image_url: Option<String>,
    pub kind: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Raw validity text, e.g. `2024年5月1日（水）～6月30日（日）`.
    pub period: Option<String>,
    pub pieces: Vec<PieceTuple>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrandTuple {
    pub name: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PieceTuple {
    pub category: String,
    pub seal_id: Option<String>,
    pub image_url: Option<String>,
    pub point: i16,
}

impl PieceTuple {
    pub fn estimated_id(&self) -> Option<i32> {
        self.image_url.as_deref().and_then(estimated_item_id)
    }
}

/// One card chapter page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardPage {
    pub chapter_id: String,
    pub chapter_name: String,
    pub cards: Vec<CardTuple>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardTuple {
    pub image1_url: Option<String>,
    pub image2_url: Option<String>,
    pub character: String,
    pub coordinate: String,
    pub seal_id: Option<String>,
    /// Explicit song label. Unlabelled cards are matched by back-art.
    pub song: Option<String>,
    pub variant: Option<String>,
    pub star: u8,
    pub point: i16,
    pub is_chance: bool,
    pub order: Option<f64>,
}

impl CardTuple {
    /// Printed seal id, falling back to the front image file stem.
    pub fn resolved_seal_id(&self) -> String {
        non_empty(self.seal_id.as_deref())
            .map(String::from)
            .or_else(|| self.image1_url.as_deref().and_then(seal_id_from_image_url))
            .unwrap_or_default()
    }
}

/// A part (accessory) list page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartPage {
    pub parts: Vec<PartTuple>,
}

/// Part (accessory) observation. Parts are global and keyed by name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartTuple {
    pub category: String,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Trimmed value, or `None` when blank.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Item id embedded in an `.../Item_ID<n>.webp` image name.
pub fn estimated_item_id(url: &str) -> Option<i32> {
    RE_ITEM_ID
        .captures(url)
        .and_then(|c| c[1].parse().ok())
        .filter(|id| *id > 0)
}

/// File stem of the last path segment, ignoring any query string.
pub fn seal_id_from_image_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.split('.').next().unwrap_or(name);
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Parse `YYYY年M月D日（曜）～[YYYY年]M月D日（曜）`. The end year defaults to
/// the start year. Out-of-range dates are dropped; an invalid start drops both.
pub fn parse_period(text: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let text = text.trim();
    let Some(caps) = RE_PERIOD_START.captures(text) else {
        return (None, None);
    };
    let Some(start) = date(&caps[1], &caps[2], &caps[3]) else {
        return (None, None);
    };

    let end = RE_PERIOD_END.captures(text).and_then(|caps| {
        let year = if caps[1].is_empty() {
            start.format("%Y").to_string()
        } else {
            caps[1].to_string()
        };
        date(&year, &caps[2], &caps[3])
    });

    (Some(start), end)
}

fn date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}
