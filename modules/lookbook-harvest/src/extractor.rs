// Page bytes -> observation tuples.
//
// The harvest run only depends on the trait; the production extractor reads
// pages already rendered to the JSON tuple format.

use lookbook_common::LookbookError;

use crate::reconcile::{CardPage, OutfitPage, PartPage};

pub trait PageExtractor: Send + Sync {
    fn outfit_page(&self, url: &str, body: &[u8]) -> Result<OutfitPage, LookbookError>;

    fn card_page(&self, url: &str, body: &[u8]) -> Result<CardPage, LookbookError>;

    fn part_page(&self, url: &str, body: &[u8]) -> Result<PartPage, LookbookError>;
}

/// Reads pages served as JSON documents in the tuple shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPageExtractor;

impl PageExtractor for JsonPageExtractor {
    fn outfit_page(&self, url: &str, body: &[u8]) -> Result<OutfitPage, LookbookError> {
        serde_json::from_slice(body)
            .map_err(|e| LookbookError::Extraction(format!("{url}: {e}")))
    }

    fn card_page(&self, url: &str, body: &[u8]) -> Result<CardPage, LookbookError> {
        serde_json::from_slice(body)
            .map_err(|e| LookbookError::Extraction(format!("{url}: {e}")))
    }

    fn part_page(&self, url: &str, body: &[u8]) -> Result<PartPage, LookbookError> {
        serde_json::from_slice(body)
            .map_err(|e| LookbookError::Extraction(format!("{url}: {e}")))
    }
}
