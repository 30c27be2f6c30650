// Perceptual matching of card back-art against per-song reference crops.

mod fingerprint;
pub mod songs;

use image::imageops::FilterType;
use image::DynamicImage;
use lookbook_common::MatcherConfig;

pub use fingerprint::{pearson, Fingerprint};
pub use songs::{resolve_songs, song_reference_name, song_slug, SongMatchReport, SONG_ART_DIR};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub id: i32,
    pub distance: u32,
    pub correlation: f64,
}

/// Reference fingerprints keyed by song id.
pub struct PerceptualMatcher {
    config: MatcherConfig,
    references: Vec<(i32, Fingerprint)>,
}

impl PerceptualMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            references: Vec::new(),
        }
    }

    pub fn add_reference(&mut self, id: i32, fingerprint: Fingerprint) {
        self.references.retain(|(existing, _)| *existing != id);
        self.references.push((id, fingerprint));
    }

    pub fn has_reference(&self, id: i32) -> bool {
        self.references.iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Normalize to the configured size and cut out the art region.
    pub fn crop(&self, image: &DynamicImage) -> DynamicImage {
        let c = &self.config;
        image
            .resize_exact(c.normalize_width, c.normalize_height, FilterType::Triangle)
            .crop_imm(c.crop_x, c.crop_y, c.crop_width, c.crop_height)
    }

    pub fn candidate(&self, image: &DynamicImage) -> Fingerprint {
        Fingerprint::of_image(&self.crop(image))
    }

    /// Best reference within the Hamming bound whose correlation is strictly
    /// above the threshold.
    pub fn best_match(&self, candidate: &Fingerprint) -> Option<MatchResult> {
        self.references
            .iter()
            .filter_map(|(id, reference)| {
                let distance = reference.hamming(candidate);
                (distance <= self.config.max_hamming).then(|| MatchResult {
                    id: *id,
                    distance,
                    correlation: reference.correlation(candidate),
                })
            })
            .max_by(|a, b| a.correlation.total_cmp(&b.correlation))
            .filter(|m| m.correlation > self.config.min_correlation)
    }
}
