//! Quality scorer: a weighted completeness table, normalized to 0..=100.

use serde::{Deserialize, Serialize};

use super::normalize::ValidationBounds;
use crate::models::NormalizedListing;

/// Points per field. Short titles and descriptions earn half their weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub title: u32,
    pub price: u32,
    pub location: u32,
    pub coordinates: u32,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub images: u32,
    pub description: u32,
    pub min_title_len: usize,
    pub min_description_len: usize,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            title: 15,
            price: 25,
            location: 10,
            coordinates: 10,
            bedrooms: 10,
            bathrooms: 5,
            images: 10,
            description: 15,
            min_title_len: 10,
            min_description_len: 50,
        }
    }
}

impl QualityWeights {
    fn total(&self) -> u32 {
        self.title
            + self.price
            + self.location
            + self.coordinates
            + self.bedrooms
            + self.bathrooms
            + self.images
            + self.description
    }
}

#[derive(Debug, Clone)]
pub struct QualityScorer {
    weights: QualityWeights,
    bounds: ValidationBounds,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights, bounds: ValidationBounds) -> Self {
        Self { weights, bounds }
    }

    /// Pure function of the listing's fields.
    pub fn score(&self, listing: &NormalizedListing) -> u8 {
        let w = &self.weights;
        let total = w.total();
        if total == 0 {
            return 0;
        }

        let length_points = |text: Option<&str>, min: usize, weight: u32| match text {
            Some(text) if text.chars().count() >= min => weight,
            Some(_) => weight / 2,
            None => 0,
        };
        let present = |yes: bool, weight: u32| if yes { weight } else { 0 };

        let earned = length_points(listing.title.as_deref(), w.min_title_len, w.title)
            + present(listing.price.is_some_and(|p| self.bounds.price_ok(p)), w.price)
            + present(listing.location.text.is_some(), w.location)
            + present(listing.location.coordinates.is_some(), w.coordinates)
            + present(listing.bedrooms.is_some(), w.bedrooms)
            + present(listing.bathrooms.is_some(), w.bathrooms)
            + present(!listing.images.is_empty(), w.images)
            + length_points(listing.description.as_deref(), w.min_description_len, w.description);

        let score = (earned * 100 + total / 2) / total;
        score.min(100) as u8
    }

    pub fn apply(&self, listing: &mut NormalizedListing) {
        listing.quality_score = self.score(listing);
    }
}
