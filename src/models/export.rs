//! Flat tabular rows for spreadsheet exporters.
//!
//! Absent values are empty cells, never the text "null".

use std::io::{self, Write};

use super::NormalizedListing;

pub const FLAT_HEADERS: [&str; 18] = [
    "id",
    "source_site",
    "listing_url",
    "content_hash",
    "title",
    "price",
    "currency",
    "price_period",
    "location",
    "lat",
    "lng",
    "property_type",
    "bedrooms",
    "bathrooms",
    "images",
    "scrape_timestamp",
    "quality_score",
    "is_duplicate_of",
];

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        format!("{price:.2}")
    }
}

impl NormalizedListing {
    /// Cells in `FLAT_HEADERS` order.
    pub fn to_row(&self) -> Vec<String> {
        let coords = self.location.coordinates;
        vec![
            self.id.clone(),
            self.source_site.clone(),
            opt(self.listing_url.as_deref()),
            self.content_hash.clone(),
            opt(self.title.as_deref()),
            opt(self.price.map(format_price)),
            opt(self.currency.as_deref()),
            opt(self.price_period.map(|p| p.as_str())),
            opt(self.location.text.as_deref()),
            opt(coords.map(|c| c.lat)),
            opt(coords.map(|c| c.lng)),
            opt(self.property_type.map(|t| t.as_str())),
            opt(self.bedrooms),
            opt(self.bathrooms),
            self.images.join(" "),
            self.scrape_timestamp.to_rfc3339(),
            self.quality_score.to_string(),
            opt(self.is_duplicate_of.as_deref()),
        ]
    }
}

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[String], sep: char) -> io::Result<()> {
    let mut first = true;
    for cell in row {
        if !first {
            write!(w, "{sep}")?;
        }
        first = false;
        if needs_quotes(cell, sep) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            write!(w, "{cell}")?;
        }
    }
    writeln!(w)
}

/// Header plus one row per listing.
pub fn write_rows<W: Write>(mut w: W, listings: &[NormalizedListing], sep: char) -> io::Result<()> {
    let header: Vec<String> = FLAT_HEADERS.iter().map(|h| h.to_string()).collect();
    write_row(&mut w, &header, sep)?;
    for listing in listings {
        write_row(&mut w, &listing.to_row(), sep)?;
    }
    Ok(())
}
