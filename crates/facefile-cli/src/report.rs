//! User-facing rendering of gallery contents and capture outcomes.

use chrono::NaiveDateTime;
use facefile_core::{CaptureOutcome, GalleryStore, Placement, StorageError};
use serde::Serialize;

/// One row of `facefile list`.
#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub identity: String,
    pub id: u32,
    pub images: usize,
    pub last_capture: Option<NaiveDateTime>,
}

pub fn summarize(gallery: &dyn GalleryStore) -> Result<Vec<IdentitySummary>, StorageError> {
    gallery
        .list_identities()?
        .into_iter()
        .map(|identity| {
            let images = gallery.list_images(identity)?;
            Ok::<_, StorageError>(IdentitySummary {
                identity: identity.to_string(),
                id: identity.id(),
                images: images.len(),
                last_capture: images.iter().filter_map(|i| i.captured_at).max(),
            })
        })
        .collect()
}

pub fn render_table(rows: &[IdentitySummary]) -> String {
    if rows.is_empty() {
        return "No identities in gallery\n".to_string();
    }
    let mut out = format!("{:<12} {:>6}  {}\n", "IDENTITY", "IMAGES", "LAST CAPTURE");
    for row in rows {
        let last = row
            .last_capture
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        out.push_str(&format!("{:<12} {:>6}  {}\n", row.identity, row.images, last));
    }
    out
}

pub fn describe(outcome: &CaptureOutcome) -> String {
    let path = outcome.path.display();
    match outcome.placement {
        Placement::Pinned => format!("Saved {path} to connected {}", outcome.identity),
        Placement::Matched { distance } => format!(
            "Match found: {} (distance {distance:.3}). Saved {path}; connected to {}",
            outcome.identity, outcome.identity
        ),
        Placement::Created => format!(
            "No match found. Created {} and saved {path}",
            outcome.identity
        ),
    }
}
