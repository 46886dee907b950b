//! Fallback icon URL derivation.
//!
//! Icons on the public CDN are stored under a folder named after the
//! identifier rounded down to the nearest thousand, both zero-padded to
//! six digits: item 20001 lives at `/i/020000/020001.png`. Deriving these
//! candidates needs no network call, so it can run speculatively at any
//! time.

use crate::config::FallbackConfig;
use crate::types::ItemId;

const PAD_WIDTH: usize = 6;
const MAX_PADDED: u32 = 999_999;

#[derive(Debug, Clone)]
pub struct FallbackScheme {
    base_url: String,
    templates: Vec<String>,
}

impl FallbackScheme {
    pub fn new(config: &FallbackConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            templates: config.templates.clone(),
        }
    }

    /// Ordered fallback candidates for `id`.
    ///
    /// Identifiers wider than the padded field have no candidates.
    pub fn candidates(&self, id: ItemId) -> Vec<String> {
        let raw = id.get();
        if raw > MAX_PADDED {
            return Vec::new();
        }
        let padded = format!("{:0width$}", raw, width = PAD_WIDTH);
        let folder = format!("{:0width$}", raw / 1000 * 1000, width = PAD_WIDTH);

        self.templates
            .iter()
            .map(|template| {
                let path = template.replace("{folder}", &folder).replace("{id}", &padded);
                format!("{}{}", self.base_url, path)
            })
            .collect()
    }
}

impl Default for FallbackScheme {
    fn default() -> Self {
        Self::new(&FallbackConfig::default())
    }
}
