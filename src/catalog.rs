//! Catalog input for the background queue.
//!
//! A catalog is either a JSON array of product rows or a plain list of image
//! URLs, one per line. Product rows accept both the storefront's Spanish
//! column names and English ones.

use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{Result, VitrineError};
use crate::resource::{ImageVariant, ResourceId};

/// One product row. Only the image URL matters to the cache; the rest labels it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogEntry {
    #[serde(default, alias = "codigo")]
    pub id: Option<serde_json::Value>,

    #[serde(default, alias = "nombre")]
    pub name: Option<String>,

    #[serde(default, alias = "imagen_url", alias = "imageUrl")]
    pub image_url: Option<String>,
}

impl CatalogEntry {
    fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Product code, name, or image URL, whichever comes first.
    pub fn label(&self) -> String {
        match (&self.id, &self.name) {
            (Some(serde_json::Value::String(code)), _) => code.clone(),
            (Some(code), _) if !code.is_null() => code.to_string(),
            (_, Some(name)) => name.clone(),
            _ => self.image_url.clone().unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Row {
    Url(String),
    Product(CatalogEntry),
}

/// Rows loaded from a catalog file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| VitrineError::Catalog(format!("failed to read {}: {}", path.display(), e)))?;
        let catalog = Self::parse(&content)?;
        debug!("Loaded {} catalog rows from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// JSON when the content starts with `[`, a URL list otherwise.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim_start().starts_with('[') {
            Self::from_json_str(content)
        } else {
            Ok(Self::from_lines(content))
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let rows: Vec<Row> =
            serde_json::from_str(json).map_err(|e| VitrineError::Catalog(format!("invalid catalog JSON: {}", e)))?;
        let entries = rows
            .into_iter()
            .map(|row| match row {
                Row::Url(url) => CatalogEntry::from_url(url),
                Row::Product(entry) => entry,
            })
            .collect();
        Ok(Self { entries })
    }

    /// One URL per line. Blank lines and `#` comments are skipped.
    pub fn from_lines(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(CatalogEntry::from_url)
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized image ids in catalog order, plus the labels of rows whose
    /// URL could not be parsed. Rows without an image are skipped.
    pub fn image_ids(&self, variant: &ImageVariant) -> (Vec<ResourceId>, Vec<String>) {
        let mut ids = Vec::new();
        let mut invalid = Vec::new();
        for entry in &self.entries {
            let Some(url) = entry.image_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
                continue;
            };
            match ResourceId::normalize(url, variant) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    debug!("Invalid image URL for {}: {}", entry.label(), e);
                    invalid.push(entry.label());
                }
            }
        }
        (ids, invalid)
    }
}
