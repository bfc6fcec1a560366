//! Decoded template images, keyed by signal.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use image::GrayImage;
use tracing::{debug, instrument};

use crate::core::signal::Signal;
use crate::io::config::TemplateConfig;

#[derive(Debug, Clone)]
pub struct Template {
    pub path: PathBuf,
    pub image: GrayImage,
}

/// Every template the loop can look for, decoded to grayscale once at startup.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<Signal, Template>,
}

impl TemplateCatalog {
    /// Load and decode every signal's template. A missing or unreadable file
    /// is an error: the loop cannot run with holes in its catalog.
    #[instrument(skip_all, fields(dir = %cfg.dir.display()))]
    pub fn load(cfg: &TemplateConfig) -> Result<Self> {
        let mut templates = BTreeMap::new();
        for signal in Signal::ALL {
            let path = cfg.path_for(signal);
            if !path.is_file() {
                return Err(anyhow!(
                    "missing template for {signal}: {}",
                    path.display()
                ));
            }
            let image = image::open(&path)
                .with_context(|| format!("decode template {}", path.display()))?
                .to_luma8();
            if image.width() == 0 || image.height() == 0 {
                return Err(anyhow!("empty template {}", path.display()));
            }
            debug!(%signal, width = image.width(), height = image.height(), "template loaded");
            templates.insert(signal, Template { path, image });
        }
        Ok(Self { templates })
    }

    /// Build a catalog from in-memory images.
    pub fn from_images(images: impl IntoIterator<Item = (Signal, GrayImage)>) -> Self {
        let templates = images
            .into_iter()
            .map(|(signal, image)| {
                let path = PathBuf::from(signal.default_file());
                (signal, Template { path, image })
            })
            .collect();
        Self { templates }
    }

    pub fn get(&self, signal: Signal) -> Result<&Template> {
        self.templates
            .get(&signal)
            .ok_or_else(|| anyhow!("no template loaded for {signal}"))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
