//! Preflight for `farmer check`: config and template catalog.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::io::catalog::TemplateCatalog;
use crate::io::config::load_config;

/// What a successful check verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub templates: usize,
    pub template_dir: PathBuf,
}

/// Load and validate the config at `path`, then decode every template it names.
pub fn check_setup(path: &Path) -> Result<CheckOutcome> {
    let config = load_config(path).with_context(|| format!("load {}", path.display()))?;
    config.classifier()?;
    let catalog = TemplateCatalog::load(&config.templates).context("load templates")?;
    Ok(CheckOutcome {
        templates: catalog.len(),
        template_dir: config.templates.dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::Signal;
    use crate::io::config::{FarmerConfig, write_config};
    use image::{GrayImage, Luma};

    fn config_in(dir: &Path) -> PathBuf {
        let mut cfg = FarmerConfig::default();
        cfg.templates.dir = dir.join("images");
        let path = dir.join("farmer.toml");
        write_config(&path, &cfg).expect("write config");
        path
    }

    #[test]
    fn passes_with_every_template_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_in(temp.path());
        std::fs::create_dir_all(temp.path().join("images")).expect("mkdir");
        for signal in Signal::ALL {
            let image = GrayImage::from_fn(8, 8, |x, y| Luma([((x * 31 + y * 7) % 255) as u8]));
            image
                .save(temp.path().join("images").join(signal.default_file()))
                .expect("save template");
        }

        let outcome = check_setup(&path).expect("check");
        assert_eq!(outcome.templates, Signal::ALL.len());
    }

    #[test]
    fn names_the_missing_template() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_in(temp.path());

        let err = check_setup(&path).expect_err("missing templates");
        assert!(format!("{err:#}").contains("missing template"));
    }
}
