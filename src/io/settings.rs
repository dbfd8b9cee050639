//! Read the three settings documents.
//!
//! Each document is kept as raw JSON (copied verbatim into the output bundle)
//! and parsed into its typed form. Every error names the file it came from.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::domain::{GridSettings, MinimizerSettings, TemplateSettings};
use crate::error::{Result, ScanError};

/// The settings documents as read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsDocs {
    pub template: Value,
    pub minimizer: Value,
    pub grid: Value,
}

/// Raw documents plus their typed, validated forms.
#[derive(Debug, Clone)]
pub struct Settings {
    pub docs: SettingsDocs,
    pub template: TemplateSettings,
    pub minimizer: MinimizerSettings,
    pub grid: GridSettings,
}

/// Load and validate all three documents.
///
/// A device id, when given, is written into the template document before it
/// is parsed, so it is both used and recorded.
pub fn load_settings(
    template_path: &Path,
    minimizer_path: &Path,
    grid_path: &Path,
    device: Option<u32>,
) -> Result<Settings> {
    let mut template_doc = read_json(template_path)?;
    if let Some(id) = device {
        let obj = template_doc.as_object_mut().ok_or_else(|| {
            ScanError::Config(format!(
                "template settings '{}' must be a JSON object",
                template_path.display()
            ))
        })?;
        obj.insert("device".to_string(), Value::from(id));
    }
    let minimizer_doc = read_json(minimizer_path)?;
    let grid_doc = read_json(grid_path)?;

    let template: TemplateSettings = parse(&template_doc, template_path)?;
    template
        .params
        .validate()
        .map_err(|e| in_file(e, template_path))?;

    let minimizer: MinimizerSettings = parse(&minimizer_doc, minimizer_path)?;
    minimizer.validate().map_err(|e| in_file(e, minimizer_path))?;

    let grid: GridSettings = parse(&grid_doc, grid_path)?;

    debug!(
        params = template.params.len(),
        method = ?minimizer.method,
        scanned = ?grid.steps.keys().collect::<Vec<_>>(),
        "settings loaded"
    );

    Ok(Settings {
        docs: SettingsDocs {
            template: template_doc,
            minimizer: minimizer_doc,
            grid: grid_doc,
        },
        template,
        minimizer,
        grid,
    })
}

/// Read a JSON document.
pub fn read_json(path: &Path) -> Result<Value> {
    let file = File::open(path).map_err(|e| ScanError::io(path, format!("failed to open: {e}")))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        ScanError::Config(format!("invalid JSON in '{}': {e}", path.display()))
    })
}

fn parse<T: DeserializeOwned>(doc: &Value, path: &Path) -> Result<T> {
    T::deserialize(doc).map_err(|e| {
        ScanError::Config(format!("invalid settings in '{}': {e}", path.display()))
    })
}

fn in_file(err: ScanError, path: &Path) -> ScanError {
    ScanError::Config(format!("{} ({err})", path.display()))
}
