use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Defaults for bones created by Fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillSettings {
    pub bone_name: String,
}

impl Default for FillSettings {
    fn default() -> Self {
        Self {
            bone_name: "Bone".to_string(),
        }
    }
}

/// Persisted editing preferences used by the command layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditSettings {
    /// Overrides each armature's own mirror-edit flag when set.
    pub mirror_edit: Option<bool>,
    /// Flip Names drops `.NNN` suffixes instead of keeping them.
    pub strip_numbers_on_flip: bool,
    /// Apply Pose as Rest touches only selected bones.
    pub bake_selected_only: bool,
    pub fill: FillSettings,
}

impl Default for EditSettings {
    fn default() -> Self {
        Self {
            mirror_edit: None,
            strip_numbers_on_flip: false,
            bake_selected_only: false,
            fill: FillSettings::default(),
        }
    }
}

/// Save edit settings to a JSON file.
pub fn save_edit_settings(path: &Path, settings: &EditSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize edit settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save edit settings: {}", path.display()))?;
    Ok(())
}

/// Load edit settings from a JSON file.
pub fn load_edit_settings(path: &Path) -> Result<EditSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load edit settings: {}", path.display()))?;
    let settings: EditSettings =
        serde_json::from_str(&content).context("failed to parse edit settings JSON")?;
    Ok(settings)
}
