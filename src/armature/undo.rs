use serde::{Deserialize, Serialize};

use super::edit::EditArmature;

/// Full copy of an armature's edit-mode state.
///
/// Capturing clones the whole bone arena together with the active bone and
/// the bone collections; restoring swaps it back wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    armature: String,
    state: EditArmature,
}

impl UndoSnapshot {
    pub fn capture(armature: impl Into<String>, edit: &EditArmature) -> Self {
        Self {
            armature: armature.into(),
            state: edit.clone(),
        }
    }

    /// Name of the armature the snapshot was taken from.
    pub fn armature(&self) -> &str {
        &self.armature
    }

    pub fn restore(&self, edit: &mut EditArmature) {
        *edit = self.state.clone();
    }
}
