use thiserror::Error;

/// Precondition failures of editing operations. Every variant is raised
/// before the armature is touched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("Operation requires an active bone")]
    NoActiveBone,

    #[error("No joints selected")]
    NoJointsSelected,

    #[error("Too many points selected: {count} (max 2)")]
    TooManyJoints { count: usize },

    #[error("Bones for different objects selected")]
    MixedSkeletons,

    #[error("Same bone selected...")]
    SameBoneSelected,

    #[error("Armature '{0}' is in edit mode")]
    InEditMode(String),

    #[error("Armature '{0}' is not in edit mode")]
    NotInEditMode(String),

    #[error("Unknown object: {0}")]
    UnknownObject(String),

    #[error("Unknown armature: {0}")]
    UnknownArmature(String),

    #[error("Object '{0}' is not an armature")]
    NotAnArmature(String),
}

impl EditError {
    /// Stable machine-readable code used in diagnostics.
    pub fn code(&self) -> &'static str {
        match self {
            EditError::NoActiveBone => "NO_ACTIVE_BONE",
            EditError::NoJointsSelected => "NO_JOINTS_SELECTED",
            EditError::TooManyJoints { .. } => "TOO_MANY_JOINTS",
            EditError::MixedSkeletons => "MIXED_SKELETONS",
            EditError::SameBoneSelected => "SAME_BONE_SELECTED",
            EditError::InEditMode(_) => "IN_EDIT_MODE",
            EditError::NotInEditMode(_) => "NOT_IN_EDIT_MODE",
            EditError::UnknownObject(_) => "UNKNOWN_OBJECT",
            EditError::UnknownArmature(_) => "UNKNOWN_ARMATURE",
            EditError::NotAnArmature(_) => "NOT_AN_ARMATURE",
        }
    }
}

/// Command layers that speak strings get the display text.
impl From<EditError> for String {
    fn from(error: EditError) -> Self {
        error.to_string()
    }
}
