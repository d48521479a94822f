//! Bone tree model: the rest skeleton, its edit-mode arena and posed
//! instances.

mod bone;
mod edit;
mod pose;
mod types;
mod undo;

pub use bone::{Armature, Bone};
pub use edit::{EditArmature, EditBone, EditBoneId};
pub use pose::{Constraint, ConstraintKind, Pose, PoseChannel, RotationMode};
pub use types::{
    BBoneCurve, BoneCollection, BoneFlags, BoneProps, DEFAULT_RAD_HEAD, DEFAULT_RAD_TAIL,
    collections_visible,
};
pub use undo::UndoSnapshot;

#[cfg(test)]
pub(crate) use edit::tests::chain;
