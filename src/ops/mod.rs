//! Hierarchy editing operations. Each one is a transaction over a single
//! edit armature: preconditions are checked first and an error leaves the
//! armature untouched.

mod align;
mod delete;
mod direction;
mod dissolve;
mod fill;
mod split;
mod visibility;

pub use align::{align_bone_to, align_bones};
pub use delete::delete_selected;
pub use direction::switch_direction;
pub use dissolve::dissolve_selected;
pub use fill::{EditTarget, FillOptions, Filled, fill_between_joints};
pub use split::split_selected;
pub use visibility::{hide_bones, reveal_bones};
