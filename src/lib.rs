//! Skeletal hierarchy editing and rest-pose baking.
//!
//! Bones are edited through an arena projection of each armature
//! ([`armature::EditArmature`]); the operations in [`ops`] and [`roll`] work
//! on that projection, [`bake`] folds a pose back into the rest skeleton and
//! [`command`] drives all of them over a set of target objects.

pub mod armature;
pub mod bake;
pub mod command;
pub mod error;
pub mod logging;
pub mod math;
pub mod mirror;
pub mod naming;
pub mod ops;
pub mod report;
pub mod roll;
pub mod scene;
pub mod settings;
pub mod topology;
pub mod transform;

pub use error::EditError;
pub use logging::{LogLevel, ResultExt, init_logging, send_log};
