use bitflags::bitflags;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ─── Bone flags ───────────────────────────────────────────────────────────────

bitflags! {
    /// Per-bone state shared by rest bones and edit bones.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BoneFlags: u32 {
        /// Whole bone selected (both joints).
        const SELECTED = 1 << 0;
        /// Head joint selected.
        const ROOT_SELECTED = 1 << 1;
        /// Tail joint selected.
        const TIP_SELECTED = 1 << 2;
        /// Head is glued to the parent's tail.
        const CONNECTED = 1 << 3;
        const HIDDEN = 1 << 4;
        /// Locked against edit-mode transforms.
        const LOCKED = 1 << 5;
        const NO_DEFORM = 1 << 6;
        /// Do not inherit parent rotation.
        const HINGE = 1 << 7;
        /// Location channel is expressed in parent space.
        const NO_LOCAL_LOCATION = 1 << 8;
        const RELATIVE_PARENTING = 1 << 9;

        const SELECT_MASK = Self::SELECTED.bits()
            | Self::ROOT_SELECTED.bits()
            | Self::TIP_SELECTED.bits();
    }
}

// ─── Curved bone parameters ───────────────────────────────────────────────────

/// Curvature, twist, ease and scale values of a curved (B-Bone) segment chain.
///
/// Rest bones and pose channels both carry one; the pose values are added on
/// top of the rest values during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBoneCurve {
    pub curve_in_x: f32,
    pub curve_in_z: f32,
    pub curve_out_x: f32,
    pub curve_out_z: f32,
    pub roll_in: f32,
    pub roll_out: f32,
    pub ease_in: f32,
    pub ease_out: f32,
    pub scale_in: Vector3<f32>,
    pub scale_out: Vector3<f32>,
}

impl BBoneCurve {
    /// Neutral animation offsets: no curve, no ease, unit scale.
    pub fn neutral() -> Self {
        Self {
            curve_in_x: 0.0,
            curve_in_z: 0.0,
            curve_out_x: 0.0,
            curve_out_z: 0.0,
            roll_in: 0.0,
            roll_out: 0.0,
            ease_in: 0.0,
            ease_out: 0.0,
            scale_in: Vector3::repeat(1.0),
            scale_out: Vector3::repeat(1.0),
        }
    }

    /// Rest defaults of a freshly created bone.
    pub fn rest() -> Self {
        Self {
            ease_in: 1.0,
            ease_out: 1.0,
            ..Self::neutral()
        }
    }

    /// Folds animation offsets into these values: sums for curve, roll and
    /// ease, products for scale.
    pub fn accumulate(&mut self, offsets: &BBoneCurve) {
        self.curve_in_x += offsets.curve_in_x;
        self.curve_in_z += offsets.curve_in_z;
        self.curve_out_x += offsets.curve_out_x;
        self.curve_out_z += offsets.curve_out_z;
        self.roll_in += offsets.roll_in;
        self.roll_out += offsets.roll_out;
        self.ease_in += offsets.ease_in;
        self.ease_out += offsets.ease_out;
        self.scale_in.component_mul_assign(&offsets.scale_in);
        self.scale_out.component_mul_assign(&offsets.scale_out);
    }
}

impl Default for BBoneCurve {
    fn default() -> Self {
        Self::neutral()
    }
}

// ─── Envelope and display properties ──────────────────────────────────────────

/// Properties that ride along with a bone through every edit but take no
/// part in hierarchy math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneProps {
    pub dist: f32,
    pub weight: f32,
    pub xwidth: f32,
    pub zwidth: f32,
    pub segments: u32,
    pub bbone: BBoneCurve,
    /// Collections this bone is assigned to.
    pub collections: Vec<String>,
}

impl Default for BoneProps {
    fn default() -> Self {
        Self {
            dist: 0.25,
            weight: 1.0,
            xwidth: 0.1,
            zwidth: 0.1,
            segments: 1,
            bbone: BBoneCurve::rest(),
            collections: Vec::new(),
        }
    }
}

/// Default head radius of a new bone.
pub const DEFAULT_RAD_HEAD: f32 = 0.1;
/// Default tail radius of a new bone.
pub const DEFAULT_RAD_TAIL: f32 = 0.05;

// ─── Bone collections ─────────────────────────────────────────────────────────

/// Named group of bones with a shared visibility toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoneCollection {
    pub name: String,
    pub visible: bool,
}

impl BoneCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
        }
    }
}

/// True when a bone assigned to `assigned` is shown: unassigned bones are
/// always shown, assigned ones when any of their collections is visible.
pub fn collections_visible(collections: &[BoneCollection], assigned: &[String]) -> bool {
    assigned.is_empty()
        || assigned.iter().any(|name| {
            collections
                .iter()
                .find(|collection| &collection.name == name)
                .is_none_or(|collection| collection.visible)
        })
}
