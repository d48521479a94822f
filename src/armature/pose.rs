use nalgebra::{Matrix3, Matrix4, Quaternion, Rotation3, Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::bone::Armature;
use super::types::BBoneCurve;
use crate::math::{transform_point, translation_of};
use crate::transform::{ParentTransform, channel_matrix, compute_parent_transform};

/// Representation used by a channel's rotation values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationMode {
    #[default]
    Quaternion,
    EulerXyz,
    AxisAngle,
}

/// Constraint kinds that rename propagation and rest-pose baking care
/// about. Constraints are never evaluated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConstraintKind {
    /// Caches the rest distance to its target, which goes stale when the
    /// rest pose changes.
    StretchTo { original_length: f32 },
    CopyLocation,
    CopyRotation,
    CopyTransforms,
    TrackTo,
    ChildOf,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    /// Target object name.
    pub target: Option<String>,
    /// Target bone name when the target is an armature.
    pub subtarget: String,
    pub kind: ConstraintKind,
}

impl Constraint {
    /// Drops cached rest-dependent state so it is recomputed on the next
    /// evaluation.
    pub fn reset_rest_cache(&mut self) {
        if let ConstraintKind::StretchTo { original_length } = &mut self.kind {
            *original_length = 0.0;
        }
    }
}

fn identity4() -> Matrix4<f32> {
    Matrix4::identity()
}

fn zeros3() -> Vector3<f32> {
    Vector3::zeros()
}

/// Animated state of one bone for one posed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseChannel {
    pub name: String,
    pub location: Vector3<f32>,
    pub rotation_mode: RotationMode,
    pub quaternion: Quaternion<f32>,
    pub euler: Vector3<f32>,
    pub axis: Vector3<f32>,
    pub angle: f32,
    pub scale: Vector3<f32>,
    pub bbone: BBoneCurve,
    #[serde(default)]
    pub constraints: Vec<Constraint>,

    #[serde(default = "identity4")]
    pub pose_mat: Matrix4<f32>,
    #[serde(default = "zeros3")]
    pub pose_head: Vector3<f32>,
    #[serde(default = "zeros3")]
    pub pose_tail: Vector3<f32>,
}

impl PoseChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: Vector3::zeros(),
            rotation_mode: RotationMode::Quaternion,
            quaternion: Quaternion::identity(),
            euler: Vector3::zeros(),
            axis: Vector3::y(),
            angle: 0.0,
            scale: Vector3::repeat(1.0),
            bbone: BBoneCurve::neutral(),
            constraints: Vec::new(),
            pose_mat: Matrix4::identity(),
            pose_head: Vector3::zeros(),
            pose_tail: Vector3::zeros(),
        }
    }

    /// Rotation of the active representation as a matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        match self.rotation_mode {
            RotationMode::Quaternion => {
                if self.quaternion.norm_squared() == 0.0 {
                    Matrix3::identity()
                } else {
                    UnitQuaternion::from_quaternion(self.quaternion)
                        .to_rotation_matrix()
                        .into_inner()
                }
            }
            RotationMode::EulerXyz => {
                Rotation3::from_euler_angles(self.euler.x, self.euler.y, self.euler.z).into_inner()
            }
            RotationMode::AxisAngle => match self.axis.try_normalize(0.0) {
                Some(axis) => Rotation3::from_axis_angle(&Unit::new_unchecked(axis), self.angle)
                    .into_inner(),
                None => Matrix3::identity(),
            },
        }
    }

    /// Local transform from location, rotation and scale channels.
    pub fn channel_matrix(&self) -> Matrix4<f32> {
        channel_matrix(&self.location, &self.rotation_matrix(), &self.scale)
    }

    /// Clears location, every rotation representation and scale.
    pub fn clear_transform(&mut self) {
        self.location = Vector3::zeros();
        self.euler = Vector3::zeros();
        self.quaternion = Quaternion::identity();
        self.axis = Vector3::y();
        self.angle = 0.0;
        self.scale = Vector3::repeat(1.0);
    }
}

/// Posed instance of an armature. Channels follow the armature's bone order
/// after [`Pose::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    channels: Vec<PoseChannel>,
}

impl Pose {
    pub fn from_armature(armature: &Armature) -> Self {
        let mut pose = Self::default();
        pose.rebuild(armature);
        pose.evaluate(armature);
        pose
    }

    pub fn channels(&self) -> &[PoseChannel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [PoseChannel] {
        &mut self.channels
    }

    pub fn find(&self, name: &str) -> Option<&PoseChannel> {
        self.channels.iter().find(|chan| chan.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut PoseChannel> {
        self.channels.iter_mut().find(|chan| chan.name == name)
    }

    /// Syncs channels with the armature's bones: keeps existing channels by
    /// name, adds missing ones and drops channels of removed bones.
    pub fn rebuild(&mut self, armature: &Armature) {
        let mut old = std::mem::take(&mut self.channels);
        self.channels = armature
            .bones()
            .iter()
            .map(|bone| match old.iter().position(|chan| chan.name == bone.name) {
                Some(index) => old.swap_remove(index),
                None => PoseChannel::new(bone.name.clone()),
            })
            .collect();
    }

    /// Computes `pose_mat`, `pose_head` and `pose_tail` of every channel.
    pub fn evaluate(&mut self, armature: &Armature) {
        if self.channels.len() != armature.bones().len()
            || self
                .channels
                .iter()
                .zip(armature.bones())
                .any(|(chan, bone)| chan.name != bone.name)
        {
            self.rebuild(armature);
        }

        let bones = armature.bones();
        for index in 0..bones.len() {
            let bone = &bones[index];
            let parent_transform = match bone.parent {
                Some(parent) => Self::parent_transform_for(
                    armature,
                    index,
                    Some(&bones[parent].arm_mat),
                    Some(&self.channels[parent].pose_mat),
                ),
                None => Self::parent_transform_for(armature, index, None, None),
            };
            let chan = &mut self.channels[index];
            let pose_mat = parent_transform.apply(&chan.channel_matrix());
            chan.pose_head = translation_of(&pose_mat);
            chan.pose_tail = transform_point(&pose_mat, &Vector3::new(0.0, bone.length, 0.0));
            chan.pose_mat = pose_mat;
        }
    }

    /// Parent transform of a bone given explicit parent rest and pose
    /// matrices.
    pub fn parent_transform_for(
        armature: &Armature,
        bone_index: usize,
        parent_rest: Option<&Matrix4<f32>>,
        parent_pose: Option<&Matrix4<f32>>,
    ) -> ParentTransform {
        let bones = armature.bones();
        let bone = &bones[bone_index];
        let parent_length = bone.parent.map_or(0.0, |p| bones[p].length);
        let offset = match bone.parent {
            Some(_) => bone.offset_matrix(parent_length),
            None => bone.arm_mat,
        };
        compute_parent_transform(bone.flags, bone.inherit_scale, &offset, parent_rest, parent_pose)
    }
}
