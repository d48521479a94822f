use std::collections::HashMap;

use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use super::edit::{EditArmature, EditBone, EditBoneId};
use super::types::{BoneCollection, BoneFlags, BoneProps};
use crate::log_warn;
use crate::math::{
    invert3_or_identity, mat3_of, mat3_vec_to_roll, mat4_from_parts, transform_point,
    translation_of, vec_roll_to_mat3,
};
use crate::transform::{InheritScaleMode, bone_offset_matrix};

/// Bones shorter than this are dropped when leaving edit mode.
const MIN_BONE_LENGTH: f32 = 0.000001;

/// Persistent rest-pose bone.
///
/// `head` and `tail` are relative to the parent's tail, in the parent's bone
/// space; the `arm_*` fields are the derived armature-space rest state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    pub roll: f32,
    pub flags: BoneFlags,
    pub rad_head: f32,
    pub rad_tail: f32,
    pub inherit_scale: InheritScaleMode,
    pub props: BoneProps,

    pub length: f32,
    pub bone_mat: Matrix3<f32>,
    pub arm_mat: Matrix4<f32>,
    pub arm_head: Vector3<f32>,
    pub arm_tail: Vector3<f32>,
    pub arm_roll: f32,
}

impl Bone {
    fn from_edit(edit: &EditBone) -> Self {
        Self {
            name: edit.name.clone(),
            parent: None,
            children: Vec::new(),
            head: edit.head,
            tail: edit.tail,
            roll: edit.roll,
            flags: edit.flags,
            rad_head: edit.rad_head,
            rad_tail: edit.rad_tail,
            inherit_scale: edit.inherit_scale,
            props: edit.props.clone(),
            length: 0.0,
            bone_mat: Matrix3::identity(),
            arm_mat: Matrix4::identity(),
            arm_head: edit.head,
            arm_tail: edit.tail,
            arm_roll: edit.roll,
        }
    }

    /// Rest offset of this bone relative to its parent's tail.
    pub fn offset_matrix(&self, parent_length: f32) -> Matrix4<f32> {
        bone_offset_matrix(&self.bone_mat, &self.head, parent_length)
    }

    pub fn is_visible(&self, collections: &[BoneCollection]) -> bool {
        !self.flags.contains(BoneFlags::HIDDEN)
            && super::types::collections_visible(collections, &self.props.collections)
    }
}

/// Rest skeleton. Bones are stored parents-first, so a single forward pass
/// sees every parent before its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Armature {
    pub name: String,
    bones: Vec<Bone>,
    pub collections: Vec<BoneCollection>,
    pub active_collection: Option<String>,
    pub active_bone: Option<String>,
    pub mirror_edit: bool,
    /// Edit-mode projection while the armature is being edited.
    #[serde(skip)]
    pub edit: Option<EditArmature>,
}

impl Armature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bones_mut(&mut self) -> &mut [Bone] {
        &mut self.bones
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.parent.is_none())
            .map(|(index, _)| index)
    }

    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    /// Recomputes bone matrices and armature-space rest data from the local
    /// head/tail/roll of every bone.
    pub fn update_rest(&mut self) {
        for index in 0..self.bones.len() {
            let parent = self.bones[index]
                .parent
                .map(|p| (self.bones[p].arm_mat, self.bones[p].length));
            let bone = &mut self.bones[index];
            where_is_bone(bone, parent);
        }
    }

    // ─── Edit-mode conversion ─────────────────────────────────────────────────

    /// Builds the edit projection of this armature.
    pub fn to_edit(&self) -> EditArmature {
        let mut edit = EditArmature::new();
        edit.collections = self.collections.clone();
        edit.active_collection = self.active_collection.clone();
        edit.mirror_edit = self.mirror_edit;

        let mut ids: Vec<EditBoneId> = Vec::with_capacity(self.bones.len());
        for bone in &self.bones {
            let mut edit_bone = EditBone::new(bone.name.clone(), bone.arm_head, bone.arm_tail);
            edit_bone.roll = bone.arm_roll;
            edit_bone.flags = bone.flags;
            edit_bone.rad_head = bone.rad_head;
            edit_bone.rad_tail = bone.rad_tail;
            edit_bone.inherit_scale = bone.inherit_scale;
            edit_bone.props = bone.props.clone();
            edit_bone.parent = bone.parent.map(|p| ids[p]);
            ids.push(edit.insert(edit_bone));
        }

        for (index, bone) in self.bones.iter().enumerate() {
            let id = ids[index];
            let connected_parent = bone
                .parent
                .filter(|_| bone.flags.contains(BoneFlags::CONNECTED))
                .map(|p| ids[p]);
            if bone.flags.contains(BoneFlags::SELECTED) {
                if let Some(edit_bone) = edit.get_mut(id) {
                    edit_bone.flags |= BoneFlags::TIP_SELECTED | BoneFlags::ROOT_SELECTED;
                }
                if let Some(parent) = connected_parent.and_then(|p| edit.get_mut(p)) {
                    parent.flags |= BoneFlags::TIP_SELECTED;
                }
            } else if connected_parent.is_some() {
                if let Some(edit_bone) = edit.get_mut(id) {
                    edit_bone.flags.remove(BoneFlags::ROOT_SELECTED);
                }
            }
        }

        let active = self.active_bone.as_deref().and_then(|name| edit.find(name));
        edit.set_active(active);
        edit
    }

    /// Enters edit mode. Returns false when already editing.
    pub fn enter_edit_mode(&mut self) -> bool {
        if self.edit.is_some() {
            return false;
        }
        self.edit = Some(self.to_edit());
        true
    }

    /// Leaves edit mode, writing the edit bones back. Returns false when the
    /// armature was not being edited.
    pub fn exit_edit_mode(&mut self) -> bool {
        match self.edit.take() {
            Some(edit) => {
                edit.commit(self);
                true
            }
            None => false,
        }
    }

    /// Replaces the rest bones with the content of an edit projection.
    ///
    /// Near-zero-length bones are dropped (their children reparent to the
    /// dropped bone's parent). Bones are then finalized parents first: local
    /// head/tail are re-expressed against the parent's final rest matrix and
    /// the roll is re-derived so the rest matrix matches the edit bone's
    /// orientation.
    pub fn apply_edit(&mut self, edit: &EditArmature) {
        let mut edit = edit.clone();
        let degenerate: Vec<(EditBoneId, String)> = edit
            .iter()
            .filter(|(_, bone)| {
                (bone.tail - bone.head).norm_squared() < MIN_BONE_LENGTH * MIN_BONE_LENGTH
            })
            .map(|(id, bone)| (id, bone.name.clone()))
            .collect();
        for (id, name) in degenerate {
            log_warn!("removing zero-length bone '{}' from armature '{}'", name, self.name);
            edit.remove(id, true);
        }

        let mut order: Vec<EditBoneId> = Vec::with_capacity(edit.len());
        let mut children: HashMap<EditBoneId, Vec<EditBoneId>> = HashMap::new();
        let mut roots = Vec::new();
        for (id, bone) in edit.iter() {
            match bone.parent {
                Some(parent) => children.entry(parent).or_default().push(id),
                None => roots.push(id),
            }
        }
        let mut stack: Vec<EditBoneId> = roots.into_iter().rev().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(kids) = children.get(&id) {
                stack.extend(kids.iter().rev().copied());
            }
        }

        let index_of: HashMap<EditBoneId, usize> =
            order.iter().enumerate().map(|(index, id)| (*id, index)).collect();

        let mut bones: Vec<Bone> = Vec::with_capacity(order.len());
        for id in &order {
            let (Some(source), Some(source_mat)) = (edit.get(*id), edit.bone_matrix(*id)) else {
                continue;
            };
            let mut bone = Bone::from_edit(source);
            bone.parent = source.parent.and_then(|p| index_of.get(&p).copied());
            let parent = bone.parent.and_then(|p| bones.get(p));
            if let Some(parent) = parent {
                let inverse = invert3_or_identity(&mat3_of(&parent.arm_mat));
                bone.head = inverse * (source.head - parent.arm_tail);
                bone.tail = inverse * (source.tail - parent.arm_tail);
            }
            let parent = parent.map(|p| (p.arm_mat, p.length));

            bone.roll = 0.0;
            where_is_bone(&mut bone, parent);
            let dif = invert3_or_identity(&source_mat) * mat3_of(&bone.arm_mat);
            bone.roll = -dif[(0, 2)].atan2(dif[(2, 2)]);
            where_is_bone(&mut bone, parent);
            bones.push(bone);
        }
        for index in 0..bones.len() {
            if let Some(parent) = bones[index].parent {
                bones[parent].children.push(index);
            }
        }
        self.bones = bones;

        self.collections = edit.collections.clone();
        self.active_collection = edit.active_collection.clone();
        self.mirror_edit = edit.mirror_edit;
        self.active_bone = edit
            .active()
            .and_then(|id| edit.get(id))
            .map(|bone| bone.name.clone());
    }

    /// Builds an armature directly from edit bones.
    pub fn from_edit(name: impl Into<String>, edit: &EditArmature) -> Self {
        let mut armature = Self::new(name);
        armature.apply_edit(edit);
        armature
    }

    /// Renames a rest bone in place, returning the unique name assigned.
    pub fn rename_bone(&mut self, index: usize, new_name: &str) -> Option<String> {
        let old = self.bones.get(index)?.name.clone();
        if old == new_name {
            return Some(old);
        }
        let assigned = crate::naming::unique_name(new_name, "Bone", '.', |candidate| {
            self.bones.iter().any(|bone| bone.name == candidate)
        });
        self.bones[index].name = assigned.clone();
        if self.active_bone.as_deref() == Some(old.as_str()) {
            self.active_bone = Some(assigned.clone());
        }
        Some(assigned)
    }
}

impl EditArmature {
    /// Writes this projection back into `armature` as its new rest bones.
    pub fn commit(&self, armature: &mut Armature) {
        armature.apply_edit(self);
    }
}

/// Computes the rest matrices of one bone from its parent's arm matrix and
/// length.
fn where_is_bone(bone: &mut Bone, parent: Option<(Matrix4<f32>, f32)>) {
    let vec = bone.tail - bone.head;
    bone.length = vec.norm();
    bone.bone_mat = vec_roll_to_mat3(&vec, bone.roll);

    bone.arm_mat = match parent {
        Some((parent_arm, parent_length)) => parent_arm * bone.offset_matrix(parent_length),
        None => mat4_from_parts(&bone.bone_mat, &bone.head),
    };

    bone.arm_head = translation_of(&bone.arm_mat);
    bone.arm_tail = transform_point(&bone.arm_mat, &Vector3::new(0.0, bone.length, 0.0));
    bone.arm_roll = mat3_vec_to_roll(&mat3_of(&bone.arm_mat), &(bone.arm_tail - bone.arm_head));
}
