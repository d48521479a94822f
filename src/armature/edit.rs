use std::collections::HashMap;
use std::ops::{Index, IndexMut};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::types::{
    BoneCollection, BoneFlags, BoneProps, DEFAULT_RAD_HEAD, DEFAULT_RAD_TAIL, collections_visible,
};
use crate::math::vec_roll_to_mat3;
use crate::naming::unique_name;
use crate::transform::InheritScaleMode;

/// Stable handle of an edit bone. Handles are never reused within one edit
/// session, so a handle kept across a removal simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditBoneId(pub u32);

/// Editable projection of a bone. Head and tail are in armature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditBone {
    pub name: String,
    pub parent: Option<EditBoneId>,
    pub head: Vector3<f32>,
    pub tail: Vector3<f32>,
    pub roll: f32,
    pub flags: BoneFlags,
    pub rad_head: f32,
    pub rad_tail: f32,
    pub inherit_scale: InheritScaleMode,
    pub props: BoneProps,
}

impl EditBone {
    pub fn new(name: impl Into<String>, head: Vector3<f32>, tail: Vector3<f32>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            head,
            tail,
            roll: 0.0,
            flags: BoneFlags::empty(),
            rad_head: DEFAULT_RAD_HEAD,
            rad_tail: DEFAULT_RAD_TAIL,
            inherit_scale: InheritScaleMode::Full,
            props: BoneProps::default(),
        }
    }

    pub fn length(&self) -> f32 {
        (self.tail - self.head).norm()
    }

    pub fn is_connected(&self) -> bool {
        self.flags.contains(BoneFlags::CONNECTED)
    }

    pub fn is_selected(&self) -> bool {
        self.flags.contains(BoneFlags::SELECTED)
    }

    /// Selected and not locked.
    pub fn is_editable(&self) -> bool {
        self.flags.contains(BoneFlags::SELECTED) && !self.flags.contains(BoneFlags::LOCKED)
    }
}

/// Arena of edit bones for one armature in edit mode.
///
/// Bones iterate in insertion order. A name index is kept alongside the arena
/// and updated on every add, remove and rename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditArmature {
    slots: Vec<Option<EditBone>>,
    names: HashMap<String, EditBoneId>,
    active: Option<EditBoneId>,
    pub collections: Vec<BoneCollection>,
    pub active_collection: Option<String>,
    /// Edits are mirrored across the X axis onto left/right counterparts.
    pub mirror_edit: bool,
}

/// Panics on a stale handle. Use [`EditArmature::get`] when the bone may
/// have been removed.
impl Index<EditBoneId> for EditArmature {
    type Output = EditBone;

    fn index(&self, id: EditBoneId) -> &EditBone {
        match self.slots.get(id.0 as usize) {
            Some(Some(bone)) => bone,
            _ => panic!("stale edit bone handle {id:?}"),
        }
    }
}

impl IndexMut<EditBoneId> for EditArmature {
    fn index_mut(&mut self, id: EditBoneId) -> &mut EditBone {
        match self.slots.get_mut(id.0 as usize) {
            Some(Some(bone)) => bone,
            _ => panic!("stale edit bone handle {id:?}"),
        }
    }
}

impl EditArmature {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Arena access ─────────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, id: EditBoneId) -> bool {
        matches!(self.slots.get(id.0 as usize), Some(Some(_)))
    }

    pub fn get(&self, id: EditBoneId) -> Option<&EditBone> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: EditBoneId) -> Option<&mut EditBone> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Live handles in insertion order, collected so callers can mutate while
    /// walking.
    pub fn ids(&self) -> Vec<EditBoneId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EditBoneId, &EditBone)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|bone| (EditBoneId(index as u32), bone)))
    }

    pub fn find(&self, name: &str) -> Option<EditBoneId> {
        self.names.get(name).copied()
    }

    /// Returns `name` or a `.NNN` variant of it that no bone uses yet.
    pub fn unique_bone_name(&self, name: &str) -> String {
        unique_name(name, "Bone", '.', |candidate| self.names.contains_key(candidate))
    }

    /// Adds a bone, renaming it if its name is taken.
    pub fn insert(&mut self, mut bone: EditBone) -> EditBoneId {
        bone.name = self.unique_bone_name(&bone.name);
        let id = EditBoneId(self.slots.len() as u32);
        self.names.insert(bone.name.clone(), id);
        self.slots.push(Some(bone));
        id
    }

    /// Creates a bone with default properties between `head` and `tail`.
    pub fn add_bone(&mut self, name: &str, head: Vector3<f32>, tail: Vector3<f32>) -> EditBoneId {
        self.insert(EditBone::new(name, head, tail))
    }

    /// Removes a bone. Its children are handed to its parent; with
    /// `clear_connected` they also lose their connection.
    pub fn remove(&mut self, id: EditBoneId, clear_connected: bool) -> Option<EditBone> {
        let bone = self.slots.get_mut(id.0 as usize)?.take()?;
        self.names.remove(&bone.name);
        for slot in self.slots.iter_mut().flatten() {
            if slot.parent == Some(id) {
                slot.parent = bone.parent;
                if clear_connected {
                    slot.flags.remove(BoneFlags::CONNECTED);
                }
            }
        }
        if self.active == Some(id) {
            self.active = None;
        }
        Some(bone)
    }

    /// Renames a bone inside the arena only, returning the unique name that
    /// was actually assigned. Document-wide references are updated by
    /// [`crate::naming::rename_bone`].
    pub fn rename(&mut self, id: EditBoneId, new_name: &str) -> Option<String> {
        let old = self.get(id)?.name.clone();
        if old == new_name {
            return Some(old);
        }
        self.names.remove(&old);
        let assigned = self.unique_bone_name(new_name);
        self.names.insert(assigned.clone(), id);
        if let Some(bone) = self.get_mut(id) {
            bone.name = assigned.clone();
        }
        Some(assigned)
    }

    // ─── Hierarchy queries ────────────────────────────────────────────────────

    pub fn parent(&self, id: EditBoneId) -> Option<EditBoneId> {
        self.get(id).and_then(|bone| bone.parent)
    }

    pub fn children(&self, id: EditBoneId) -> Vec<EditBoneId> {
        self.iter()
            .filter(|(_, bone)| bone.parent == Some(id))
            .map(|(child, _)| child)
            .collect()
    }

    /// Orientation of a bone from its axis and roll. A zero-length bone
    /// borrows its parent's axis.
    pub fn bone_matrix(&self, id: EditBoneId) -> Option<Matrix3<f32>> {
        let bone = self.get(id)?;
        let mut axis = bone.tail - bone.head;
        if axis.norm_squared() == 0.0 {
            if let Some(parent) = bone.parent.and_then(|p| self.get(p)) {
                axis = parent.tail - parent.head;
            }
        }
        Some(vec_roll_to_mat3(&axis, bone.roll))
    }

    // ─── Active bone ──────────────────────────────────────────────────────────

    pub fn active(&self) -> Option<EditBoneId> {
        self.active.filter(|id| self.contains(*id))
    }

    pub fn set_active(&mut self, id: Option<EditBoneId>) {
        self.active = id.filter(|id| self.contains(*id));
    }

    /// Drops the active reference when the active bone is hidden.
    pub fn validate_active(&mut self) {
        let hidden = self
            .active()
            .and_then(|id| self.get(id))
            .is_some_and(|bone| bone.flags.contains(BoneFlags::HIDDEN));
        if hidden {
            self.active = None;
        }
    }

    // ─── Visibility and selection ─────────────────────────────────────────────

    /// Not hidden and shown by its collections.
    pub fn is_visible(&self, id: EditBoneId) -> bool {
        self.get(id).is_some_and(|bone| {
            !bone.flags.contains(BoneFlags::HIDDEN)
                && collections_visible(&self.collections, &bone.props.collections)
        })
    }

    /// Visible, selected and not locked.
    pub fn is_editable(&self, id: EditBoneId) -> bool {
        self.is_visible(id) && self.get(id).is_some_and(EditBone::is_editable)
    }

    /// Selection flags of a bone, with the head state of connected bones read
    /// from the parent's tail. A stale handle has no selection.
    pub fn selection_flags(&self, id: EditBoneId) -> BoneFlags {
        let Some(bone) = self.get(id) else {
            return BoneFlags::empty();
        };
        match bone.parent.and_then(|p| self.get(p)) {
            Some(parent) if bone.is_connected() => {
                let mut flags = bone.flags & (BoneFlags::SELECTED | BoneFlags::TIP_SELECTED);
                if parent.flags.contains(BoneFlags::TIP_SELECTED) {
                    flags |= BoneFlags::ROOT_SELECTED;
                }
                flags
            }
            _ => bone.flags & BoneFlags::SELECT_MASK,
        }
    }

    /// Replaces the selection flags of a bone. For a connected bone the head
    /// state is written to the parent's tail as well.
    pub fn set_selection_flags(&mut self, id: EditBoneId, flags: BoneFlags) {
        let flags = flags & BoneFlags::SELECT_MASK;
        let Some(bone) = self.get_mut(id) else {
            return;
        };
        bone.flags.remove(BoneFlags::SELECT_MASK);
        bone.flags |= flags;
        let parent = bone.parent.filter(|_| bone.is_connected());
        if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
            parent
                .flags
                .set(BoneFlags::TIP_SELECTED, flags.contains(BoneFlags::ROOT_SELECTED));
        }
    }

    pub fn select(&mut self, id: EditBoneId, select: bool) {
        let flags = if select {
            BoneFlags::SELECT_MASK
        } else {
            BoneFlags::empty()
        };
        self.set_selection_flags(id, flags);
    }

    pub fn deselect_all(&mut self) {
        for bone in self.slots.iter_mut().flatten() {
            bone.flags.remove(BoneFlags::SELECT_MASK);
        }
    }

    /// Re-derives the whole-bone flag from the joint flags, with connected
    /// heads following their parent's tail.
    pub fn sync_selection(&mut self) {
        for id in self.ids() {
            let parent_tip = self.get(id).and_then(|bone| {
                let parent = self.get(bone.parent.filter(|_| bone.is_connected())?)?;
                Some(parent.flags.contains(BoneFlags::TIP_SELECTED))
            });
            let Some(bone) = self.get_mut(id) else {
                continue;
            };
            if let Some(tip) = parent_tip {
                bone.flags.set(BoneFlags::ROOT_SELECTED, tip);
            }
            let whole = bone
                .flags
                .contains(BoneFlags::TIP_SELECTED | BoneFlags::ROOT_SELECTED);
            bone.flags.set(BoneFlags::SELECTED, whole);
        }
    }

    /// Copies the flags in `mask` of every visible bone onto its mirror
    /// counterpart.
    pub fn select_mirrored(&mut self, mask: BoneFlags) {
        for id in self.ids() {
            if !self.is_visible(id) {
                continue;
            }
            let flags = self.get(id).map_or(BoneFlags::empty(), |bone| bone.flags & mask);
            if flags.is_empty() {
                continue;
            }
            let mirror = crate::mirror::get_mirror_bone(self, id);
            if let Some(bone) = mirror.and_then(|m| self.get_mut(m)) {
                bone.flags |= flags;
            }
        }
    }

    // ─── Geometry ─────────────────────────────────────────────────────────────

    /// Moves the connected descendants of a bone so each head meets its
    /// parent's tail again. Tails move by the same offset.
    pub fn translate_connected_children(&mut self, id: EditBoneId) {
        let Some(tail) = self.get(id).map(|bone| bone.tail) else {
            return;
        };
        for child in self.children(id) {
            let Some(bone) = self.get_mut(child).filter(|bone| bone.is_connected()) else {
                continue;
            };
            if bone.head != tail {
                let delta = tail - bone.head;
                bone.tail += delta;
                bone.head = tail;
            }
            self.translate_connected_children(child);
        }
    }

    /// True when every connected bone's head equals its parent's tail.
    pub fn connections_are_consistent(&self) -> bool {
        self.iter().all(|(_, bone)| match bone.parent {
            Some(parent) if bone.is_connected() => {
                self.get(parent).is_some_and(|parent| parent.tail == bone.head)
            }
            _ => true,
        })
    }

    /// True when no parent chain loops back on itself.
    pub fn is_acyclic(&self) -> bool {
        let limit = self.len();
        self.iter().all(|(id, _)| {
            let mut steps = 0;
            let mut current = self.parent(id);
            while let Some(next) = current {
                steps += 1;
                if steps > limit {
                    return false;
                }
                current = self.parent(next);
            }
            true
        })
    }
}
