use std::{fs, path::Path};

use anyhow::{Context, Result};
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::armature::{Armature, Constraint, Pose};
use crate::log_info;
use crate::math::{invert_or_identity, mat4_from_parts, mat3_of, transform_point};

// ─── Document types ───────────────────────────────────────────────────────────

/// Object-level data block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectData {
    Empty,
    /// Posed instance of an armature, referenced by armature name.
    Armature { armature: String, pose: Pose },
    Mesh { vertex_groups: Vec<String> },
}

/// Modifiers that reference bones by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Modifier {
    /// Deforms the owner by the named armature object.
    Armature { object: Option<String> },
    /// Pins vertices to an object, or to one of its bones.
    Hook {
        object: Option<String>,
        subtarget: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectParent {
    pub object: String,
    /// Parent bone when the object follows a single bone.
    pub bone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub data: ObjectData,
    #[serde(default)]
    pub parent: Option<ObjectParent>,
    pub parent_inverse: Matrix4<f32>,
    pub matrix_local: Matrix4<f32>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Assigned action name.
    #[serde(default)]
    pub action: Option<String>,
}

impl SceneObject {
    fn with_data(name: impl Into<String>, data: ObjectData) -> Self {
        Self {
            name: name.into(),
            data,
            parent: None,
            parent_inverse: Matrix4::identity(),
            matrix_local: Matrix4::identity(),
            constraints: Vec::new(),
            modifiers: Vec::new(),
            action: None,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::with_data(name, ObjectData::Empty)
    }

    pub fn mesh(name: impl Into<String>, vertex_groups: Vec<String>) -> Self {
        Self::with_data(name, ObjectData::Mesh { vertex_groups })
    }

    /// Armature object with a freshly evaluated pose.
    pub fn armature(name: impl Into<String>, armature: &Armature) -> Self {
        Self::with_data(
            name,
            ObjectData::Armature {
                armature: armature.name.clone(),
                pose: Pose::from_armature(armature),
            },
        )
    }

    pub fn armature_name(&self) -> Option<&str> {
        match &self.data {
            ObjectData::Armature { armature, .. } => Some(armature),
            _ => None,
        }
    }

    pub fn pose(&self) -> Option<&Pose> {
        match &self.data {
            ObjectData::Armature { pose, .. } => Some(pose),
            _ => None,
        }
    }

    pub fn pose_mut(&mut self) -> Option<&mut Pose> {
        match &mut self.data {
            ObjectData::Armature { pose, .. } => Some(pose),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationCurve {
    pub data_path: String,
    pub array_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub curves: Vec<AnimationCurve>,
}

/// Document holding armatures, the objects using them and actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub armatures: Vec<Armature>,
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

// ─── Lookups ──────────────────────────────────────────────────────────────────

impl Scene {
    pub fn armature(&self, name: &str) -> Option<&Armature> {
        self.armatures.iter().find(|armature| armature.name == name)
    }

    pub fn armature_mut(&mut self, name: &str) -> Option<&mut Armature> {
        self.armatures.iter_mut().find(|armature| armature.name == name)
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|object| object.name == name)
    }

    pub fn object_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|object| object.name == name)
    }

    /// Names of the objects posing `armature`.
    pub fn users_of(&self, armature: &str) -> Vec<String> {
        self.objects
            .iter()
            .filter(|object| object.armature_name() == Some(armature))
            .map(|object| object.name.clone())
            .collect()
    }

    // ─── Transforms ───────────────────────────────────────────────────────────

    /// World matrix of an object: parent matrix, parent inverse, then local.
    pub fn object_world(&self, name: &str) -> Matrix4<f32> {
        self.object_world_limited(name, self.objects.len())
    }

    fn object_world_limited(&self, name: &str, depth: usize) -> Matrix4<f32> {
        let Some(object) = self.object(name) else {
            return Matrix4::identity();
        };
        match (&object.parent, depth) {
            (Some(parent), depth) if depth > 0 => {
                self.parent_matrix_limited(parent, depth - 1)
                    * object.parent_inverse
                    * object.matrix_local
            }
            _ => object.matrix_local,
        }
    }

    /// Matrix an object inherits from its parent. A bone parent places the
    /// child at the bone's tail in its current pose.
    pub fn parent_matrix(&self, parent: &ObjectParent) -> Matrix4<f32> {
        self.parent_matrix_limited(parent, self.objects.len())
    }

    fn parent_matrix_limited(&self, parent: &ObjectParent, depth: usize) -> Matrix4<f32> {
        let world = self.object_world_limited(&parent.object, depth);
        let Some(bone_name) = parent.bone.as_deref() else {
            return world;
        };
        let Some(object) = self.object(&parent.object) else {
            return world;
        };
        let armature = object.armature_name().and_then(|name| self.armature(name));
        let (Some(pose), Some(armature)) = (object.pose(), armature) else {
            return world;
        };
        let (Some(chan), Some(bone)) = (pose.find(bone_name), armature.bone(bone_name)) else {
            return world;
        };
        let tail = transform_point(&chan.pose_mat, &Vector3::new(0.0, bone.length, 0.0));
        world * mat4_from_parts(&mat3_of(&chan.pose_mat), &tail)
    }

    /// Objects parented to a bone of `armature_object`, with their current
    /// world matrices.
    pub fn bone_parented_worlds(&self, armature_object: &str) -> Vec<(String, Matrix4<f32>)> {
        self.objects
            .iter()
            .filter(|object| {
                object
                    .parent
                    .as_ref()
                    .is_some_and(|p| p.object == armature_object && p.bone.is_some())
            })
            .map(|object| (object.name.clone(), self.object_world(&object.name)))
            .collect()
    }

    /// Keeps an object at `world` by folding it into the local matrix and
    /// resetting the parent inverse to the current parent matrix.
    pub fn reparent_in_place(&mut self, name: &str, world: Matrix4<f32>) {
        let Some(parent) = self.object(name).and_then(|object| object.parent.clone()) else {
            return;
        };
        let inverse = invert_or_identity(&self.parent_matrix(&parent));
        if let Some(object) = self.object_mut(name) {
            object.matrix_local = world;
            object.parent_inverse = inverse;
        }
    }

    // ─── Armature lifecycle ───────────────────────────────────────────────────

    /// Re-syncs and re-evaluates every pose of `armature`.
    pub fn rebuild_poses(&mut self, armature: &str) {
        let Some(index) = self.armatures.iter().position(|a| a.name == armature) else {
            return;
        };
        let armature = &self.armatures[index];
        for object in &mut self.objects {
            if object.armature_name() != Some(armature.name.as_str()) {
                continue;
            }
            if let Some(pose) = object.pose_mut() {
                pose.rebuild(armature);
                pose.evaluate(armature);
            }
        }
    }

    pub fn enter_edit_mode(&mut self, armature: &str) -> bool {
        self.armature_mut(armature)
            .is_some_and(|armature| armature.enter_edit_mode())
    }

    /// Commits the edit bones of `armature` and refreshes its poses.
    pub fn exit_edit_mode(&mut self, armature: &str) -> bool {
        let exited = self
            .armature_mut(armature)
            .is_some_and(|armature| armature.exit_edit_mode());
        if exited {
            self.rebuild_poses(armature);
        }
        exited
    }

    /// Recomputes rest matrices and poses after loading.
    pub fn refresh(&mut self) {
        for armature in &mut self.armatures {
            armature.update_rest();
        }
        let names: Vec<String> = self.armatures.iter().map(|a| a.name.clone()).collect();
        for name in names {
            self.rebuild_poses(&name);
        }
    }
}

// ─── Persistence ──────────────────────────────────────────────────────────────

/// Save a scene document to a JSON file.
pub fn save_scene(path: &Path, scene: &Scene) -> Result<()> {
    let content =
        serde_json::to_string_pretty(scene).context("failed to serialize scene as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save scene: {}", path.display()))?;
    log_info!("saved scene to {}", path.display());
    Ok(())
}

/// Load a scene document from a JSON file and refresh derived matrices.
pub fn load_scene(path: &Path) -> Result<Scene> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load scene: {}", path.display()))?;
    let mut scene: Scene =
        serde_json::from_str(&content).context("failed to parse scene JSON")?;
    scene.refresh();
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::chain;
    use nalgebra::Translation3;

    fn posed_scene() -> Scene {
        let (edit, _) = chain(&["A", "B"]);
        let armature = Armature::from_edit("Rig", &edit);
        let mut scene = Scene::default();
        let mut rig = SceneObject::armature("RigObject", &armature);
        rig.matrix_local = Translation3::new(5.0, 0.0, 0.0).to_homogeneous();
        scene.objects.push(rig);
        scene.armatures.push(armature);
        scene
    }

    #[test]
    fn given_bone_parent_when_computing_world_then_child_sits_at_bone_tail() {
        let mut scene = posed_scene();
        let mut prop = SceneObject::empty("Prop");
        prop.parent = Some(ObjectParent {
            object: "RigObject".to_string(),
            bone: Some("B".to_string()),
        });
        scene.objects.push(prop);

        let world = scene.object_world("Prop");
        let origin = transform_point(&world, &Vector3::zeros());
        assert!((origin - Vector3::new(5.0, 2.0, 0.0)).norm() < 0.0001);
    }

    #[test]
    fn given_scene_when_serializing_then_json_round_trips() {
        let scene = posed_scene();
        let json = serde_json::to_string(&scene).expect("serialize scene");
        let mut back: Scene = serde_json::from_str(&json).expect("parse scene");
        back.refresh();
        assert_eq!(back.armatures[0].bones().len(), 2);
        assert_eq!(back.users_of("Rig"), vec!["RigObject".to_string()]);
    }

    #[test]
    fn given_edit_session_when_exiting_then_poses_follow_new_bones() {
        let mut scene = posed_scene();
        assert!(scene.enter_edit_mode("Rig"));
        let armature = scene.armature_mut("Rig").expect("armature");
        let edit = armature.edit.as_mut().expect("edit data");
        let b = edit.find("B").expect("bone B");
        edit.remove(b, true);

        assert!(scene.exit_edit_mode("Rig"));

        let rig = scene.object("RigObject").expect("rig");
        assert_eq!(rig.pose().expect("pose").channels().len(), 1);
    }
}
