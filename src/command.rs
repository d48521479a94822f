//! Command layer: runs one operation on every target object and collects
//! the per-target outcomes into a [`CommandReport`].

use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::armature::{BoneFlags, EditArmature, UndoSnapshot};
use crate::bake::apply_pose_as_rest;
use crate::error::EditError;
use crate::log_info;
use crate::logging::ResultExt;
use crate::mirror::mirror_update;
use crate::naming::{flip_names, rename_bone};
use crate::ops::{
    EditTarget, FillOptions, align_bones, delete_selected, dissolve_selected,
    fill_between_joints, hide_bones, reveal_bones, split_selected, switch_direction,
};
use crate::report::{ChangeKind, ChangeNotification, CommandReport, OpOutput, TargetReport};
use crate::roll::{RollSource, calc_roll, clear_roll};
use crate::scene::Scene;
use crate::settings::EditSettings;

/// Operations the command layer can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SwitchDirection,
    /// Fill between joints; `cursor` is in world space.
    Fill { cursor: Vector3<f32> },
    Align,
    Dissolve,
    Split,
    Delete,
    Hide {
        #[serde(default)]
        unselected: bool,
    },
    Reveal {
        #[serde(default = "default_true")]
        select: bool,
    },
    CalcRoll {
        source: RollSource,
        #[serde(default)]
        axis_flip: bool,
        #[serde(default)]
        axis_only: bool,
    },
    ClearRoll {
        #[serde(default)]
        roll: f32,
    },
    FlipNames,
    /// Copies the selected bones onto their mirror counterparts.
    MirrorSelected,
    ApplyPoseAsRest {
        /// Overrides [`EditSettings::bake_selected_only`].
        #[serde(default)]
        selected_only: Option<bool>,
    },
    Rename { old: String, new: String },
}

fn default_true() -> bool {
    true
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SwitchDirection => "switch_direction",
            Command::Fill { .. } => "fill",
            Command::Align => "align",
            Command::Dissolve => "dissolve",
            Command::Split => "split",
            Command::Delete => "delete",
            Command::Hide { .. } => "hide",
            Command::Reveal { .. } => "reveal",
            Command::CalcRoll { .. } => "calc_roll",
            Command::ClearRoll { .. } => "clear_roll",
            Command::FlipNames => "flip_names",
            Command::MirrorSelected => "mirror_selected",
            Command::ApplyPoseAsRest { .. } => "apply_pose_as_rest",
            Command::Rename { .. } => "rename",
        }
    }

    /// Whether the command works on edit bones and needs edit mode.
    pub fn needs_edit_mode(&self) -> bool {
        !matches!(
            self,
            Command::FlipNames | Command::ApplyPoseAsRest { .. } | Command::Rename { .. }
        )
    }
}

/// Runs `command` on every target object.
///
/// Targets are processed one after another and independently: a failing
/// target is reported as cancelled and the others still run. Fill is the
/// exception, it looks at the joints of all targets at once.
pub fn execute(
    scene: &mut Scene,
    command: &Command,
    settings: &EditSettings,
    targets: &[String],
) -> CommandReport {
    log_info!("running {} on {} target(s)", command.name(), targets.len());

    let results = match command {
        Command::Fill { cursor } => fill_targets(scene, targets, cursor, settings),
        _ => targets
            .iter()
            .map(|target| {
                let result = run_on_target(scene, command, settings, target);
                (target.clone(), result)
            })
            .collect(),
    };

    let mut reports = Vec::with_capacity(results.len());
    let mut notifications = Vec::new();
    for (target, result) in results {
        let context = format!("{} on '{}'", command.name(), target);
        let result = result.log_error(Some(&context));
        if let Ok(output) = &result {
            notifications.extend(output.changed.iter().map(|kind| ChangeNotification {
                target: target.clone(),
                kind: *kind,
            }));
        }
        reports.push(TargetReport::from_result(&target, &result));
    }

    CommandReport::from_targets(reports, notifications)
}

fn run_on_target(
    scene: &mut Scene,
    command: &Command,
    settings: &EditSettings,
    target: &str,
) -> Result<OpOutput, EditError> {
    match command {
        Command::SwitchDirection => {
            edit_op(scene, target, settings, |arm| Ok(switch_direction(arm)))
        }
        Command::Fill { cursor } => fill_targets(scene, &[target.to_string()], cursor, settings)
            .pop()
            .map_or_else(|| Ok(OpOutput::unchanged()), |(_, result)| result),
        Command::Align => edit_op(scene, target, settings, align_bones),
        Command::Dissolve => edit_op(scene, target, settings, |arm| Ok(dissolve_selected(arm))),
        Command::Split => edit_op(scene, target, settings, |arm| Ok(split_selected(arm))),
        Command::Delete => edit_op(scene, target, settings, |arm| Ok(delete_selected(arm))),
        Command::Hide { unselected } => {
            edit_op(scene, target, settings, |arm| Ok(hide_bones(arm, *unselected)))
        }
        Command::Reveal { select } => {
            edit_op(scene, target, settings, |arm| Ok(reveal_bones(arm, *select)))
        }
        Command::CalcRoll {
            source,
            axis_flip,
            axis_only,
        } => {
            let world = scene.object_world(target);
            edit_op(scene, target, settings, |arm| {
                calc_roll(arm, source, *axis_flip, *axis_only, &world)
            })
        }
        Command::ClearRoll { roll } => {
            edit_op(scene, target, settings, |arm| Ok(clear_roll(arm, *roll)))
        }
        Command::MirrorSelected => {
            edit_op(scene, target, settings, |arm| Ok(mirror_selected(arm)))
        }
        Command::FlipNames => flip_selected_names(scene, target, settings),
        Command::ApplyPoseAsRest { selected_only } => apply_pose_as_rest(
            scene,
            target,
            selected_only.unwrap_or(settings.bake_selected_only),
        ),
        Command::Rename { old, new } => {
            let armature = resolve(scene, target)?;
            Ok(match rename_bone(scene, &armature, old, new) {
                Some(_) => OpOutput::changed(&[ChangeKind::Naming]),
                None => OpOutput::unchanged(),
            })
        }
    }
}

/// Armature name behind an object.
fn resolve(scene: &Scene, object: &str) -> Result<String, EditError> {
    let armature = scene
        .object(object)
        .ok_or_else(|| EditError::UnknownObject(object.to_string()))?
        .armature_name()
        .ok_or_else(|| EditError::NotAnArmature(object.to_string()))?;
    if scene.armature(armature).is_none() {
        return Err(EditError::UnknownArmature(armature.to_string()));
    }
    Ok(armature.to_string())
}

fn edit_armature<'a>(
    scene: &'a mut Scene,
    armature: &str,
) -> Result<&'a mut EditArmature, EditError> {
    scene
        .armature_mut(armature)
        .ok_or_else(|| EditError::UnknownArmature(armature.to_string()))?
        .edit
        .as_mut()
        .ok_or_else(|| EditError::NotInEditMode(armature.to_string()))
}

/// Runs an edit-mode operation with the mirror setting applied. A failed
/// operation is rolled back from a snapshot.
fn edit_op<F>(
    scene: &mut Scene,
    target: &str,
    settings: &EditSettings,
    op: F,
) -> Result<OpOutput, EditError>
where
    F: FnOnce(&mut EditArmature) -> Result<OpOutput, EditError>,
{
    let armature = resolve(scene, target)?;
    let edit = edit_armature(scene, &armature)?;
    let snapshot = UndoSnapshot::capture(armature, edit);

    let own_mirror = edit.mirror_edit;
    if let Some(mirror_edit) = settings.mirror_edit {
        edit.mirror_edit = mirror_edit;
    }
    let result = op(edit);
    if result.is_err() {
        snapshot.restore(edit);
    }
    edit.mirror_edit = own_mirror;
    result
}

fn fill_targets(
    scene: &mut Scene,
    targets: &[String],
    cursor: &Vector3<f32>,
    settings: &EditSettings,
) -> Vec<(String, Result<OpOutput, EditError>)> {
    let mut results: Vec<(String, Result<OpOutput, EditError>)> = Vec::new();
    // (result slot, armature name, object matrix)
    let mut participants: Vec<(usize, String, Matrix4<f32>)> = Vec::new();

    for target in targets {
        let resolved = resolve(scene, target).and_then(|armature| {
            if scene.armature(&armature).is_some_and(|a| a.is_editing()) {
                Ok(armature)
            } else {
                Err(EditError::NotInEditMode(armature))
            }
        });
        match resolved {
            Ok(armature) => {
                if !participants.iter().any(|(_, name, _)| *name == armature) {
                    participants.push((results.len(), armature, scene.object_world(target)));
                }
                results.push((target.clone(), Ok(OpOutput::unchanged())));
            }
            Err(error) => results.push((target.clone(), Err(error))),
        }
    }
    if participants.is_empty() {
        return results;
    }

    let options = FillOptions {
        cursor: *cursor,
        bone_name: settings.fill.bone_name.clone(),
    };
    let mut slots = Vec::with_capacity(participants.len());
    let mut edit_targets: Vec<EditTarget<'_>> = Vec::with_capacity(participants.len());
    for armature in &mut scene.armatures {
        let Some((slot, _, world)) =
            participants.iter().find(|(_, name, _)| *name == armature.name)
        else {
            continue;
        };
        let name = armature.name.clone();
        let Some(edit) = armature.edit.as_mut() else {
            continue;
        };
        slots.push(*slot);
        edit_targets.push(EditTarget {
            name,
            object_to_world: *world,
            armature: edit,
        });
    }

    match fill_between_joints(&mut edit_targets, &options) {
        Ok(Some(filled)) => {
            results[slots[filled.target]].1 =
                Ok(OpOutput::changed(&[ChangeKind::Geometry, ChangeKind::Selection]));
        }
        Ok(None) => {}
        Err(error) => {
            for slot in slots {
                results[slot].1 = Err(error.clone());
            }
        }
    }
    results
}

fn flip_selected_names(
    scene: &mut Scene,
    target: &str,
    settings: &EditSettings,
) -> Result<OpOutput, EditError> {
    let armature_name = resolve(scene, target)?;
    let armature = scene
        .armature(&armature_name)
        .ok_or_else(|| EditError::UnknownArmature(armature_name.clone()))?;
    let names: Vec<String> = match &armature.edit {
        Some(edit) => edit
            .iter()
            .filter(|(id, _)| edit.is_editable(*id))
            .map(|(_, bone)| bone.name.clone())
            .collect(),
        None => armature
            .bones()
            .iter()
            .filter(|bone| {
                bone.flags.contains(BoneFlags::SELECTED) && bone.is_visible(&armature.collections)
            })
            .map(|bone| bone.name.clone())
            .collect(),
    };

    let flipped = flip_names(scene, &armature_name, &names, settings.strip_numbers_on_flip);
    Ok(if flipped > 0 {
        OpOutput::changed(&[ChangeKind::Naming])
    } else {
        OpOutput::unchanged()
    })
}

fn mirror_selected(armature: &mut EditArmature) -> OpOutput {
    let mut changed = false;
    for id in armature.ids() {
        if armature.is_editable(id) && mirror_update(armature, id, true).is_some() {
            changed = true;
        }
    }
    if changed {
        OpOutput::changed(&[ChangeKind::Geometry])
    } else {
        OpOutput::unchanged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{Armature, chain};
    use crate::report::Outcome;
    use crate::scene::SceneObject;

    fn two_rigs() -> Scene {
        let mut scene = Scene::default();
        for suffix in ["A", "B"] {
            let (edit, _) = chain(&["Root", "Tip"]);
            let armature = Armature::from_edit(format!("Rig{suffix}"), &edit);
            scene.objects.push(SceneObject::armature(format!("Obj{suffix}"), &armature));
            scene.armatures.push(armature);
        }
        scene.enter_edit_mode("RigA");
        scene.enter_edit_mode("RigB");
        scene
    }

    fn edit<'a>(scene: &'a mut Scene, armature: &str) -> &'a mut EditArmature {
        edit_armature(scene, armature).expect("edit data")
    }

    fn targets() -> Vec<String> {
        vec!["ObjA".to_string(), "ObjB".to_string()]
    }

    #[test]
    fn given_unknown_object_when_executing_then_target_is_cancelled() {
        let mut scene = two_rigs();
        let report = execute(
            &mut scene,
            &Command::Split,
            &EditSettings::default(),
            &["Ghost".to_string()],
        );

        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(report.targets[0].diagnostics[0].code, "UNKNOWN_OBJECT");
    }

    #[test]
    fn given_armature_out_of_edit_mode_when_switching_then_not_in_edit_mode() {
        let mut scene = two_rigs();
        scene.exit_edit_mode("RigB");

        let report = execute(
            &mut scene,
            &Command::SwitchDirection,
            &EditSettings::default(),
            &["ObjB".to_string()],
        );

        assert_eq!(report.targets[0].diagnostics[0].code, "NOT_IN_EDIT_MODE");
    }

    #[test]
    fn given_one_target_without_active_bone_when_aligning_then_the_other_still_runs() {
        let mut scene = two_rigs();
        let rig = edit(&mut scene, "RigA");
        let tip = rig.find("Tip").expect("Tip");
        rig.select(tip, true);
        rig.set_active(Some(tip));

        let report = execute(&mut scene, &Command::Align, &EditSettings::default(), &targets());

        assert_eq!(report.outcome, Outcome::Finished);
        assert_eq!(report.targets[0].outcome, Outcome::Finished);
        assert_eq!(report.targets[1].outcome, Outcome::Cancelled);
        assert_eq!(report.targets[1].diagnostics[0].code, "NO_ACTIVE_BONE");
        assert!(report
            .notifications
            .iter()
            .all(|notification| notification.target == "ObjA"));
    }

    #[test]
    fn given_tip_selected_in_one_target_when_filling_then_bone_goes_to_that_target() {
        let mut scene = two_rigs();
        let rig = edit(&mut scene, "RigB");
        let tip = rig.find("Tip").expect("Tip");
        rig[tip].flags |= BoneFlags::TIP_SELECTED;

        let command = Command::Fill {
            cursor: Vector3::new(0.0, 3.0, 0.0),
        };
        let report = execute(&mut scene, &command, &EditSettings::default(), &targets());

        assert_eq!(report.targets[0].outcome, Outcome::NothingChanged);
        assert_eq!(report.targets[1].outcome, Outcome::Finished);
        let rig = edit(&mut scene, "RigB");
        let bone = rig.find("Bone").expect("new bone");
        assert_eq!(rig[bone].parent, Some(tip));
        assert!(rig[bone].is_connected());
        assert_eq!(edit(&mut scene, "RigA").len(), 2);
    }

    #[test]
    fn given_nothing_selected_when_filling_then_every_target_is_cancelled() {
        let mut scene = two_rigs();
        let command = Command::Fill {
            cursor: Vector3::zeros(),
        };

        let report = execute(&mut scene, &command, &EditSettings::default(), &targets());

        assert!(report
            .targets
            .iter()
            .all(|target| target.diagnostics[0].code == "NO_JOINTS_SELECTED"));
    }

    #[test]
    fn given_mirror_override_when_running_then_armature_flag_is_untouched() {
        let mut scene = two_rigs();
        let settings = EditSettings {
            mirror_edit: Some(true),
            ..EditSettings::default()
        };

        execute(&mut scene, &Command::Dissolve, &settings, &targets());

        assert!(!edit(&mut scene, "RigA").mirror_edit);
    }

    #[test]
    fn given_edit_mode_when_applying_pose_as_rest_then_in_edit_mode_error() {
        let mut scene = two_rigs();
        let command = Command::ApplyPoseAsRest {
            selected_only: None,
        };

        let report = execute(&mut scene, &command, &EditSettings::default(), &targets());

        assert_eq!(report.targets[0].diagnostics[0].code, "IN_EDIT_MODE");
    }

    #[test]
    fn given_json_command_when_parsing_then_defaults_fill_in() {
        let command: Command =
            serde_json::from_str(r#"{"type": "reveal"}"#).expect("parse command");
        assert_eq!(command, Command::Reveal { select: true });

        let command: Command = serde_json::from_str(
            r#"{"type": "calc_roll", "source": {"type": "global_pos_z"}}"#,
        )
        .expect("parse command");
        assert!(command.needs_edit_mode());
    }
}
