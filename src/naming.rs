use crate::armature::Constraint;
use crate::log_debug;
use crate::mirror::flip_side_name;
use crate::scene::{Modifier, ObjectData, Scene};

/// Makes `name` unique with a `<base><separator>NNN` suffix.
///
/// An empty name becomes `default_name`. When the name is taken, an existing
/// numeric suffix is incremented (`Bone.001` → `Bone.002`), otherwise `.001`
/// is appended.
///
/// # Arguments
///
/// * `name` - Requested name.
/// * `default_name` - Name used when `name` is empty.
/// * `separator` - Character between the base and the number.
/// * `is_taken` - Returns true for names already in use.
pub fn unique_name(
    name: &str,
    default_name: &str,
    separator: char,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let name = if name.is_empty() { default_name } else { name };
    if !is_taken(name) {
        return name.to_string();
    }

    let (base, mut number) = split_name_number(name, separator);
    loop {
        number += 1;
        let candidate = format!("{base}{separator}{number:03}");
        if !is_taken(&candidate) {
            return candidate;
        }
    }
}

/// Splits `Bone.012` into `("Bone", 12)`; names without a numeric suffix
/// return number zero.
fn split_name_number(name: &str, separator: char) -> (&str, u32) {
    if let Some((base, digits)) = name.rsplit_once(separator) {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(number) = digits.parse::<u32>() {
                return (base, number);
            }
        }
    }
    (name, 0)
}

/// Replaces `pose.bones["old"]` with `pose.bones["new"]` in an animation
/// path. Returns true when the path changed.
fn fix_animation_path(path: &mut String, old: &str, new: &str) -> bool {
    let from = format!("pose.bones[\"{old}\"]");
    if !path.contains(&from) {
        return false;
    }
    let to = format!("pose.bones[\"{new}\"]");
    *path = path.replace(&from, &to);
    true
}

fn fix_constraint_subtargets(
    constraints: &mut [Constraint],
    armature_object: &str,
    old: &str,
    new: &str,
) {
    for constraint in constraints {
        if constraint.target.as_deref() == Some(armature_object) && constraint.subtarget == old {
            constraint.subtarget = new.to_string();
        }
    }
}

/// Renames a bone and every reference to it across the scene.
///
/// The bone is looked up in the edit arena while the armature is in edit
/// mode, otherwise among the rest bones, and receives a unique variant of
/// `new_name`. Then pose channels of every object using the armature,
/// constraint subtargets, bone-parent names, vertex groups of meshes deformed
/// by the armature, hook modifier subtargets and animation paths are updated.
///
/// # Returns
///
/// The name actually assigned, or `None` when the armature or bone does not
/// exist.
pub fn rename_bone(
    scene: &mut Scene,
    armature_name: &str,
    old_name: &str,
    new_name: &str,
) -> Option<String> {
    if old_name == new_name {
        return None;
    }
    let armature = scene.armature_mut(armature_name)?;
    let assigned = match armature.edit.as_mut() {
        Some(edit) => {
            let id = edit.find(old_name)?;
            edit.rename(id, new_name)?
        }
        None => {
            let index = armature.find(old_name)?;
            armature.rename_bone(index, new_name)?
        }
    };
    log_debug!("renamed bone '{old_name}' to '{assigned}' in armature '{armature_name}'");

    let users: Vec<String> = scene
        .objects
        .iter()
        .filter(|object| object.armature_name() == Some(armature_name))
        .map(|object| object.name.clone())
        .collect();

    for user in &users {
        if let Some(pose) = scene.object_mut(user).and_then(|object| object.pose_mut()) {
            if let Some(chan) = pose.find_mut(old_name) {
                chan.name = assigned.clone();
            }
        }

        for object in &mut scene.objects {
            fix_constraint_subtargets(&mut object.constraints, user, old_name, &assigned);
            if let Some(pose) = object.pose_mut() {
                for chan in pose.channels_mut() {
                    fix_constraint_subtargets(&mut chan.constraints, user, old_name, &assigned);
                }
            }
        }
    }

    for object in &mut scene.objects {
        if let Some(parent) = object.parent.as_mut() {
            if users.contains(&parent.object) && parent.bone.as_deref() == Some(old_name) {
                parent.bone = Some(assigned.clone());
            }
        }

        let deformed = object.modifiers.iter().any(|modifier| {
            matches!(modifier, Modifier::Armature { object: Some(target) } if users.contains(target))
        });
        if deformed {
            if let ObjectData::Mesh { vertex_groups } = &mut object.data {
                if let Some(group) = vertex_groups.iter_mut().find(|group| group.as_str() == old_name) {
                    *group = assigned.clone();
                }
            }
        }

        for modifier in &mut object.modifiers {
            if let Modifier::Hook {
                object: Some(target),
                subtarget,
            } = modifier
            {
                if users.contains(target) && subtarget.as_str() == old_name {
                    *subtarget = assigned.clone();
                }
            }
        }
    }

    for action in &mut scene.actions {
        for curve in &mut action.curves {
            fix_animation_path(&mut curve.data_path, old_name, &assigned);
        }
    }

    Some(assigned)
}

/// Flips the side token of each named bone.
///
/// A first pass renames blindly; bones whose flipped name was still taken
/// (typically by their own counterpart, flipped later in the same pass) are
/// renamed again in a second pass, once the counterpart has moved out of
/// the way.
///
/// # Returns
///
/// Number of bones whose name changed.
pub fn flip_names(
    scene: &mut Scene,
    armature_name: &str,
    names: &[String],
    strip_numbers: bool,
) -> usize {
    let mut changed = 0;
    let mut conflicts: Vec<(String, String)> = Vec::new();

    for name in names {
        let flipped = flip_side_name(name, strip_numbers);
        if flipped == *name {
            continue;
        }
        if let Some(assigned) = rename_bone(scene, armature_name, name, &flipped) {
            changed += 1;
            if assigned != flipped {
                conflicts.push((assigned, flipped));
            }
        }
    }

    for (current, wanted) in conflicts {
        rename_bone(scene, armature_name, &current, &wanted);
    }

    changed
}
