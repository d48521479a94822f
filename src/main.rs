use std::{env, fs, path::PathBuf, process};

use anyhow::Context;
use bonekit::command::{Command, execute};
use bonekit::report::Outcome;
use bonekit::scene::{load_scene, save_scene};
use bonekit::settings::{EditSettings, load_edit_settings};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 && args.len() != 5 {
        eprintln!("Usage: bonekit <scene.json> <output.json> <command.json> [settings.json]");
        process::exit(2);
    }

    bonekit::init_logging(Box::new(|record| eprintln!("{record}")));

    let input = PathBuf::from(&args[1]);
    let output = PathBuf::from(&args[2]);
    let command_path = PathBuf::from(&args[3]);
    let settings = match args.get(4) {
        Some(path) => load_edit_settings(&PathBuf::from(path))?,
        None => EditSettings::default(),
    };

    let content = fs::read_to_string(&command_path)
        .with_context(|| format!("failed to load command: {}", command_path.display()))?;
    let command: Command =
        serde_json::from_str(&content).context("failed to parse command JSON")?;

    let mut scene = load_scene(&input)?;
    let targets: Vec<String> = scene
        .objects
        .iter()
        .filter(|object| object.armature_name().is_some())
        .map(|object| object.name.clone())
        .collect();
    let armatures: Vec<String> = scene.armatures.iter().map(|a| a.name.clone()).collect();

    if command.needs_edit_mode() {
        for armature in &armatures {
            scene.enter_edit_mode(armature);
        }
    }
    let report = execute(&mut scene, &command, &settings, &targets);
    for armature in &armatures {
        scene.exit_edit_mode(armature);
    }

    println!("Command: {}", command.name());
    for target in &report.targets {
        println!("{}: {:?}", target.target, target.outcome);
        for diagnostic in &target.diagnostics {
            println!(
                "  [{:?}] {}: {}",
                diagnostic.severity, diagnostic.code, diagnostic.message
            );
        }
    }

    save_scene(&output, &scene)?;
    if report.outcome == Outcome::Cancelled {
        process::exit(1);
    }
    Ok(())
}
