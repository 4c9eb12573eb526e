use std::error::Error;
use std::fs;

use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn cli() -> Result<Command, Box<dyn Error>> {
    Ok(Command::cargo_bin("tagtree-cli")?)
}

#[test]
fn export_emits_the_snapshot_as_json() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let proj = temp.path().join("proj");
    fs::create_dir_all(&proj)?;
    fs::write(proj.join("aa.ts"), "// FIXME first entry\n")?;
    fs::write(proj.join("zz.ts"), "// TODO second entry\n")?;

    let output = cli()?
        .args(["export", proj.to_str().unwrap()])
        .output()?;
    assert!(output.status.success());

    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        snapshot["proj"]["aa.ts"]["line 1"],
        Value::String("FIXME first entry".to_string())
    );
    assert_eq!(
        snapshot["proj"]["zz.ts"]["line 1"],
        Value::String("TODO second entry".to_string())
    );

    Ok(())
}

#[test]
fn export_respects_the_filter() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let proj = temp.path().join("proj");
    fs::create_dir_all(&proj)?;
    fs::write(proj.join("aa.ts"), "// TODO keep this one\n")?;
    fs::write(proj.join("zz.ts"), "// TODO drop the other\n")?;

    let output = cli()?
        .args(["export", proj.to_str().unwrap(), "--filter", "keep"])
        .output()?;
    assert!(output.status.success());

    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        snapshot["proj"]["aa.ts"]["line 1"],
        Value::String("TODO keep this one".to_string())
    );
    assert!(snapshot["proj"].get("zz.ts").is_none());

    Ok(())
}

#[test]
fn export_tags_only_keys_leaves_by_path_and_line() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let proj = temp.path().join("proj");
    fs::create_dir_all(&proj)?;
    fs::write(proj.join("api.ts"), "// TODO tighten validation\n")?;
    fs::write(proj.join("ui.ts"), "// TODO focus the field\n")?;

    let output = cli()?
        .args(["export", proj.to_str().unwrap(), "--tags-only"])
        .output()?;
    assert!(output.status.success());

    let snapshot: Value = serde_json::from_slice(&output.stdout)?;
    let head = snapshot["TODO"]
        .as_object()
        .ok_or("expected a TODO branch")?;
    assert_eq!(head.len(), 2);
    let (key, value) = head.iter().next().ok_or("expected leaves")?;
    assert!(key.ends_with("api.ts line 1"));
    assert_eq!(value, &Value::String("tighten validation".to_string()));

    Ok(())
}
