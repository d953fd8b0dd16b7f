use std::process::Command;

use anyhow::Result;
use tempfile::tempdir;

fn qsc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_qsc"))
}

#[test]
fn seeded_session_key_export_is_refused() -> Result<()> {
    let dir = tempdir()?;
    let key_path = dir.path().join("k1");

    let out = qsc()
        .current_dir(dir.path())
        .args(["agree", "--seed", "1", "--key-out"])
        .arg(&key_path)
        .output()?;

    assert!(!out.status.success());
    assert!(!key_path.exists());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("--allow-simulated-key"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn seeded_key_export_with_explicit_opt_in() -> Result<()> {
    let dir = tempdir()?;
    let key_path = dir.path().join("k1");

    let out = qsc()
        .current_dir(dir.path())
        .args(["agree", "--seed", "1", "--allow-simulated-key", "--key-out"])
        .arg(&key_path)
        .output()?;
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(!std::fs::read_to_string(&key_path)?.trim().is_empty());

    let enc = qsc()
        .current_dir(dir.path())
        .args(["encrypt", "--text", "hi", "--key-file"])
        .arg(&key_path)
        .output()?;
    assert!(enc.status.success());
    Ok(())
}

#[test]
fn unseeded_session_key_export_is_allowed() -> Result<()> {
    let dir = tempdir()?;
    let key_path = dir.path().join("k1");

    let out = qsc()
        .current_dir(dir.path())
        .args(["agree", "--key-out"])
        .arg(&key_path)
        .output()?;
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert!(key_path.exists());
    Ok(())
}
