use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn scriptvm() -> Command {
    Command::new(env!("CARGO_BIN_EXE_scriptvm"))
}

#[test]
fn assembles_inspects_and_runs_an_image() {
    let dir = TempDir::new().expect("temp dir");
    let config = dir.path().join("config.toml");
    fs::write(&config, "tick_interval_ms = 0\nmax_ticks = 100\n").expect("config written");
    let source = dir.path().join("greet.asm");
    fs::write(
        &source,
        r#"
.proc start
    push "hi from greet"
    print
.end
"#,
    )
    .expect("source written");
    let image = dir.path().join("greet.int");

    let status = scriptvm()
        .arg("--config")
        .arg(&config)
        .arg("asm")
        .arg(&source)
        .arg("-o")
        .arg(&image)
        .status()
        .expect("asm runs");
    assert!(status.success());
    assert!(image.exists());

    let info = scriptvm()
        .arg("--config")
        .arg(&config)
        .arg("info")
        .arg(&image)
        .output()
        .expect("info runs");
    assert!(info.status.success());
    let stdout = String::from_utf8_lossy(&info.stdout);
    assert!(stdout.contains("procedures  1"));
    assert!(stdout.contains("entry       start"));

    let listing = scriptvm()
        .arg("--config")
        .arg(&config)
        .arg("disasm")
        .arg(&image)
        .output()
        .expect("disasm runs");
    assert!(String::from_utf8_lossy(&listing.stdout).contains("PUSH \"hi from greet\""));

    let run = scriptvm()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg(&image)
        .output()
        .expect("run runs");
    assert!(run.status.success());
    assert!(String::from_utf8_lossy(&run.stdout).contains("hi from greet"));
}

#[test]
fn assembly_errors_fail_the_command() {
    let dir = TempDir::new().expect("temp dir");
    let config = dir.path().join("config.toml");
    fs::write(&config, "").expect("config written");
    let source = dir.path().join("bad.asm");
    fs::write(&source, ".proc start\n    frobnicate\n.end\n").expect("source written");

    let output = scriptvm()
        .arg("--config")
        .arg(&config)
        .arg("asm")
        .arg(&source)
        .arg("-o")
        .arg(dir.path().join("bad.int"))
        .output()
        .expect("asm runs");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown opcode frobnicate at line 2"));
}
