use std::fs;
use std::path::Path;

use scriptvm::{Engine, HostConfig, assemble_with_host_opcodes};
use tempfile::TempDir;

fn write_image(dir: &Path, name: &str, source: &str) {
    let bytes = assemble_with_host_opcodes(source).expect("assembles");
    fs::write(dir.join(format!("{name}.int")), bytes).expect("image written");
}

fn config_for(dir: &TempDir) -> HostConfig {
    HostConfig {
        script_dirs: vec![dir.path().to_path_buf()],
        tick_interval_ms: 1,
        max_ticks: Some(10_000),
        ..HostConfig::default()
    }
}

#[test]
fn runs_scripts_from_the_search_path() {
    let dir = TempDir::new().expect("temp dir");
    write_image(
        dir.path(),
        "hello",
        r#"
.proc start
    push "hello"
    print
    push 5
    wait
    timer
    push 5
    greater_equal
    print
.end
"#,
    );

    let mut engine = Engine::new(&config_for(&dir)).expect("engine");
    let transcript = engine.transcript();
    engine.start("Hello").expect("script starts");
    let summary = engine.run_until_idle();

    assert_eq!(*transcript.read(), vec!["hello".to_string(), "1".to_string()]);
    assert_eq!(summary.remaining, 0);
    assert!(summary.ticks >= 1);
}

#[test]
fn child_scripts_load_through_the_host() {
    let dir = TempDir::new().expect("temp dir");
    write_image(
        dir.path(),
        "parent",
        r#"
.proc start
    push "child"
    callstart
    push "parent done"
    print
.end
"#,
    );
    write_image(
        dir.path(),
        "child",
        r#"
.proc start
    push "child done"
    print
    exit
.end
"#,
    );

    let mut engine = Engine::new(&config_for(&dir)).expect("engine");
    let transcript = engine.transcript();
    engine.start("parent").expect("script starts");
    engine.run_until_idle();
    assert_eq!(
        *transcript.read(),
        vec!["child done".to_string(), "parent done".to_string()]
    );
    assert!(engine.runtime().is_empty());
}

#[test]
fn missing_scripts_are_reported() {
    let dir = TempDir::new().expect("temp dir");
    let mut engine = Engine::new(&config_for(&dir)).expect("engine");
    let err = engine.start("ghost").expect_err("nothing to load");
    assert!(format!("{err:#}").contains("ghost"));
}

#[test]
fn the_tick_budget_bounds_a_run() {
    let dir = TempDir::new().expect("temp dir");
    write_image(
        dir.path(),
        "forever",
        r#"
.proc start
top:
    push 1
    wait
    push @top
    jump
.end
"#,
    );
    let config = HostConfig {
        max_ticks: Some(3),
        tick_interval_ms: 0,
        ..config_for(&dir)
    };
    let mut engine = Engine::new(&config).expect("engine");
    engine.start("forever").expect("script starts");
    let summary = engine.run_until_idle();
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.remaining, 1);
}

#[test]
fn config_files_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("nested").join("config.toml");
    let mut config = HostConfig::default();
    config.runtime.burst_size = 42;
    config.extension = "svm".to_string();
    config.save(&path).expect("saved");

    let (loaded, from) = HostConfig::load(Some(&path)).expect("loads");
    assert_eq!(loaded, config);
    assert_eq!(from.as_deref(), Some(path.as_path()));

    let missing = dir.path().join("absent.toml");
    assert!(HostConfig::load(Some(&missing)).is_err());
}
