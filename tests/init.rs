use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_histmine"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "histmine init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".histmine.toml");
    assert!(config_path.exists(), ".histmine.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[mining]"));
    assert!(content.contains("[cache]"));

    let config: histmine_core::MinerConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.mining.max_files_per_commit, 5000);
    assert!(config.mining.validate().is_ok());
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".histmine.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_histmine"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".histmine.toml")).unwrap();
    assert_eq!(content, "# existing");
}
