use std::fs;

use rekon_workspace::{build_function, build_triggers, Cfg, RuntimeTable};

#[test]
fn loads_config_and_reads_sources_relative_to_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("src")).expect("mkdir");
    fs::write(
        dir.path().join("config.yaml"),
        "name: greeter\nruntime: nodejs12\nsource:\n  path: src\ntriggers:\n  - source: shop\n    type: order.created\n",
    )
    .expect("write config");
    fs::write(dir.path().join("src/handler.js"), "module.exports = { main() {} }").expect("write handler");
    fs::write(dir.path().join("src/package.json"), "").expect("write deps");

    let cfg = Cfg::load(dir.path()).expect("load");
    assert_eq!(cfg.source.path, dir.path().join("src"));

    let function = build_function(&cfg, &RuntimeTable::standard(), &[]).expect("function");
    assert_eq!(function.name(), "greeter");
    assert!(function.spec.contains_key("source"));
    assert!(!function.spec.contains_key("deps"));

    let triggers = build_triggers(&cfg, function.name());
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].name(), "greeter-0");
}

#[test]
fn missing_config_is_reported_with_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = Cfg::load(dir.path()).expect_err("no config");
    assert!(format!("{:#}", err).contains("config.yaml"));
}

#[test]
fn missing_source_file_fails_the_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("config.yaml"), "name: greeter\nruntime: python38\n").expect("write config");
    fs::write(dir.path().join("handler.py"), "def main(e, c): return 'hi'").expect("write handler");
    let cfg = Cfg::load(dir.path()).expect("load");
    assert!(build_function(&cfg, &RuntimeTable::standard(), &[]).is_err());
}
