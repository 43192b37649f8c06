//! Config store error-message, atomic-write-safety, upgrade and init integration tests.
//! Storage: ~/.rostersync/rosters/<roster>.yaml

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rostersync_core::{
    config,
    types::{Behavior, RegionName, RosterConfig, RosterId, RuleMode, SheetId},
    ConfigError, ConfigStore, FileConfigStore,
};
use std::fs;

fn roster() -> RosterId {
    RosterId::from("guild-1")
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_config_at(home.path(), &roster()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("roster config not found"));
    assert!(err.to_string().contains("guild-1.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".rostersync").join("rosters");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("guild-1.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_config_at(home.path(), &roster()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("guild-1.yaml"));
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".rostersync").join("rosters");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("guild-1.yaml"), b"- this is a list, not a mapping\n").expect("write");

    let err = config::load_config_at(home.path(), &roster()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file_and_sets_mode() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_config_at(home.path(), &roster(), &RosterConfig::new("abc", "Ledger"))
        .expect("save");

    let path = config::config_path_at(home.path(), &roster());
    home.child(".rostersync/rosters/guild-1.yaml")
        .assert(predicate::path::is_file());
    home.child(".rostersync/rosters/guild-1.yaml.tmp")
        .assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

// ---------------------------------------------------------------------------
// 3. Upgrade on load
// ---------------------------------------------------------------------------

#[test]
fn legacy_rule_column_is_upgraded_and_written_back() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".rostersync/rosters/guild-1.yaml")
        .write_str(
            "sheet_id: abc\nledger_region: Tracking\nrule_columns:\n  - name: B\n    mode: truefalse\n    value: ''\n    group_ids: [G1]\n",
        )
        .expect("write");

    let cfg = config::load_config_at(home.path(), &roster()).expect("load");
    assert_eq!(cfg.rule_columns.len(), 1);
    let column = &cfg.rule_columns[0];
    assert_eq!(column.locator, "B");
    assert_eq!(column.behavior, Behavior::First);
    assert_eq!(column.rules.len(), 1);
    assert_eq!(column.rules[0].mode, RuleMode::TrueFalse);
    assert!(column.rules[0].group_ids.contains("G1"));

    home.child(".rostersync/rosters/guild-1.yaml")
        .assert(predicate::str::contains("rules:"))
        .assert(predicate::str::contains("behavior: first"))
        .assert(predicate::str::contains("version: 2"));

    // Second load reads the current shape without rewriting.
    let again = config::load_config_at(home.path(), &roster()).expect("reload");
    assert_eq!(again, cfg);
}

#[test]
fn unknown_future_version_is_refused() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".rostersync/rosters/guild-1.yaml")
        .write_str("version: 7\nsheet_id: abc\n")
        .expect("write");
    let err = config::load_config_at(home.path(), &roster()).unwrap_err();
    assert!(err.to_string().contains("unsupported version 7"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 4. Init and listing
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_with_default_ledger_region() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = config::init_config_at(home.path(), &roster(), SheetId::from("abc"), None)
        .expect("init");
    assert_eq!(cfg.ledger_region.0, config::DEFAULT_LEDGER_REGION);
    home.child(".rostersync/rosters/guild-1.yaml")
        .assert(predicate::str::contains("sheet_id: abc"));
}

#[test]
fn list_rosters_is_sorted_and_ignores_other_files() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    for id in ["zeta", "alpha"] {
        config::init_config_at(
            home.path(),
            &RosterId::from(id),
            SheetId::from("s"),
            Some(RegionName::from("Ledger")),
        )
        .expect("init");
    }
    home.child(".rostersync/rosters/alpha.members.json")
        .write_str("[]")
        .expect("write");

    let ids = config::list_rosters_at(home.path()).expect("list");
    assert_eq!(ids, vec![RosterId::from("alpha"), RosterId::from("zeta")]);
}

#[test]
fn list_rosters_without_directory_is_empty() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    assert!(config::list_rosters_at(home.path()).expect("list").is_empty());
}

#[test]
fn file_store_get_after_put() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = FileConfigStore::new(home.path());
    let cfg = RosterConfig::new("abc", "Ledger");
    store.put_config(&roster(), &cfg).expect("put");
    assert_eq!(store.get_config(&roster()).expect("get"), cfg);
}
