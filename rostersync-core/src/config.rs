//! Per-roster YAML configuration store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.rostersync/
//!   rosters/
//!     <roster>.yaml   (one file per roster — mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! # Versions
//!
//! Version 1 files store each rule column as a single implicit rule
//! (`name`, `mode`, `value`, `group_ids`) and layouts as a
//! `username_mappings` table keyed by worksheet. [`upgrade_config`] turns
//! either shape into the current [`RosterConfig`]; [`load_config_at`] writes
//! the upgraded form back so the upgrade runs once.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::{
    Axis, Behavior, LayoutConfig, RegionName, RosterConfig, RosterId, Rule, RuleColumn, RuleMode,
    ScheduleConfig, Scope, SheetId, CONFIG_VERSION,
};

/// Default name of the tracking region when a config does not set one.
pub const DEFAULT_LEDGER_REGION: &str = "Ledger";

// ---------------------------------------------------------------------------
// 1. Store seam
// ---------------------------------------------------------------------------

/// Plain key-value persistence for roster configuration.
pub trait ConfigStore: Send + Sync {
    fn get_config(&self, roster: &RosterId) -> Result<RosterConfig, ConfigError>;
    fn put_config(&self, roster: &RosterId, config: &RosterConfig) -> Result<(), ConfigError>;
}

/// [`ConfigStore`] backed by `<home>/.rostersync/rosters/*.yaml`.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    home: PathBuf,
}

impl FileConfigStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl ConfigStore for FileConfigStore {
    fn get_config(&self, roster: &RosterId) -> Result<RosterConfig, ConfigError> {
        load_config_at(&self.home, roster)
    }

    fn put_config(&self, roster: &RosterId, config: &RosterConfig) -> Result<(), ConfigError> {
        save_config_at(&self.home, roster, config)
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.rostersync/` — pure, no I/O.
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".rostersync")
}

/// `<home>/.rostersync/rosters/` — pure, no I/O.
pub fn rosters_dir_path(home: &Path) -> PathBuf {
    root_at(home).join("rosters")
}

/// `<home>/.rostersync/rosters/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn rosters_dir_at(home: &Path) -> Result<PathBuf, ConfigError> {
    let dir = rosters_dir_path(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.rostersync/rosters/<roster>.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path, roster: &RosterId) -> PathBuf {
    rosters_dir_path(home).join(format!("{}.yaml", roster.0))
}

/// Lists every roster with a config file, sorted by id.
pub fn list_rosters_at(home: &Path) -> Result<Vec<RosterId>, ConfigError> {
    let dir = rosters_dir_path(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut ids: Vec<RosterId> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".yaml").map(RosterId::from)
        })
        .collect();
    ids.sort();
    Ok(ids)
}

/// `list_rosters_at` convenience wrapper.
pub fn list_rosters() -> Result<Vec<RosterId>, ConfigError> {
    list_rosters_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Load (with upgrade)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RosterConfigCompat {
    #[serde(default)]
    version: Option<u32>,
    sheet_id: SheetId,
    #[serde(default = "default_ledger_region")]
    ledger_region: RegionName,
    #[serde(default)]
    layouts: Vec<LayoutConfig>,
    #[serde(default)]
    username_mappings: BTreeMap<String, LegacyMapping>,
    #[serde(default, alias = "role_columns")]
    rule_columns: Vec<RuleColumnCompat>,
    #[serde(default)]
    schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize)]
struct LegacyMapping {
    #[serde(default)]
    row: Option<usize>,
    #[serde(default)]
    col: Option<usize>,
    #[serde(default)]
    direction: Axis,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleColumnCompat {
    Current(RuleColumn),
    Legacy(LegacyRuleColumn),
}

#[derive(Debug, Deserialize)]
struct LegacyRuleColumn {
    #[serde(alias = "locator")]
    name: String,
    mode: RuleMode,
    #[serde(default)]
    value: String,
    #[serde(default)]
    group_ids: BTreeSet<String>,
}

fn default_ledger_region() -> RegionName {
    RegionName::from(DEFAULT_LEDGER_REGION)
}

/// Result of running [`upgrade_config`] over a raw document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgraded {
    pub config: RosterConfig,
    /// `true` if the document was in an older shape and should be rewritten.
    pub changed: bool,
}

/// Parse a YAML document in any supported shape and upgrade it to the
/// current version. `path` only labels errors.
pub fn upgrade_config(yaml: &str, path: &Path) -> Result<Upgraded, ConfigError> {
    let raw: RosterConfigCompat = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let version = raw.version.unwrap_or(1);
    if version > CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        });
    }
    let mut changed = version < CONFIG_VERSION;

    let mut layouts = raw.layouts;
    for (worksheet, mapping) in raw.username_mappings {
        changed = true;
        layouts.push(LayoutConfig {
            region: RegionName::from(worksheet),
            anchor_row: mapping.row,
            anchor_col: mapping.col,
            axis: mapping.direction,
            scope: Scope::All,
            required_group_ids: Vec::new(),
        });
    }

    let rule_columns = raw
        .rule_columns
        .into_iter()
        .map(|column| match column {
            RuleColumnCompat::Current(column) => column,
            RuleColumnCompat::Legacy(legacy) => {
                changed = true;
                RuleColumn {
                    locator: legacy.name,
                    rules: vec![Rule {
                        mode: legacy.mode,
                        value: legacy.value,
                        group_ids: legacy.group_ids,
                    }],
                    behavior: Behavior::First,
                }
            }
        })
        .collect();

    Ok(Upgraded {
        config: RosterConfig {
            version: CONFIG_VERSION,
            sheet_id: raw.sheet_id,
            ledger_region: raw.ledger_region,
            layouts,
            rule_columns,
            schedule: raw.schedule,
        },
        changed,
    })
}

/// Load the config for `roster`, upgrading and persisting older shapes.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_config_at(home: &Path, roster: &RosterId) -> Result<RosterConfig, ConfigError> {
    let path = config_path_at(home, roster);
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let upgraded = upgrade_config(&contents, &path)?;
    if upgraded.changed {
        save_config_at(home, roster, &upgraded.config)?;
    }
    Ok(upgraded.config)
}

/// `load_config_at` convenience wrapper.
pub fn load_config(roster: &RosterId) -> Result<RosterConfig, ConfigError> {
    load_config_at(&home()?, roster)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config for `roster`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_config_at(
    home: &Path,
    roster: &RosterId,
    config: &RosterConfig,
) -> Result<(), ConfigError> {
    rosters_dir_at(home)?;
    let path = config_path_at(home, roster);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", roster.0));

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_config_at` convenience wrapper.
pub fn save_config(roster: &RosterId, config: &RosterConfig) -> Result<(), ConfigError> {
    save_config_at(&home()?, roster, config)
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Create a config for `roster` pointing at `sheet_id`.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn init_config_at(
    home: &Path,
    roster: &RosterId,
    sheet_id: SheetId,
    ledger_region: Option<RegionName>,
) -> Result<RosterConfig, ConfigError> {
    if config_path_at(home, roster).exists() {
        return load_config_at(home, roster);
    }
    let config = RosterConfig::new(
        sheet_id,
        ledger_region.unwrap_or_else(default_ledger_region),
    );
    save_config_at(home, roster, &config)?;
    Ok(config)
}

/// `init_config_at` convenience wrapper.
pub fn init_config(
    roster: &RosterId,
    sheet_id: SheetId,
    ledger_region: Option<RegionName>,
) -> Result<RosterConfig, ConfigError> {
    init_config_at(&home()?, roster, sheet_id, ledger_region)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Resolve the user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn roster() -> RosterId {
        RosterId::from("guild-1")
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        let path = config_path_at(home.path(), &roster());
        assert!(path.ends_with(".rostersync/rosters/guild-1.yaml"));
    }

    #[test]
    fn rosters_dir_created_with_perms() {
        let home = TempDir::new().expect("tempdir");
        let dir = rosters_dir_at(home.path()).expect("rosters_dir_at");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn legacy_single_rule_column_is_upgraded() {
        let yaml = r#"
sheet_id: abc
rule_columns:
  - name: B
    mode: truefalse
    value: ""
    group_ids: [G1]
"#;
        let upgraded = upgrade_config(yaml, Path::new("mem.yaml")).expect("upgrade");
        assert!(upgraded.changed);
        assert_eq!(upgraded.config.version, CONFIG_VERSION);
        assert_eq!(
            upgraded.config.rule_columns,
            vec![RuleColumn {
                locator: "B".into(),
                rules: vec![Rule {
                    mode: RuleMode::TrueFalse,
                    value: String::new(),
                    group_ids: ["G1".to_string()].into_iter().collect(),
                }],
                behavior: Behavior::First,
            }]
        );
        assert_eq!(upgraded.config.ledger_region.0, DEFAULT_LEDGER_REGION);
    }

    #[test]
    fn username_mappings_become_layouts() {
        let yaml = r#"
sheet_id: abc
username_mappings:
  Roster:
    row: 3
    col: 1
    direction: horizontal
"#;
        let upgraded = upgrade_config(yaml, Path::new("mem.yaml")).expect("upgrade");
        let layout = &upgraded.config.layouts[0];
        assert_eq!(layout.region.0, "Roster");
        assert_eq!(layout.anchor_row, Some(3));
        assert_eq!(layout.anchor_col, Some(1));
        assert_eq!(layout.axis, Axis::Horizontal);
    }

    #[test]
    fn current_document_is_not_marked_changed() {
        let cfg = RosterConfig::new("abc", "Ledger");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let upgraded = upgrade_config(&yaml, Path::new("mem.yaml")).unwrap();
        assert!(!upgraded.changed);
        assert_eq!(upgraded.config, cfg);
    }

    #[test]
    fn future_version_is_rejected() {
        let yaml = "version: 99\nsheet_id: abc\n";
        let err = upgrade_config(yaml, Path::new("mem.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion { version: 99, .. }));
    }

    #[test]
    fn load_missing_config_returns_not_found() {
        let home = TempDir::new().expect("tempdir");
        let err = load_config_at(home.path(), &roster()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        save_config_at(home.path(), &roster(), &RosterConfig::new("abc", "Ledger")).expect("save");
        let tmp = config_path_at(home.path(), &roster()).with_file_name("guild-1.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn init_is_idempotent() {
        let home = TempDir::new().expect("tempdir");
        let first = init_config_at(home.path(), &roster(), SheetId::from("abc"), None).unwrap();
        let second = init_config_at(
            home.path(),
            &roster(),
            SheetId::from("other"),
            Some(RegionName::from("Elsewhere")),
        )
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.sheet_id.0, "abc");
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
