//! File-backed grid store and roster source.
//!
//! ```text
//! ~/.rostersync/
//!   rosters/<roster>.members.json     Vec<Identity>
//!   sheets/<sheet_id>/<region>.json   Vec<Vec<String>>
//! ```
//!
//! Region files are replaced atomically (`.tmp` sibling + rename).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use rostersync_core::config::{root_at, rosters_dir_path};
use rostersync_core::{CellRef, GridSnapshot, Identity, RegionName, RosterId, SheetId};

use crate::error::StoreError;
use crate::store::{next_free_row, GridStore, RosterSource};

/// `<home>/.rostersync/sheets/<sheet_id>/` — pure, no I/O.
pub fn sheet_dir_at(home: &Path, sheet: &SheetId) -> PathBuf {
    root_at(home).join("sheets").join(&sheet.0)
}

/// `<home>/.rostersync/rosters/<roster>.members.json` — pure, no I/O.
pub fn members_path_at(home: &Path, roster: &RosterId) -> PathBuf {
    rosters_dir_path(home).join(format!("{}.members.json", roster.0))
}

/// Map an I/O failure onto the store's retry classification.
fn classify(path: &Path, e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            StoreError::Transient(format!("{}: {e}", path.display()))
        }
        _ => StoreError::Fatal(format!("{}: {e}", path.display())),
    }
}

// ---------------------------------------------------------------------------
// LocalWorkbook
// ---------------------------------------------------------------------------

/// A sheet stored as one JSON file per region.
#[derive(Debug, Clone)]
pub struct LocalWorkbook {
    dir: PathBuf,
}

impl LocalWorkbook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn open_at(home: &Path, sheet: &SheetId) -> Self {
        Self::new(sheet_dir_at(home, sheet))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn region_path(&self, region: &RegionName) -> Result<PathBuf, StoreError> {
        let name = region.0.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::Fatal(format!("invalid region name '{name}'")));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn load(&self, region: &RegionName) -> Result<GridSnapshot, StoreError> {
        let path = self.region_path(region)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Fatal(format!("region '{region}' does not exist")));
            }
            Err(e) => return Err(classify(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Fatal(format!("{}: {e}", path.display())))
    }

    async fn store(&self, region: &RegionName, snapshot: &GridSnapshot) -> Result<(), StoreError> {
        let path = self.region_path(region)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| classify(&self.dir, e))?;
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::Fatal(format!("{}: {e}", path.display())))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| classify(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(classify(&path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl GridStore for LocalWorkbook {
    async fn read_region(&self, region: &RegionName) -> Result<GridSnapshot, StoreError> {
        self.load(region).await
    }

    async fn write_range(
        &self,
        region: &RegionName,
        top_left: CellRef,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let mut snapshot = self.load(region).await?;
        snapshot.paste(top_left, rows);
        self.store(region, &snapshot).await
    }

    async fn append_row(&self, region: &RegionName, row: &[String]) -> Result<(), StoreError> {
        let mut snapshot = self.load(region).await?;
        let at = CellRef::new(next_free_row(&snapshot), 0);
        snapshot.paste(at, &[row.to_vec()]);
        self.store(region, &snapshot).await
    }

    async fn create_region(
        &self,
        region: &RegionName,
        header: &[String],
    ) -> Result<(), StoreError> {
        let path = self.region_path(region)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::Fatal(format!("region '{region}' already exists")));
        }
        self.store(region, &GridSnapshot::new(vec![header.to_vec()]))
            .await
    }

    async fn list_regions(&self) -> Result<Vec<RegionName>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(classify(&self.dir, e)),
        };
        let mut regions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| classify(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(region) = name.strip_suffix(".json") {
                regions.push(RegionName::from(region));
            }
        }
        regions.sort();
        Ok(regions)
    }
}

// ---------------------------------------------------------------------------
// LocalRoster
// ---------------------------------------------------------------------------

/// Roster snapshots kept next to the roster configs.
#[derive(Debug, Clone)]
pub struct LocalRoster {
    home: PathBuf,
}

impl LocalRoster {
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

#[async_trait]
impl RosterSource for LocalRoster {
    async fn list_identities(&self, roster: &RosterId) -> Result<Vec<Identity>, StoreError> {
        let path = members_path_at(&self.home, roster);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Fatal(format!(
                    "no member snapshot for roster '{roster}' at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(classify(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Fatal(format!("{}: {e}", path.display())))
    }
}
