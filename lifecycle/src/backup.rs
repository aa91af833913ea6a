//! World backup store.
//!
//! A backup is a gzip-compressed tar archive named
//! `{server}_{level}_{worldHash}_{timestamp}.tar.gz` with a JSON sibling
//! `{archive}.json` describing the world it belongs to. Records are never
//! modified after creation; they are only ever pruned or cleared.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{WorldHash, WorldIdentity, WORLD_HASH_LEN};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
pub const METADATA_EXTENSION: &str = ".json";

const RESTORE_STAGING_DIR: &str = ".restoring";

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup io error: {0}")]
    Io(#[from] io::Error),

    #[error("backup metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Where the world data for a new backup comes from.
#[derive(Debug, Clone, Copy)]
pub enum BackupSource<'a> {
    /// An uncompressed tar stream, as written by `docker cp <name>:<path> -`.
    TarStream(&'a [u8]),
    /// A local directory, archived under its own base name.
    Directory(&'a Path),
}

#[derive(Debug, Clone, Copy)]
pub enum BackupFilter<'a> {
    Any,
    WorldHash(&'a WorldHash),
}

/// Content of the `.json` sibling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub server_name: String,
    pub level_name: String,
    pub seed: String,
    pub gamemode: String,
    pub difficulty: String,
    pub hash_version: String,
    pub timestamp: String,
}

impl BackupMetadata {
    fn new(world: &WorldIdentity, hash: &WorldHash, timestamp: &str) -> Self {
        Self {
            server_name: world.server_name.clone(),
            level_name: world.level_name.clone(),
            seed: world.seed.clone(),
            gamemode: world.game_mode.clone(),
            difficulty: world.difficulty.clone(),
            hash_version: hash.to_string(),
            timestamp: timestamp.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub archive: PathBuf,
    pub file_name: String,
    /// World hash encoded in the file name, if the name follows the scheme.
    pub world_hash: Option<String>,
    pub modified: SystemTime,
}

impl BackupRecord {
    fn new(archive: PathBuf, file_name: String, modified: SystemTime) -> Self {
        let world_hash = parse_world_hash(&file_name);
        Self {
            archive,
            file_name,
            world_hash,
            modified,
        }
    }

    pub fn metadata_path(&self) -> PathBuf {
        metadata_path_for(&self.archive)
    }

    pub fn read_metadata(&self) -> BackupResult<BackupMetadata> {
        let raw = fs::read_to_string(self.metadata_path())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn matches(&self, filter: BackupFilter<'_>) -> bool {
        match filter {
            BackupFilter::Any => true,
            BackupFilter::WorldHash(hash) => match &self.world_hash {
                Some(own) => own == hash.as_str(),
                None => self.file_name.contains(hash.as_str()),
            },
        }
    }
}

fn metadata_path_for(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(METADATA_EXTENSION);
    PathBuf::from(name)
}

fn parse_world_hash(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(ARCHIVE_EXTENSION)?;
    let mut parts = stem.rsplitn(3, '_');
    let _timestamp = parts.next()?;
    let hash = parts.next()?;
    parts.next()?;

    if hash.len() == WORLD_HASH_LEN && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hash.to_string())
    } else {
        None
    }
}

/// UTC instant with `:` and `.` replaced so it is safe in file names,
/// e.g. `2025-03-01T10-20-30-123Z`.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

fn file_safe(part: &str) -> String {
    part.replace(['/', '\\'], "-")
}

pub fn archive_name(world: &WorldIdentity, hash: &WorldHash, timestamp: &str) -> String {
    format!(
        "{}_{}_{}_{}{}",
        file_safe(&world.server_name),
        file_safe(&world.level_name),
        hash,
        timestamp,
        ARCHIVE_EXTENSION
    )
}

/// Directory of backup records.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// All records, most recently modified first. A missing directory holds
    /// no records.
    pub fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(ARCHIVE_EXTENSION) {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            records.push(BackupRecord::new(
                entry.path(),
                file_name,
                metadata.modified()?,
            ));
        }

        records.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });

        Ok(records)
    }

    pub fn latest(&self, filter: BackupFilter<'_>) -> BackupResult<Option<BackupRecord>> {
        Ok(self.list()?.into_iter().find(|r| r.matches(filter)))
    }

    pub fn create(
        &self,
        source: BackupSource<'_>,
        world: &WorldIdentity,
    ) -> BackupResult<BackupRecord> {
        self.create_at(source, world, Utc::now())
    }

    pub fn create_at(
        &self,
        source: BackupSource<'_>,
        world: &WorldIdentity,
        instant: DateTime<Utc>,
    ) -> BackupResult<BackupRecord> {
        fs::create_dir_all(&self.dir)?;

        let hash = world.hash();
        let timestamp = format_timestamp(instant);
        let file_name = archive_name(world, &hash, &timestamp);
        let archive = self.dir.join(&file_name);

        // Written under a temporary name so a failed backup never shows up in list()
        let partial = self.dir.join(format!("{}.partial", file_name));
        if let Err(e) = write_archive(&partial, source) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        fs::rename(&partial, &archive)?;

        let metadata = BackupMetadata::new(world, &hash, &timestamp);
        fs::write(
            metadata_path_for(&archive),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        info!("Backup written to {}", archive.display());

        let modified = fs::metadata(&archive)?.modified()?;
        Ok(BackupRecord::new(archive, file_name, modified))
    }

    /// Unpacks `record` into `destination`, creating it if needed.
    ///
    /// Every top-level entry of the archive replaces the entry of the same
    /// name in `destination`, so a restored `worlds/` holds exactly what was
    /// backed up. Other entries in `destination` are left alone.
    pub fn restore(&self, record: &BackupRecord, destination: &Path) -> BackupResult<()> {
        fs::create_dir_all(destination)?;

        let staging = destination.join(RESTORE_STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging)?;

        let result = unpack(&record.archive, &staging)
            .and_then(|()| replace_entries(&staging, destination));
        fs::remove_dir_all(&staging)?;
        result?;

        info!(
            "Restored {} into {}",
            record.file_name,
            destination.display()
        );
        Ok(())
    }

    /// Keeps the `retention` newest records and deletes the rest along with
    /// their metadata. Returns what was deleted.
    pub fn prune(&self, retention: usize) -> BackupResult<Vec<BackupRecord>> {
        let stale: Vec<BackupRecord> = self.list()?.into_iter().skip(retention).collect();

        for record in &stale {
            info!("Removing old backup: {}", record.file_name);
            fs::remove_file(&record.archive)?;

            let metadata = record.metadata_path();
            if metadata.exists() {
                fs::remove_file(metadata)?;
            }
        }

        Ok(stale)
    }

    /// Deletes the whole backup directory. Returns `false` if it did not exist.
    pub fn clear(&self) -> BackupResult<bool> {
        if !self.dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.dir)?;
        Ok(true)
    }
}

fn unpack(archive: &Path, into: &Path) -> BackupResult<()> {
    let file = File::open(archive)?;
    tar::Archive::new(GzDecoder::new(file)).unpack(into)?;
    Ok(())
}

/// Moves each entry of `staging` over its namesake in `destination`.
fn replace_entries(staging: &Path, destination: &Path) -> BackupResult<()> {
    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());

        match fs::symlink_metadata(&target) {
            Ok(existing) if existing.is_dir() => fs::remove_dir_all(&target)?,
            Ok(_) => fs::remove_file(&target)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        debug!("Replacing {}", target.display());
        fs::rename(entry.path(), &target)?;
    }
    Ok(())
}

fn write_archive(path: &Path, source: BackupSource<'_>) -> BackupResult<()> {
    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());

    let encoder = match source {
        BackupSource::TarStream(bytes) => {
            let mut encoder = encoder;
            encoder.write_all(bytes)?;
            encoder
        }
        BackupSource::Directory(dir) => {
            let base = dir
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("worlds"));
            debug!("Archiving {} as {}", dir.display(), base.display());

            let mut builder = tar::Builder::new(encoder);
            builder.append_dir_all(&base, dir)?;
            builder.into_inner()?
        }
    };

    encoder.finish()?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn world() -> WorldIdentity {
        WorldIdentity {
            server_name: "Friends".to_string(),
            level_name: "Bedrock level".to_string(),
            seed: String::new(),
            game_mode: "survival".to_string(),
            difficulty: "normal".to_string(),
        }
    }

    fn instant(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 20, second).unwrap()
    }

    fn set_age(path: &Path, seconds_ago: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(seconds_ago))
            .unwrap();
    }

    fn touch(dir: &Path, name: &str, seconds_ago: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"not really gzip").unwrap();
        set_age(&path, seconds_ago);
        path
    }

    fn sample_worlds(root: &Path) -> PathBuf {
        let worlds = root.join("worlds");
        fs::create_dir_all(worlds.join("Bedrock level/db")).unwrap();
        fs::write(worlds.join("Bedrock level/levelname.txt"), "Bedrock level").unwrap();
        fs::write(worlds.join("Bedrock level/db/000001.ldb"), [1u8, 2, 3, 4]).unwrap();
        worlds
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = format_timestamp(instant(30) + chrono::Duration::milliseconds(123));
        assert_eq!(stamp, "2025-03-01T10-20-30-123Z");
    }

    #[test]
    fn test_archive_name_embeds_world_hash() {
        let world = world();
        let name = archive_name(&world, &world.hash(), "2025-03-01T10-20-30-000Z");
        assert_eq!(
            name,
            format!(
                "Friends_Bedrock level_{}_2025-03-01T10-20-30-000Z.tar.gz",
                world.hash()
            )
        );
        assert_eq!(parse_world_hash(&name).as_deref(), Some(world.hash().as_str()));
    }

    #[test]
    fn test_parse_world_hash_with_underscores_in_names() {
        assert_eq!(
            parse_world_hash("my_server_my_level_abcd1234_2025-03-01T10-20-30-000Z.tar.gz")
                .as_deref(),
            Some("abcd1234")
        );
        assert_eq!(parse_world_hash("random.tar.gz"), None);
        assert_eq!(parse_world_hash("a_nothex!!_ts.tar.gz"), None);
    }

    #[test]
    fn test_path_separators_are_replaced() {
        let mut world = world();
        world.server_name = "a/b".to_string();
        let name = archive_name(&world, &world.hash(), "ts");
        assert!(name.starts_with("a-b_"));
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
        assert!(store.latest(BackupFilter::Any).unwrap().is_none());
    }

    #[test]
    fn test_list_orders_newest_first() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "s_l_00000001_a.tar.gz", 300);
        touch(temp.path(), "s_l_00000002_b.tar.gz", 100);
        touch(temp.path(), "s_l_00000003_c.tar.gz", 200);
        touch(temp.path(), "notes.txt", 0);

        let store = BackupStore::new(temp.path());
        let records = store.list().unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "s_l_00000002_b.tar.gz",
                "s_l_00000003_c.tar.gz",
                "s_l_00000001_a.tar.gz"
            ]
        );
        assert!(records.windows(2).all(|w| w[0].modified >= w[1].modified));
    }

    #[test]
    fn test_latest_prefers_matching_hash_over_newer_backup() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "s_l_abcd1234_old.tar.gz", 500);
        touch(temp.path(), "s_l_ffff0000_new.tar.gz", 10);

        let store = BackupStore::new(temp.path());
        let wanted = WorldHash::new("abcd1234");

        let matched = store.latest(BackupFilter::WorldHash(&wanted)).unwrap().unwrap();
        assert_eq!(matched.file_name, "s_l_abcd1234_old.tar.gz");

        let any = store.latest(BackupFilter::Any).unwrap().unwrap();
        assert_eq!(any.file_name, "s_l_ffff0000_new.tar.gz");

        let missing = WorldHash::new("12345678");
        assert!(store
            .latest(BackupFilter::WorldHash(&missing))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_directory_round_trip() {
        let temp = TempDir::new().unwrap();
        let worlds = sample_worlds(temp.path());
        let store = BackupStore::new(temp.path().join("backups"));

        let record = store
            .create_at(BackupSource::Directory(&worlds), &world(), instant(1))
            .unwrap();
        assert!(record.archive.exists());
        assert_eq!(record.world_hash.as_deref(), Some(world().hash().as_str()));

        let restored = temp.path().join("data");
        store.restore(&record, &restored).unwrap();

        assert_eq!(
            fs::read_to_string(restored.join("worlds/Bedrock level/levelname.txt")).unwrap(),
            "Bedrock level"
        );
        assert_eq!(
            fs::read(restored.join("worlds/Bedrock level/db/000001.ldb")).unwrap(),
            vec![1u8, 2, 3, 4]
        );
    }

    #[test]
    fn test_tar_stream_round_trip() {
        let temp = TempDir::new().unwrap();
        let worlds = sample_worlds(temp.path());

        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all("worlds", &worlds).unwrap();
        let stream = builder.into_inner().unwrap();

        let store = BackupStore::new(temp.path().join("backups"));
        let record = store
            .create_at(BackupSource::TarStream(&stream), &world(), instant(2))
            .unwrap();

        let restored = temp.path().join("restore");
        store.restore(&record, &restored).unwrap();
        assert_eq!(
            fs::read(restored.join("worlds/Bedrock level/db/000001.ldb")).unwrap(),
            vec![1u8, 2, 3, 4]
        );
    }

    #[test]
    fn test_restore_replaces_existing_world() {
        let temp = TempDir::new().unwrap();
        let worlds = sample_worlds(temp.path());
        let store = BackupStore::new(temp.path().join("backups"));
        let record = store
            .create_at(BackupSource::Directory(&worlds), &world(), instant(3))
            .unwrap();

        let data = temp.path().join("data");
        let stale_db = data.join("worlds/Bedrock level/db");
        fs::create_dir_all(&stale_db).unwrap();
        fs::write(stale_db.join("000999.ldb"), b"stale").unwrap();
        fs::write(stale_db.join("000001.ldb"), b"stale").unwrap();
        fs::write(data.join("allowlist.json"), b"[]").unwrap();

        store.restore(&record, &data).unwrap();

        let mut files: Vec<String> = fs::read_dir(&stale_db)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["000001.ldb"]);
        assert_eq!(fs::read(stale_db.join("000001.ldb")).unwrap(), vec![1u8, 2, 3, 4]);

        // Entries the archive does not contain are kept, the staging area is not
        assert_eq!(fs::read(data.join("allowlist.json")).unwrap(), b"[]");
        assert!(!data.join(RESTORE_STAGING_DIR).exists());
    }

    #[test]
    fn test_failed_restore_leaves_destination_untouched() {
        let temp = TempDir::new().unwrap();
        let store = BackupStore::new(temp.path().join("backups"));
        fs::create_dir_all(store.dir.clone()).unwrap();
        let broken = touch(&store.dir, "s_l_abcd1234_ts.tar.gz", 0);
        let record = store.list().unwrap().remove(0);
        assert_eq!(record.archive, broken);

        let data = temp.path().join("data");
        fs::create_dir_all(data.join("worlds")).unwrap();
        fs::write(data.join("worlds/keep.txt"), b"keep").unwrap();

        assert!(store.restore(&record, &data).is_err());
        assert_eq!(fs::read(data.join("worlds/keep.txt")).unwrap(), b"keep");
        assert!(!data.join(RESTORE_STAGING_DIR).exists());
    }

    #[test]
    fn test_metadata_sibling() {
        let temp = TempDir::new().unwrap();
        let worlds = sample_worlds(temp.path());
        let store = BackupStore::new(temp.path().join("backups"));

        let record = store
            .create_at(BackupSource::Directory(&worlds), &world(), instant(3))
            .unwrap();

        assert_eq!(
            record.metadata_path(),
            PathBuf::from(format!("{}.json", record.archive.display()))
        );
        let metadata = record.read_metadata().unwrap();
        assert_eq!(metadata.server_name, "Friends");
        assert_eq!(metadata.gamemode, "survival");
        assert_eq!(metadata.hash_version, world().hash().to_string());
        assert_eq!(metadata.timestamp, "2025-03-01T10-20-03-000Z");
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let temp = TempDir::new().unwrap();
        for (i, age) in [50u64, 40, 30, 20, 10].iter().enumerate() {
            let archive = touch(temp.path(), &format!("s_l_0000000{}_t.tar.gz", i), *age);
            fs::write(metadata_path_for(&archive), "{}").unwrap();
        }

        let store = BackupStore::new(temp.path());
        let removed = store.prune(2).unwrap();
        assert_eq!(removed.len(), 3);

        let remaining: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(
            remaining,
            vec!["s_l_00000004_t.tar.gz", "s_l_00000003_t.tar.gz"]
        );
        for record in removed {
            assert!(!record.archive.exists());
            assert!(!record.metadata_path().exists());
        }
    }

    #[test]
    fn test_prune_below_retention_is_noop() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "s_l_00000001_t.tar.gz", 10);
        let store = BackupStore::new(temp.path());
        assert!(store.prune(5).unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("backups");
        let store = BackupStore::new(&dir);
        assert!(!store.clear().unwrap());

        fs::create_dir_all(&dir).unwrap();
        touch(&dir, "s_l_00000001_t.tar.gz", 0);
        assert!(store.clear().unwrap());
        assert!(!dir.exists());
    }
}
