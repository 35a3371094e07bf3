mod entities;

pub use entities::{StoredBlock, StoredBundle, StoredPeer, StoredTransaction};

use crate::config::QUARANTINE_SUFFIX;
use log::{debug, trace, warn};
use polywallet_common::serializer::{Reader, ReaderError, Writer};
use std::{
    collections::HashSet,
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid identifier {0}")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

// One persisted entity family. Each type declares the versions it can
// read; writes always happen at the current version, so loading is also
// the upgrade path.
pub trait FileEntity: Sized + Send {
    const TYPE_NAME: &'static str;
    const CURRENT_VERSION: u32;
    // Readable versions, ascending; must end with CURRENT_VERSION
    const VERSIONS: &'static [u32];

    // Content-derived identity
    fn identifier(&self) -> [u8; 32];
    fn write_entity(&self, writer: &mut Writer);
    fn read_entity(version: u32, reader: &mut Reader) -> Result<Self, ReaderError>;
}

// A typed, versioned file-per-entity store rooted at
// `<root>/<manager-id>`. Files live at `<type>/<version>/<hex-id>`;
// writes go through a temp file and a rename so a crash never leaves a
// half-written entity under its final name.
pub struct FileService {
    root: PathBuf,
}

impl FileService {
    pub fn create(base: &Path, manager_id: &str) -> Result<Self, StorageError> {
        let root = base.join(manager_id);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir<E: FileEntity>(&self, version: u32) -> PathBuf {
        self.root.join(E::TYPE_NAME).join(version.to_string())
    }

    fn entity_path<E: FileEntity>(&self, id: &[u8; 32]) -> PathBuf {
        self.version_dir::<E>(E::CURRENT_VERSION).join(hex::encode(id))
    }

    pub fn save<E: FileEntity>(&self, entity: &E) -> Result<(), StorageError> {
        let dir = self.version_dir::<E>(E::CURRENT_VERSION);
        fs::create_dir_all(&dir)?;

        let id = hex::encode(entity.identifier());
        let mut writer = Writer::new();
        entity.write_entity(&mut writer);

        let temp = dir.join(format!(".tmp-{}", id));
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(writer.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, dir.join(&id))?;
        trace!("saved {}/{}", E::TYPE_NAME, id);
        Ok(())
    }

    // Load every readable entity, upgrading old-version files to the
    // current version as a side effect. Unreadable files are quarantined
    // and skipped; their content is treated as not yet known.
    pub fn load<E: FileEntity>(&self) -> Result<Vec<E>, StorageError> {
        let mut entities = Vec::new();

        for version in E::VERSIONS {
            let dir = self.version_dir::<E>(*version);
            if !dir.exists() {
                continue;
            }

            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if name.starts_with(".tmp-") || name.ends_with(QUARANTINE_SUFFIX) {
                    continue;
                }

                match self.read_file::<E>(&path, *version) {
                    Ok(entity) => {
                        if *version != E::CURRENT_VERSION {
                            self.save(&entity)?;
                            fs::remove_file(&path)?;
                            debug!(
                                "upgraded {}/{} from version {}",
                                E::TYPE_NAME,
                                name,
                                version
                            );
                        }
                        entities.push(entity);
                    }
                    Err(err) => {
                        warn!(
                            "quarantining unreadable {}/{}: {}",
                            E::TYPE_NAME, name, err
                        );
                        let quarantined =
                            path.with_file_name(format!("{}{}", name, QUARANTINE_SUFFIX));
                        let _ = fs::rename(&path, quarantined);
                    }
                }
            }
        }

        Ok(entities)
    }

    fn read_file<E: FileEntity>(&self, path: &Path, version: u32) -> Result<E, StorageError> {
        let bytes = fs::read(path)?;
        let mut reader = Reader::new(&bytes);
        let entity = E::read_entity(version, &mut reader)?;
        if reader.size() != 0 {
            return Err(ReaderError::TrailingBytes(reader.size()).into());
        }
        Ok(entity)
    }

    // Atomic swap: after this call exactly `entities` exist on disk.
    // New content lands first; stale files are removed afterwards, so a
    // crash in between leaves extra entities rather than missing ones.
    pub fn replace<E: FileEntity>(&self, entities: &[E]) -> Result<(), StorageError> {
        let mut keep = HashSet::new();
        for entity in entities {
            keep.insert(hex::encode(entity.identifier()));
            self.save(entity)?;
        }

        for version in E::VERSIONS {
            let dir = self.version_dir::<E>(*version);
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                let stale = *version != E::CURRENT_VERSION || !keep.contains(&name);
                if stale && !name.ends_with(QUARANTINE_SUFFIX) {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    pub fn remove<E: FileEntity>(&self, id: &[u8; 32]) -> Result<(), StorageError> {
        let path = self.entity_path::<E>(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn clear<E: FileEntity>(&self) -> Result<(), StorageError> {
        let dir = self.root.join(E::TYPE_NAME);
        remove_tree(&dir)
    }

    // Drop every entity this manager ever persisted
    pub fn wipe(&self) -> Result<(), StorageError> {
        remove_tree(&self.root)
    }
}

// Recursive directory-walk delete; never shells out
pub fn remove_tree(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?.path();
        if entry.is_dir() {
            remove_tree(&entry)?;
        } else {
            fs::remove_file(&entry)?;
        }
    }
    fs::remove_dir(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, FileService) {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::create(dir.path(), "btc-mainnet-test").unwrap();
        (dir, service)
    }

    fn tx(raw: &[u8], height: u32) -> StoredTransaction {
        StoredTransaction {
            raw: raw.to_vec(),
            height,
            timestamp: height * 600,
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, service) = service();
        let a = tx(b"tx-a", 1);
        let b = tx(b"tx-b", 2);
        service.save(&a).unwrap();
        service.save(&b).unwrap();
        // Saving the same entity twice keeps one file
        service.save(&a).unwrap();

        let mut loaded = service.load::<StoredTransaction>().unwrap();
        loaded.sort_by_key(|t| t.height);
        assert_eq!(loaded, vec![a, b]);
    }

    #[test]
    fn test_layout_on_disk() {
        let (_dir, service) = service();
        let block = StoredBlock {
            raw: vec![7; 8],
            height: 12,
        };
        service.save(&block).unwrap();

        let expected = service
            .root()
            .join("blocks")
            .join("1")
            .join(hex::encode(block.identifier()));
        assert!(expected.is_file());
    }

    #[test]
    fn test_replace_and_remove() {
        let (_dir, service) = service();
        let a = tx(b"a", 1);
        let b = tx(b"b", 2);
        let c = tx(b"c", 3);
        service.save(&a).unwrap();
        service.save(&b).unwrap();

        service.replace(&[b.clone(), c.clone()]).unwrap();
        let mut loaded = service.load::<StoredTransaction>().unwrap();
        loaded.sort_by_key(|t| t.height);
        assert_eq!(loaded, vec![b.clone(), c.clone()]);

        service.remove::<StoredTransaction>(&b.identifier()).unwrap();
        let loaded = service.load::<StoredTransaction>().unwrap();
        assert_eq!(loaded, vec![c]);

        service.clear::<StoredTransaction>().unwrap();
        assert!(service.load::<StoredTransaction>().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_quarantined() {
        let (_dir, service) = service();
        let peer = StoredPeer {
            address: [1; 16],
            port: 8333,
            services: 1,
            timestamp: 5,
            flags: 0,
        };
        service.save(&peer).unwrap();

        // Truncate the file so it cannot parse
        let path = service
            .root()
            .join("peers")
            .join("1")
            .join(hex::encode(peer.identifier()));
        fs::write(&path, [0u8; 3]).unwrap();

        let loaded = service.load::<StoredPeer>().unwrap();
        assert!(loaded.is_empty());
        assert!(!path.exists());
        assert!(path
            .with_file_name(format!(
                "{}{}",
                hex::encode(peer.identifier()),
                QUARANTINE_SUFFIX
            ))
            .exists());

        // A later load does not trip over the quarantined file
        assert!(service.load::<StoredPeer>().unwrap().is_empty());
    }

    #[test]
    fn test_version_upgrade_on_load() {
        let (_dir, service) = service();

        // Hand-write a version 1 transaction record
        let mut writer = Writer::new();
        writer.write_bytes(b"old-tx");
        writer.write_u32_le(42);
        let id = hex::encode(polywallet_common::hash::digest(b"old-tx"));
        let v1_dir = service.root().join("transactions").join("1");
        fs::create_dir_all(&v1_dir).unwrap();
        fs::write(v1_dir.join(&id), writer.as_bytes()).unwrap();

        let loaded = service.load::<StoredTransaction>().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].raw, b"old-tx");
        assert_eq!(loaded[0].height, 42);

        // The record migrated to the current version directory
        assert!(!v1_dir.join(&id).exists());
        assert!(service
            .root()
            .join("transactions")
            .join("2")
            .join(&id)
            .is_file());
    }

    #[test]
    fn test_wipe_walks_the_tree() {
        let (dir, service) = service();
        service.save(&tx(b"x", 1)).unwrap();
        let root = service.root().to_path_buf();
        assert!(root.exists());
        service.wipe().unwrap();
        assert!(!root.exists());
        assert!(dir.path().exists());
    }
}
