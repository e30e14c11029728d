//! Directory-backed save store for worlds and their lease ledgers.
//!
//! ```text
//! <root>/
//!   world.meta.json            schema version and save counter
//!   saves/000001.save.cbor.zst world state plus lease ledger, CBOR then zstd
//!   integrity/manifest.json    SHA-256 chain over every save file
//! ```
//!
//! Each chain link records the digest of its save file and the digest of the
//! link before it, so a rewritten or reordered save breaks the chain.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use worldspace_common::LeasePayload;
use worldspace_kernel::World;
use worldspace_stream::SavedLease;

use crate::codec::{decode_payload, encode_payload};

const SAVE_SCHEMA_VERSION: u32 = 1;
const META_FILE: &str = "world.meta.json";
const SAVES_DIR: &str = "saves";
const INTEGRITY_DIR: &str = "integrity";
const CHAIN_FILE: &str = "manifest.json";
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding save: {0}")]
    CborEncode(String),
    #[error("decoding save: {0}")]
    CborDecode(String),
    #[error("store metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("save chain broken: expected {expected}, found {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("save schema v{file_version} is not readable by this build (v{expected_version})")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("store holds no saves")]
    NoSaves,
}

/// Contents of `world.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub schema_version: u32,
    /// Number of saves written; the newest save carries this number.
    pub saves: u32,
}

/// One save file's place in the integrity chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveLink {
    pub file: String,
    pub digest: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveChain {
    pub links: Vec<SaveLink>,
}

impl SaveChain {
    fn link(&self, file: &str) -> Option<&SaveLink> {
        self.links.iter().find(|link| link.file == file)
    }

    fn head(&self) -> Option<&str> {
        self.links.last().map(|link| link.digest.as_str())
    }
}

/// One lease as it sits in a save file. The payload is kept as its encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    owner: String,
    payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SaveFile {
    world: World,
    leases: Vec<LedgerEntry>,
}

/// A world and its leases as read back from disk.
#[derive(Debug)]
pub struct WorldSave {
    pub world: World,
    pub leases: Vec<SavedLease>,
    /// Leases whose payload bytes could not be decoded. They load with an empty payload.
    pub corrupt_payloads: usize,
}

pub struct WorldStore {
    root: PathBuf,
    meta: WorldMeta,
    chain: SaveChain,
}

impl WorldStore {
    /// Open the store at `path`, creating an empty one if nothing is there.
    ///
    /// Fails when the store was written under another schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(SAVES_DIR))?;
        std::fs::create_dir_all(root.join(INTEGRITY_DIR))?;

        let meta_path = root.join(META_FILE);
        if !meta_path.exists() {
            let store = Self {
                root,
                meta: WorldMeta {
                    schema_version: SAVE_SCHEMA_VERSION,
                    saves: 0,
                },
                chain: SaveChain::default(),
            };
            store.flush()?;
            return Ok(store);
        }

        let meta: WorldMeta = read_json(&meta_path)?;
        if meta.schema_version != SAVE_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                file_version: meta.schema_version,
                expected_version: SAVE_SCHEMA_VERSION,
            });
        }
        let chain_path = root.join(INTEGRITY_DIR).join(CHAIN_FILE);
        let chain = if chain_path.exists() {
            read_json(&chain_path)?
        } else {
            SaveChain::default()
        };
        Ok(Self { root, meta, chain })
    }

    /// Append a save holding `world` and the lease ledger `leases`.
    pub fn save(&mut self, world: &World, leases: &[SavedLease]) -> Result<(), StoreError> {
        let ledger = leases
            .iter()
            .map(|lease| {
                Ok(LedgerEntry {
                    owner: lease.owner.clone(),
                    payload: encode_payload(&lease.payload)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let bytes = pack(&SaveFile {
            world: world.clone(),
            leases: ledger,
        })?;

        let number = self.meta.saves + 1;
        let file = save_name(number);
        std::fs::write(self.root.join(SAVES_DIR).join(&file), &bytes)?;

        let parent = self.chain.head().map(str::to_owned);
        self.chain.links.push(SaveLink {
            file,
            digest: digest(&bytes),
            parent,
        });
        self.meta.saves = number;
        self.flush()?;

        tracing::debug!(world = %world.id(), leases = leases.len(), save = number, "world saved");
        Ok(())
    }

    /// Read back the newest save. Its file must match its chain link.
    pub fn load_latest(&self) -> Result<WorldSave, StoreError> {
        if self.meta.saves == 0 {
            return Err(StoreError::NoSaves);
        }
        let file = save_name(self.meta.saves);
        let bytes = std::fs::read(self.root.join(SAVES_DIR).join(&file))?;
        let Some(link) = self.chain.link(&file) else {
            return Err(StoreError::IntegrityMismatch {
                expected: format!("chain link for {file}"),
                actual: "none".into(),
            });
        };
        check_digest(&link.digest, &bytes)?;

        let save = unpack(&bytes)?;
        let mut corrupt_payloads = 0;
        let leases = save
            .leases
            .into_iter()
            .map(|entry| {
                let payload = decode_payload(&entry.payload).unwrap_or_else(|e| {
                    tracing::warn!(owner = %entry.owner, error = %e, "lease payload unreadable");
                    corrupt_payloads += 1;
                    LeasePayload::new()
                });
                SavedLease {
                    owner: entry.owner,
                    payload,
                }
            })
            .collect();

        Ok(WorldSave {
            world: save.world,
            leases,
            corrupt_payloads,
        })
    }

    /// Walk the whole chain, re-hashing every save file on disk.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut parent: Option<&str> = None;
        for link in &self.chain.links {
            if link.parent.as_deref() != parent {
                return Err(StoreError::IntegrityMismatch {
                    expected: parent.unwrap_or("chain start").to_owned(),
                    actual: link.parent.clone().unwrap_or_else(|| "chain start".into()),
                });
            }
            let bytes = std::fs::read(self.root.join(SAVES_DIR).join(&link.file))?;
            check_digest(&link.digest, &bytes)?;
            parent = Some(link.digest.as_str());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    fn flush(&self) -> Result<(), StoreError> {
        write_json(&self.root.join(META_FILE), &self.meta)?;
        write_json(&self.root.join(INTEGRITY_DIR).join(CHAIN_FILE), &self.chain)
    }
}

fn save_name(number: u32) -> String {
    format!("{number:06}.save.cbor.zst")
}

fn pack(save: &SaveFile) -> Result<Vec<u8>, StoreError> {
    let mut cbor = Vec::new();
    ciborium::into_writer(save, &mut cbor).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(zstd::encode_all(cbor.as_slice(), ZSTD_LEVEL)?)
}

fn unpack(bytes: &[u8]) -> Result<SaveFile, StoreError> {
    let cbor = zstd::decode_all(bytes)?;
    ciborium::from_reader(cbor.as_slice()).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn check_digest(expected: &str, bytes: &[u8]) -> Result<(), StoreError> {
    let actual = digest(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(StoreError::IntegrityMismatch {
            expected: expected.to_owned(),
            actual,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    Ok(serde_json::from_reader(File::open(path)?)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    serde_json::to_writer_pretty(File::create(path)?, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_common::BlockPos;
    use worldspace_kernel::EntityKind;

    fn sample_world() -> (World, Vec<SavedLease>) {
        let mut world = World::new();
        world
            .spawn(EntityKind::Anchor, BlockPos::new(165, 70, 85))
            .unwrap();
        world.spawn(EntityKind::Prop, BlockPos::new(0, 64, 0)).unwrap();
        world.step();

        let mut payload = LeasePayload::new();
        payload.set_str("type", "anchor");
        payload.set_int("xCoord", 165);
        let leases = vec![SavedLease {
            owner: "gates".into(),
            payload,
        }];
        (world, leases)
    }

    #[test]
    fn store_open_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorldStore::open(tmp.path().join("world_data")).unwrap();
        assert_eq!(store.meta().saves, 0);
        assert!(store.root().join("saves").is_dir());
        assert!(store.root().join("integrity").is_dir());
    }

    #[test]
    fn load_without_saves_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = WorldStore::open(tmp.path()).unwrap();
        assert!(matches!(store.load_latest(), Err(StoreError::NoSaves)));
    }

    #[test]
    fn save_and_reload_preserves_world_and_leases() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world_data");
        let (world, leases) = sample_world();

        let mut store = WorldStore::open(&path).unwrap();
        store.save(&world, &leases).unwrap();

        let store2 = WorldStore::open(&path).unwrap();
        let loaded = store2.load_latest().unwrap();
        assert_eq!(loaded.world.id(), world.id());
        assert_eq!(loaded.world.state_hash(), world.state_hash());
        assert_eq!(loaded.leases, leases);
        assert_eq!(loaded.corrupt_payloads, 0);
        assert_eq!(
            encode_payload(&loaded.leases[0].payload).unwrap(),
            encode_payload(&leases[0].payload).unwrap()
        );
    }

    #[test]
    fn latest_save_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut world, leases) = sample_world();
        let mut store = WorldStore::open(tmp.path()).unwrap();
        store.save(&world, &leases).unwrap();
        world.step();
        store.save(&world, &[]).unwrap();

        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.world.tick(), 2);
        assert!(loaded.leases.is_empty());
        store.verify_integrity().unwrap();
    }

    #[test]
    fn integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world_data");
        let (world, leases) = sample_world();
        let mut store = WorldStore::open(&path).unwrap();
        store.save(&world, &leases).unwrap();

        let save_path = path.join("saves").join("000001.save.cbor.zst");
        let mut data = std::fs::read(&save_path).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&save_path, &data).unwrap();

        let store2 = WorldStore::open(&path).unwrap();
        assert!(store2.verify_integrity().is_err());
        assert!(matches!(
            store2.load_latest(),
            Err(StoreError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world_data");
        let _store = WorldStore::open(&path).unwrap();

        let meta_path = path.join("world.meta.json");
        let mut meta: WorldMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        match WorldStore::open(&path) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 999);
                assert_eq!(expected_version, SAVE_SCHEMA_VERSION);
            }
            Err(e) => panic!("expected SchemaMismatch, got: {e}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn unreadable_payload_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("world_data");
        let (world, _) = sample_world();

        // Write a save by hand whose single lease carries garbage payload bytes.
        let file = SaveFile {
            world,
            leases: vec![LedgerEntry {
                owner: "gates".into(),
                payload: vec![0xff, 0x00],
            }],
        };
        let bytes = pack(&file).unwrap();
        let mut store = WorldStore::open(&path).unwrap();
        std::fs::write(path.join(SAVES_DIR).join(save_name(1)), &bytes).unwrap();
        store.meta.saves = 1;
        store.chain.links.push(SaveLink {
            file: save_name(1),
            digest: digest(&bytes),
            parent: None,
        });

        let loaded = store.load_latest().unwrap();
        assert_eq!(loaded.corrupt_payloads, 1);
        assert_eq!(loaded.leases.len(), 1);
        assert!(loaded.leases[0].payload.is_empty());
    }
}
