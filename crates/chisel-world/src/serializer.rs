use crate::world::WorldError;
use chisel_types::Location;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// On-disk form of a player: location, equipped slot, and the non-empty
/// inventory slots of the player window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub location: Location,
    #[serde(default)]
    pub equipped: usize,
    #[serde(default)]
    pub slots: Vec<SlotRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRecord {
    pub index: usize,
    pub id: i16,
    pub secondary: i16,
    pub count: i8,
}

/// Storage backend for players and plugin data. The chunk format itself
/// is a separate concern; chunks regenerate when no store is present.
pub trait Serializer: Send + Sync {
    fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>, WorldError>;
    fn save_player(&self, name: &str, record: &PlayerRecord) -> Result<(), WorldError>;
    fn load_plugin_data(&self, key: &str) -> Result<Vec<u8>, WorldError>;
    fn save_plugin_data(&self, key: &str, data: &[u8]) -> Result<(), WorldError>;
}

/// Flat-file serializer: one TOML file per player, one raw file per
/// plugin data key.
pub struct FlatFileSerializer {
    root: PathBuf,
}

impl FlatFileSerializer {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WorldError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("players"))?;
        std::fs::create_dir_all(root.join("plugins"))?;
        Ok(Self { root })
    }

    fn player_path(&self, name: &str) -> PathBuf {
        self.root
            .join("players")
            .join(format!("{}.toml", safe_name(name)))
    }

    fn plugin_path(&self, key: &str) -> PathBuf {
        self.root
            .join("plugins")
            .join(format!("{}.dat", safe_name(key)))
    }
}

/// Usernames and data keys come off the wire; keep them from escaping
/// the storage directory.
fn safe_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl Serializer for FlatFileSerializer {
    fn load_player(&self, name: &str) -> Result<Option<PlayerRecord>, WorldError> {
        let path = self.player_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let record =
            toml::from_str(&contents).map_err(|e| WorldError::BadRecord(e.to_string()))?;
        Ok(Some(record))
    }

    fn save_player(&self, name: &str, record: &PlayerRecord) -> Result<(), WorldError> {
        let contents =
            toml::to_string(record).map_err(|e| WorldError::BadRecord(e.to_string()))?;
        std::fs::write(self.player_path(name), contents)?;
        Ok(())
    }

    fn load_plugin_data(&self, key: &str) -> Result<Vec<u8>, WorldError> {
        let path = self.plugin_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(std::fs::read(path)?)
    }

    fn save_plugin_data(&self, key: &str, data: &[u8]) -> Result<(), WorldError> {
        std::fs::write(self.plugin_path(key), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let serializer = FlatFileSerializer::new(dir.path()).unwrap();

        assert!(serializer.load_player("alice").unwrap().is_none());

        let record = PlayerRecord {
            location: Location::at(10.0, 64.0, -3.0),
            equipped: 2,
            slots: vec![SlotRecord {
                index: 36,
                id: 4,
                secondary: 0,
                count: 12,
            }],
        };
        serializer.save_player("alice", &record).unwrap();

        let loaded = serializer.load_player("alice").unwrap().unwrap();
        assert_eq!(loaded.location.x, 10.0);
        assert_eq!(loaded.equipped, 2);
        assert_eq!(loaded.slots.len(), 1);
        assert_eq!(loaded.slots[0].id, 4);
    }

    #[test]
    fn test_plugin_data_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let serializer = FlatFileSerializer::new(dir.path()).unwrap();

        assert!(serializer.load_plugin_data("warps").unwrap().is_empty());
        serializer
            .save_plugin_data("warps", b"spawn:0:64:0:0:0\n")
            .unwrap();
        assert_eq!(
            serializer.load_plugin_data("warps").unwrap(),
            b"spawn:0:64:0:0:0\n"
        );
    }

    #[test]
    fn test_hostile_names_stay_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let serializer = FlatFileSerializer::new(dir.path()).unwrap();
        let path = serializer.player_path("../../etc/passwd");
        assert!(path.starts_with(dir.path().join("players")));
    }
}
