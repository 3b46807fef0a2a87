use std::path::Path;

use serde::Deserialize;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_SEED_LOTS;

/// Initial data for an empty store.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default, alias = "parkingLots")]
    pub lots: Vec<SeedLot>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedLot {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub total_slots: u32,
}

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Json(serde_json::Error),
    TooManyLots(usize),
    Engine(EngineError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "cannot read seed file: {e}"),
            SeedError::Json(e) => write!(f, "bad seed file: {e}"),
            SeedError::TooManyLots(n) => {
                write!(f, "seed file has {n} lots, at most {MAX_SEED_LOTS} allowed")
            }
            SeedError::Engine(e) => write!(f, "seeding failed: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<EngineError> for SeedError {
    fn from(e: EngineError) -> Self {
        SeedError::Engine(e)
    }
}

pub fn load_seed(path: &Path) -> Result<Seed, SeedError> {
    let raw = std::fs::read_to_string(path).map_err(SeedError::Io)?;
    let seed: Seed = serde_json::from_str(&raw).map_err(SeedError::Json)?;
    if seed.lots.len() > MAX_SEED_LOTS {
        return Err(SeedError::TooManyLots(seed.lots.len()));
    }
    Ok(seed)
}

/// Create the seed's users and lots, but only into a store with no lots.
/// Returns the number of lots created.
pub async fn apply_seed(engine: &Engine, seed: &Seed) -> Result<usize, SeedError> {
    if !engine.lots.is_empty() {
        tracing::info!("store already has {} lots, skipping seed", engine.lots.len());
        return Ok(0);
    }
    for user in &seed.users {
        engine.resolve_user(&user.username).await?;
    }
    for lot in &seed.lots {
        engine
            .create_lot(Ulid::new(), lot.name.clone(), lot.location.clone(), lot.total_slots)
            .await?;
    }
    tracing::info!("seeded {} users and {} lots", seed.users.len(), seed.lots.len());
    Ok(seed.lots.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_seed");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let path = test_dir().join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn write_seed(name: &str, json: &str) -> PathBuf {
        let path = test_dir().join(name);
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn parses_lots_and_users() {
        let path = write_seed(
            "basic.json",
            r#"{"users": [{"username": "admin"}],
                "lots": [{"name": "North", "location": "Gate A", "total_slots": 3},
                         {"name": "South", "total_slots": 2}]}"#,
        );
        let seed = load_seed(&path).unwrap();
        assert_eq!(seed.users.len(), 1);
        assert_eq!(seed.lots.len(), 2);
        assert_eq!(seed.lots[1].location, None);
    }

    #[test]
    fn accepts_parking_lots_key() {
        let path = write_seed("alias.json", r#"{"parkingLots": [{"name": "A", "total_slots": 1}]}"#);
        assert_eq!(load_seed(&path).unwrap().lots.len(), 1);
    }

    #[test]
    fn rejects_bad_json() {
        let path = write_seed("bad.json", r#"{"lots": [{"name": "A"}]}"#);
        assert!(matches!(load_seed(&path), Err(SeedError::Json(_))));
        assert!(matches!(
            load_seed(&test_dir().join("missing.json")),
            Err(SeedError::Io(_))
        ));
    }

    #[tokio::test]
    async fn seeds_only_an_empty_store() {
        let engine = Engine::new(test_wal_path("seed_once.wal")).unwrap();
        let seed = Seed {
            users: vec![SeedUser { username: "admin".into() }],
            lots: vec![SeedLot { name: "North".into(), location: None, total_slots: 4 }],
        };

        assert_eq!(apply_seed(&engine, &seed).await.unwrap(), 1);
        assert_eq!(engine.list_lots().await[0].available_slots, 4);
        assert_eq!(engine.list_users().len(), 1);

        assert_eq!(apply_seed(&engine, &seed).await.unwrap(), 0);
        assert_eq!(engine.list_lots().await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_lot_fails_seeding() {
        let engine = Engine::new(test_wal_path("seed_invalid.wal")).unwrap();
        let seed = Seed {
            users: vec![],
            lots: vec![SeedLot { name: "Empty".into(), location: None, total_slots: 0 }],
        };
        assert!(matches!(
            apply_seed(&engine, &seed).await,
            Err(SeedError::Engine(EngineError::InvalidInput(_)))
        ));
    }
}
