//! Durable player profiles: one JSON file per handle.
//!
//! Saves go through a temp file and an atomic rename, so a crashed
//! write leaves the previous profile intact. A missing or unreadable
//! file loads as a fresh profile rather than an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::registry::normalize_handle;

/// Fresh profiles start with enough gold to take a duel wager.
pub const STARTING_GOLD: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub v: u8,
    pub handle: String,
    pub name: String,
    pub gold: u64,
    pub xp: u64,
    pub reputation: u64,
    #[serde(default)]
    pub tourneys_played: u64,
    #[serde(default)]
    pub tourneys_won: u64,
    #[serde(default)]
    pub duels_played: u64,
    #[serde(default)]
    pub duels_won: u64,
    #[serde(default)]
    pub updated_unix: u64,
}

impl Profile {
    pub fn fresh(handle: &str, name: &str) -> Self {
        let handle = normalize_handle(handle);
        let name = name.trim();
        Self {
            v: 1,
            name: if name.is_empty() {
                handle.clone()
            } else {
                name.to_string()
            },
            handle,
            gold: STARTING_GOLD,
            xp: 0,
            reputation: 0,
            tourneys_played: 0,
            tourneys_won: 0,
            duels_played: 0,
            duels_won: 0,
            updated_unix: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Serialize a load-modify-save cycle for one handle. A tournament
    /// settling while a duel settles for the same player must not lose
    /// either write; hold the guard across the whole cycle. Clones of
    /// the store share the same locks.
    pub async fn guard(&self, handle: &str) -> OwnedMutexGuard<()> {
        let h = normalize_handle(handle);
        let lock = {
            let mut m = self.locks.lock().await;
            m.entry(h)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, handle: &str) -> PathBuf {
        let safe: String = normalize_handle(handle)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    /// Load `handle`'s profile, or a fresh one if none exists yet. A
    /// corrupt file is logged and replaced on the next save.
    pub async fn load(&self, handle: &str, name: &str) -> Profile {
        let p = self.path_for(handle);
        match tokio::fs::read(&p).await {
            Ok(bytes) => match serde_json::from_slice::<Profile>(&bytes) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(err = %e, path = %p.display(), "corrupt profile; starting fresh");
                    Profile::fresh(handle, name)
                }
            },
            Err(_) => Profile::fresh(handle, name),
        }
    }

    /// Write the profile atomically: temp file, then rename over the
    /// old one. Stamps `updated_unix` first.
    pub async fn save(&self, profile: &mut Profile) -> anyhow::Result<()> {
        profile.updated_unix = now_unix();
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create profile dir {}", self.dir.display()))?;
        let p = self.path_for(&profile.handle);
        let tmp = p.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(profile).context("encode profile")?;
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &p)
            .await
            .with_context(|| format!("rename {} -> {}", tmp.display(), p.display()))?;
        Ok(())
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let mut b = [0u8; 8];
        getrandom::getrandom(&mut b).expect("getrandom");
        std::env::temp_dir().join(format!("parlor_profiles_{:016x}", u64::from_be_bytes(b)))
    }

    #[tokio::test]
    async fn missing_profile_loads_fresh() {
        let store = ProfileStore::new(scratch_dir());
        let p = store.load("ada", "Ada L").await;
        assert_eq!(p.handle, "ada");
        assert_eq!(p.name, "Ada L");
        assert_eq!(p.gold, STARTING_GOLD);
        assert_eq!(p.duels_played, 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = scratch_dir();
        let store = ProfileStore::new(&dir);
        let mut p = Profile::fresh("Ada", "Ada L");
        p.gold = 222;
        p.tourneys_won = 3;
        store.save(&mut p).await.unwrap();
        assert!(p.updated_unix > 0);

        let back = store.load("ADA", "ignored").await;
        assert_eq!(back.gold, 222);
        assert_eq!(back.tourneys_won, 3);
        assert_eq!(back.name, "Ada L");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn corrupt_profile_falls_back_to_fresh() {
        let dir = scratch_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("bix.json"), b"{oops").await.unwrap();
        let store = ProfileStore::new(&dir);
        let p = store.load("bix", "Bix").await;
        assert_eq!(p.gold, STARTING_GOLD);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn guarded_settlements_do_not_lose_writes() {
        let dir = scratch_dir();
        let store = ProfileStore::new(&dir);
        // Two settlers hammering the same purse, as when a tournament
        // and a duel finish at once for one player.
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let _settle = store.guard("ADA").await;
                    let mut p = store.load("ada", "Ada").await;
                    p.gold += 1;
                    store.save(&mut p).await.unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(store.load("ada", "Ada").await.gold, STARTING_GOLD + 50);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn handles_are_sanitized_into_filenames() {
        let store = ProfileStore::new(scratch_dir());
        let p = store.path_for("../../etc/passwd");
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "______etc_passwd.json");
        assert_eq!(p.parent(), Some(store.dir()));
    }
}
