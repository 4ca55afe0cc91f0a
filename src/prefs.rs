use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::routes::BusId;

/// Favorites used when nothing valid is stored: Bus 95 and Bus 301.
pub const DEFAULT_FAVORITES: [BusId; 2] = [1, 4];
pub const MAX_HISTORY_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub low_data_mode: bool,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct StoredPrefs {
    /// `None` means the key was never written; an explicitly-saved empty list
    /// is a valid "no favorites" state.
    favorites: Option<Vec<BusId>>,
    search_history: Vec<String>,
    settings: ProfileSettings,
}

/// JSON-file-backed preference store. Reads fall back silently to defaults on
/// missing or corrupt data; writes are last-write-wins and never propagate
/// errors to the caller.
#[derive(Debug)]
pub struct PrefsStore {
    path: PathBuf,
    data: StoredPrefs,
}

impl PrefsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = load_prefs(&path);
        PrefsStore { path, data }
    }

    pub fn favorites(&self) -> Vec<BusId> {
        self.data
            .favorites
            .clone()
            .unwrap_or_else(|| DEFAULT_FAVORITES.to_vec())
    }

    pub fn is_favorited(&self, bus_id: BusId) -> bool {
        self.favorites().contains(&bus_id)
    }

    /// Returns whether the bus is favorited after the toggle.
    pub fn toggle_favorite(&mut self, bus_id: BusId) -> bool {
        let mut favorites = self.favorites();
        let now_favorited = if let Some(i) = favorites.iter().position(|id| *id == bus_id) {
            favorites.remove(i);
            false
        } else {
            favorites.push(bus_id);
            true
        };
        self.data.favorites = Some(favorites);
        self.save();
        now_favorited
    }

    pub fn search_history(&self) -> &[String] {
        &self.data.search_history
    }

    /// Most-recent-first with case-insensitive de-duplication, capped at
    /// `MAX_HISTORY_ITEMS`. Blank terms are ignored.
    pub fn add_search_term(&mut self, term: &str) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }
        let lowered = term.to_lowercase();
        self.data
            .search_history
            .retain(|existing| existing.to_lowercase() != lowered);
        self.data.search_history.insert(0, term.to_string());
        self.data.search_history.truncate(MAX_HISTORY_ITEMS);
        self.save();
    }

    pub fn settings(&self) -> ProfileSettings {
        self.data.settings
    }

    pub fn update_settings(&mut self, settings: ProfileSettings) {
        self.data.settings = settings;
        self.save();
    }

    fn save(&self) {
        if let Err(e) = write_prefs(&self.path, &self.data) {
            log::error!("Failed to save preferences to {:?}: {}", self.path, e);
        }
    }
}

fn load_prefs(path: &Path) -> StoredPrefs {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return StoredPrefs::default(),
    };
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(data) => data,
        Err(e) => {
            log::warn!(
                "Ignoring corrupt preferences at {:?}, using defaults: {}",
                path,
                e
            );
            StoredPrefs::default()
        }
    }
}

fn write_prefs(path: &Path, data: &StoredPrefs) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("citybus_prefs_{}_{}.json", name, std::process::id()))
    }

    #[test]
    fn missing_file_yields_default_favorites() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        let store = PrefsStore::open(&path);
        assert_eq!(store.favorites(), vec![1, 4]);
        assert!(store.search_history().is_empty());
        assert!(!store.settings().low_data_mode);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json at all").unwrap();
        let store = PrefsStore::open(&path);
        assert_eq!(store.favorites(), vec![1, 4]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn toggled_favorites_survive_reopen() {
        let path = temp_path("toggle");
        let _ = std::fs::remove_file(&path);
        let mut store = PrefsStore::open(&path);
        assert!(store.toggle_favorite(2));
        assert!(!store.toggle_favorite(1));

        let reopened = PrefsStore::open(&path);
        assert_eq!(reopened.favorites(), vec![4, 2]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn explicitly_empty_favorites_are_valid() {
        let path = temp_path("empty");
        let _ = std::fs::remove_file(&path);
        let mut store = PrefsStore::open(&path);
        store.toggle_favorite(1);
        store.toggle_favorite(4);
        assert!(store.favorites().is_empty());

        let reopened = PrefsStore::open(&path);
        assert!(reopened.favorites().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn history_dedups_case_insensitively_and_caps_at_three() {
        let path = temp_path("history");
        let _ = std::fs::remove_file(&path);
        let mut store = PrefsStore::open(&path);
        store.add_search_term("CBS");
        store.add_search_term("Palace");
        store.add_search_term("Zoo");
        store.add_search_term("cbs");
        assert_eq!(store.search_history(), ["cbs", "Zoo", "Palace"]);
        store.add_search_term("Hebbal");
        assert_eq!(store.search_history(), ["Hebbal", "cbs", "Zoo"]);
        store.add_search_term("   ");
        assert_eq!(store.search_history().len(), 3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn settings_roundtrip() {
        let path = temp_path("settings");
        let _ = std::fs::remove_file(&path);
        let mut store = PrefsStore::open(&path);
        store.update_settings(ProfileSettings {
            low_data_mode: true,
        });
        let reopened = PrefsStore::open(&path);
        assert!(reopened.settings().low_data_mode);
        let _ = std::fs::remove_file(&path);
    }
}
