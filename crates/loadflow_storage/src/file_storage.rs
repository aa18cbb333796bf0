//! Folder-backed storage rooted at one directory.
//!
//! All paths passed in are relative to the root. Writes go to a hidden temp
//! file first and are promoted with an atomic rename, so readers never see a
//! partially written file.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Default)]
struct Listing {
    names: Vec<String>,
    non_utf8: Vec<String>,
}

/// `.<name>.tmp`, written by [`FileStorage::save`] before the rename.
fn is_temp_name(name: &str) -> bool {
    name.len() > 1 + TEMP_SUFFIX.len() && name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open storage at `root`. With `makedirs` the root is created if missing.
    pub fn new(root: impl Into<PathBuf>, makedirs: bool) -> Result<Self> {
        let root = root.into();
        if makedirs {
            fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn make_full_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn has_file(&self, relative: impl AsRef<Path>) -> bool {
        self.make_full_path(relative).is_file()
    }

    pub fn has_folder(&self, relative: impl AsRef<Path>) -> bool {
        self.make_full_path(relative).is_dir()
    }

    pub fn create_folder(&self, relative: impl AsRef<Path>, exists_ok: bool) -> Result<()> {
        let path = self.make_full_path(relative);
        if path.is_dir() {
            if exists_ok {
                return Ok(());
            }
            return Err(StorageError::invalid_state(format!(
                "Folder already exists: {}",
                path.display()
            )));
        }
        fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))
    }

    /// Names of regular files in a folder.
    ///
    /// In-flight temp files of [`Self::save`] are skipped. Names that are not
    /// UTF-8 are left out here and listed by [`Self::list_non_utf8_files`].
    pub fn list_folder_files(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        let listing = self.list_entries(relative.as_ref(), |p| p.is_file())?;
        for name in &listing.non_utf8 {
            warn!(name = %name, "Skipping file with a non UTF-8 name");
        }
        Ok(listing.names)
    }

    /// Names of sub folders of a folder.
    pub fn list_folder_dirs(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        Ok(self.list_entries(relative.as_ref(), |p| p.is_dir())?.names)
    }

    /// Regular files whose names are not UTF-8, converted lossily for
    /// reporting. The converted names do not open the files.
    pub fn list_non_utf8_files(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        Ok(self.list_entries(relative.as_ref(), |p| p.is_file())?.non_utf8)
    }

    fn list_entries(&self, relative: &Path, keep: impl Fn(&Path) -> bool) -> Result<Listing> {
        let path = self.make_full_path(relative);
        let entries = fs::read_dir(&path).map_err(|e| StorageError::io(&path, e))?;
        let mut listing = Listing::default();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&path, e))?;
            if !keep(&entry.path()) {
                continue;
            }
            let file_name = entry.file_name();
            match file_name.to_str() {
                Some(name) if is_temp_name(name) => {}
                Some(name) => listing.names.push(name.to_string()),
                None => listing
                    .non_utf8
                    .push(file_name.to_string_lossy().into_owned()),
            }
        }
        Ok(listing)
    }

    /// Write `data` atomically (temp file + rename).
    pub fn save(&self, relative: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Result<PathBuf> {
        let final_path = self.make_full_path(relative);
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StorageError::invalid_state(format!("Invalid file path: {}", final_path.display()))
            })?;
        let temp_path = final_path.with_file_name(format!(".{}{}", file_name, TEMP_SUFFIX));

        fs::write(&temp_path, data).map_err(|e| StorageError::io(&temp_path, e))?;
        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::io(&final_path, e));
        }
        debug!("Saved {}", final_path.display());
        Ok(final_path)
    }

    pub fn load(&self, relative: impl AsRef<Path>) -> Result<String> {
        let path = self.make_full_path(relative);
        fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))
    }

    pub fn delete(&self, relative: impl AsRef<Path>) -> Result<()> {
        let path = self.make_full_path(relative);
        fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))
    }

    pub fn delete_folder(&self, relative: impl AsRef<Path>) -> Result<()> {
        let path = self.make_full_path(relative);
        fs::remove_dir_all(&path).map_err(|e| StorageError::io(&path, e))
    }

    /// Move a file or folder within the storage.
    pub fn atomic_rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let from = self.make_full_path(from);
        let to = self.make_full_path(to);
        fs::rename(&from, &to).map_err(|e| StorageError::io(&from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_is_visible_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("root"), true).unwrap();
        storage.create_folder("data", false).unwrap();

        storage.save("data/a.jsonl", "{}\n").unwrap();

        assert_eq!(storage.load("data/a.jsonl").unwrap(), "{}\n");
        assert_eq!(storage.list_folder_files("data").unwrap(), vec!["a.jsonl"]);
        assert!(!storage.has_file("data/.a.jsonl.tmp"));
    }

    #[test]
    fn test_listing_skips_temp_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), false).unwrap();
        storage.create_folder("data/sub", true).unwrap();
        fs::write(dir.path().join("data/.pending.tmp"), "x").unwrap();
        fs::write(dir.path().join("data/file"), "x").unwrap();
        fs::write(dir.path().join("data/.hidden"), "x").unwrap();

        let mut files = storage.list_folder_files("data").unwrap();
        files.sort();
        assert_eq!(files, vec![".hidden", "file"]);
        assert_eq!(storage.list_folder_dirs("data").unwrap(), vec!["sub"]);
        assert!(storage.list_non_utf8_files("data").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_names_are_listed_apart() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), false).unwrap();
        storage.create_folder("data", true).unwrap();
        let raw = OsStr::from_bytes(b"crm.users.\xff.jsonl");
        // Some filesystems refuse non UTF-8 names
        if fs::write(dir.path().join("data").join(raw), "x").is_err() {
            return;
        }
        fs::write(dir.path().join("data/ok.jsonl"), "x").unwrap();

        assert_eq!(storage.list_folder_files("data").unwrap(), vec!["ok.jsonl"]);
        assert_eq!(
            storage.list_non_utf8_files("data").unwrap(),
            vec!["crm.users.\u{FFFD}.jsonl"]
        );
    }

    #[test]
    fn test_create_folder_exists_ok() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), false).unwrap();
        storage.create_folder("x", false).unwrap();
        storage.create_folder("x", true).unwrap();
        assert!(matches!(
            storage.create_folder("x", false),
            Err(StorageError::InvalidState(_))
        ));
    }
}
