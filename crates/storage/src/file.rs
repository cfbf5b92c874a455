use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use snafu::ResultExt;

use super::error::{
    CreateStorageDirectorySnafu, ReadEntrySnafu, RemoveEntrySnafu, ReplaceEntrySnafu,
    StorageResult, WriteEntrySnafu,
};
use super::ids::SessionKey;
use super::KeyValueBackend;

const ENTRY_EXTENSION: &str = "json";

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &SessionKey) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXTENSION}", encode_file_stem(key.as_str())))
    }

    fn ensure_root(&self) -> StorageResult<()> {
        std::fs::create_dir_all(&self.root).context(CreateStorageDirectorySnafu {
            stage: "file-backend-create-root",
            path: display_path(&self.root),
        })
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &SessionKey) -> StorageResult<Option<String>> {
        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadEntrySnafu {
                stage: "file-backend-read",
                path: display_path(&path),
            }),
        }
    }

    fn set(&self, key: &SessionKey, value: &str) -> StorageResult<()> {
        self.ensure_root()?;

        let path = self.entry_path(key);
        let temp_path = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));
        std::fs::write(&temp_path, value).context(WriteEntrySnafu {
            stage: "file-backend-write-temporary",
            path: display_path(&temp_path),
        })?;

        // Rename keeps the previous snapshot intact until the new one is complete.
        std::fs::rename(&temp_path, &path).context(ReplaceEntrySnafu {
            stage: "file-backend-rename-temporary",
            from: display_path(&temp_path),
            to: display_path(&path),
        })
    }

    fn remove(&self, key: &SessionKey) -> StorageResult<()> {
        let path = self.entry_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(RemoveEntrySnafu {
                stage: "file-backend-remove",
                path: display_path(&path),
            }),
        }
    }
}

/// Bytes outside `[A-Za-z0-9_-]` are escaped, so no key can name a path component.
const FILE_STEM: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

fn encode_file_stem(key: &str) -> String {
    utf8_percent_encode(key, FILE_STEM).to_string()
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
