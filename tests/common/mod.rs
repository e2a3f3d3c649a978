#![allow(dead_code)]

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory laid out as `raw/<season>/<table>.csv` plus an `out/`
/// directory, cleaned up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.path().join("raw")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    /// Writes `contents` under the workspace, creating parent directories.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    /// Writes one season's raw export of `table`.
    pub fn write_season(&self, season: &str, table: &str, contents: &str) -> PathBuf {
        self.write(&format!("raw/{season}/{table}.csv"), contents)
    }

    pub fn read_out(&self, relative: &str) -> String {
        let path = self.out_dir().join(relative);
        fs::read_to_string(&path).unwrap_or_else(|err| panic!("reading {path:?}: {err}"))
    }

    pub fn read_out_json(&self, relative: &str) -> serde_json::Value {
        serde_json::from_str(&self.read_out(relative)).expect("valid JSON")
    }

    /// Column names of a schema document, in document order.
    pub fn schema_columns(&self, table: &str) -> Vec<String> {
        let text = self.read_out(&format!("schemas/{table}.schema.json"));
        let document: SchemaDocument = serde_json::from_str(&text).expect("schema document");
        document.columns.0
    }

    /// Staged CSV rows (header included) split into cells.
    pub fn read_staged(&self, table: &str, season: &str) -> Vec<Vec<String>> {
        let text = self.read_out(&format!("{season}/stg_{table}_{season}.csv"));
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(text.as_bytes());
        reader
            .records()
            .map(|record| {
                record
                    .expect("staged record")
                    .iter()
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    /// Every file under `out/`, relative and sorted.
    pub fn out_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.out_dir(), &self.out_dir(), &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files);
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    columns: OrderedKeys,
}

/// Keys of a JSON object in the order they appear.
struct OrderedKeys(Vec<String>);

impl<'de> Deserialize<'de> for OrderedKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = OrderedKeys;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of columns")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut keys = Vec::new();
                while let Some((key, IgnoredAny)) = map.next_entry::<String, IgnoredAny>()? {
                    keys.push(key);
                }
                Ok(OrderedKeys(keys))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}
