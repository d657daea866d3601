use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::batch::PartitionSink;
use crate::bibtex;
use crate::domain::{BibRecord, Partition};
use crate::error::FinderError;

pub const ABSTRACTS_FILE_NAME: &str = "output_with_abstracts.bib";

/// Output directory holding the two partition files.
#[derive(Debug, Clone)]
pub struct BibStore {
    root: Utf8PathBuf,
}

impl BibStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, FinderError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path())
            .map_err(|err| FinderError::Filesystem(format!("create {root}: {err}")))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn partition_path(&self, partition: Partition) -> Utf8PathBuf {
        self.root.join(partition.file_name())
    }

    pub fn write_partitions(
        &self,
        with_code: &[BibRecord],
        without_code: &[BibRecord],
    ) -> Result<(), FinderError> {
        self.write_records(Partition::WithCode.file_name(), with_code)?;
        self.write_records(Partition::WithoutCode.file_name(), without_code)?;
        Ok(())
    }

    pub fn write_records(&self, file_name: &str, records: &[BibRecord]) -> Result<Utf8PathBuf, FinderError> {
        let path = self.root.join(file_name);
        Self::write_bytes_atomic(&path, bibtex::serialize(records).as_bytes())?;
        Ok(path)
    }

    pub fn read_records(path: &Utf8Path) -> Result<Vec<BibRecord>, FinderError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| FinderError::BibliographyRead(path.as_std_path().to_path_buf()))?;
        bibtex::parse(&content)
    }

    /// Temp file in the destination directory, then rename over the target, so a
    /// reader never sees a half-written file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), FinderError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| FinderError::Filesystem(err.to_string()))?;
        let mut tmp = NamedTempFile::new_in(parent.as_std_path())
            .map_err(|err| FinderError::Filesystem(err.to_string()))?;
        tmp.write_all(content)
            .map_err(|err| FinderError::Filesystem(err.to_string()))?;
        tmp.persist(path.as_std_path())
            .map_err(|err| FinderError::Filesystem(format!("replace {path}: {}", err.error)))?;
        Ok(())
    }
}

impl PartitionSink for BibStore {
    fn persist(&self, with_code: &[BibRecord], without_code: &[BibRecord]) -> Result<(), FinderError> {
        self.write_partitions(with_code, without_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn creates_output_dir_and_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = BibStore::new(utf8(&dir).join("out/nested")).unwrap();
        let record = BibRecord::new("article", "a").with_field("title", "T");

        store.write_partitions(&[record.clone()], &[]).unwrap();

        let with_code = BibStore::read_records(&store.partition_path(Partition::WithCode)).unwrap();
        assert_eq!(with_code, vec![record]);
        let without = fs::read_to_string(store.partition_path(Partition::WithoutCode)).unwrap();
        assert!(without.is_empty());
    }

    #[test]
    fn persist_through_sink_writes_both_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = BibStore::new(utf8(&dir)).unwrap();
        let found = BibRecord::new("misc", "found").with_field("codebase_url", "https://github.com/a/b");
        let missing = BibRecord::new("misc", "missing");

        let sink: &dyn PartitionSink = &store;
        sink.persist(&[found.clone()], &[missing.clone()]).unwrap();

        assert_eq!(
            BibStore::read_records(&store.partition_path(Partition::WithCode)).unwrap(),
            vec![found]
        );
        assert_eq!(
            BibStore::read_records(&store.partition_path(Partition::WithoutCode)).unwrap(),
            vec![missing]
        );
    }

    #[test]
    fn rewrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = BibStore::new(utf8(&dir)).unwrap();
        let a = BibRecord::new("misc", "a");
        let b = BibRecord::new("misc", "b");

        store.write_partitions(&[], &[a.clone()]).unwrap();
        store.write_partitions(&[b.clone()], &[a.clone()]).unwrap();

        assert_eq!(
            BibStore::read_records(&store.partition_path(Partition::WithCode)).unwrap(),
            vec![b]
        );
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|entry| {
                let name = entry.as_ref().unwrap().file_name();
                !name.to_string_lossy().ends_with(".bib")
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
