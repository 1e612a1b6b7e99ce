//! Ordered file sequence consumed by the cache.
//!
//! The cache never owns file metadata. It reads positions from a [`FileTable`]
//! (normally backed by the image-set database) and keeps its own cursor in a
//! [`FileTableEnumerator`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Supported image file extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff", "tif"];

/// Video file extensions recognized when scanning a folder.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "asf", "wmv", "mkv"];

/// Check if a filename has a supported image extension.
pub fn is_image_file(filename: &str) -> bool {
    has_extension(filename, IMAGE_EXTENSIONS)
}

/// Check if a filename has a recognized video extension.
pub fn is_video_file(filename: &str) -> bool {
    has_extension(filename, VIDEO_EXTENSIONS)
}

fn has_extension(filename: &str, extensions: &[&str]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Stable identifier of a file, independent of sort order or selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file in the current selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable identifier
    pub id: FileId,
    /// Position in the current ordered selection
    pub row: usize,
    /// Path relative to the image-set root
    pub relative_path: PathBuf,
    /// Whether the file is a video rather than a still image
    pub is_video: bool,
    /// Whether the file was decodable at last check
    pub displayable: bool,
}

impl FileRecord {
    /// Create a displayable still-image record.
    pub fn image(id: i64, row: usize, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            id: FileId(id),
            row,
            relative_path: relative_path.into(),
            is_video: false,
            displayable: true,
        }
    }

    /// Absolute path given the image-set root.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(&self.relative_path)
    }

    pub fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Read-only, randomly indexable view of the ordered file selection.
pub trait FileTable: Send + Sync {
    /// Folder all relative paths are resolved against.
    fn root_path(&self) -> &Path;

    /// Number of files in the current selection.
    fn row_count(&self) -> usize;

    /// Record at `row` (with `row` filled in), or `None` when out of range.
    fn record_at(&self, row: usize) -> Option<FileRecord>;

    fn is_row_in_range(&self, row: usize) -> bool {
        row < self.row_count()
    }

    /// Whether the file at `row` exists and can be displayed.
    fn is_displayable(&self, row: usize) -> bool {
        self.record_at(row).is_some_and(|r| r.displayable)
    }
}

/// A thread-safe file table kept entirely in memory.
///
/// Used by the command line tool and by tests; the desktop application backs
/// [`FileTable`] with its database instead.
pub struct InMemoryFileTable {
    root: PathBuf,
    records: RwLock<Vec<FileRecord>>,
}

impl InMemoryFileTable {
    /// Create a table from records. Rows are renumbered in the given order.
    pub fn new(root: impl Into<PathBuf>, records: Vec<FileRecord>) -> Self {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(row, mut record)| {
                record.row = row;
                record
            })
            .collect();
        Self {
            root: root.into(),
            records: RwLock::new(records),
        }
    }

    /// Scan a folder for image and video files, sorted by name.
    ///
    /// Ids are assigned 1.. in sorted order. Every file starts displayable.
    pub fn from_folder(folder: &Path) -> std::io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| is_image_file(n) || is_video_file(n))
            })
            .collect();
        paths.sort();

        let records = paths
            .iter()
            .enumerate()
            .filter_map(|(row, path)| {
                let relative = path.strip_prefix(folder).ok()?.to_path_buf();
                let is_video = is_video_file(&relative.to_string_lossy());
                Some(FileRecord {
                    id: FileId(row as i64 + 1),
                    row,
                    relative_path: relative,
                    is_video,
                    displayable: true,
                })
            })
            .collect::<Vec<_>>();

        log::info!("Found {} files in {:?}", records.len(), folder);
        Ok(Self::new(folder, records))
    }

    /// Update the displayable flag of a file, e.g. after it was restored.
    ///
    /// Returns `false` if no record has that id.
    pub fn set_displayable(&self, id: FileId, displayable: bool) -> bool {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.displayable = displayable;
                true
            }
            None => false,
        }
    }

    /// Row currently holding `id`.
    pub fn row_of(&self, id: FileId) -> Option<usize> {
        self.records.read().iter().position(|r| r.id == id)
    }
}

impl FileTable for InMemoryFileTable {
    fn root_path(&self) -> &Path {
        &self.root
    }

    fn row_count(&self) -> usize {
        self.records.read().len()
    }

    fn record_at(&self, row: usize) -> Option<FileRecord> {
        self.records.read().get(row).cloned()
    }
}

/// Cursor over a [`FileTable`].
pub struct FileTableEnumerator<T: FileTable> {
    table: Arc<T>,
    current: Option<FileRecord>,
}

impl<T: FileTable> FileTableEnumerator<T> {
    /// Create an enumerator positioned before the first row.
    pub fn new(table: Arc<T>) -> Self {
        Self {
            table,
            current: None,
        }
    }

    pub fn table(&self) -> &Arc<T> {
        &self.table
    }

    /// The record at the cursor.
    pub fn current(&self) -> Option<&FileRecord> {
        self.current.as_ref()
    }

    /// Row of the cursor, `None` before the first move or after a reset.
    pub fn current_row(&self) -> Option<usize> {
        self.current.as_ref().map(|r| r.row)
    }

    /// Move the cursor to `row`. Leaves it unchanged when out of range.
    pub fn try_move_to_file(&mut self, row: usize) -> bool {
        match self.table.record_at(row) {
            Some(record) => {
                self.current = Some(record);
                true
            }
            None => false,
        }
    }

    /// Move the cursor before the first row.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(count: usize) -> Arc<InMemoryFileTable> {
        let records = (0..count)
            .map(|i| FileRecord::image(100 + i as i64, 0, format!("IMG_{:04}.JPG", i)))
            .collect();
        Arc::new(InMemoryFileTable::new("/images", records))
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file("test.png"));
        assert!(is_image_file("test.PNG"));
        assert!(is_image_file("test.JPEG"));
        assert!(is_image_file("path/to/image.tif"));
        assert!(!is_image_file("test.txt"));
        assert!(!is_image_file("test"));
        assert!(!is_image_file(""));
        assert!(!is_image_file("clip.mp4"));
        assert!(is_video_file("clip.MP4"));
    }

    #[test]
    fn test_rows_are_renumbered() {
        let t = table(3);
        assert_eq!(t.row_count(), 3);
        assert_eq!(t.record_at(2).unwrap().row, 2);
        assert_eq!(t.record_at(2).unwrap().id, FileId(102));
        assert!(t.record_at(3).is_none());
        assert!(!t.is_row_in_range(3));
        assert_eq!(t.row_of(FileId(101)), Some(1));
    }

    #[test]
    fn test_set_displayable() {
        let t = table(2);
        assert!(t.is_displayable(1));
        assert!(t.set_displayable(FileId(101), false));
        assert!(!t.is_displayable(1));
        assert!(!t.set_displayable(FileId(999), false));
        assert!(!t.is_displayable(7));
    }

    #[test]
    fn test_enumerator_moves_and_resets() {
        let mut e = FileTableEnumerator::new(table(3));
        assert_eq!(e.current_row(), None);
        assert!(e.try_move_to_file(1));
        assert_eq!(e.current().unwrap().id, FileId(101));
        assert!(!e.try_move_to_file(5));
        assert_eq!(e.current_row(), Some(1));
        e.reset();
        assert!(e.current().is_none());
    }

    #[test]
    fn test_from_folder_sorts_and_classifies() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.png", "c.mp4", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let t = InMemoryFileTable::from_folder(dir.path()).unwrap();
        assert_eq!(t.row_count(), 3);
        let first = t.record_at(0).unwrap();
        assert_eq!(first.relative_path, PathBuf::from("a.png"));
        assert_eq!(first.id, FileId(1));
        assert!(t.record_at(2).unwrap().is_video);
        assert_eq!(first.path_in(t.root_path()), dir.path().join("a.png"));
    }
}
