//! Cache file layout and naming
//!
//! Complete segment files live at
//! `<cache_dir>/<cache_directory>/<parent_id>/<segment_id>.<extension>`.
//! In-flight downloads write to the same name plus a per-download tag and a
//! `.part` suffix, which never matches the segment file pattern.

use crate::cache::config::CacheConfig;
use crate::error::{PlaybackError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

const ID_PATTERN: &str = "[A-Za-z0-9_-]+";
const PARTIAL_SUFFIX: &str = "part";

/// Maps segment ids to file names and back.
#[derive(Debug, Clone)]
pub struct CacheNaming {
    extension: String,
    file_pattern: Regex,
    id_pattern: Regex,
}

impl CacheNaming {
    pub fn new(extension: &str) -> Result<Self> {
        let file_pattern = Regex::new(&format!(
            r"^(?P<segment_id>{}?)\.{}$",
            ID_PATTERN,
            regex::escape(extension)
        ))
        .map_err(|e| PlaybackError::Config(e.to_string()))?;
        let id_pattern = Regex::new(&format!("^{}$", ID_PATTERN))
            .map_err(|e| PlaybackError::Config(e.to_string()))?;

        Ok(Self {
            extension: extension.to_string(),
            file_pattern,
            id_pattern,
        })
    }

    /// Whether an id can be stored without escaping
    pub fn is_valid_id(&self, id: &str) -> bool {
        self.id_pattern.is_match(id)
    }

    pub fn file_name(&self, segment_id: &str) -> String {
        format!("{}.{}", segment_id, self.extension)
    }

    /// Name of an in-flight download; `tag` keeps concurrent writers apart
    pub fn partial_file_name(&self, segment_id: &str, tag: u64) -> String {
        format!("{}.{}.{}", self.file_name(segment_id), tag, PARTIAL_SUFFIX)
    }

    /// Segment id encoded in a complete segment file name
    pub fn parse(&self, file_name: &str) -> Option<String> {
        self.file_pattern
            .captures(file_name)
            .and_then(|caps| caps.name("segment_id"))
            .map(|m| m.as_str().to_string())
    }

    /// Segment id encoded in the last component of `path`
    pub fn parse_path(&self, path: &Path) -> Option<String> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| self.parse(name))
    }
}

/// Resolves cache paths for parents and segments.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    naming: CacheNaming,
}

impl CacheLayout {
    pub fn new(cache_dir: &Path, config: &CacheConfig) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;

        Ok(Self {
            root: cache_dir.join(&config.cache_directory),
            naming: CacheNaming::new(&config.file_extension)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn naming(&self) -> &CacheNaming {
        &self.naming
    }

    pub fn parent_dir(&self, parent_id: &str) -> Result<PathBuf> {
        self.checked(parent_id)?;
        Ok(self.root.join(parent_id))
    }

    pub fn segment_path(&self, parent_id: &str, segment_id: &str) -> Result<PathBuf> {
        self.checked(segment_id)?;
        Ok(self
            .parent_dir(parent_id)?
            .join(self.naming.file_name(segment_id)))
    }

    pub fn partial_path(&self, parent_id: &str, segment_id: &str, tag: u64) -> Result<PathBuf> {
        self.checked(segment_id)?;
        Ok(self
            .parent_dir(parent_id)?
            .join(self.naming.partial_file_name(segment_id, tag)))
    }

    fn checked(&self, id: &str) -> Result<()> {
        if self.naming.is_valid_id(id) {
            Ok(())
        } else {
            Err(PlaybackError::InvalidState(format!(
                "id {:?} cannot be used as a cache file name",
                id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> CacheNaming {
        CacheNaming::new("cache").unwrap()
    }

    #[test]
    fn test_file_name_round_trips() {
        let naming = naming();
        for id in ["s1", "9f1c-22a", "track_07"] {
            assert_eq!(naming.parse(&naming.file_name(id)).as_deref(), Some(id));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        let naming = naming();
        assert_eq!(naming.parse(&naming.partial_file_name("s1", 4)), None);
        assert_eq!(naming.parse("s1.mp3"), None);
        assert_eq!(naming.parse(".cache"), None);
        assert_eq!(naming.parse("s 1.cache"), None);
        assert_eq!(naming.parse("s1.cachex"), None);
    }

    #[test]
    fn test_extension_is_escaped() {
        let naming = CacheNaming::new("c").unwrap();
        assert_eq!(naming.parse("s1.c").as_deref(), Some("s1"));
        assert_eq!(naming.parse("s1xc"), None);
    }

    #[test]
    fn test_layout_paths() {
        let layout = CacheLayout::new(Path::new("/data/cache"), &CacheConfig::default()).unwrap();

        assert_eq!(
            layout.segment_path("p1", "s1").unwrap(),
            PathBuf::from("/data/cache/offline_segments/p1/s1.cache")
        );
        assert_eq!(
            layout.partial_path("p1", "s1", 2).unwrap(),
            PathBuf::from("/data/cache/offline_segments/p1/s1.cache.2.part")
        );
        assert_eq!(
            layout
                .naming()
                .parse_path(&layout.segment_path("p1", "s1").unwrap())
                .as_deref(),
            Some("s1")
        );
    }

    #[test]
    fn test_layout_rejects_path_traversal() {
        let layout = CacheLayout::new(Path::new("/data/cache"), &CacheConfig::default()).unwrap();

        assert!(layout.parent_dir("..").is_err());
        assert!(layout.segment_path("p1", "../s1").is_err());
        assert!(layout.segment_path("p/1", "s1").is_err());
        assert!(layout.segment_path("p1", "s.1").is_err());
    }
}
