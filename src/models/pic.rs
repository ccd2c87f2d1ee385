use std::path::{Path, PathBuf};

/// Read-side projection of one cached image, rebuilt from the store on every
/// access.
#[derive(Debug, Clone, PartialEq)]
pub struct Pic {
    pub path: PathBuf,
    /// Database id, `0` for the placeholder image.
    pub file_id: i64,
    pub last_modified: f64,
    pub orientation: i64,
    pub exif_datetime: Option<f64>,
    pub f_number: Option<f64>,
    pub exposure_time: Option<String>,
    pub iso: Option<f64>,
    pub focal_length: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
    pub rating: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_portrait: bool,
    pub location: Option<String>,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub tags: Option<String>,
    pub displayed_count: i64,
    pub last_displayed: f64,
}

impl Pic {
    /// The fallback shown when nothing in the library can be displayed.
    pub fn placeholder(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file_id: 0,
            last_modified: 0.0,
            orientation: 1,
            exif_datetime: None,
            f_number: None,
            exposure_time: None,
            iso: None,
            focal_length: None,
            make: None,
            model: None,
            lens: None,
            rating: None,
            latitude: None,
            longitude: None,
            width: None,
            height: None,
            is_portrait: false,
            location: None,
            title: None,
            caption: None,
            tags: None,
            displayed_count: 0,
            last_displayed: 0.0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.file_id == 0
    }
}

/// One slot of the materialized playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistEntry {
    Single(i64),
    /// Two portrait images shown side by side.
    Pair(i64, i64),
}

impl PlaylistEntry {
    pub fn first(&self) -> i64 {
        match *self {
            Self::Single(id) | Self::Pair(id, _) => id,
        }
    }

    pub fn second(&self) -> Option<i64> {
        match *self {
            Self::Single(_) => None,
            Self::Pair(_, id) => Some(id),
        }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.first() == id || self.second() == Some(id)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Pair(..) => 2,
        }
    }

    /// Drops `id` from the entry. Returns `None` if nothing would remain.
    pub fn without(&self, id: i64) -> Option<Self> {
        match *self {
            Self::Single(a) if a == id => None,
            Self::Pair(a, b) if a == id => Some(Self::Single(b)),
            Self::Pair(a, b) if b == id => Some(Self::Single(a)),
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_accessors() {
        let single = PlaylistEntry::Single(4);
        assert_eq!(single.first(), 4);
        assert_eq!(single.second(), None);
        assert_eq!(single.len(), 1);

        let pair = PlaylistEntry::Pair(7, 9);
        assert_eq!(pair.first(), 7);
        assert_eq!(pair.second(), Some(9));
        assert!(pair.contains(9));
        assert!(!pair.contains(4));
        assert_eq!(pair.len(), 2);
    }

    #[test]
    fn test_entry_without() {
        assert_eq!(PlaylistEntry::Single(1).without(1), None);
        assert_eq!(PlaylistEntry::Single(1).without(2), Some(PlaylistEntry::Single(1)));
        assert_eq!(PlaylistEntry::Pair(1, 2).without(1), Some(PlaylistEntry::Single(2)));
        assert_eq!(PlaylistEntry::Pair(1, 2).without(2), Some(PlaylistEntry::Single(1)));
    }

    #[test]
    fn test_placeholder() {
        let pic = Pic::placeholder(Path::new("/data/no_pictures.jpg"));
        assert!(pic.is_placeholder());
        assert_eq!(pic.latitude, None);
        assert_eq!(pic.orientation, 1);
    }
}
