/// File extensions the synchronizer indexes.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "heif", "heic"];

/// Returns true if `ext` (without the leading dot) is an indexed image type.
pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
}

/// Precision used for GPS coordinates and for the location join key.
pub const GPS_SCALE: f64 = 10_000.0;

/// Rounds a coordinate to 4 decimal places.
pub fn round_coordinate(value: f64) -> f64 {
    (value * GPS_SCALE).round() / GPS_SCALE
}

/// Integer-scaled key for a rounded coordinate.
pub fn coordinate_key(value: f64) -> i64 {
    (value * GPS_SCALE).round() as i64
}

/// Metadata extracted from a single image file.
///
/// Every field the extractor could not find stays `None` and is stored as
/// NULL. `exif_datetime` is the exception: callers fall back to the file's
/// mtime before persisting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMeta {
    pub orientation: Option<u16>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Capture time in seconds since the epoch.
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
    pub title: Option<String>,
    pub caption: Option<String>,
    pub tags: Option<String>,
}

impl ImageMeta {
    /// Metadata with only dimensions set.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Sets GPS coordinates, rounding both to 4 decimal places.
    pub fn set_gps(&mut self, latitude: f64, longitude: f64) {
        self.latitude = Some(round_coordinate(latitude));
        self.longitude = Some(round_coordinate(longitude));
    }

    pub fn is_portrait(&self) -> bool {
        matches!((self.width, self.height), (Some(w), Some(h)) if h > w)
    }
}
