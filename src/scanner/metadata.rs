//! Metadata extraction for image files.
//!
//! This module provides the `MetadataExtractor` seam used by the
//! synchronizer and the read path, plus `ExifExtractor`, which reads image
//! headers and EXIF data while touching as little of the file as possible.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use exif::{In, Tag, Value};
use image::ImageReader;
use tracing::{debug, trace};

use crate::models::ImageMeta;

/// Windows "Rating" tag, written by most photo managers in IFD0.
const TAG_RATING: Tag = Tag(exif::Context::Tiff, 0x4746);

/// Extracts metadata from an image file.
///
/// Implementations fail only when the file itself cannot be read. Missing or
/// malformed metadata yields `None` fields, never an error.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<ImageMeta>;
}

/// Reads dimensions from the image header and fields from EXIF.
///
/// IPTC and XMP blocks are not parsed, so `title`, `caption` and `tags` stay
/// empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMeta> {
        trace!("Extracting metadata from {:?}", path);

        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let mut meta = ImageMeta::default();

        match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
            Ok(exif) => read_exif_fields(&exif, &mut meta),
            Err(e) => debug!("No EXIF data in {:?}: {}", path, e),
        }

        if let Some((width, height)) = header_dimensions(path) {
            meta.width = Some(width);
            meta.height = Some(height);
        }

        // Orientations 5-8 are rotated by 90 degrees; HEIF stores the
        // displayed size already.
        let is_heif = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_lowercase().as_str(), "heif" | "heic"))
            .unwrap_or(false);
        if !is_heif && matches!(meta.orientation, Some(5..=8)) {
            std::mem::swap(&mut meta.width, &mut meta.height);
        }

        Ok(meta)
    }
}

fn header_dimensions(path: &Path) -> Option<(u32, u32)> {
    match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => match reader.into_dimensions() {
            Ok(dims) => Some(dims),
            Err(e) => {
                debug!("Failed to read image dimensions for {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            debug!("Failed to open image {:?}: {}", path, e);
            None
        }
    }
}

fn read_exif_fields(exif: &exif::Exif, meta: &mut ImageMeta) {
    let field = |tag: Tag| exif.get_field(tag, In::PRIMARY);
    let uint = |tag: Tag| field(tag).and_then(|f| f.value.get_uint(0));
    let rational = |tag: Tag| {
        field(tag).and_then(|f| match &f.value {
            Value::Rational(v) if !v.is_empty() && v[0].denom != 0 => Some(v[0].to_f64()),
            _ => None,
        })
    };
    let display = |tag: Tag| field(tag).map(|f| f.display_value().to_string());
    let text = |tag: Tag| field(tag).and_then(|f| ascii_value(&f.value));

    meta.orientation = uint(Tag::Orientation).map(|v| v as u16);
    meta.f_number = rational(Tag::FNumber);
    meta.exposure_time = display(Tag::ExposureTime);
    meta.iso = uint(Tag::PhotographicSensitivity).map(f64::from);
    meta.focal_length = display(Tag::FocalLength);
    meta.make = text(Tag::Make);
    meta.model = text(Tag::Model);
    meta.lens = text(Tag::LensModel);
    meta.rating = uint(TAG_RATING).map(i64::from);
    meta.exif_datetime = text(Tag::DateTimeOriginal).and_then(|s| parse_exif_datetime(&s));

    if meta.width.is_none() || meta.height.is_none() {
        meta.width = uint(Tag::PixelXDimension);
        meta.height = uint(Tag::PixelYDimension);
    }

    let lat = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S');
    let lon = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W');
    if let (Some(lat), Some(lon)) = (lat, lon) {
        meta.set_gps(lat, lon);
    }
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => {
            let joined = parts
                .iter()
                .map(|p| String::from_utf8_lossy(p).trim_matches(char::from(0)).trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

/// Converts a degrees/minutes/seconds GPS field to signed decimal degrees.
fn gps_coordinate(exif: &exif::Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let degrees = match &field.value {
        Value::Rational(v) if v.len() >= 3 && v.iter().all(|r| r.denom != 0) => {
            v[0].to_f64() + v[1].to_f64() / 60.0 + v[2].to_f64() / 3600.0
        }
        _ => return None,
    };

    let negative = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(parts) => parts.first().and_then(|p| p.first().copied()),
            _ => None,
        })
        .map(|c| c.to_ascii_uppercase() == negative_ref)
        .unwrap_or(false);

    Some(if negative { -degrees } else { degrees })
}

/// Parses an EXIF `YYYY:MM:DD HH:MM:SS` timestamp as local time.
///
/// Any sub-second suffix is dropped.
pub fn parse_exif_datetime(value: &str) -> Option<f64> {
    let value = value.split('.').next()?.trim();
    let naive = NaiveDateTime::parse_from_str(value, "%Y:%m:%d %H:%M:%S").ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.timestamp() as f64)
}
