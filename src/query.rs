//! Query engine over the cache's read view.
//!
//! Filters are typed predicates rendered to SQL with bound parameters; only
//! column names from a fixed whitelist are ever spliced into the statement
//! text. `QueryEngine::select` turns a filter set and a sort specification
//! into playlist entries, pairing portrait images when enabled, and
//! `QueryEngine::fetch_pic` is the per-slide read path.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate, TimeZone};
use rusqlite::types::Value;
use tracing::{debug, trace, warn};

use crate::cache::{epoch_seconds, modified_seconds, CacheStore, FileRecord};
use crate::error::Result;
use crate::geo::AddressResolver;
use crate::models::{Pic, PlaylistEntry};
use crate::retry::Clock;
use crate::scanner::MetadataExtractor;

/// Columns of the read view that filters and sorts may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Fname,
    FileId,
    LastModified,
    Orientation,
    ExifDatetime,
    FNumber,
    ExposureTime,
    Iso,
    FocalLength,
    Make,
    Model,
    Lens,
    Rating,
    Latitude,
    Longitude,
    Width,
    Height,
    IsPortrait,
    Location,
    Title,
    Caption,
    Tags,
    DisplayedCount,
    LastDisplayed,
}

impl Column {
    pub const ALL: [Column; 24] = [
        Column::Fname,
        Column::FileId,
        Column::LastModified,
        Column::Orientation,
        Column::ExifDatetime,
        Column::FNumber,
        Column::ExposureTime,
        Column::Iso,
        Column::FocalLength,
        Column::Make,
        Column::Model,
        Column::Lens,
        Column::Rating,
        Column::Latitude,
        Column::Longitude,
        Column::Width,
        Column::Height,
        Column::IsPortrait,
        Column::Location,
        Column::Title,
        Column::Caption,
        Column::Tags,
        Column::DisplayedCount,
        Column::LastDisplayed,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            Column::Fname => "fname",
            Column::FileId => "file_id",
            Column::LastModified => "last_modified",
            Column::Orientation => "orientation",
            Column::ExifDatetime => "exif_datetime",
            Column::FNumber => "f_number",
            Column::ExposureTime => "exposure_time",
            Column::Iso => "iso",
            Column::FocalLength => "focal_length",
            Column::Make => "make",
            Column::Model => "model",
            Column::Lens => "lens",
            Column::Rating => "rating",
            Column::Latitude => "latitude",
            Column::Longitude => "longitude",
            Column::Width => "width",
            Column::Height => "height",
            Column::IsPortrait => "is_portrait",
            Column::Location => "location",
            Column::Title => "title",
            Column::Caption => "caption",
            Column::Tags => "tags",
            Column::DisplayedCount => "displayed_count",
            Column::LastDisplayed => "last_displayed",
        }
    }

    /// Case-insensitive lookup by view column name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.iter().copied().find(|c| c.as_sql() == name)
    }
}

/// Comparison operator for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// One named fragment of the active filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Files below a directory (not merely sharing a name prefix).
    PathPrefix(PathBuf),
    /// Taken strictly after this epoch time.
    DateFrom(f64),
    /// Taken strictly before this epoch time.
    DateTo(f64),
    /// Substring search in a text column.
    Text { column: Column, filter: TextFilter },
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
}

impl Predicate {
    /// Renders the predicate, appending its parameters to `values` in
    /// placeholder order.
    pub fn to_sql(&self, values: &mut Vec<Value>) -> String {
        match self {
            Predicate::PathPrefix(dir) => {
                let mut prefix = dir.to_string_lossy().into_owned();
                if !prefix.ends_with('/') {
                    prefix.push('/');
                }
                values.push(Value::Text(prefix.clone()));
                values.push(Value::Text(prefix));
                "substr(fname, 1, length(?)) = ?".to_string()
            }
            Predicate::DateFrom(from) => {
                values.push(Value::Real(*from));
                "exif_datetime > ?".to_string()
            }
            Predicate::DateTo(to) => {
                values.push(Value::Real(*to));
                "exif_datetime < ?".to_string()
            }
            Predicate::Text { column, filter } => filter.to_sql(*column, values),
            Predicate::Compare { column, op, value } => {
                values.push(value.clone());
                format!("{} {} ?", column.as_sql(), op.as_sql())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextToken {
    Open,
    Close,
    And,
    Or,
    Not,
    Phrase(String),
}

/// Parsed boolean substring search, e.g. `paris OR (new york AND NOT 2019)`.
///
/// Words become substring matches; adjacent words form one phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFilter {
    tokens: Vec<TextToken>,
}

impl TextFilter {
    /// Parses a filter expression.
    ///
    /// Returns `None` for input that cannot form a valid expression
    /// (unbalanced parentheses, two operators in a row, a dangling
    /// operator, nothing to search for). `None` clears the filter.
    pub fn parse(input: &str) -> Option<Self> {
        let cleaned: String = input
            .chars()
            .filter(|c| !matches!(c, ';' | '\'' | '"' | '%'))
            .collect();
        let spaced = cleaned.replace('(', " ( ").replace(')', " ) ");

        let mut tokens: Vec<TextToken> = Vec::new();
        let mut depth = 0usize;
        let mut expect_operand = true;

        for word in spaced.split_whitespace() {
            match word.to_uppercase().as_str() {
                "(" => {
                    if !expect_operand {
                        return None;
                    }
                    depth += 1;
                    tokens.push(TextToken::Open);
                }
                ")" => {
                    if expect_operand || depth == 0 {
                        return None;
                    }
                    depth -= 1;
                    tokens.push(TextToken::Close);
                }
                "AND" | "OR" => {
                    if expect_operand {
                        return None;
                    }
                    tokens.push(if word.eq_ignore_ascii_case("AND") {
                        TextToken::And
                    } else {
                        TextToken::Or
                    });
                    expect_operand = true;
                }
                "NOT" => {
                    if !expect_operand {
                        return None;
                    }
                    tokens.push(TextToken::Not);
                }
                _ => {
                    if expect_operand {
                        tokens.push(TextToken::Phrase(word.to_string()));
                        expect_operand = false;
                    } else if let Some(TextToken::Phrase(phrase)) = tokens.last_mut() {
                        phrase.push(' ');
                        phrase.push_str(word);
                    } else {
                        // A word straight after a closing parenthesis.
                        return None;
                    }
                }
            }
        }

        if expect_operand || depth != 0 {
            return None;
        }
        Some(Self { tokens })
    }

    fn to_sql(&self, column: Column, values: &mut Vec<Value>) -> String {
        let parts: Vec<String> = self
            .tokens
            .iter()
            .map(|token| match token {
                TextToken::Open => "(".to_string(),
                TextToken::Close => ")".to_string(),
                TextToken::And => "AND".to_string(),
                TextToken::Or => "OR".to_string(),
                TextToken::Not => "NOT".to_string(),
                TextToken::Phrase(phrase) => {
                    values.push(Value::Text(format!("%{}%", phrase)));
                    format!("{} LIKE ?", column.as_sql())
                }
            })
            .collect();
        format!("({})", parts.join(" "))
    }
}

/// Parses a date filter value: epoch seconds, or `YYYY/MM/DD` /
/// `YYYY-MM-DD` at local midnight.
pub fn parse_date_filter(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(epoch) = value.parse::<f64>() {
        return epoch.is_finite().then_some(epoch);
    }
    let date = NaiveDate::parse_from_str(value, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    let local = Local.from_local_datetime(&midnight).earliest()?;
    Some(local.timestamp() as f64)
}

/// Named predicate slots, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    slots: BTreeMap<String, Predicate>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces (or with `None` clears) one slot. Returns true if the set
    /// changed.
    pub fn set(&mut self, name: &str, predicate: Option<Predicate>) -> bool {
        match predicate {
            Some(p) => self.slots.insert(name.to_string(), p.clone()) != Some(p),
            None => self.slots.remove(name).is_some(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.slots.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn to_sql(&self, values: &mut Vec<Value>) -> String {
        if self.slots.is_empty() {
            return "1".to_string();
        }
        self.slots
            .values()
            .map(|p| p.to_sql(values))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: Column,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOrder {
    Random,
    Columns(Vec<SortKey>),
}

/// Ordering of a playlist query.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    /// Files modified after this epoch time sort first.
    pub recent_cutoff: Option<f64>,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn random() -> Self {
        Self {
            recent_cutoff: None,
            order: SortOrder::Random,
        }
    }

    /// Column ordering from a `sort_cols` string.
    pub fn columns(sort_cols: &str) -> Self {
        Self {
            recent_cutoff: None,
            order: SortOrder::Columns(parse_sort_cols(sort_cols)),
        }
    }

    pub fn with_recent_cutoff(mut self, cutoff: Option<f64>) -> Self {
        self.recent_cutoff = cutoff;
        self
    }

    fn to_sql(&self, values: &mut Vec<Value>) -> String {
        let mut parts = Vec::new();
        if let Some(cutoff) = self.recent_cutoff {
            values.push(Value::Real(cutoff));
            parts.push("last_modified < ?".to_string());
        }
        match &self.order {
            SortOrder::Random => parts.push("RANDOM()".to_string()),
            SortOrder::Columns(keys) => {
                for key in keys {
                    let dir = if key.descending { "DESC" } else { "ASC" };
                    parts.push(format!("{} {}", key.column.as_sql(), dir));
                }
            }
        }
        parts.join(", ")
    }
}

/// Parses `"col [ASC|DESC], ..."`, dropping anything unrecognized, and
/// appends `fname ASC` as the final tie-breaker.
pub fn parse_sort_cols(sort_cols: &str) -> Vec<SortKey> {
    let mut keys: Vec<SortKey> = sort_cols
        .split(',')
        .filter_map(|part| {
            let mut words = part.split_whitespace();
            let column = Column::parse(words.next()?)?;
            let descending = match words.next().map(|d| d.to_uppercase()) {
                None => false,
                Some(d) if d == "ASC" => false,
                Some(d) if d == "DESC" => true,
                Some(_) => return None,
            };
            if words.next().is_some() {
                return None;
            }
            Some(SortKey { column, descending })
        })
        .collect();
    keys.push(SortKey {
        column: Column::Fname,
        descending: false,
    });
    keys
}

/// Fills placeholder slots from the portrait queue.
///
/// `slots` holds the full ordered result with `None` where a portrait image
/// sat. Each placeholder takes up to two portraits from the queue; when it
/// takes two, the next placeholder is skipped so pairs do not show up twice
/// as often as the portraits they replace.
pub fn merge_portrait_pairs(slots: Vec<Option<i64>>, portraits: Vec<i64>) -> Vec<PlaylistEntry> {
    let mut queue: VecDeque<i64> = portraits.into();
    let mut merged = Vec::with_capacity(slots.len());
    let mut skip_slot = false;

    for slot in slots {
        match slot {
            Some(id) => merged.push(PlaylistEntry::Single(id)),
            None if skip_slot => skip_slot = false,
            None => {
                if let Some(first) = queue.pop_front() {
                    match queue.pop_front() {
                        Some(second) => {
                            merged.push(PlaylistEntry::Pair(first, second));
                            skip_slot = true;
                        }
                        None => merged.push(PlaylistEntry::Single(first)),
                    }
                }
            }
        }
    }
    merged
}

/// Runs playlist queries and the per-slide read path against a store.
pub struct QueryEngine {
    portrait_pairs: bool,
    load_geoloc: bool,
    extractor: Arc<dyn MetadataExtractor>,
    resolver: Arc<dyn AddressResolver>,
    clock: Arc<dyn Clock>,
}

impl QueryEngine {
    pub fn new(
        portrait_pairs: bool,
        load_geoloc: bool,
        extractor: Arc<dyn MetadataExtractor>,
        resolver: Arc<dyn AddressResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            portrait_pairs,
            load_geoloc,
            extractor,
            resolver,
            clock,
        }
    }

    pub fn portrait_pairs(&self) -> bool {
        self.portrait_pairs
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Selects playlist entries matching `filters`, in `sort` order.
    pub fn select(
        &self,
        store: &CacheStore,
        filters: &FilterSet,
        sort: &SortSpec,
    ) -> Result<Vec<PlaylistEntry>> {
        let mut values = Vec::new();
        let where_clause = filters.to_sql(&mut values);
        let order_clause = sort.to_sql(&mut values);

        if !self.portrait_pairs {
            let sql = format!(
                "SELECT file_id FROM all_data WHERE {} ORDER BY {}",
                where_clause, order_clause
            );
            trace!(%sql, "Playlist query");
            let ids = store.query_ids(&sql, &values)?;
            return Ok(ids.into_iter().flatten().map(PlaylistEntry::Single).collect());
        }

        let slots_sql = format!(
            "SELECT CASE WHEN is_portrait = 0 THEN file_id ELSE NULL END
             FROM all_data WHERE {} ORDER BY {}",
            where_clause, order_clause
        );
        let portraits_sql = format!(
            "SELECT file_id FROM all_data WHERE ({}) AND is_portrait = 1 ORDER BY {}",
            where_clause, order_clause
        );
        trace!(%slots_sql, %portraits_sql, "Portrait pair queries");

        let slots = store.query_ids(&slots_sql, &values)?;
        let portraits: Vec<i64> = store
            .query_ids(&portraits_sql, &values)?
            .into_iter()
            .flatten()
            .collect();
        Ok(merge_portrait_pairs(slots, portraits))
    }

    /// Reads one file for display.
    ///
    /// A file changed on disk since it was cached is re-extracted and
    /// updated in place. A file that is gone is still returned from the
    /// cache; the caller decides what to do with it. Resolves the location
    /// on first display of a geotagged file, then bumps the display
    /// statistics.
    pub fn fetch_pic(&self, store: &CacheStore, file_id: i64) -> Result<Option<Pic>> {
        let Some(mut pic) = store.get_pic(file_id)? else {
            return Ok(None);
        };

        match modified_seconds(&pic.path) {
            Ok(on_disk) if on_disk != pic.last_modified => {
                debug!("Cache miss: {:?} changed on disk", pic.path);
                if let Some(fresh) = self.refresh(store, &pic.path, on_disk, file_id)? {
                    pic = fresh;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Image {:?} does not exist or is inaccessible: {}", pic.path, e),
        }

        if self.load_geoloc && pic.location.is_none() {
            if let (Some(lat), Some(lon)) = (pic.latitude, pic.longitude) {
                let address = self.resolver.resolve(lat, lon);
                if !address.is_empty() {
                    store.upsert_location(lat, lon, &address)?;
                    pic.location = Some(address);
                }
            }
        }

        let now = epoch_seconds(self.clock.now());
        store.record_display(file_id, now)?;
        pic.displayed_count += 1;
        pic.last_displayed = now;
        Ok(Some(pic))
    }

    fn refresh(
        &self,
        store: &CacheStore,
        path: &Path,
        on_disk: f64,
        file_id: i64,
    ) -> Result<Option<Pic>> {
        let Some(record) = FileRecord::from_path(path, on_disk) else {
            return Ok(None);
        };
        match self.extractor.extract(path) {
            Ok(meta) => {
                store.upsert_file(&record, &meta, Some(file_id))?;
                store.get_pic(file_id)
            }
            Err(e) => {
                warn!("Metadata extraction failed for {:?}: {:#}", path, e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageMeta;
    use crate::retry::ManualClock;
    use crate::testing::{bump_mtime, touch, CountingResolver, StubExtractor};
    use tempfile::{tempdir, TempDir};

    fn engine(portrait_pairs: bool) -> QueryEngine {
        QueryEngine::new(
            portrait_pairs,
            false,
            Arc::new(StubExtractor::new()),
            Arc::new(CountingResolver::new("")),
            Arc::new(ManualClock::new()),
        )
    }

    fn store() -> (TempDir, CacheStore) {
        let dir = tempdir().unwrap();
        let store = CacheStore::open(&dir.path().join("cache.sqlite")).unwrap();
        (dir, store)
    }

    fn insert(store: &CacheStore, path: &str, meta: ImageMeta) -> i64 {
        let record = FileRecord::from_path(Path::new(path), 1.0).unwrap();
        store.upsert_file(&record, &meta, None).unwrap()
    }

    fn landscape() -> ImageMeta {
        ImageMeta::with_size(400, 300)
    }

    fn portrait() -> ImageMeta {
        ImageMeta::with_size(300, 400)
    }

    fn all_by_name() -> (FilterSet, SortSpec) {
        (FilterSet::new(), SortSpec::columns(""))
    }

    #[test]
    fn test_merge_fills_first_placeholder_with_pair() {
        let (a, c, d, e) = (1, 3, 4, 5);
        let merged = merge_portrait_pairs(
            vec![Some(a), None, Some(c), None, None],
            vec![d, e],
        );
        assert_eq!(
            merged,
            vec![
                PlaylistEntry::Single(a),
                PlaylistEntry::Pair(d, e),
                PlaylistEntry::Single(c),
            ]
        );
    }

    #[test]
    fn test_merge_odd_portrait_stands_alone() {
        let merged = merge_portrait_pairs(vec![None, Some(1), None, None], vec![7, 8, 9]);
        assert_eq!(
            merged,
            vec![
                PlaylistEntry::Pair(7, 8),
                PlaylistEntry::Single(1),
                PlaylistEntry::Single(9),
            ]
        );
    }

    #[test]
    fn test_select_without_pairs() {
        let (_dir, store) = store();
        let b = insert(&store, "/pics/b.jpg", portrait());
        let a = insert(&store, "/pics/a.jpg", landscape());

        let (filters, sort) = all_by_name();
        let entries = engine(false).select(&store, &filters, &sort).unwrap();
        assert_eq!(entries, vec![PlaylistEntry::Single(a), PlaylistEntry::Single(b)]);
    }

    #[test]
    fn test_select_with_portrait_pairs() {
        let (_dir, store) = store();
        let a = insert(&store, "/pics/a.jpg", landscape());
        let b = insert(&store, "/pics/b.jpg", portrait());
        let c = insert(&store, "/pics/c.jpg", landscape());
        let d = insert(&store, "/pics/d.jpg", portrait());
        let e = insert(&store, "/pics/e.jpg", portrait());

        let (filters, sort) = all_by_name();
        let entries = engine(true).select(&store, &filters, &sort).unwrap();
        assert_eq!(
            entries,
            vec![
                PlaylistEntry::Single(a),
                PlaylistEntry::Pair(b, d),
                PlaylistEntry::Single(c),
                PlaylistEntry::Single(e),
            ]
        );
    }

    #[test]
    fn test_path_prefix_is_directory_bound() {
        let (_dir, store) = store();
        let inside = insert(&store, "/pics/test/a.jpg", landscape());
        insert(&store, "/pics/test1/b.jpg", landscape());

        let mut filters = FilterSet::new();
        filters.set("dir", Some(Predicate::PathPrefix(PathBuf::from("/pics/test"))));
        let entries = engine(false)
            .select(&store, &filters, &SortSpec::columns(""))
            .unwrap();
        assert_eq!(entries, vec![PlaylistEntry::Single(inside)]);
    }

    #[test]
    fn test_date_and_compare_filters() {
        let (_dir, store) = store();
        let mut old = landscape();
        old.exif_datetime = Some(1_000.0);
        old.rating = Some(5);
        let mut new = landscape();
        new.exif_datetime = Some(5_000.0);
        new.rating = Some(2);
        let old_id = insert(&store, "/pics/old.jpg", old);
        let new_id = insert(&store, "/pics/new.jpg", new);
        let sort = SortSpec::columns("");
        let engine = engine(false);

        let mut filters = FilterSet::new();
        filters.set("date_from", Some(Predicate::DateFrom(2_000.0)));
        assert_eq!(
            engine.select(&store, &filters, &sort).unwrap(),
            vec![PlaylistEntry::Single(new_id)]
        );

        filters.set("date_from", None);
        filters.set("date_to", Some(Predicate::DateTo(2_000.0)));
        assert_eq!(
            engine.select(&store, &filters, &sort).unwrap(),
            vec![PlaylistEntry::Single(old_id)]
        );

        filters.set("date_to", None);
        filters.set(
            "stars",
            Some(Predicate::Compare {
                column: Column::Rating,
                op: CompareOp::Ge,
                value: Value::Integer(4),
            }),
        );
        assert_eq!(
            engine.select(&store, &filters, &sort).unwrap(),
            vec![PlaylistEntry::Single(old_id)]
        );
    }

    #[test]
    fn test_text_filter_selects() {
        let (_dir, store) = store();
        let mut tagged = landscape();
        tagged.tags = Some("beach,sunset".to_string());
        let mut other = landscape();
        other.tags = Some("mountain".to_string());
        let beach = insert(&store, "/pics/a.jpg", tagged);
        let mountain = insert(&store, "/pics/b.jpg", other);
        let engine = engine(false);
        let sort = SortSpec::columns("");

        let select = |expr: &str| {
            let mut filters = FilterSet::new();
            let filter = TextFilter::parse(expr).unwrap();
            filters.set("tags", Some(Predicate::Text { column: Column::Tags, filter }));
            engine.select(&store, &filters, &sort).unwrap()
        };

        assert_eq!(select("BEACH"), vec![PlaylistEntry::Single(beach)]);
        assert_eq!(
            select("beach OR mountain"),
            vec![PlaylistEntry::Single(beach), PlaylistEntry::Single(mountain)]
        );
        assert_eq!(select("NOT (beach)"), vec![PlaylistEntry::Single(mountain)]);
        assert!(select("beach AND mountain").is_empty());
    }

    #[test]
    fn test_text_filter_parse() {
        let mut values = Vec::new();
        let filter = TextFilter::parse("new york OR (paris AND NOT 2019)").unwrap();
        let sql = filter.to_sql(Column::Location, &mut values);
        assert_eq!(
            sql,
            "(location LIKE ? OR ( location LIKE ? AND NOT location LIKE ? ))"
        );
        assert_eq!(
            values,
            vec![
                Value::Text("%new york%".to_string()),
                Value::Text("%paris%".to_string()),
                Value::Text("%2019%".to_string()),
            ]
        );

        let mut values = Vec::new();
        let filter = TextFilter::parse("it's 100%; done").unwrap();
        filter.to_sql(Column::Tags, &mut values);
        assert_eq!(values, vec![Value::Text("%its 100 done%".to_string())]);
    }

    #[test]
    fn test_text_filter_rejects_malformed() {
        assert_eq!(TextFilter::parse("(paris"), None);
        assert_eq!(TextFilter::parse("paris)"), None);
        assert_eq!(TextFilter::parse("paris AND OR london"), None);
        assert_eq!(TextFilter::parse("paris AND"), None);
        assert_eq!(TextFilter::parse("OR paris"), None);
        assert_eq!(TextFilter::parse("()"), None);
        assert_eq!(TextFilter::parse(") paris ("), None);
        assert_eq!(TextFilter::parse(""), None);
        assert_eq!(TextFilter::parse("';%"), None);
    }

    #[test]
    fn test_parse_sort_cols() {
        let keys = parse_sort_cols("exif_datetime DESC, bogus, rating sideways,make");
        assert_eq!(
            keys,
            vec![
                SortKey { column: Column::ExifDatetime, descending: true },
                SortKey { column: Column::Make, descending: false },
                SortKey { column: Column::Fname, descending: false },
            ]
        );
        assert_eq!(parse_sort_cols("").len(), 1);
    }

    #[test]
    fn test_recent_files_sort_first() {
        let (_dir, store) = store();
        let old = store
            .upsert_file(
                &FileRecord::from_path(Path::new("/pics/a.jpg"), 100.0).unwrap(),
                &landscape(),
                None,
            )
            .unwrap();
        let recent = store
            .upsert_file(
                &FileRecord::from_path(Path::new("/pics/b.jpg"), 900.0).unwrap(),
                &landscape(),
                None,
            )
            .unwrap();

        let sort = SortSpec::columns("").with_recent_cutoff(Some(500.0));
        let entries = engine(false).select(&store, &FilterSet::new(), &sort).unwrap();
        assert_eq!(
            entries,
            vec![PlaylistEntry::Single(recent), PlaylistEntry::Single(old)]
        );
    }

    #[test]
    fn test_random_order_returns_everything() {
        let (_dir, store) = store();
        for i in 0..20 {
            insert(&store, &format!("/pics/{:02}.jpg", i), landscape());
        }
        let entries = engine(false)
            .select(&store, &FilterSet::new(), &SortSpec::random())
            .unwrap();
        assert_eq!(entries.len(), 20);
    }

    #[test]
    fn test_parse_date_filter() {
        assert_eq!(parse_date_filter("1600000000"), Some(1_600_000_000.0));
        let slash = parse_date_filter("2021/07/04").unwrap();
        let dash = parse_date_filter("2021-07-04").unwrap();
        assert_eq!(slash, dash);
        assert_eq!(parse_date_filter("2021/07/05").unwrap() - slash, 86_400.0);
        assert_eq!(parse_date_filter(""), None);
        assert_eq!(parse_date_filter("last week"), None);
    }

    #[test]
    fn test_filter_set_reports_changes() {
        let mut filters = FilterSet::new();
        assert!(filters.set("date_from", Some(Predicate::DateFrom(1.0))));
        assert!(!filters.set("date_from", Some(Predicate::DateFrom(1.0))));
        assert!(filters.set("date_from", Some(Predicate::DateFrom(2.0))));
        assert!(filters.set("date_from", None));
        assert!(!filters.set("date_from", None));
        assert!(filters.is_empty());
    }

    #[test]
    fn test_nearby_photos_resolve_once() {
        let (_dir, store) = store();
        let pics = tempdir().unwrap();
        let first = pics.path().join("gps_a.jpg");
        let second = pics.path().join("gps_bb.jpg");
        touch(&first);
        touch(&second);

        let extractor = StubExtractor::new();
        let mut ids = Vec::new();
        for path in [&first, &second] {
            let meta = extractor.extract(path).unwrap();
            let record = FileRecord::from_path(path, modified_seconds(path).unwrap()).unwrap();
            ids.push(store.upsert_file(&record, &meta, None).unwrap());
        }

        let resolver = Arc::new(CountingResolver::new("Champ de Mars, Paris"));
        let engine = QueryEngine::new(
            false,
            true,
            Arc::new(StubExtractor::new()),
            resolver.clone(),
            Arc::new(ManualClock::new()),
        );

        for id in &ids {
            let pic = engine.fetch_pic(&store, *id).unwrap().unwrap();
            assert_eq!(pic.location.as_deref(), Some("Champ de Mars, Paris"));
        }
        assert_eq!(resolver.calls(), 1);
        assert_eq!(store.stats().unwrap().locations, 1);
    }

    #[test]
    fn test_failed_lookup_is_retried_later() {
        let (_dir, store) = store();
        let mut meta = landscape();
        meta.set_gps(10.0, 20.0);
        let id = insert(&store, "/nowhere/a.jpg", meta);

        let resolver = Arc::new(CountingResolver::new(""));
        let engine = QueryEngine::new(
            false,
            true,
            Arc::new(StubExtractor::new()),
            resolver.clone(),
            Arc::new(ManualClock::new()),
        );
        let pic = engine.fetch_pic(&store, id).unwrap().unwrap();
        assert_eq!(pic.location, None);
        engine.fetch_pic(&store, id).unwrap();
        assert_eq!(resolver.calls(), 2);
        assert_eq!(store.stats().unwrap().locations, 0);
    }

    #[test]
    fn test_fetch_refreshes_changed_file_in_place() {
        let (_dir, store) = store();
        let pics = tempdir().unwrap();
        let path = pics.path().join("p_changed.jpg");
        touch(&path);

        let record = FileRecord::from_path(&path, modified_seconds(&path).unwrap()).unwrap();
        let id = store.upsert_file(&record, &landscape(), None).unwrap();
        bump_mtime(&path, 30);

        let extractor = Arc::new(StubExtractor::new());
        let engine = QueryEngine::new(
            false,
            false,
            extractor.clone(),
            Arc::new(CountingResolver::new("")),
            Arc::new(ManualClock::new()),
        );

        let pic = engine.fetch_pic(&store, id).unwrap().unwrap();
        assert_eq!(pic.file_id, id);
        assert!(pic.is_portrait);
        assert_eq!(pic.last_modified, modified_seconds(&path).unwrap());
        assert_eq!(extractor.calls_for(&path), 1);

        // Now current: no second extraction.
        engine.fetch_pic(&store, id).unwrap();
        assert_eq!(extractor.calls_for(&path), 1);
        assert_eq!(store.stats().unwrap().files, 1);
    }

    #[test]
    fn test_fetch_records_display_stats() {
        let (_dir, store) = store();
        let id = insert(&store, "/gone/a.jpg", landscape());
        let clock = Arc::new(ManualClock::new());
        let engine = QueryEngine::new(
            false,
            false,
            Arc::new(StubExtractor::new()),
            Arc::new(CountingResolver::new("")),
            clock.clone(),
        );

        // A vanished file is still returned from the cache.
        let pic = engine.fetch_pic(&store, id).unwrap().unwrap();
        assert_eq!(pic.displayed_count, 1);
        assert_eq!(pic.last_displayed, epoch_seconds(clock.now()));
        assert_eq!(store.get_pic(id).unwrap().unwrap().displayed_count, 1);
        assert!(engine.fetch_pic(&store, 9_999).unwrap().is_none());
    }
}
