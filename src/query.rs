// # Content query engine
//
// Read-only projections over the media store. Each record kind declares a
// fixed table of (store column, output field, decoder, minimum capability
// level); columns above the configured level are excluded from the query
// and from decoding, so a field either reflects the store or is absent.

use crate::capability::CapabilityLevel;
use crate::error::BridgeError;
use crate::store::{MediaStore, Row, Selection, StoreValue, Table};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One record crossing the bridge: field name to nullable scalar.
pub type Record = Map<String, Value>;

/// How a store column becomes an output field.
#[derive(Debug, Clone, Copy)]
enum Decode {
    /// Integer column to JSON number.
    Integer,
    /// Text output; numeric columns are read back as their decimal text,
    /// the way cursor string accessors behave.
    Text,
    /// Integer column where 1 means true.
    BoolFromInt,
}

struct FieldSpec {
    column: &'static str,
    field: &'static str,
    decode: Decode,
    min_level: CapabilityLevel,
}

const fn field(column: &'static str, name: &'static str, decode: Decode) -> FieldSpec {
    FieldSpec {
        column,
        field: name,
        decode,
        min_level: CapabilityLevel::Legacy,
    }
}

const fn field_from(
    column: &'static str,
    name: &'static str,
    decode: Decode,
    min_level: CapabilityLevel,
) -> FieldSpec {
    FieldSpec {
        column,
        field: name,
        decode,
        min_level,
    }
}

const SONG_FIELDS: &[FieldSpec] = &[
    field("id", "id", Decode::Integer),
    field("album", "album", Decode::Text),
    field("album_id", "albumId", Decode::Integer),
    field("artist", "artist", Decode::Text),
    field("artist_id", "artistId", Decode::Integer),
    field("title", "title", Decode::Text),
    field("track", "track", Decode::Text),
    field("year", "year", Decode::Text),
    field("date_added", "dateAdded", Decode::Integer),
    field("date_modified", "dateModified", Decode::Integer),
    field("duration", "duration", Decode::Integer),
    field("size", "size", Decode::Integer),
    field("filesystem_path", "filesystemPath", Decode::Text),
    field_from(
        "is_favorite",
        "isFavoriteInMediaStore",
        Decode::BoolFromInt,
        CapabilityLevel::ConsentManaged,
    ),
    field_from(
        "generation_added",
        "generationAdded",
        Decode::Integer,
        CapabilityLevel::ConsentManaged,
    ),
    field_from(
        "generation_modified",
        "generationModified",
        Decode::Integer,
        CapabilityLevel::ConsentManaged,
    ),
    field_from("genre", "genre", Decode::Text, CapabilityLevel::ConsentManaged),
    field_from(
        "genre_id",
        "genreId",
        Decode::Integer,
        CapabilityLevel::ConsentManaged,
    ),
];

const ALBUM_FIELDS: &[FieldSpec] = &[
    field("id", "id", Decode::Integer),
    field("album", "album", Decode::Text),
    field("album_art", "albumArt", Decode::Text),
    field("artist", "artist", Decode::Text),
    field_from(
        "artist_id",
        "artistId",
        Decode::Integer,
        CapabilityLevel::ScopedStorage,
    ),
    field("first_year", "firstYear", Decode::Integer),
    field("last_year", "lastYear", Decode::Integer),
    field("number_of_songs", "numberOfSongs", Decode::Integer),
];

const PLAYLIST_FIELDS: &[FieldSpec] = &[
    field("id", "id", Decode::Integer),
    field("filesystem_path", "filesystemPath", Decode::Text),
    field("date_added", "dateAdded", Decode::Integer),
    field("date_modified", "dateModified", Decode::Integer),
    field("name", "name", Decode::Text),
];

const ARTIST_FIELDS: &[FieldSpec] = &[
    field("id", "id", Decode::Integer),
    field("artist", "artist", Decode::Text),
    field("number_of_albums", "numberOfAlbums", Decode::Integer),
    field("number_of_tracks", "numberOfTracks", Decode::Integer),
];

const GENRE_FIELDS: &[FieldSpec] = &[
    field("id", "id", Decode::Integer),
    field("name", "name", Decode::Text),
];

const MEMBER_COLUMNS: &[&str] = &["audio_id"];

/// Builds record projections against the store for a fixed capability
/// level.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn MediaStore>,
    level: CapabilityLevel,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn MediaStore>, level: CapabilityLevel) -> Self {
        QueryEngine { store, level }
    }

    fn music_selection(&self) -> Selection {
        Selection::MusicOnly {
            exclude_trashed_and_pending: self.level >= CapabilityLevel::ConsentManaged,
        }
    }

    pub async fn retrieve_songs(&self) -> Result<Vec<Record>, BridgeError> {
        self.run(Table::Songs, self.music_selection(), SONG_FIELDS)
            .await
            .map(|records| records.into_iter().map(|(_, record)| record).collect())
    }

    pub async fn retrieve_albums(&self) -> Result<Vec<Record>, BridgeError> {
        self.run(Table::Albums, Selection::NotNull("album"), ALBUM_FIELDS)
            .await
            .map(|records| records.into_iter().map(|(_, record)| record).collect())
    }

    pub async fn retrieve_artists(&self) -> Result<Vec<Record>, BridgeError> {
        self.run(Table::Artists, Selection::NotNull("artist"), ARTIST_FIELDS)
            .await
            .map(|records| records.into_iter().map(|(_, record)| record).collect())
    }

    /// Playlists carry their ordered member song ids from a secondary
    /// query. A playlist whose member query yields no cursor is still
    /// emitted, with an empty member list.
    pub async fn retrieve_playlists(&self) -> Result<Vec<Record>, BridgeError> {
        let primaries = self
            .run(Table::Playlists, Selection::NotNull("name"), PLAYLIST_FIELDS)
            .await?;
        let selection = self.music_selection();
        let mut records = Vec::with_capacity(primaries.len());
        for (id, mut record) in primaries {
            let members = match id {
                Some(playlist) => {
                    self.store
                        .query(
                            Table::PlaylistMembers { playlist },
                            MEMBER_COLUMNS,
                            Some(&selection),
                            Some("play_order"),
                        )
                        .await?
                }
                None => None,
            };
            record.insert("songIds".into(), member_ids(members));
            records.push(record);
        }
        Ok(records)
    }

    /// Genres carry member song ids like playlists, but the member query
    /// is unfiltered and unsorted.
    pub async fn retrieve_genres(&self) -> Result<Vec<Record>, BridgeError> {
        let primaries = self
            .run(Table::Genres, Selection::NotNull("name"), GENRE_FIELDS)
            .await?;
        let mut records = Vec::with_capacity(primaries.len());
        for (id, mut record) in primaries {
            let members = match id {
                Some(genre) => {
                    self.store
                        .query(Table::GenreMembers { genre }, MEMBER_COLUMNS, None, None)
                        .await?
                }
                None => None,
            };
            record.insert("songIds".into(), member_ids(members));
            records.push(record);
        }
        Ok(records)
    }

    /// Runs one projection, returning each record with its raw id (when
    /// the row had one) so member queries can key off it.
    async fn run(
        &self,
        table: Table,
        selection: Selection,
        fields: &'static [FieldSpec],
    ) -> Result<Vec<(Option<i64>, Record)>, BridgeError> {
        let active: Vec<&FieldSpec> = fields
            .iter()
            .filter(|spec| spec.min_level <= self.level)
            .collect();
        let columns: Vec<&'static str> = active.iter().map(|spec| spec.column).collect();
        let rows = self
            .store
            .query(table, &columns, Some(&selection), None)
            .await?;
        let Some(rows) = rows else {
            return Ok(Vec::new());
        };
        Ok(rows
            .into_iter()
            .map(|row| (row_id(&active, &row), project(&active, &row)))
            .collect())
    }
}

fn project(active: &[&FieldSpec], row: &Row) -> Record {
    let mut record = Record::new();
    for (index, spec) in active.iter().enumerate() {
        record.insert(spec.field.into(), decode(spec.decode, row.get(index)));
    }
    record
}

fn row_id(active: &[&FieldSpec], row: &Row) -> Option<i64> {
    let index = active.iter().position(|spec| spec.column == "id")?;
    match row.get(index) {
        Some(StoreValue::Integer(id)) => Some(*id),
        _ => None,
    }
}

fn decode(decode: Decode, value: Option<&StoreValue>) -> Value {
    match (decode, value) {
        (_, None) => Value::Null,
        (Decode::Integer, Some(StoreValue::Integer(i))) => Value::from(*i),
        (Decode::Text, Some(StoreValue::Text(t))) => Value::from(t.clone()),
        (Decode::Text, Some(StoreValue::Integer(i))) => Value::from(i.to_string()),
        (Decode::BoolFromInt, Some(StoreValue::Integer(i))) => Value::from(*i == 1),
        // A column of the wrong type is as good as absent; fields are
        // never fabricated.
        _ => Value::Null,
    }
}

fn member_ids(rows: Option<Vec<Row>>) -> Value {
    let ids: Vec<Value> = rows
        .unwrap_or_default()
        .iter()
        .filter_map(|row| match row.get(0) {
            Some(StoreValue::Integer(id)) => Some(Value::from(*id)),
            _ => None,
        })
        .collect();
    Value::Array(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rows, MemoryStore};

    fn engine(store: MemoryStore, level: CapabilityLevel) -> QueryEngine {
        QueryEngine::new(Arc::new(store), level)
    }

    #[tokio::test]
    async fn song_projection_respects_capability_level() {
        let store = MemoryStore::new();
        store.push_row(Table::Songs, rows::song(1, "Intro", Some("/music/intro.flac")));

        let records = engine(store, CapabilityLevel::ScopedStorage)
            .retrieve_songs()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], 1);
        assert_eq!(records[0]["title"], "Intro");
        assert!(!records[0].contains_key("isFavoriteInMediaStore"));
        assert!(!records[0].contains_key("generationAdded"));
    }

    #[tokio::test]
    async fn consent_managed_level_adds_favorite_fields() {
        let store = MemoryStore::new();
        let mut song = rows::song(1, "Intro", None);
        song.insert("is_favorite".into(), Some(StoreValue::Integer(1)));
        store.push_row(Table::Songs, song);

        let records = engine(store, CapabilityLevel::ConsentManaged)
            .retrieve_songs()
            .await
            .unwrap();
        assert_eq!(records[0]["isFavoriteInMediaStore"], true);
    }

    #[tokio::test]
    async fn null_columns_decode_to_null_not_fabricated_values() {
        let store = MemoryStore::new();
        let mut song = rows::song(3, "Untitled", None);
        song.insert("year".into(), None);
        store.push_row(Table::Songs, song);

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_songs()
            .await
            .unwrap();
        assert_eq!(records[0]["year"], Value::Null);
        assert_eq!(records[0]["filesystemPath"], Value::Null);
    }

    #[tokio::test]
    async fn numeric_text_fields_read_back_as_text() {
        let store = MemoryStore::new();
        let mut song = rows::song(4, "Numbered", None);
        song.insert("year".into(), Some(StoreValue::Integer(1997)));
        store.push_row(Table::Songs, song);

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_songs()
            .await
            .unwrap();
        assert_eq!(records[0]["year"], "1997");
    }

    #[tokio::test]
    async fn non_music_rows_are_excluded() {
        let store = MemoryStore::new();
        store.push_row(Table::Songs, rows::song(1, "Music", None));
        let mut ringtone = rows::song(2, "Ringtone", None);
        ringtone.insert("is_music".into(), Some(StoreValue::Integer(0)));
        store.push_row(Table::Songs, ringtone);

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_songs()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["title"], "Music");
    }

    #[tokio::test]
    async fn trashed_rows_are_excluded_only_on_consent_managed() {
        let store = MemoryStore::new();
        let mut trashed = rows::song(1, "Trashed", None);
        trashed.insert("is_trashed".into(), Some(StoreValue::Integer(1)));
        store.push_row(Table::Songs, trashed);

        let lenient = QueryEngine::new(store.shared(), CapabilityLevel::ScopedStorage);
        assert_eq!(lenient.retrieve_songs().await.unwrap().len(), 1);

        let strict = QueryEngine::new(store.shared(), CapabilityLevel::ConsentManaged);
        assert_eq!(strict.retrieve_songs().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn playlists_keep_member_order_and_filter_non_music() {
        let store = MemoryStore::new();
        store.push_row(Table::Songs, rows::song(10, "A", None));
        store.push_row(Table::Songs, rows::song(11, "B", None));
        let mut spoken = rows::song(12, "Spoken", None);
        spoken.insert("is_music".into(), Some(StoreValue::Integer(0)));
        store.push_row(Table::Songs, spoken);
        store.push_row(Table::Playlists, rows::playlist(7, "Mix"));
        store.push_member(7, 11, 2);
        store.push_member(7, 10, 1);
        store.push_member(7, 12, 3);

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_playlists()
            .await
            .unwrap();
        assert_eq!(records[0]["songIds"], serde_json::json!([10, 11]));
    }

    #[tokio::test]
    async fn genre_members_are_not_filtered() {
        let store = MemoryStore::new();
        let mut spoken = rows::song(12, "Spoken", None);
        spoken.insert("is_music".into(), Some(StoreValue::Integer(0)));
        store.push_row(Table::Songs, spoken);
        store.push_row(Table::Genres, rows::genre(3, "Spoken Word"));
        store.push_genre_member(3, 12);

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_genres()
            .await
            .unwrap();
        assert_eq!(records[0]["songIds"], serde_json::json!([12]));
    }

    #[tokio::test]
    async fn playlist_without_member_cursor_is_kept_with_empty_members() {
        let store = MemoryStore::new();
        store.push_row(Table::Playlists, rows::playlist(7, "Orphan"));
        store.drop_member_cursors();

        let records = engine(store, CapabilityLevel::Legacy)
            .retrieve_playlists()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], "Orphan");
        assert_eq!(records[0]["songIds"], serde_json::json!([]));
    }
}
