// # Test support
//
// In-memory doubles for the two external collaborators: a `MemoryStore`
// that behaves like a small content store, and a consent requester that
// records what it was asked to present. Available to integration tests
// through the `test-utils` feature.

use crate::consent::{ConsentError, ConsentRequest, ConsentRequester};
use crate::dispatcher::{CallId, Completion, Replier};
use crate::store::{
    ContentValues, MediaStore, Row, Selection, StoreError, StoreValue, Table, Thumbnail,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// A stored row: column name to nullable scalar. Columns a row never had
/// read back as null, like a store projection over an older schema.
pub type StoredRow = BTreeMap<String, Option<StoreValue>>;

#[derive(Debug, Clone, Copy)]
struct MemberRow {
    audio_id: i64,
    play_order: i64,
}

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<StoredRow>>,
    playlist_members: HashMap<i64, Vec<MemberRow>>,
    genre_members: HashMap<i64, Vec<i64>>,
    notifications: Vec<Table>,
    deleted_song_paths: Vec<String>,
    probed_albums: Vec<i64>,
    next_id: i64,
    fail_inserts: bool,
    drop_member_cursors: bool,
    fail_thumbnails: bool,
    thumbnail_delay: Option<Duration>,
}

/// Shared, clonable in-memory content store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = MemoryStore::default();
        store.inner.lock().unwrap().next_id = 1000;
        store
    }

    pub fn shared(&self) -> Arc<dyn MediaStore> {
        Arc::new(self.clone())
    }

    pub fn push_row(&self, table: Table, row: StoredRow) {
        self.inner
            .lock()
            .unwrap()
            .tables
            .entry(table)
            .or_default()
            .push(row);
    }

    pub fn push_member(&self, playlist: i64, audio_id: i64, play_order: i64) {
        self.inner
            .lock()
            .unwrap()
            .playlist_members
            .entry(playlist)
            .or_default()
            .push(MemberRow {
                audio_id,
                play_order,
            });
    }

    pub fn push_genre_member(&self, genre: i64, audio_id: i64) {
        self.inner
            .lock()
            .unwrap()
            .genre_members
            .entry(genre)
            .or_default()
            .push(audio_id);
    }

    /// Make inserts report no identifier, like a store that rejects the
    /// row without raising.
    pub fn fail_inserts(&self) {
        self.inner.lock().unwrap().fail_inserts = true;
    }

    /// Make member queries yield no cursor at all.
    pub fn drop_member_cursors(&self) {
        self.inner.lock().unwrap().drop_member_cursors = true;
    }

    pub fn fail_thumbnails(&self) {
        self.inner.lock().unwrap().fail_thumbnails = true;
    }

    pub fn delay_thumbnails(&self, delay: Duration) {
        self.inner.lock().unwrap().thumbnail_delay = Some(delay);
    }

    pub fn notifications(&self) -> Vec<Table> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn deleted_song_paths(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted_song_paths.clone()
    }

    pub fn probed_albums(&self) -> Vec<i64> {
        self.inner.lock().unwrap().probed_albums.clone()
    }

    pub fn playlist_names(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        state
            .tables
            .get(&Table::Playlists)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| match row.get("name") {
                        Some(Some(StoreValue::Text(name))) => Some(name.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Members of a playlist as (song id, play order), in play order.
    pub fn member_orders(&self, playlist: i64) -> Vec<(i64, i64)> {
        let state = self.inner.lock().unwrap();
        let mut members: Vec<(i64, i64)> = state
            .playlist_members
            .get(&playlist)
            .map(|members| {
                members
                    .iter()
                    .map(|member| (member.audio_id, member.play_order))
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by_key(|(_, order)| *order);
        members
    }
}

fn cell(row: &StoredRow, column: &str) -> Option<StoreValue> {
    row.get(column).cloned().flatten()
}

fn as_integer(row: &StoredRow, column: &str) -> Option<i64> {
    match cell(row, column) {
        Some(StoreValue::Integer(i)) => Some(i),
        _ => None,
    }
}

fn is_music_row(row: &StoredRow, exclude_trashed_and_pending: bool) -> bool {
    if as_integer(row, "is_music").unwrap_or(0) == 0 {
        return false;
    }
    if exclude_trashed_and_pending {
        if as_integer(row, "is_trashed").unwrap_or(0) != 0 {
            return false;
        }
        if as_integer(row, "is_pending").unwrap_or(0) != 0 {
            return false;
        }
    }
    true
}

fn matches(row: &StoredRow, selection: &Selection) -> bool {
    match selection {
        Selection::NotNull(column) => cell(row, column).is_some(),
        Selection::Eq(column, value) => cell(row, column).as_ref() == Some(value),
        Selection::In(column, values) => cell(row, column)
            .map(|candidate| values.contains(&candidate))
            .unwrap_or(false),
        Selection::MusicOnly {
            exclude_trashed_and_pending,
        } => is_music_row(row, *exclude_trashed_and_pending),
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn query(
        &self,
        table: Table,
        columns: &[&'static str],
        selection: Option<&Selection>,
        sort_by: Option<&'static str>,
    ) -> Result<Option<Vec<Row>>, StoreError> {
        let state = self.inner.lock().unwrap();
        match table {
            Table::PlaylistMembers { playlist } => {
                if state.drop_member_cursors {
                    return Ok(None);
                }
                let mut members = state
                    .playlist_members
                    .get(&playlist)
                    .cloned()
                    .unwrap_or_default();
                if let Some(Selection::MusicOnly {
                    exclude_trashed_and_pending,
                }) = selection
                {
                    let songs = state.tables.get(&Table::Songs);
                    members.retain(|member| {
                        songs
                            .and_then(|rows| {
                                rows.iter()
                                    .find(|row| as_integer(row, "id") == Some(member.audio_id))
                            })
                            .map(|row| is_music_row(row, *exclude_trashed_and_pending))
                            .unwrap_or(false)
                    });
                }
                if sort_by == Some("play_order") {
                    members.sort_by_key(|member| member.play_order);
                }
                Ok(Some(
                    members
                        .iter()
                        .map(|member| Row(vec![Some(StoreValue::Integer(member.audio_id))]))
                        .collect(),
                ))
            }
            Table::GenreMembers { genre } => {
                if state.drop_member_cursors {
                    return Ok(None);
                }
                let members = state.genre_members.get(&genre).cloned().unwrap_or_default();
                Ok(Some(
                    members
                        .iter()
                        .map(|audio_id| Row(vec![Some(StoreValue::Integer(*audio_id))]))
                        .collect(),
                ))
            }
            _ => {
                let rows = state.tables.get(&table).cloned().unwrap_or_default();
                Ok(Some(
                    rows.iter()
                        .filter(|row| selection.map(|s| matches(row, s)).unwrap_or(true))
                        .map(|row| Row(columns.iter().map(|column| cell(row, column)).collect()))
                        .collect(),
                ))
            }
        }
    }

    async fn insert(
        &self,
        table: Table,
        values: ContentValues,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_inserts {
            return Ok(None);
        }
        state.next_id += 1;
        let id = state.next_id;
        let mut row: StoredRow = values
            .into_iter()
            .map(|(column, value)| (column.to_string(), Some(value)))
            .collect();
        row.insert("id".into(), Some(StoreValue::Integer(id)));
        state.tables.entry(table).or_default().push(row);
        Ok(Some(id))
    }

    async fn bulk_insert(
        &self,
        table: Table,
        values: Vec<ContentValues>,
    ) -> Result<usize, StoreError> {
        match table {
            Table::PlaylistMembers { playlist } => {
                let mut state = self.inner.lock().unwrap();
                let count = values.len();
                let members = state.playlist_members.entry(playlist).or_default();
                for row in values {
                    let lookup = |wanted: &str| {
                        row.iter().find_map(|(column, value)| match value {
                            StoreValue::Integer(i) if *column == wanted => Some(*i),
                            _ => None,
                        })
                    };
                    members.push(MemberRow {
                        audio_id: lookup("audio_id").unwrap_or(0),
                        play_order: lookup("play_order").unwrap_or(0),
                    });
                }
                Ok(count)
            }
            _ => {
                let count = values.len();
                for row in values {
                    self.insert(table, row).await?;
                }
                Ok(count)
            }
        }
    }

    async fn update(
        &self,
        table: Table,
        selection: &Selection,
        values: ContentValues,
    ) -> Result<usize, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let rows = state.tables.entry(table).or_default();
        let mut affected = 0;
        for row in rows.iter_mut() {
            if matches(row, selection) {
                for (column, value) in &values {
                    row.insert(column.to_string(), Some(value.clone()));
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, table: Table, selection: &Selection) -> Result<usize, StoreError> {
        let mut state = self.inner.lock().unwrap();
        match table {
            Table::PlaylistMembers { playlist } => {
                let members = state.playlist_members.entry(playlist).or_default();
                let before = members.len();
                if let Selection::In("play_order", values) = selection {
                    members
                        .retain(|member| !values.contains(&StoreValue::Integer(member.play_order)));
                }
                Ok(before - members.len())
            }
            _ => {
                // Keep the reconciliation order observable for song
                // deletions: paths are recorded in selection order.
                if table == Table::Songs {
                    if let Selection::In("filesystem_path", values) = selection {
                        let matched: Vec<String> = {
                            let rows = state.tables.entry(Table::Songs).or_default();
                            values
                                .iter()
                                .filter_map(|value| match value {
                                    StoreValue::Text(path)
                                        if rows.iter().any(|row| {
                                            cell(row, "filesystem_path").as_ref() == Some(value)
                                        }) =>
                                    {
                                        Some(path.clone())
                                    }
                                    _ => None,
                                })
                                .collect()
                        };
                        state.deleted_song_paths.extend(matched);
                    }
                }
                let rows = state.tables.entry(table).or_default();
                let before = rows.len();
                rows.retain(|row| !matches(row, selection));
                Ok(before - rows.len())
            }
        }
    }

    async fn move_playlist_member(
        &self,
        playlist: i64,
        from: usize,
        to: usize,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let members = state.playlist_members.entry(playlist).or_default();
        members.sort_by_key(|member| member.play_order);
        if from == to || from >= members.len() || to >= members.len() {
            return Ok(false);
        }
        let member = members.remove(from);
        members.insert(to, member);
        for (index, member) in members.iter_mut().enumerate() {
            member.play_order = index as i64 + 1;
        }
        Ok(true)
    }

    async fn load_thumbnail(
        &self,
        _uri: &str,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, StoreError> {
        let (delay, fail) = {
            let state = self.inner.lock().unwrap();
            (state.thumbnail_delay, state.fail_thumbnails)
        };
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Canceled);
        }
        if fail {
            return Err(StoreError::Io("thumbnail decode failed".into()));
        }
        Ok(Thumbnail {
            width,
            height,
            rgba: vec![0x7F; (width * height * 4) as usize],
        })
    }

    async fn probe_album_art(&self, album_id: i64) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        state.probed_albums.push(album_id);
        if state.fail_thumbnails {
            return Err(StoreError::Io("album art stream unavailable".into()));
        }
        Ok(())
    }

    fn notify_change(&self, table: Table) {
        self.inner.lock().unwrap().notifications.push(table);
    }
}

/// Consent requester that records every request and can be told to fail
/// the next issuance.
#[derive(Default)]
pub struct RecordingConsentRequester {
    issued: Mutex<Vec<ConsentRequest>>,
    fail_next: Mutex<Option<String>>,
    notify: Notify,
}

impl RecordingConsentRequester {
    pub fn new() -> Self {
        RecordingConsentRequester::default()
    }

    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    pub fn issued(&self) -> Vec<ConsentRequest> {
        self.issued.lock().unwrap().clone()
    }

    /// Waits until a request has been issued and returns the latest one.
    pub async fn wait_for_issue(&self) -> ConsentRequest {
        loop {
            let notified = self.notify.notified();
            if let Some(request) = self.issued.lock().unwrap().last().cloned() {
                return request;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ConsentRequester for RecordingConsentRequester {
    async fn issue(&self, request: ConsentRequest) -> Result<(), ConsentError> {
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(ConsentError::Dispatch(message));
        }
        self.issued.lock().unwrap().push(request);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// A reply handle wired to a fresh completion queue, for driving the
/// engines directly.
pub fn replier_pair(call: CallId) -> (Replier, mpsc::UnboundedReceiver<Completion>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Replier::new(call, tx), rx)
}

/// Receives the next completion, failing the test on a stalled queue.
pub async fn next_completion(rx: &mut mpsc::UnboundedReceiver<Completion>) -> Completion {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a completion")
        .expect("completion queue closed")
}

/// Row builders with the columns the projections expect.
pub mod rows {
    use super::StoredRow;
    use crate::store::StoreValue;

    fn integer(value: i64) -> Option<StoreValue> {
        Some(StoreValue::Integer(value))
    }

    fn text(value: &str) -> Option<StoreValue> {
        Some(StoreValue::Text(value.to_string()))
    }

    pub fn song(id: i64, title: &str, path: Option<&str>) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".into(), integer(id));
        row.insert("title".into(), text(title));
        row.insert("album".into(), text("Selected Works"));
        row.insert("album_id".into(), integer(10_000 + id));
        row.insert("artist".into(), text("Unknown Artist"));
        row.insert("artist_id".into(), integer(20_000 + id));
        row.insert("duration".into(), integer(180_000));
        row.insert("size".into(), integer(4_194_304));
        row.insert("date_added".into(), integer(1_600_000_000));
        row.insert("date_modified".into(), integer(1_600_000_000));
        row.insert("is_music".into(), integer(1));
        if let Some(path) = path {
            row.insert("filesystem_path".into(), text(path));
        }
        row
    }

    pub fn playlist(id: i64, name: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".into(), integer(id));
        row.insert("name".into(), text(name));
        row.insert("date_added".into(), integer(1_600_000_000));
        row.insert("date_modified".into(), integer(1_600_000_000));
        row
    }

    pub fn genre(id: i64, name: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".into(), integer(id));
        row.insert("name".into(), text(name));
        row
    }

    pub fn album(id: i64, title: &str, artist: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".into(), integer(id));
        row.insert("album".into(), text(title));
        row.insert("artist".into(), text(artist));
        row.insert("first_year".into(), integer(1992));
        row.insert("last_year".into(), integer(1994));
        row.insert("number_of_songs".into(), integer(13));
        row
    }

    pub fn artist(id: i64, name: &str) -> StoredRow {
        let mut row = StoredRow::new();
        row.insert("id".into(), integer(id));
        row.insert("artist".into(), text(name));
        row.insert("number_of_albums".into(), integer(2));
        row.insert("number_of_tracks".into(), integer(26));
        row
    }
}
