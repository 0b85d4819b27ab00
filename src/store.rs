// # Media store seam
//
// The platform's content store is an external collaborator. This module
// defines the tabular vocabulary the rest of the crate speaks (tables,
// rows, scalar values, selections) and the `MediaStore` trait that a
// platform backend or the in-memory test double implements.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Tables exposed by the content store. Member tables are addressed per
/// owning row, mirroring the store's per-playlist/per-genre member URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Songs,
    Albums,
    Artists,
    Genres,
    Playlists,
    PlaylistMembers { playlist: i64 },
    GenreMembers { genre: i64 },
}

/// A scalar the store can hold. Nullability is modeled at the row level,
/// so a value is always present when one of these exists.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Integer(i64),
    Text(String),
}

/// One result row: values parallel to the requested column list, `None`
/// where the store reported null.
#[derive(Debug, Clone, Default)]
pub struct Row(pub Vec<Option<StoreValue>>);

impl Row {
    pub fn get(&self, index: usize) -> Option<&StoreValue> {
        self.0.get(index).and_then(|value| value.as_ref())
    }
}

/// Column/value pairs for inserts and updates.
pub type ContentValues = Vec<(&'static str, StoreValue)>;

/// The small, closed set of predicates the bridge needs. A batched
/// membership test (`In`) stands in for the `column IN (?, ?, …)` pattern;
/// there is deliberately no general query language.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Rows whose column is non-null.
    NotNull(&'static str),
    /// Rows whose column equals the value.
    Eq(&'static str, StoreValue),
    /// Rows whose column is one of the values.
    In(&'static str, Vec<StoreValue>),
    /// Music rows only; from the consent-managed level the store also
    /// tracks trashed and pending rows, which get excluded here.
    MusicOnly { exclude_trashed_and_pending: bool },
}

/// Decoded thumbnail pixels as handed out by the store.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected or could not perform the operation.
    #[error("store access failed: {0}")]
    Access(String),
    /// An underlying file or stream operation failed.
    #[error("i/o failure: {0}")]
    Io(String),
    /// The operation observed its cancellation token.
    #[error("operation canceled")]
    Canceled,
}

/// Query and mutation surface of the platform content store.
///
/// `query` returns `None` when the store yields no cursor at all (store
/// unavailable), as opposed to `Some` with zero rows.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn query(
        &self,
        table: Table,
        columns: &[&'static str],
        selection: Option<&Selection>,
        sort_by: Option<&'static str>,
    ) -> Result<Option<Vec<Row>>, StoreError>;

    /// Insert one row, returning its new identifier when the store
    /// reports one.
    async fn insert(&self, table: Table, values: ContentValues)
        -> Result<Option<i64>, StoreError>;

    /// Insert a batch of rows, returning how many were inserted.
    async fn bulk_insert(
        &self,
        table: Table,
        values: Vec<ContentValues>,
    ) -> Result<usize, StoreError>;

    /// Update matching rows, returning how many were affected.
    async fn update(
        &self,
        table: Table,
        selection: &Selection,
        values: ContentValues,
    ) -> Result<usize, StoreError>;

    /// Delete matching rows, returning how many were removed.
    async fn delete(&self, table: Table, selection: &Selection) -> Result<usize, StoreError>;

    /// The store's built-in playlist reordering primitive. Returns whether
    /// a move actually occurred.
    async fn move_playlist_member(
        &self,
        playlist: i64,
        from: usize,
        to: usize,
    ) -> Result<bool, StoreError>;

    /// Decode a thumbnail for the given content uri. Implementations must
    /// observe `cancel` and return [`StoreError::Canceled`] once it fires.
    async fn load_thumbnail(
        &self,
        uri: &str,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, StoreError>;

    /// Open and close the album-art stream for the given album so the
    /// store refreshes its cached artwork.
    async fn probe_album_art(&self, album_id: i64) -> Result<(), StoreError>;

    /// Notify the store's change observers for a table.
    fn notify_change(&self, table: Table);
}
