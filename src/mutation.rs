// # Mutation engine
//
// Playlist mutations against the content store. Observer notification
// rules differ per operation and are part of the contract: inserts notify
// only when the store handed back an identifier, updates and member
// removals only when rows were affected, playlist removal always.

use crate::error::BridgeError;
use crate::store::{ContentValues, MediaStore, Selection, StoreValue, Table};
use std::sync::Arc;

#[derive(Clone)]
pub struct MutationEngine {
    store: Arc<dyn MediaStore>,
}

impl MutationEngine {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        MutationEngine { store }
    }

    pub async fn create_playlist(&self, name: &str) -> Result<(), BridgeError> {
        let values: ContentValues = vec![("name", StoreValue::Text(name.to_string()))];
        let id = self.store.insert(Table::Playlists, values).await?;
        if id.is_some() {
            self.store.notify_change(Table::Playlists);
        }
        Ok(())
    }

    pub async fn rename_playlist(&self, id: i64, name: &str) -> Result<(), BridgeError> {
        self.require_playlist(id).await?;
        let values: ContentValues = vec![("name", StoreValue::Text(name.to_string()))];
        let affected = self
            .store
            .update(
                Table::Playlists,
                &Selection::Eq("id", StoreValue::Integer(id)),
                values,
            )
            .await?;
        if affected > 0 {
            self.store.notify_change(Table::Playlists);
        }
        Ok(())
    }

    /// Deletes all listed playlists with one batched predicate and
    /// notifies observers regardless of how many rows matched.
    pub async fn remove_playlists(&self, ids: &[i64]) -> Result<(), BridgeError> {
        if !ids.is_empty() {
            let values = ids.iter().map(|id| StoreValue::Integer(*id)).collect();
            self.store
                .delete(Table::Playlists, &Selection::In("id", values))
                .await?;
        }
        self.store.notify_change(Table::Playlists);
        Ok(())
    }

    /// Inserts the songs as one batch. Play order is one-based: the song
    /// at position `i` of the input lands at rank `index + i + 1`.
    pub async fn insert_songs_in_playlist(
        &self,
        id: i64,
        index: i64,
        song_ids: &[i64],
    ) -> Result<(), BridgeError> {
        self.require_playlist(id).await?;
        let batch: Vec<ContentValues> = song_ids
            .iter()
            .enumerate()
            .map(|(i, song)| {
                vec![
                    ("audio_id", StoreValue::Integer(*song)),
                    ("play_order", StoreValue::Integer(index + i as i64 + 1)),
                ]
            })
            .collect();
        self.store
            .bulk_insert(Table::PlaylistMembers { playlist: id }, batch)
            .await?;
        Ok(())
    }

    /// Delegates ordering recomputation to the store's own reordering
    /// primitive; the boolean is whether a move actually occurred.
    pub async fn move_song_in_playlist(
        &self,
        id: i64,
        from: usize,
        to: usize,
    ) -> Result<bool, BridgeError> {
        let moved = self.store.move_playlist_member(id, from, to).await?;
        if moved {
            self.store.notify_change(Table::Playlists);
        }
        Ok(moved)
    }

    /// Removes members by position. Zero-based indexes convert to the
    /// one-based play-order values the store persists.
    pub async fn remove_from_playlist_at(
        &self,
        id: i64,
        indexes: &[i64],
    ) -> Result<(), BridgeError> {
        self.require_playlist(id).await?;
        if indexes.is_empty() {
            return Ok(());
        }
        let orders = indexes
            .iter()
            .map(|index| StoreValue::Integer(index + 1))
            .collect();
        let removed = self
            .store
            .delete(
                Table::PlaylistMembers { playlist: id },
                &Selection::In("play_order", orders),
            )
            .await?;
        if removed > 0 {
            self.store.notify_change(Table::Playlists);
        }
        Ok(())
    }

    /// Bounded existence check: select the id column filtered by id and
    /// test for at least one row.
    async fn require_playlist(&self, id: i64) -> Result<(), BridgeError> {
        let rows = self
            .store
            .query(
                Table::Playlists,
                &["id"],
                Some(&Selection::Eq("id", StoreValue::Integer(id))),
                None,
            )
            .await?;
        match rows {
            Some(rows) if !rows.is_empty() => Ok(()),
            _ => Err(BridgeError::PlaylistNotFound { id }),
        }
    }
}
