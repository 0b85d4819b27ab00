// # Request surface
//
// Every operation crossing the bridge is decoded into one of these typed
// requests at the dispatch boundary. Argument maps arrive as JSON; a map
// that does not match the operation's schema fails the call before any
// handler runs.

use crate::deletion::DeletionItem;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct LoadAlbumArtArgs {
    pub id: String,
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAlbumArtLoadingArgs {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixAlbumArtArgs {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSongsFavoriteArgs {
    pub value: bool,
    pub song_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSongsArgs {
    pub songs: Vec<DeletionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePlaylistArgs {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenamePlaylistArgs {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemovePlaylistsArgs {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertSongsInPlaylistArgs {
    pub id: i64,
    pub index: i64,
    pub song_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveSongInPlaylistArgs {
    pub id: i64,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveFromPlaylistAtArgs {
    pub id: i64,
    pub indexes: Vec<i64>,
}

#[derive(Debug, Clone)]
pub enum Request {
    LoadAlbumArt(LoadAlbumArtArgs),
    CancelAlbumArtLoading(CancelAlbumArtLoadingArgs),
    FixAlbumArt(FixAlbumArtArgs),
    RetrieveSongs,
    RetrieveAlbums,
    RetrievePlaylists,
    RetrieveArtists,
    RetrieveGenres,
    SetSongsFavorite(SetSongsFavoriteArgs),
    DeleteSongs(DeleteSongsArgs),
    CreatePlaylist(CreatePlaylistArgs),
    RenamePlaylist(RenamePlaylistArgs),
    RemovePlaylists(RemovePlaylistsArgs),
    InsertSongsInPlaylist(InsertSongsInPlaylistArgs),
    MoveSongInPlaylist(MoveSongInPlaylistArgs),
    RemoveFromPlaylistAt(RemoveFromPlaylistAtArgs),
    IsIntentActionView,
}

impl Request {
    /// Decodes a named operation. `Ok(None)` means the name is unknown;
    /// a decoding error means the arguments did not match the schema.
    pub fn parse(method: &str, args: Value) -> Result<Option<Request>, serde_json::Error> {
        use serde_json::from_value;
        let request = match method {
            "loadAlbumArt" => Request::LoadAlbumArt(from_value(args)?),
            "cancelAlbumArtLoading" => Request::CancelAlbumArtLoading(from_value(args)?),
            "fixAlbumArt" => Request::FixAlbumArt(from_value(args)?),
            "retrieveSongs" => Request::RetrieveSongs,
            "retrieveAlbums" => Request::RetrieveAlbums,
            "retrievePlaylists" => Request::RetrievePlaylists,
            "retrieveArtists" => Request::RetrieveArtists,
            "retrieveGenres" => Request::RetrieveGenres,
            "setSongsFavorite" => Request::SetSongsFavorite(from_value(args)?),
            "deleteSongs" => Request::DeleteSongs(from_value(args)?),
            "createPlaylist" => Request::CreatePlaylist(from_value(args)?),
            "renamePlaylist" => Request::RenamePlaylist(from_value(args)?),
            "removePlaylists" => Request::RemovePlaylists(from_value(args)?),
            "insertSongsInPlaylist" => Request::InsertSongsInPlaylist(from_value(args)?),
            "moveSongInPlaylist" => Request::MoveSongInPlaylist(from_value(args)?),
            "removeFromPlaylistAt" => Request::RemoveFromPlaylistAt(from_value(args)?),
            "isIntentActionView" => Request::IsIntentActionView,
            _ => return Ok(None),
        };
        Ok(Some(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_operation_names_parse_to_none() {
        let parsed = Request::parse("openSettings", json!({})).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn wire_argument_names_are_camel_case() {
        let parsed = Request::parse(
            "insertSongsInPlaylist",
            json!({"id": 7, "index": 2, "songIds": [100, 101]}),
        )
        .unwrap()
        .unwrap();
        match parsed {
            Request::InsertSongsInPlaylist(args) => {
                assert_eq!(args.id, 7);
                assert_eq!(args.index, 2);
                assert_eq!(args.song_ids, vec![100, 101]);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn missing_arguments_are_a_decoding_error() {
        assert!(Request::parse("renamePlaylist", json!({"id": 1})).is_err());
    }

    #[test]
    fn deletion_items_allow_a_missing_path() {
        let parsed = Request::parse(
            "deleteSongs",
            json!({"songs": [
                {"id": 1, "filesystemPath": "/music/a.flac"},
                {"id": 2}
            ]}),
        )
        .unwrap()
        .unwrap();
        match parsed {
            Request::DeleteSongs(args) => {
                assert_eq!(args.songs.len(), 2);
                assert_eq!(args.songs[1].filesystem_path, None);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
