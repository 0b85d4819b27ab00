// # Request dispatcher
//
// Entry point of the bridge. Each call is decoded into a typed request,
// routed to its handler, and run off the calling context; the single
// outcome is posted back through an ordered completion queue. Delivery is
// exactly-once by construction: the reply handle consumes itself on first
// use, and every handler error is converted to a failure outcome before
// it can cross the boundary.

use crate::artwork::ArtworkLoader;
use crate::capability::CapabilityLevel;
use crate::consent::{ConsentKind, ConsentRequest, ConsentRequester, Correlator};
use crate::deletion::DeletionWorkflow;
use crate::error::{BridgeError, Failure};
use crate::mutation::MutationEngine;
use crate::query::{QueryEngine, Record};
use crate::request::Request;
use crate::store::MediaStore;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Caller-side correlation id for one call.
pub type CallId = u64;

/// The one outcome a call resolves with.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(Failure),
    NotImplemented,
}

/// One entry on the completion queue.
#[derive(Debug, PartialEq)]
pub struct Completion {
    pub call: CallId,
    pub outcome: Outcome,
}

/// Single-delivery reply handle bound to one call. Consuming `self` on
/// every delivery makes answering a call twice unrepresentable; dropping
/// the handle abandons the call without an answer.
#[derive(Debug)]
pub struct Replier {
    call: CallId,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Replier {
    pub(crate) fn new(call: CallId, completions: mpsc::UnboundedSender<Completion>) -> Self {
        Replier { call, completions }
    }

    pub fn succeed(self, value: Value) {
        self.post(Outcome::Success(value));
    }

    pub fn fail(self, error: BridgeError) {
        self.post(Outcome::Failure(error.into()));
    }

    pub fn not_implemented(self) {
        self.post(Outcome::NotImplemented);
    }

    fn post(self, outcome: Outcome) {
        let completion = Completion {
            call: self.call,
            outcome,
        };
        if self.completions.send(completion).is_err() {
            warn!(call = self.call, "completion queue closed, outcome dropped");
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn MediaStore>,
    capability: CapabilityLevel,
    launched_from_view_intent: bool,
    queries: QueryEngine,
    mutations: MutationEngine,
    artwork: ArtworkLoader,
    correlator: Arc<Correlator>,
    requester: Arc<dyn ConsentRequester>,
    deletion: DeletionWorkflow,
    runtime: tokio::runtime::Handle,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Dispatcher {
    /// Wires the engines together around the store and consent surface.
    /// Returns the dispatcher and the completion queue its outcomes are
    /// posted to.
    pub fn new(
        store: Arc<dyn MediaStore>,
        requester: Arc<dyn ConsentRequester>,
        capability: CapabilityLevel,
        launched_from_view_intent: bool,
        runtime: tokio::runtime::Handle,
    ) -> (Dispatcher, mpsc::UnboundedReceiver<Completion>) {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let correlator = Arc::new(Correlator::new());
        let dispatcher = Dispatcher {
            queries: QueryEngine::new(Arc::clone(&store), capability),
            mutations: MutationEngine::new(Arc::clone(&store)),
            artwork: ArtworkLoader::new(Arc::clone(&store), runtime.clone()),
            deletion: DeletionWorkflow::new(
                Arc::clone(&store),
                Arc::clone(&correlator),
                Arc::clone(&requester),
                capability,
                runtime.clone(),
            ),
            store,
            capability,
            launched_from_view_intent,
            correlator,
            requester,
            runtime,
            completions,
        };
        (dispatcher, completion_rx)
    }

    /// Routes one incoming call. Exactly one completion for `call` is
    /// posted, except for thumbnail loads abandoned by cancellation.
    pub fn dispatch(&self, call: CallId, method: &str, args: Value) {
        let replier = Replier::new(call, self.completions.clone());
        match Request::parse(method, args) {
            Ok(Some(request)) => self.handle(request, replier),
            Ok(None) => replier.not_implemented(),
            Err(error) => replier.fail(BridgeError::Unexpected(format!(
                "invalid arguments for {method}: {error}"
            ))),
        }
    }

    /// External correlation callback: the OS answered the pending consent
    /// prompt. Returns whether a call was resumed.
    pub async fn resolve_consent(&self, kind: ConsentKind, accepted: bool) -> bool {
        self.correlator.resolve(kind, accepted).await
    }

    fn handle(&self, request: Request, replier: Replier) {
        match request {
            Request::LoadAlbumArt(args) => {
                if !self.capability.supports_thumbnail_loading() {
                    replier.fail(BridgeError::UnsupportedOnPlatformVersion {
                        required: CapabilityLevel::ScopedStorage,
                        current: self.capability,
                    });
                    return;
                }
                self.artwork.start(args, replier);
            }
            Request::CancelAlbumArtLoading(args) => {
                self.artwork.cancel(&args.id);
                replier.succeed(Value::Null);
            }
            Request::FixAlbumArt(args) => {
                let store = Arc::clone(&self.store);
                self.runtime.spawn(async move {
                    // The probe only nudges the store's artwork cache;
                    // its failure is not the caller's problem.
                    if let Err(error) = store.probe_album_art(args.id).await {
                        debug!(album = args.id, "album art probe failed: {error}");
                    }
                    replier.succeed(Value::Null);
                });
            }
            Request::RetrieveSongs => {
                let queries = self.queries.clone();
                self.spawn(replier, async move {
                    queries.retrieve_songs().await.map(records_to_value)
                });
            }
            Request::RetrieveAlbums => {
                let queries = self.queries.clone();
                self.spawn(replier, async move {
                    queries.retrieve_albums().await.map(records_to_value)
                });
            }
            Request::RetrievePlaylists => {
                let queries = self.queries.clone();
                self.spawn(replier, async move {
                    queries.retrieve_playlists().await.map(records_to_value)
                });
            }
            Request::RetrieveArtists => {
                let queries = self.queries.clone();
                self.spawn(replier, async move {
                    queries.retrieve_artists().await.map(records_to_value)
                });
            }
            Request::RetrieveGenres => {
                let queries = self.queries.clone();
                self.spawn(replier, async move {
                    queries.retrieve_genres().await.map(records_to_value)
                });
            }
            Request::SetSongsFavorite(args) => {
                if !self.capability.supports_favorite_requests() {
                    replier.fail(BridgeError::UnsupportedOnPlatformVersion {
                        required: CapabilityLevel::ConsentManaged,
                        current: self.capability,
                    });
                    return;
                }
                let correlator = Arc::clone(&self.correlator);
                let requester = Arc::clone(&self.requester);
                self.runtime.spawn(async move {
                    let request = ConsentRequest::Favorite {
                        song_ids: args.song_ids,
                        value: args.value,
                    };
                    if !correlator.begin(ConsentKind::Favorite, replier).await {
                        return;
                    }
                    if let Err(error) = requester.issue(request).await {
                        correlator.fail_pending(error.into()).await;
                    }
                });
            }
            Request::DeleteSongs(args) => {
                self.deletion.run(args.songs, replier);
            }
            Request::CreatePlaylist(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .create_playlist(&args.name)
                        .await
                        .map(|_| Value::Null)
                });
            }
            Request::RenamePlaylist(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .rename_playlist(args.id, &args.name)
                        .await
                        .map(|_| Value::Null)
                });
            }
            Request::RemovePlaylists(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .remove_playlists(&args.ids)
                        .await
                        .map(|_| Value::Null)
                });
            }
            Request::InsertSongsInPlaylist(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .insert_songs_in_playlist(args.id, args.index, &args.song_ids)
                        .await
                        .map(|_| Value::Null)
                });
            }
            Request::MoveSongInPlaylist(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .move_song_in_playlist(args.id, args.from, args.to)
                        .await
                        .map(Value::Bool)
                });
            }
            Request::RemoveFromPlaylistAt(args) => {
                let mutations = self.mutations.clone();
                self.spawn(replier, async move {
                    mutations
                        .remove_from_playlist_at(args.id, &args.indexes)
                        .await
                        .map(|_| Value::Null)
                });
            }
            Request::IsIntentActionView => {
                replier.succeed(Value::Bool(self.launched_from_view_intent));
            }
        }
    }

    /// Runs handler work off the calling context and converts its result
    /// into the call's single outcome. This is the dispatcher-boundary
    /// catch-all: no handler error reaches the queue unconverted.
    fn spawn(
        &self,
        replier: Replier,
        work: impl Future<Output = Result<Value, BridgeError>> + Send + 'static,
    ) {
        self.runtime.spawn(async move {
            match work.await {
                Ok(value) => replier.succeed(value),
                Err(error) => replier.fail(error),
            }
        });
    }
}

fn records_to_value(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Value::Object).collect())
}
