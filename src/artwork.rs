// # Artwork loader
//
// Cancellable thumbnail decodes keyed by caller-supplied request id. The
// registry owns one cancellation token per id from registration until the
// decode completes, is canceled, or fails. A decode that loses the race
// with its cancellation delivers nothing at all: the call is abandoned,
// never answered twice.

use crate::dispatcher::Replier;
use crate::error::BridgeError;
use crate::request::LoadAlbumArtArgs;
use crate::store::{MediaStore, StoreError, Thumbnail};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::error;

pub struct ArtworkLoader {
    store: Arc<dyn MediaStore>,
    runtime: tokio::runtime::Handle,
    signals: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ArtworkLoader {
    pub fn new(store: Arc<dyn MediaStore>, runtime: tokio::runtime::Handle) -> Self {
        ArtworkLoader {
            store,
            runtime,
            signals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a token under the request id and starts the decode.
    /// The outcome is posted through `replier` unless the load is
    /// canceled first.
    pub fn start(&self, args: LoadAlbumArtArgs, replier: Replier) {
        let token = CancellationToken::new();
        self.signals
            .lock()
            .unwrap()
            .insert(args.id.clone(), token.clone());

        let store = Arc::clone(&self.store);
        let signals = Arc::clone(&self.signals);
        self.runtime.spawn(async move {
            let decoded = store
                .load_thumbnail(&args.uri, args.width, args.height, &token)
                .await;
            match decoded {
                // Canceled loads were already deregistered by `cancel`.
                Err(StoreError::Canceled) => {}
                Err(StoreError::Io(message)) => {
                    signals.lock().unwrap().remove(&args.id);
                    replier.fail(BridgeError::Io(message));
                }
                Err(other) => {
                    signals.lock().unwrap().remove(&args.id);
                    replier.fail(other.into());
                }
                Ok(thumbnail) => {
                    // The decode may have produced a result after the
                    // cancellation fired; deliver neither success nor
                    // failure in that case.
                    if token.is_cancelled() {
                        return;
                    }
                    signals.lock().unwrap().remove(&args.id);
                    match encode_jpeg(thumbnail) {
                        Ok(bytes) => match serde_json::to_value(bytes) {
                            Ok(payload) => replier.succeed(payload),
                            Err(e) => replier.fail(BridgeError::Unexpected(e.to_string())),
                        },
                        Err(e) => {
                            error!(id = %args.id, "thumbnail encoding failed: {e}");
                            replier.fail(e);
                        }
                    }
                }
            }
        });
    }

    /// Triggers and removes the token for `id` if one is registered.
    /// Canceling an unknown or already-completed id is a no-op.
    pub fn cancel(&self, id: &str) {
        if let Some(token) = self.signals.lock().unwrap().remove(id) {
            token.cancel();
        }
    }

    #[cfg(test)]
    fn is_registered(&self, id: &str) -> bool {
        self.signals.lock().unwrap().contains_key(id)
    }
}

fn encode_jpeg(thumbnail: Thumbnail) -> Result<Vec<u8>, BridgeError> {
    let pixels = image::RgbaImage::from_raw(thumbnail.width, thumbnail.height, thumbnail.rgba)
        .ok_or_else(|| BridgeError::Io("thumbnail pixel buffer has the wrong size".into()))?;
    let rgb = image::DynamicImage::ImageRgba8(pixels).to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 100)
        .write_image(
            rgb.as_raw(),
            thumbnail.width,
            thumbnail.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| BridgeError::Io(format!("thumbnail encoding failed: {e}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Outcome;
    use crate::test_support::{replier_pair, MemoryStore};
    use std::time::Duration;

    fn args(id: &str) -> LoadAlbumArtArgs {
        LoadAlbumArtArgs {
            id: id.into(),
            uri: format!("content://media/thumbnail/{id}"),
            width: 4,
            height: 4,
        }
    }

    fn loader(store: &MemoryStore) -> ArtworkLoader {
        ArtworkLoader::new(store.shared(), tokio::runtime::Handle::current())
    }

    #[tokio::test]
    async fn successful_decode_delivers_jpeg_bytes_and_deregisters() {
        let store = MemoryStore::new();
        let loader = loader(&store);
        let (replier, mut completions) = replier_pair(1);

        loader.start(args("art-1"), replier);
        let completion = completions.recv().await.unwrap();
        match completion.outcome {
            Outcome::Success(serde_json::Value::Array(bytes)) => {
                // JPEG SOI marker.
                assert_eq!(bytes[0], 0xFF);
                assert_eq!(bytes[1], 0xD8);
            }
            other => panic!("expected byte payload, got {other:?}"),
        }
        assert!(!loader.is_registered("art-1"));
    }

    #[tokio::test]
    async fn canceled_load_is_abandoned_without_any_outcome() {
        let store = MemoryStore::new();
        store.delay_thumbnails(Duration::from_secs(5));
        let loader = loader(&store);
        let (replier, mut completions) = replier_pair(1);

        loader.start(args("art-1"), replier);
        loader.cancel("art-1");

        let outcome =
            tokio::time::timeout(Duration::from_millis(100), completions.recv()).await;
        // The sender side is gone without ever posting.
        assert!(matches!(outcome, Ok(None)) || outcome.is_err());
        assert!(!loader.is_registered("art-1"));
    }

    #[tokio::test]
    async fn canceling_an_unknown_id_is_a_no_op() {
        let store = MemoryStore::new();
        let loader = loader(&store);
        loader.cancel("never-started");
    }

    #[tokio::test]
    async fn decode_failure_delivers_a_typed_io_failure() {
        let store = MemoryStore::new();
        store.fail_thumbnails();
        let loader = loader(&store);
        let (replier, mut completions) = replier_pair(1);

        loader.start(args("art-1"), replier);
        let completion = completions.recv().await.unwrap();
        match completion.outcome {
            Outcome::Failure(failure) => assert_eq!(failure.code, "IO_ERROR"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!loader.is_registered("art-1"));
    }
}
