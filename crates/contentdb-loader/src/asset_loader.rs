use std::sync::Arc;

use contentdb_core::AssetDescriptor;
use tokio_util::sync::CancellationToken;

use crate::archive::{Archive, AssetObject};
use crate::status::{EventSink, LoadEvent, LoadStatus, Payload};

pub(crate) enum ExtractOutcome {
    Loaded(Arc<AssetObject>),
    /// A terminal error event has been emitted.
    Failed,
    Cancelled,
}

/// Extracts a single object from an opened bundle.
pub struct AssetLoader {
    extract_ticks: u32,
}

impl AssetLoader {
    pub fn new(extract_ticks: u32) -> Self {
        Self {
            extract_ticks: extract_ticks.max(1),
        }
    }

    /// Reject requests the asset path cannot serve. Needs no I/O.
    pub fn check_request(asset: &AssetDescriptor) -> Result<(), String> {
        if asset.is_scene() {
            return Err(format!("'{}' is a scene and must be loaded as one", asset.display_name));
        }
        Ok(())
    }

    pub(crate) async fn extract(
        &self,
        asset: &AssetDescriptor,
        archive: &Archive,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        finish_on_success: bool,
    ) -> ExtractOutcome {
        let name = asset.display_name.as_str();

        if archive.is_scene_archive() {
            sink.finish(
                LoadEvent::new(LoadStatus::AssetLoadingError, name, 0.0)
                    .with_message(format!("bundle {} only holds scenes", archive.name())),
            );
            return ExtractOutcome::Failed;
        }

        let Some(entry) = archive.entry(&asset.id) else {
            sink.finish(
                LoadEvent::new(LoadStatus::AssetNotFound, name, 0.0)
                    .with_message(format!("{} is not in bundle {}", asset.id, archive.name())),
            );
            return ExtractOutcome::Failed;
        };

        for tick in 0..self.extract_ticks {
            if cancel.is_cancelled() {
                sink.finish(LoadEvent::new(LoadStatus::Cancelled, name, 0.0));
                return ExtractOutcome::Cancelled;
            }
            let progress = tick as f32 / self.extract_ticks as f32;
            sink.emit(LoadEvent::new(LoadStatus::AssetLoading, name, progress));
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            sink.finish(LoadEvent::new(LoadStatus::Cancelled, name, 0.0));
            return ExtractOutcome::Cancelled;
        }

        let object = Arc::new(AssetObject::extract(asset, archive.name(), entry));
        sink.emit_or_finish(
            LoadEvent::new(LoadStatus::AssetLoaded, name, 1.0).with_payload(Payload::Asset(Arc::clone(&object))),
            finish_on_success,
        );
        ExtractOutcome::Loaded(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveDocument;
    use crate::testing::{self, HERO_ID, LEVEL_DATA_ID};
    use contentdb_core::AssetKey;

    fn archive(name: &str) -> Archive {
        let (_, document) = testing::archives()
            .into_iter()
            .find(|(n, _)| *n == name)
            .unwrap();
        Archive::from_document(name, document, 0)
    }

    fn descriptor(id: &str) -> AssetDescriptor {
        testing::registry()
            .find_asset(&AssetKey::Id(id.into()), None)
            .unwrap()
            .asset
    }

    #[test]
    fn scenes_are_rejected_up_front() {
        let scene = AssetDescriptor::new(HERO_ID, "Level", "Assets/Level.unity", "SceneAsset", "Object");
        assert!(AssetLoader::check_request(&scene).is_err());
        assert!(AssetLoader::check_request(&descriptor(HERO_ID)).is_ok());
    }

    #[tokio::test]
    async fn extract_streams_progress_then_loads() {
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        let loader = AssetLoader::new(3);

        let outcome = loader
            .extract(&descriptor(HERO_ID), &archive("B_main"), &mut sink, &CancellationToken::new(), true)
            .await;

        let ExtractOutcome::Loaded(object) = outcome else {
            panic!("expected Loaded");
        };
        assert_eq!(object.name, "Hero");
        assert_eq!(object.bundle, "B_main");

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert!(events[..3].iter().all(|e| e.status == LoadStatus::AssetLoading));
        assert_eq!(events[3].status, LoadStatus::AssetLoaded);
        assert!(events[3].terminal);
        assert!(events[3].asset().is_some());
    }

    #[tokio::test]
    async fn scene_archive_cannot_serve_assets() {
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);

        let outcome = AssetLoader::new(1)
            .extract(&descriptor(LEVEL_DATA_ID), &archive("B_levels"), &mut sink, &CancellationToken::new(), true)
            .await;

        assert!(matches!(outcome, ExtractOutcome::Failed));
        assert_eq!(testing::statuses(&events.lock()), vec![LoadStatus::AssetLoadingError]);
    }

    #[tokio::test]
    async fn id_missing_from_archive_is_not_found() {
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        let empty = Archive::from_document("B_main", ArchiveDocument::default(), 0);

        let outcome = AssetLoader::new(1)
            .extract(&descriptor(HERO_ID), &empty, &mut sink, &CancellationToken::new(), true)
            .await;

        assert!(matches!(outcome, ExtractOutcome::Failed));
        assert_eq!(testing::statuses(&events.lock()), vec![LoadStatus::AssetNotFound]);
    }

    #[tokio::test]
    async fn cancelled_before_extraction() {
        let (callback, events) = testing::recorder();
        let mut sink = EventSink::new(1, callback, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = AssetLoader::new(2)
            .extract(&descriptor(HERO_ID), &archive("B_main"), &mut sink, &cancel, true)
            .await;

        assert!(matches!(outcome, ExtractOutcome::Cancelled));
        assert_eq!(testing::statuses(&events.lock()), vec![LoadStatus::Cancelled]);
    }
}
