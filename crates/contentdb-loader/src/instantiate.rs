use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::archive::AssetObject;
use crate::status::{contain, EventSink, LoadEvent, LoadStatus, Payload};

/// A live copy of a loaded asset.
#[derive(Debug, Clone)]
pub struct Instance {
    pub instance_id: Uuid,
    pub source: Arc<AssetObject>,
    /// Mutable state of this copy, initially the asset's data
    pub state: serde_json::Value,
}

impl Instance {
    pub fn new(source: Arc<AssetObject>, state: serde_json::Value) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            source,
            state,
        }
    }
}

/// Copy/activate step run after an asset is loaded.
pub trait Instantiator: Send + Sync {
    fn instantiate(&self, asset: &Arc<AssetObject>) -> Result<Instance, String>;
}

/// Clones the asset's data into a fresh instance. Assets without data
/// cannot be instantiated.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloneInstantiator;

impl Instantiator for CloneInstantiator {
    fn instantiate(&self, asset: &Arc<AssetObject>) -> Result<Instance, String> {
        if asset.data.is_null() {
            return Err(format!("{} has no data to instantiate", asset.name));
        }
        Ok(Instance::new(Arc::clone(asset), asset.data.clone()))
    }
}

/// Instantiate `asset`, ending the request with `Instantiated` or with
/// `InstantiatingError` carrying the loaded asset.
pub(crate) fn run_instantiation(
    instantiator: &dyn Instantiator,
    asset: Arc<AssetObject>,
    sink: &mut EventSink,
) -> Option<Arc<Instance>> {
    sink.emit(LoadEvent::new(LoadStatus::Instantiating, &asset.name, 0.0));

    match contain("instantiator", || instantiator.instantiate(&asset)) {
        Ok(instance) => {
            let instance = Arc::new(instance);
            debug!("Instantiated {} as {}", asset.name, instance.instance_id);
            sink.finish(
                LoadEvent::new(LoadStatus::Instantiated, &asset.name, 1.0)
                    .with_payload(Payload::Instance(Arc::clone(&instance))),
            );
            Some(instance)
        }
        Err(reason) => {
            warn!("Failed to instantiate {}: {}", asset.name, reason);
            sink.finish(
                LoadEvent::new(LoadStatus::InstantiatingError, &asset.name, 1.0)
                    .with_payload(Payload::Asset(asset))
                    .with_message(reason),
            );
            None
        }
    }
}
