//! Cache-backed producer driving a [`TileBuilder`]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use super::builder::{DependencySet, TileBuilder, TileInputs, TileOutput};
use super::tile_data::TileLayout;
use super::{ProducerConfig, SceneState, TileProducer};
use crate::cache::{EvictionListener, ProducerId, Tile, TileCache, TileHandle};
use crate::core::{Error, Result};
use crate::quadtree::TileAddress;
use crate::storage::SlotId;
use crate::task::{Deadline, InvalidationReason, RenderContext, RenderTarget, Task, TaskBody};

/// Producer storing its tiles in a [`TileCache`] and building them with `B`.
pub struct CachedProducer<B: TileBuilder> {
    id: ProducerId,
    config: ProducerConfig,
    cache: Arc<TileCache>,
    builder: RwLock<Arc<B>>,
    /// Producers reading this one's tiles, invalidated along with it
    dependents: Mutex<Vec<Weak<dyn TileProducer>>>,
    /// Tiles of this producer evicted from the cache
    discarded: AtomicU64,
    this: Weak<Self>,
}

impl<B: TileBuilder> CachedProducer<B> {
    /// Create a producer and wire it to its cache and upstream producers.
    ///
    /// # Errors
    /// `Config` if the layout does not fit the cache's slots, the level range
    /// is empty, or an upstream producer uses a different tile size.
    pub fn new(config: ProducerConfig, cache: Arc<TileCache>, builder: B) -> Result<Arc<Self>> {
        config.validate()?;
        let layout = config.layout();
        if layout.tile_bytes() > cache.storage().tile_bytes() {
            return Err(Error::config(format!(
                "producer '{}' needs {} bytes per tile but cache '{}' slots hold {}",
                config.name,
                layout.tile_bytes(),
                cache.name(),
                cache.storage().tile_bytes()
            )));
        }
        check_builder(&config, &builder)?;

        let upstream = builder.upstream();
        let producer = Arc::new_cyclic(|this: &Weak<Self>| {
            let listener: Weak<dyn EvictionListener> = this.clone();
            Self {
                id: cache.register_producer(Some(listener)),
                config,
                cache,
                builder: RwLock::new(Arc::new(builder)),
                dependents: Mutex::new(Vec::new()),
                discarded: AtomicU64::new(0),
                this: this.clone(),
            }
        });

        let weak: Weak<dyn TileProducer> = Arc::downgrade(&producer) as Weak<dyn TileProducer>;
        for up in upstream {
            up.add_dependent(weak.clone());
        }

        log::debug!(
            "Created producer '{}' (levels {}..={}, {}px + {} border)",
            producer.config.name,
            producer.config.min_level,
            producer.config.max_level,
            producer.config.tile_size,
            producer.config.border
        );
        Ok(producer)
    }

    pub fn id(&self) -> ProducerId {
        self.id
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Current builder.
    pub fn builder(&self) -> Arc<B> {
        self.builder.read().clone()
    }

    /// Number of this producer's tiles evicted so far.
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Replace the builder and invalidate every tile.
    ///
    /// Only allowed while none of this producer's tiles is pinned or being
    /// produced, so no tile is ever built half with the old and half with the
    /// new configuration.
    ///
    /// # Errors
    /// `ProducerBusy` when tiles are busy, `Config` when the new builder does
    /// not fit the producer's layout.
    pub fn reconfigure(&self, builder: B) -> Result<()> {
        check_builder(&self.config, &builder)?;
        let upstream = builder.upstream();
        let builder = Arc::new(builder);

        self.cache
            .with_idle_producer(self.id, || *self.builder.write() = builder)
            .map_err(|in_use| Error::ProducerBusy {
                producer: self.config.name.clone(),
                in_use,
            })?;

        if let Some(this) = self.this.upgrade() {
            let weak: Weak<dyn TileProducer> = Arc::downgrade(&this) as Weak<dyn TileProducer>;
            for up in upstream {
                up.add_dependent(weak.clone());
            }
        }

        log::debug!("Reconfigured producer '{}'", self.config.name);
        self.cache.invalidate_producer(self.id, InvalidationReason::Reconfigured);
        for dependent in self.live_dependents() {
            dependent.invalidate_tiles();
        }
        Ok(())
    }

    fn live_dependents(&self) -> Vec<Arc<dyn TileProducer>> {
        let mut dependents = self.dependents.lock();
        dependents.retain(|d| d.strong_count() > 0);
        dependents.iter().filter_map(Weak::upgrade).collect()
    }

    fn make_task(&self, address: TileAddress, slot: SlotId, deadline: Deadline) -> Arc<Task> {
        Task::new(
            TileTask {
                producer: self.this.clone(),
                address,
                slot,
                acquired: Mutex::new(Acquired::default()),
            },
            deadline,
        )
    }
}

fn check_builder<B: TileBuilder>(config: &ProducerConfig, builder: &B) -> Result<()> {
    for up in builder.upstream() {
        if up.tile_size() != config.tile_size {
            return Err(Error::config(format!(
                "producer '{}' has {}px tiles but reads '{}' with {}px tiles",
                config.name,
                config.tile_size,
                up.name(),
                up.tile_size()
            )));
        }
    }
    builder.validate(&config.layout())
}

impl<B: TileBuilder> TileProducer for CachedProducer<B> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn layout(&self) -> TileLayout {
        self.config.layout()
    }

    fn has_tile(&self, address: TileAddress) -> bool {
        address.is_valid() && (self.config.min_level..=self.config.max_level).contains(&address.level)
    }

    fn get_tile(&self, address: TileAddress, deadline: Deadline) -> Result<TileHandle> {
        if !self.has_tile(address) {
            return Err(Error::NoSuchTile {
                producer: self.config.name.clone(),
                address,
            });
        }
        self.cache.get_tile(self.id, address, deadline, |slot| {
            self.make_task(address, slot, deadline)
        })
    }

    fn find_tile(&self, address: TileAddress) -> Option<TileHandle> {
        self.cache.find_tile(self.id, address)
    }

    fn put_tile(&self, tile: &Tile) {
        self.cache.put_tile(tile);
    }

    fn invalidate_tile(&self, address: TileAddress) -> usize {
        let mut count = self
            .cache
            .invalidate_subtree(self.id, address, InvalidationReason::DataChanged);
        for dependent in self.live_dependents() {
            count += dependent.invalidate_tile(address);
        }
        count
    }

    fn invalidate_tiles(&self) -> usize {
        let mut count = self
            .cache
            .invalidate_producer(self.id, InvalidationReason::DataChanged);
        for dependent in self.live_dependents() {
            count += dependent.invalidate_tiles();
        }
        count
    }

    fn update(&self, scene: &SceneState) {
        if self.builder().update(scene) {
            log::debug!("Producer '{}' invalidated by frame {}", self.config.name, scene.frame);
            self.invalidate_tiles();
        }
    }

    fn add_dependent(&self, dependent: Weak<dyn TileProducer>) {
        self.dependents.lock().push(dependent);
    }

    fn cache(&self) -> Option<Arc<TileCache>> {
        Some(self.cache.clone())
    }

    fn tiles_in_use(&self) -> usize {
        self.cache.tiles_in_use(self.id)
    }
}

impl<B: TileBuilder> EvictionListener for CachedProducer<B> {
    fn on_tile_discarded(&self, address: TileAddress) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        log::trace!("Producer '{}' lost tile {}", self.config.name, address);
    }
}

/// Tiles pinned by one tile task between `prepare` and `release`.
#[derive(Default)]
struct Acquired {
    parent: Option<(Arc<dyn TileProducer>, TileHandle)>,
    dependencies: Vec<(Arc<dyn TileProducer>, TileHandle)>,
}

/// Task body building one tile of a [`CachedProducer`].
struct TileTask<B: TileBuilder> {
    producer: Weak<CachedProducer<B>>,
    address: TileAddress,
    slot: SlotId,
    acquired: Mutex<Acquired>,
}

impl<B: TileBuilder> TileTask<B> {
    fn producer_name(&self) -> String {
        self.producer
            .upgrade()
            .map_or_else(|| "<dropped>".to_string(), |p| p.config.name.clone())
    }
}

impl<B: TileBuilder> TaskBody for TileTask<B> {
    fn label(&self) -> String {
        format!("{} {}", self.producer_name(), self.address)
    }

    fn prepare(&self) -> Result<Vec<Arc<Task>>> {
        let producer = self.producer.upgrade().ok_or_else(|| Error::ProductionFailed {
            producer: "<dropped>".into(),
            address: self.address,
        })?;
        // Graph expansion tightens these to this task's deadline.
        let deadline = Deadline::NONE;

        let mut deps = DependencySet::new();
        producer.builder().start_create_tile(self.address, &mut deps)?;

        // Level 0 has no parent.
        let parent_address = self
            .address
            .parent()
            .filter(|p| producer.config.needs_parent && producer.has_tile(*p));

        let mut acquired = self.acquired.lock();
        debug_assert!(acquired.parent.is_none() && acquired.dependencies.is_empty());
        let mut tasks = Vec::new();

        if let Some(parent_address) = parent_address {
            let this: Arc<dyn TileProducer> = producer.clone();
            let parent = this.get_tile(parent_address, deadline)?;
            tasks.push(parent.task().clone());
            acquired.parent = Some((this, parent));
        }
        for (up, address) in deps.into_requests() {
            let tile = up.get_tile(address, deadline)?;
            tasks.push(tile.task().clone());
            acquired.dependencies.push((up, tile));
        }
        Ok(tasks)
    }

    fn run(&self, ctx: &mut RenderContext) -> bool {
        let Some(producer) = self.producer.upgrade() else {
            return false;
        };
        let name = &producer.config.name;

        let inputs = {
            let acquired = self.acquired.lock();
            let pending = acquired
                .parent
                .iter()
                .chain(acquired.dependencies.iter())
                .find(|(_, tile)| !tile.is_done());
            if let Some((up, tile)) = pending {
                let err = Error::MissingDependency {
                    producer: name.clone(),
                    address: tile.address(),
                };
                log::error!("{} (from '{}')", err, up.name());
                return false;
            }
            TileInputs::new(
                acquired.parent.as_ref().map(|(_, t)| t.clone()),
                acquired.dependencies.iter().map(|(_, t)| t.clone()).collect(),
            )
        };

        let builder = producer.builder();
        let layout = producer.config.layout();
        builder.begin_create_tile(
            ctx,
            RenderTarget {
                slot: self.slot,
                size: layout.side(),
            },
        );
        let success = {
            let mut output = TileOutput::new(producer.cache.storage().write(self.slot), layout);
            let success = builder.do_create_tile(self.address, &inputs, &mut output, ctx);
            if success {
                let version = output.commit();
                log::trace!("Built {} {} (version {})", name, self.address, version);
            }
            success
        };
        builder.end_create_tile(ctx);

        if !success {
            let err = Error::ProductionFailed {
                producer: name.clone(),
                address: self.address,
            };
            log::debug!("{}", err);
        }
        success
    }

    fn release(&self) {
        let acquired = std::mem::take(&mut *self.acquired.lock());
        if let Some((producer, parent)) = acquired.parent {
            producer.put_tile(&parent);
        }
        for (producer, tile) in acquired.dependencies {
            producer.put_tile(&tile);
        }
        if let Some(producer) = self.producer.upgrade() {
            producer.builder().stop_create_tile(self.address);
        }
    }
}
