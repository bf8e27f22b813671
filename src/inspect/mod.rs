//! Debug-server view of a producer registry

use std::sync::Arc;

use terramp_debug::{CacheInfo, DebugCommand, DebugHandler, DebugResponse, ProducerInfo, ResponseData};

use crate::quadtree::TileAddress;
use crate::registry::ProducerRegistry;

/// Answers debug commands from the caches and producers of one registry.
pub struct RegistryInspector {
    registry: Arc<ProducerRegistry>,
}

impl RegistryInspector {
    pub fn new(registry: Arc<ProducerRegistry>) -> Self {
        Self { registry }
    }

    fn tile_address(level: u8, tx: u32, ty: u32) -> Result<TileAddress, DebugResponse> {
        let address = TileAddress::new(level, tx, ty);
        if address.is_valid() {
            Ok(address)
        } else {
            Err(DebugResponse::error(format!("Invalid tile address {}", address)))
        }
    }

    fn tile_info(&self, producer: String, level: u8, tx: u32, ty: u32) -> DebugResponse {
        let Some(p) = self.registry.producer(&producer) else {
            return DebugResponse::error(format!("Unknown producer '{}'", producer));
        };
        let address = match Self::tile_address(level, tx, ty) {
            Ok(address) => address,
            Err(response) => return response,
        };

        let tile = p.find_tile(address);
        let use_count = tile
            .as_ref()
            .zip(p.cache())
            .and_then(|(t, cache)| cache.use_count(t.producer(), address));
        DebugResponse::ok(ResponseData::TileInfo {
            producer,
            level,
            tx,
            ty,
            resident: tile.is_some(),
            state: tile.as_ref().map(|t| format!("{:?}", t.state())),
            use_count,
            version: tile.as_ref().map(|t| t.version()),
            runs: tile.as_ref().map(|t| t.task().run_count()),
        })
    }
}

impl DebugHandler for RegistryInspector {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse {
        match cmd {
            DebugCommand::Ping => DebugResponse::pong(),

            DebugCommand::ListProducers => {
                let producers = self
                    .registry
                    .producers()
                    .map(|(name, p)| ProducerInfo {
                        name: name.to_string(),
                        tile_size: p.tile_size(),
                        border: p.border(),
                        cache: p.cache().map(|c| c.name().to_string()),
                        tiles_in_use: p.tiles_in_use(),
                    })
                    .collect();
                DebugResponse::ok(ResponseData::Producers { producers })
            }

            DebugCommand::ListCaches => {
                let caches = self
                    .registry
                    .caches()
                    .iter()
                    .map(|c| CacheInfo {
                        name: c.name().to_string(),
                        capacity: c.capacity(),
                        tile_bytes: c.storage().tile_bytes(),
                        resident: c.stats().resident,
                    })
                    .collect();
                DebugResponse::ok(ResponseData::Caches { caches })
            }

            DebugCommand::GetCacheStats { cache } => match self.registry.cache(&cache) {
                Some(c) => {
                    let stats = c.stats();
                    DebugResponse::ok(ResponseData::CacheStats {
                        cache,
                        hits: stats.hits,
                        misses: stats.misses,
                        evictions: stats.evictions,
                        capacity_failures: stats.capacity_failures,
                        resident: stats.resident,
                        in_use: stats.in_use,
                        free_slots: stats.free_slots,
                        capacity: stats.capacity,
                        hit_rate: stats.hit_rate(),
                    })
                }
                None => DebugResponse::error(format!("Unknown cache '{}'", cache)),
            },

            DebugCommand::GetTileInfo { producer, level, tx, ty } => self.tile_info(producer, level, tx, ty),

            DebugCommand::InvalidateTile { producer, level, tx, ty } => {
                let Some(p) = self.registry.producer(&producer) else {
                    return DebugResponse::error(format!("Unknown producer '{}'", producer));
                };
                match Self::tile_address(level, tx, ty) {
                    Ok(address) => DebugResponse::ok(ResponseData::Invalidated {
                        count: p.invalidate_tile(address),
                    }),
                    Err(response) => response,
                }
            }

            DebugCommand::InvalidateProducer { producer } => match self.registry.producer(&producer) {
                Some(p) => DebugResponse::ok(ResponseData::Invalidated {
                    count: p.invalidate_tiles(),
                }),
                None => DebugResponse::error(format!("Unknown producer '{}'", producer)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerrainConfig;
    use crate::producer::get_ready_tile;
    use crate::task::{Deadline, RenderContext, Scheduler};

    fn inspector() -> (RegistryInspector, Arc<ProducerRegistry>) {
        let config = TerrainConfig::from_json_str(
            r#"{
                "caches": [{ "name": "terrain", "capacity": 16 }],
                "producers": [
                    { "name": "elevation", "cache": "terrain", "kind": "elevation",
                      "layout": { "tile_size": 8, "border": 1, "max_level": 4 } },
                    { "name": "normals", "cache": "terrain", "kind": "normal",
                      "layout": { "tile_size": 8, "border": 1, "max_level": 4 },
                      "elevation": "elevation", "world_size": 5000.0 }
                ]
            }"#,
        )
        .unwrap();
        let registry = Arc::new(ProducerRegistry::from_config(&config).unwrap());
        (RegistryInspector::new(registry.clone()), registry)
    }

    #[test]
    fn test_list_producers_in_build_order() {
        let (mut inspector, _) = inspector();
        match inspector.handle_command(DebugCommand::ListProducers) {
            DebugResponse::Ok {
                data: ResponseData::Producers { producers },
            } => {
                let names: Vec<_> = producers.iter().map(|p| p.name.as_str()).collect();
                assert_eq!(names, ["elevation", "normals"]);
                assert_eq!(producers[0].cache.as_deref(), Some("terrain"));
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_tile_info_and_invalidate() {
        let (mut inspector, registry) = inspector();
        let normals = registry.producer("normals").unwrap();
        let address = TileAddress::new(2, 1, 3);
        let tile = get_ready_tile(
            normals.as_ref(),
            address,
            Deadline::IMMEDIATE,
            &Scheduler::new(),
            &mut RenderContext::new(),
        )
        .unwrap();

        let info = inspector.handle_command(DebugCommand::GetTileInfo {
            producer: "normals".into(),
            level: 2,
            tx: 1,
            ty: 3,
        });
        match info {
            DebugResponse::Ok {
                data: ResponseData::TileInfo { resident, state, use_count, runs, .. },
            } => {
                assert!(resident);
                assert_eq!(state.as_deref(), Some("Done"));
                assert_eq!(use_count, Some(1));
                assert_eq!(runs, Some(1));
            }
            other => panic!("unexpected response {:?}", other),
        }
        normals.put_tile(&tile);

        let invalidated = inspector.handle_command(DebugCommand::InvalidateProducer {
            producer: "elevation".into(),
        });
        match invalidated {
            DebugResponse::Ok {
                data: ResponseData::Invalidated { count },
            } => assert!(count >= 2),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(!tile.is_done());
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let (mut inspector, _) = inspector();
        assert!(!inspector
            .handle_command(DebugCommand::GetCacheStats { cache: "nope".into() })
            .is_ok());
        assert!(!inspector
            .handle_command(DebugCommand::InvalidateTile {
                producer: "elevation".into(),
                level: 1,
                tx: 5,
                ty: 0,
            })
            .is_ok());
    }
}
