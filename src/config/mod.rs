//! Terrain configuration
//!
//! A [`TerrainConfig`] describes every cache and producer of a session as
//! plain data. Loading only checks the JSON shape; [`TerrainConfig::validate`]
//! and [`TerrainConfig::build_order`] check names and wiring, and
//! [`ProducerRegistry::from_config`](crate::registry::ProducerRegistry::from_config)
//! builds the producers.

pub mod descriptor;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::producer::TileLayout;

pub use descriptor::{CacheDescriptor, LayoutDescriptor, ProducerDescriptor, ProducerKind, ResidualDescriptor};

/// Caches and producers of one terrain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    pub caches: Vec<CacheDescriptor>,
    pub producers: Vec<ProducerDescriptor>,
}

impl TerrainConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::info!(
            "Loaded terrain config {}: {} cache(s), {} producer(s)",
            path.display(),
            config.caches.len(),
            config.producers.len()
        );
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn cache(&self, name: &str) -> Option<&CacheDescriptor> {
        self.caches.iter().find(|c| c.name == name)
    }

    pub fn producer(&self, name: &str) -> Option<&ProducerDescriptor> {
        self.producers.iter().find(|p| p.name == name)
    }

    /// Check names and references.
    pub fn validate(&self) -> Result<()> {
        let mut caches = HashSet::new();
        for cache in &self.caches {
            if cache.capacity == 0 {
                return Err(Error::config(format!("cache '{}' has zero capacity", cache.name)));
            }
            if !caches.insert(cache.name.as_str()) {
                return Err(Error::config(format!("duplicate cache '{}'", cache.name)));
            }
        }

        let mut producers = HashSet::new();
        for producer in &self.producers {
            if !producers.insert(producer.name.as_str()) {
                return Err(Error::config(format!("duplicate producer '{}'", producer.name)));
            }
            if !caches.contains(producer.cache.as_str()) {
                return Err(Error::config(format!(
                    "producer '{}' uses unknown cache '{}'",
                    producer.name, producer.cache
                )));
            }
        }

        for producer in &self.producers {
            for input in producer.kind.inputs() {
                if !producers.contains(input) {
                    return Err(Error::config(format!(
                        "producer '{}' reads unknown producer '{}'",
                        producer.name, input
                    )));
                }
            }
        }
        Ok(())
    }

    /// Producer indices ordered so every producer comes after its inputs.
    ///
    /// # Errors
    /// `Config` if the descriptors are invalid or the producers form a cycle.
    pub fn build_order(&self) -> Result<Vec<usize>> {
        self.validate()?;

        let index: HashMap<&str, usize> = self
            .producers
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let mut indegree = vec![0usize; self.producers.len()];
        let mut readers: Vec<Vec<usize>> = vec![Vec::new(); self.producers.len()];
        for (i, producer) in self.producers.iter().enumerate() {
            for input in producer.kind.inputs() {
                indegree[i] += 1;
                readers[index[input]].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..indegree.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.producers.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &reader in &readers[i] {
                indegree[reader] -= 1;
                if indegree[reader] == 0 {
                    ready.push_back(reader);
                }
            }
        }

        if order.len() != self.producers.len() {
            let cyclic: Vec<&str> = (0..indegree.len())
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.producers[i].name.as_str())
                .collect();
            return Err(Error::config(format!("producer cycle through {}", cyclic.join(", "))));
        }
        Ok(order)
    }

    /// Layout of every producer, composites inheriting their input's.
    pub fn layouts(&self) -> Result<HashMap<String, TileLayout>> {
        let mut layouts: HashMap<String, TileLayout> = HashMap::new();
        for i in self.build_order()? {
            let producer = &self.producers[i];
            let layout = match producer.kind.own_layout() {
                Some(layout) => layout,
                None => {
                    let input = producer.kind.inputs()[0];
                    layouts[input]
                }
            };
            layouts.insert(producer.name.clone(), layout);
        }
        Ok(layouts)
    }

    /// Slot size of a cache: explicit, or the largest tile stored in it.
    pub fn cache_tile_bytes(&self, cache: &CacheDescriptor, layouts: &HashMap<String, TileLayout>) -> Result<usize> {
        if let Some(bytes) = cache.tile_bytes {
            return Ok(bytes);
        }
        self.producers
            .iter()
            .filter(|p| p.cache == cache.name)
            .filter_map(|p| layouts.get(&p.name))
            .map(TileLayout::tile_bytes)
            .max()
            .ok_or_else(|| Error::config(format!("cache '{}' is unused and has no tile_bytes", cache.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERRAIN: &str = r#"{
        "caches": [
            { "name": "terrain", "capacity": 64 },
            { "name": "colors", "capacity": 32, "channels": 2 }
        ],
        "producers": [
            { "name": "ortho", "cache": "colors", "kind": "ortho",
              "layout": { "tile_size": 16, "border": 1 },
              "elevation": "elevation", "normals": "normals" },
            { "name": "elevation", "cache": "terrain", "kind": "elevation",
              "layout": { "tile_size": 16, "border": 2, "max_level": 10 },
              "params": { "seed": 99, "height_scale": 500.0 } },
            { "name": "normals", "cache": "terrain", "kind": "normal",
              "layout": { "tile_size": 16, "border": 1 },
              "elevation": "elevation", "world_size": 50000.0 },
            { "name": "detail", "cache": "terrain", "kind": "fallback",
              "delegate": "elevation", "max_level": 14 }
        ]
    }"#;

    #[test]
    fn test_parse_descriptors() {
        let config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        assert_eq!(config.caches.len(), 2);
        assert_eq!(config.cache("colors").unwrap().channels, 2);

        match &config.producer("elevation").unwrap().kind {
            ProducerKind::Elevation { layout, params, residuals } => {
                assert_eq!(layout.max_level, 10);
                assert_eq!(params.seed, 99);
                assert_eq!(params.octaves, 6);
                assert!(residuals.is_none());
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(config.producer("ortho").unwrap().kind.inputs(), vec!["elevation", "normals"]);
    }

    #[test]
    fn test_build_order_respects_inputs() {
        let config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        let order: Vec<&str> = config
            .build_order()
            .unwrap()
            .into_iter()
            .map(|i| config.producers[i].name.as_str())
            .collect();
        let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(pos("elevation") < pos("normals"));
        assert!(pos("normals") < pos("ortho"));
        assert!(pos("elevation") < pos("detail"));
    }

    #[test]
    fn test_layouts_and_slot_sizes() {
        let config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        let layouts = config.layouts().unwrap();
        assert_eq!(layouts["detail"], layouts["elevation"]);
        assert_eq!(layouts["normals"].components, 3);

        // Elevation needs 20x20 pixels x 2 components, normals 18x18 x 3; slots fit the larger
        let terrain = config.cache("terrain").unwrap();
        assert_eq!(config.cache_tile_bytes(terrain, &layouts).unwrap(), 18 * 18 * 3 * 4);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        if let ProducerKind::Elevation { .. } = config.producers[1].kind {
            config.producers[1].kind = ProducerKind::Fallback {
                delegate: "ortho".into(),
                floor_level: 0,
                max_level: 4,
            };
        }
        let err = config.build_order().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_references_rejected() {
        let mut config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        config.producers[2].cache = "missing".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = TerrainConfig::from_json_str(TERRAIN).unwrap();
        config.producers.push(config.producers[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrain.json");
        std::fs::write(&path, TERRAIN).unwrap();
        let config = TerrainConfig::load(&path).unwrap();
        assert_eq!(config.producers.len(), 4);

        let reparsed = TerrainConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(reparsed, config);
        assert!(matches!(TerrainConfig::load(dir.path().join("missing.json")), Err(Error::Io(_))));
    }
}
