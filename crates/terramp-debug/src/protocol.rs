//! Debug protocol - JSON command/response definitions

use serde::{Deserialize, Serialize};

/// Commands sent by a debug client, one JSON object per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum DebugCommand {
    /// Ping (health check)
    Ping,
    /// List registered producers
    ListProducers,
    /// List registered caches
    ListCaches,
    /// Get counters of one cache
    GetCacheStats { cache: String },
    /// Get the state of one tile of a producer
    GetTileInfo {
        producer: String,
        level: u8,
        tx: u32,
        ty: u32,
    },
    /// Invalidate a tile and everything derived from it
    InvalidateTile {
        producer: String,
        level: u8,
        tx: u32,
        ty: u32,
    },
    /// Invalidate every tile of a producer
    InvalidateProducer { producer: String },
}

/// Responses from debug server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DebugResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Pong { message: String },
    Producers { producers: Vec<ProducerInfo> },
    Caches { caches: Vec<CacheInfo> },
    CacheStats {
        cache: String,
        hits: u64,
        misses: u64,
        evictions: u64,
        capacity_failures: u64,
        resident: usize,
        in_use: usize,
        free_slots: usize,
        capacity: usize,
        hit_rate: f32,
    },
    TileInfo {
        producer: String,
        level: u8,
        tx: u32,
        ty: u32,
        resident: bool,
        state: Option<String>,
        use_count: Option<usize>,
        version: Option<u64>,
        runs: Option<u32>,
    },
    Invalidated { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub name: String,
    pub tile_size: u32,
    pub border: u32,
    pub cache: Option<String>,
    pub tiles_in_use: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub name: String,
    pub capacity: usize,
    pub tile_bytes: usize,
    pub resident: usize,
}

impl DebugResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: DebugCommand =
            serde_json::from_str(r#"{"cmd":"GetCacheStats","params":{"cache":"elevation"}}"#).unwrap();
        assert_eq!(
            cmd,
            DebugCommand::GetCacheStats {
                cache: "elevation".into()
            }
        );

        let ping: DebugCommand = serde_json::from_str(r#"{"cmd":"Ping"}"#).unwrap();
        assert_eq!(ping, DebugCommand::Ping);
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&DebugResponse::pong()).unwrap();
        assert_eq!(json, r#"{"status":"ok","data":{"message":"pong"}}"#);

        let json = serde_json::to_string(&DebugResponse::error("no such cache")).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"no such cache"}"#);

        let json = serde_json::to_string(&DebugResponse::ok(ResponseData::Invalidated { count: 3 })).unwrap();
        assert_eq!(json, r#"{"status":"ok","data":{"count":3}}"#);
    }
}
