//! The persistent message cache.
//!
//! Three keys reproduce the engine's on-disk contract:
//!
//! - `messages`: JSON object mapping channel id (stringified integer) to an
//!   array of recent messages.
//! - `messages-version`: schema version tag.  On mismatch or absence the
//!   cache is discarded wholesale; stale-schema data is never served.
//! - `last-selected-channel`: scalar channel id used for bootstrap
//!   auto-selection.
//!
//! The mapping and the version tag are always written in one transaction, so
//! a crash between the two can never leave a mismatched pair.  Eviction of
//! entries older than the retention window happens at load time only; writes
//! are append-only until the next reload.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use parley_shared::constants::{CACHE_RETENTION, CACHE_SCHEMA_VERSION};
use parley_shared::{ChannelId, Message};

use crate::database::Database;
use crate::error::Result;

const KEY_MESSAGES: &str = "messages";
const KEY_VERSION: &str = "messages-version";
const KEY_LAST_CHANNEL: &str = "last-selected-channel";

impl Database {
    /// Load the cached message map.
    ///
    /// Never fails: a missing key, a version mismatch, or a parse error all
    /// degrade to an empty map (cold start).  Messages older than the
    /// retention window are filtered out here, and channels left empty by
    /// the filter are dropped.
    pub fn load_message_cache(&self) -> HashMap<ChannelId, Vec<Message>> {
        match self.try_load_message_cache() {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable message cache, starting cold");
                HashMap::new()
            }
        }
    }

    fn try_load_message_cache(&self) -> Result<HashMap<ChannelId, Vec<Message>>> {
        match self.get_kv(KEY_VERSION)? {
            Some(v) if v == CACHE_SCHEMA_VERSION => {}
            other => {
                tracing::debug!(found = ?other, expected = CACHE_SCHEMA_VERSION,
                    "cache version mismatch, discarding");
                return Ok(HashMap::new());
            }
        }

        let raw = match self.get_kv(KEY_MESSAGES)? {
            Some(raw) => raw,
            None => return Ok(HashMap::new()),
        };

        let parsed: BTreeMap<String, Vec<Message>> = serde_json::from_str(&raw)?;
        let cutoff = Utc::now() - CACHE_RETENTION;

        let mut map = HashMap::new();
        for (key, messages) in parsed {
            let Ok(id) = key.parse::<i64>() else {
                tracing::warn!(key = %key, "skipping non-numeric channel key in cache");
                continue;
            };
            let recent: Vec<Message> = messages
                .into_iter()
                .filter(|m| m.created_at >= cutoff)
                .collect();
            if !recent.is_empty() {
                map.insert(ChannelId(id), recent);
            }
        }
        Ok(map)
    }

    /// Persist the entire message map together with the schema version tag.
    pub fn save_message_cache(&mut self, map: &HashMap<ChannelId, Vec<Message>>) -> Result<()> {
        // String keys: JSON objects cannot have integer keys, and the
        // BTreeMap keeps output deterministic.
        let keyed: BTreeMap<String, &Vec<Message>> = map
            .iter()
            .map(|(id, messages)| (id.0.to_string(), messages))
            .collect();
        let json = serde_json::to_string(&keyed)?;

        self.set_kv_many(&[(KEY_MESSAGES, &json), (KEY_VERSION, CACHE_SCHEMA_VERSION)])
    }

    /// The channel the user had selected when the app last ran.
    pub fn last_selected_channel(&self) -> Option<ChannelId> {
        match self.get_kv(KEY_LAST_CHANNEL) {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).map(ChannelId),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read last selected channel");
                None
            }
        }
    }

    /// Remember the selected channel for the next session.
    pub fn set_last_selected_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.set_kv(KEY_LAST_CHANNEL, &channel_id.0.to_string())
    }
}
