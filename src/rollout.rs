//! Sticky per-user rollout of the chat feature.
//!
//! A user's bucket is the first two bytes of the SHA-1 of their id, read
//! big-endian (the same value as the first four hex characters of the digest).
//! Buckets never change for a given id, so raising the percentage only ever
//! adds users.

use sha1::{Digest, Sha1};

use crate::config::RuntimeConfig;

pub fn rollout_bucket(user_id: &str) -> u16 {
    let mut hasher = Sha1::new();
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    u16::from_be_bytes([digest[0], digest[1]])
}

/// `percent >= 100` enables everyone, `0` nobody.
pub fn chat_enabled_for(user_id: &str, percent: u8) -> bool {
    if percent >= 100 {
        return true;
    }
    if percent == 0 {
        return false;
    }
    rollout_bucket(user_id) % 100 < u16::from(percent)
}

/// Feature flags as seen by one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChatFlags {
    pub chat_enabled_global: bool,
    pub chat_rollout_pct: u8,
    pub chat_enabled_for_user: bool,
}

impl ChatFlags {
    /// Anonymous users only get chat once rollout is complete.
    pub fn resolve(runtime: &RuntimeConfig, user_id: Option<&str>) -> Self {
        let pct = runtime.chat_rollout_pct.min(100);
        let for_user = runtime.chat_enabled
            && match user_id.map(str::trim).filter(|id| !id.is_empty()) {
                Some(id) => chat_enabled_for(id, pct),
                None => pct >= 100,
            };
        Self {
            chat_enabled_global: runtime.chat_enabled,
            chat_rollout_pct: pct,
            chat_enabled_for_user: for_user,
        }
    }
}
