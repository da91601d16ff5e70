use log::{debug, info};
use std::collections::{HashMap, HashSet};
use tokio::sync::{broadcast, RwLock};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(String),
    Left(String),
}

/// Keys added and removed by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Known peers, keyed by peer ID. The value is the peer's connect string,
/// empty when the peer is only known through the routing table.
pub struct MembershipMap {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipMap {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Insert or overwrite the entry for `peer_id`. Returns the previous value.
    pub async fn upsert(&self, peer_id: &str, connect_string: &str) -> Option<String> {
        let previous = self
            .entries
            .write()
            .await
            .insert(peer_id.to_string(), connect_string.to_string());

        match &previous {
            Some(old) if old != connect_string => {
                debug!("Updated peer {}: {:?} -> {:?}", peer_id, old, connect_string)
            }
            Some(_) => {}
            None => info!("Added peer {} ({:?})", peer_id, connect_string),
        }
        previous
    }

    /// Connect strings of every entry except `peer_id`. Entries with no
    /// known connect string are left out.
    pub async fn connect_strings_except(&self, peer_id: &str) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(id, addr)| id.as_str() != peer_id && !addr.is_empty())
            .map(|(_, addr)| addr.clone())
            .collect()
    }

    /// Make the key set equal `visible`. New keys get an empty connect
    /// string, existing values are kept. The whole diff runs under one
    /// write lock.
    pub async fn reconcile(&self, visible: &HashSet<String>) -> MembershipDelta {
        let mut delta = MembershipDelta::default();

        {
            let mut entries = self.entries.write().await;

            for peer_id in visible {
                if !entries.contains_key(peer_id) {
                    entries.insert(peer_id.clone(), String::new());
                    delta.joined.push(peer_id.clone());
                }
            }

            entries.retain(|peer_id, _| {
                let keep = visible.contains(peer_id);
                if !keep {
                    delta.left.push(peer_id.clone());
                }
                keep
            });
        }

        for peer_id in &delta.joined {
            info!("Peer joined: {}", peer_id);
            let _ = self.events.send(MembershipEvent::Joined(peer_id.clone()));
        }
        for peer_id in &delta.left {
            info!("Peer left: {}", peer_id);
            let _ = self.events.send(MembershipEvent::Left(peer_id.clone()));
        }

        delta
    }

    pub async fn get(&self, peer_id: &str) -> Option<String> {
        self.entries.read().await.get(peer_id).cloned()
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.entries.read().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.entries.read().await.clone()
    }
}

impl Default for MembershipMap {
    fn default() -> Self {
        Self::new()
    }
}
