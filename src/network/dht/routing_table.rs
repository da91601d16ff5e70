use log::{debug, warn};
use std::collections::VecDeque;

use super::contact::Contact;
use super::node_id::NodeId;

const K: usize = 20; // K-bucket size
const BUCKET_COUNT: usize = 160;

#[derive(Clone, Default)]
struct KBucket {
    contacts: VecDeque<Contact>,
}

impl KBucket {
    /// Insert or refresh a contact. Refreshed contacts move to the back, so
    /// the front holds the least recently seen.
    fn add_contact(&mut self, contact: Contact) -> bool {
        if let Some(pos) = self
            .contacts
            .iter()
            .position(|c| c.peer_id == contact.peer_id)
        {
            if let Some(mut existing) = self.contacts.remove(pos) {
                existing.addr = contact.addr;
                self.contacts.push_back(existing);
            }
            return true;
        }

        if self.contacts.len() < K {
            self.contacts.push_back(contact);
            return true;
        }

        // Full bucket: keep the long-lived contacts, liveness is
        // re-checked on refresh.
        warn!("K-bucket full, rejecting contact {}", contact.peer_id);
        false
    }

    fn remove_contact(&mut self, peer_id: &str) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| c.peer_id == peer_id) {
            self.contacts.remove(pos);
            return true;
        }
        false
    }
}

/// K-bucket contact table for the local peer.
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(local_peer_id: &str) -> Self {
        Self {
            local_id: NodeId::from_peer_id(local_peer_id),
            buckets: vec![KBucket::default(); BUCKET_COUNT],
        }
    }

    /// Add or refresh a contact. The local peer is never stored.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        match self.local_id.bucket_index(&contact.node_id) {
            Some(bucket_idx) => {
                debug!(
                    "Adding contact {} ({}) to bucket {}",
                    contact.peer_id, contact.addr, bucket_idx
                );
                self.buckets[bucket_idx].add_contact(contact)
            }
            None => false,
        }
    }

    pub fn remove_contact(&mut self, peer_id: &str) -> bool {
        let node_id = NodeId::from_peer_id(peer_id);
        match self.local_id.bucket_index(&node_id) {
            Some(bucket_idx) => self.buckets[bucket_idx].remove_contact(peer_id),
            None => false,
        }
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn all_contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.contacts.iter().cloned())
            .collect()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.contacts.iter().map(|c| c.peer_id.clone()))
            .collect()
    }
}
