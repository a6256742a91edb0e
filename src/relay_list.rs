// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2024 Rust Nostr Developers
// Distributed under the MIT software license

//! Per-pubkey NIP-65-style relay lists, as derived from kind `10002` events.

use nostr::nips::nip65::RelayMetadata;
use nostr::{Event, Kind, RelayUrl, TagStandard};

/// A pubkey's declared read/write relays, derived from their relay-list
/// event. Unmarked tags (no `read`/`write` marker) are read *and* write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayList {
    read: Vec<RelayUrl>,
    write: Vec<RelayUrl>,
}

impl RelayList {
    /// Parse a kind `10002` event into a [`RelayList`].
    ///
    /// URLs are normalized (via [`RelayUrl::parse`]) before storage; tags
    /// that fail to parse as a relay URL are skipped rather than rejecting
    /// the whole event.
    pub fn from_event(event: &Event) -> Self {
        let mut list = Self::default();
        if event.kind != Kind::RelayList {
            return list;
        }

        for tag in event.tags.iter() {
            if let Some(TagStandard::RelayMetadata { relay_url, metadata }) =
                tag.as_standardized()
            {
                let Ok(relay_url) = RelayUrl::parse(relay_url.as_str()) else {
                    continue;
                };
                match metadata {
                    None => {
                        list.read.push(relay_url.clone());
                        list.write.push(relay_url);
                    }
                    Some(RelayMetadata::Read) => list.read.push(relay_url),
                    Some(RelayMetadata::Write) => list.write.push(relay_url),
                }
            }
        }

        list.read.sort_unstable();
        list.read.dedup();
        list.write.sort_unstable();
        list.write.dedup();
        list
    }

    /// Relays this pubkey reads from.
    pub fn read(&self) -> &[RelayUrl] {
        &self.read
    }

    /// Relays this pubkey writes to (where their own events are published).
    pub fn write(&self) -> &[RelayUrl] {
        &self.write
    }

    /// True if neither list has any entries.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use nostr::{EventBuilder, Keys, Tag, Url};

    use super::*;

    #[test]
    fn test_unmarked_relay_is_read_and_write() {
        let keys = Keys::generate();
        let tag = Tag::relay_metadata(Url::parse("wss://relay.example.com").unwrap(), None);
        let event = EventBuilder::new(Kind::RelayList, "", &[tag])
            .to_event(&keys)
            .unwrap();

        let list = RelayList::from_event(&event);
        assert_eq!(list.read().len(), 1);
        assert_eq!(list.write().len(), 1);
    }

    #[test]
    fn test_marked_relay_is_one_sided() {
        let keys = Keys::generate();
        let tag = Tag::relay_metadata(
            Url::parse("wss://write-only.example.com").unwrap(),
            Some(RelayMetadata::Write),
        );
        let event = EventBuilder::new(Kind::RelayList, "", &[tag])
            .to_event(&keys)
            .unwrap();

        let list = RelayList::from_event(&event);
        assert!(list.read().is_empty());
        assert_eq!(list.write().len(), 1);
    }
}
