//! Inbox derivation: fold a flat message log into one summary row per peer.
//!
//! Conversations are never stored. Every call recomputes them from the
//! viewer's slice of the message log, so this is a plain in-process
//! partition-and-reduce that works identically over rows fetched from
//! SQLite or built by hand in a test.

use std::collections::HashMap;

use crate::models::MessageRow;

/// One derived row: the peer, their latest message in either direction,
/// and how many of their messages the viewer has not read yet.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub peer_id: String,
    pub last_message: MessageRow,
    pub unread_count: u64,
}

struct Partition {
    last_idx: usize,
    unread_count: u64,
}

/// Derive the viewer's inbox from their messages.
///
/// `messages` is every message where the viewer is sender or recipient, in
/// insertion order. Timestamps are the fixed-width RFC 3339 strings written
/// by this crate, so string comparison is chronological comparison; equal
/// timestamps resolve to the later-inserted message.
///
/// Self-messages (viewer on both ends) are skipped; the viewer never shows
/// up as their own peer. Messages the viewer sent never count as unread.
pub fn derive(viewer: &str, messages: &[MessageRow]) -> Vec<ConversationSummary> {
    let mut partitions: HashMap<&str, Partition> = HashMap::new();

    for (idx, message) in messages.iter().enumerate() {
        let counterpart = if message.sender_id == viewer {
            message.recipient_id.as_str()
        } else {
            message.sender_id.as_str()
        };
        if counterpart == viewer {
            continue;
        }

        let unread = message.recipient_id == viewer && !message.read;

        match partitions.get_mut(counterpart) {
            Some(partition) => {
                if message.created_at >= messages[partition.last_idx].created_at {
                    partition.last_idx = idx;
                }
                if unread {
                    partition.unread_count += 1;
                }
            }
            None => {
                partitions.insert(
                    counterpart,
                    Partition {
                        last_idx: idx,
                        unread_count: unread as u64,
                    },
                );
            }
        }
    }

    let mut ordered: Vec<(&str, Partition)> = partitions.into_iter().collect();

    // Most recent conversation first; equal timestamps fall back to
    // insertion order of the last message so the output is deterministic.
    ordered.sort_by(|(_, a), (_, b)| {
        messages[b.last_idx]
            .created_at
            .cmp(&messages[a.last_idx].created_at)
            .then_with(|| b.last_idx.cmp(&a.last_idx))
    });

    ordered
        .into_iter()
        .map(|(peer_id, partition)| ConversationSummary {
            peer_id: peer_id.to_string(),
            last_message: messages[partition.last_idx].clone(),
            unread_count: partition.unread_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, sender: &str, recipient: &str, read: bool, at: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            content: format!("content-{id}"),
            read,
            created_at: at.to_string(),
        }
    }

    #[test]
    fn empty_log_derives_no_rows() {
        assert!(derive("v", &[]).is_empty());
    }

    #[test]
    fn one_row_per_peer_regardless_of_direction() {
        let log = [
            msg("1", "v", "a", false, "2026-01-01T10:00:00.000000Z"),
            msg("2", "a", "v", false, "2026-01-01T10:01:00.000000Z"),
            msg("3", "b", "v", false, "2026-01-01T10:02:00.000000Z"),
            msg("4", "v", "a", false, "2026-01-01T10:03:00.000000Z"),
        ];

        let rows = derive("v", &log);
        assert_eq!(rows.len(), 2);
        let peers: Vec<&str> = rows.iter().map(|r| r.peer_id.as_str()).collect();
        assert!(peers.contains(&"a"));
        assert!(peers.contains(&"b"));
    }

    #[test]
    fn last_message_is_most_recent_in_either_direction() {
        let log = [
            msg("1", "a", "v", true, "2026-01-01T10:00:00.000000Z"),
            msg("2", "v", "a", false, "2026-01-01T10:05:00.000000Z"),
        ];

        let rows = derive("v", &log);
        assert_eq!(rows[0].last_message.id, "2");
        assert_eq!(rows[0].last_message.sender_id, "v");
    }

    #[test]
    fn equal_timestamps_resolve_to_last_inserted() {
        let at = "2026-01-01T10:00:00.000000Z";
        let log = [
            msg("1", "a", "v", false, at),
            msg("2", "a", "v", false, at),
            msg("3", "a", "v", false, at),
        ];

        let rows = derive("v", &log);
        assert_eq!(rows[0].last_message.id, "3");
    }

    #[test]
    fn unread_counts_only_messages_addressed_to_viewer() {
        let log = [
            msg("1", "a", "v", false, "2026-01-01T10:00:00.000000Z"),
            msg("2", "a", "v", false, "2026-01-01T10:01:00.000000Z"),
            msg("3", "a", "v", true, "2026-01-01T10:02:00.000000Z"),
            // Sent by the viewer, still unread on a's side; not v's problem.
            msg("4", "v", "a", false, "2026-01-01T10:03:00.000000Z"),
        ];

        let rows = derive("v", &log);
        assert_eq!(rows[0].unread_count, 2);
    }

    #[test]
    fn peer_with_zero_unread_still_appears() {
        let log = [msg("1", "a", "v", true, "2026-01-01T10:00:00.000000Z")];

        let rows = derive("v", &log);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peer_id, "a");
        assert_eq!(rows[0].unread_count, 0);
    }

    #[test]
    fn rows_sorted_by_last_message_recency_descending() {
        let log = [
            msg("1", "a", "v", false, "2026-01-01T10:00:10.000000Z"),
            msg("2", "b", "v", false, "2026-01-01T10:00:20.000000Z"),
            msg("3", "c", "v", false, "2026-01-01T10:00:15.000000Z"),
        ];

        let rows = derive("v", &log);
        let order: Vec<&str> = rows.iter().map(|r| r.peer_id.as_str()).collect();
        assert_eq!(order, ["b", "c", "a"]);
    }

    #[test]
    fn viewer_never_appears_as_own_peer() {
        let log = [
            msg("1", "v", "v", false, "2026-01-01T10:00:00.000000Z"),
            msg("2", "a", "v", false, "2026-01-01T10:01:00.000000Z"),
        ];

        let rows = derive("v", &log);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].peer_id, "a");
    }

    #[test]
    fn content_is_returned_as_stored() {
        // The deriver hands back whatever string is persisted; decryption is
        // the caller's concern.
        let log = [msg("1", "a", "v", false, "2026-01-01T10:00:00.000000Z")];
        let rows = derive("v", &log);
        assert_eq!(rows[0].last_message.content, "content-1");
    }
}
