//! Forum topic membership, shared by every source that only sees reply links.

use std::collections::HashSet;

/// Supergroup and channel ids carry a `-100` prefix in the client API.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Forum "General" topic; its messages are not replies to a topic root.
pub(crate) const GENERAL_TOPIC_ID: i64 = 1;

/// Map a client-API chat id to the bare id used by exports and MTProto peers.
pub fn bare_chat_id(chat_id: i64) -> i64 {
    if chat_id <= -CHANNEL_ID_OFFSET {
        -(chat_id + CHANNEL_ID_OFFSET)
    } else {
        chat_id.abs()
    }
}

/// A message seen only through its place in a reply chain.
pub(crate) trait Threaded {
    fn thread_id(&self) -> i64;
    fn reply_to(&self) -> Option<i64>;
    fn is_topic_root(&self) -> bool;
}

/// Select the messages of one forum topic, ordered by id.
///
/// A message belongs to topic T when it is T's root, replies to the root, or
/// replies to a message already in T. Parents always have smaller ids, so a
/// single pass in id order sees every parent before its replies.
/// `topic_id == 0` keeps the whole chat.
pub(crate) fn select_topic<T: Threaded>(mut messages: Vec<T>, topic_id: i64) -> Vec<T> {
    messages.sort_by_key(|m| m.thread_id());
    if topic_id == 0 {
        return messages;
    }

    let mut members = HashSet::new();
    messages.retain(|m| {
        let belongs = if topic_id == GENERAL_TOPIC_ID {
            match m.reply_to() {
                None => !m.is_topic_root(),
                Some(parent) => members.contains(&parent),
            }
        } else {
            m.thread_id() == topic_id
                || m
                    .reply_to()
                    .is_some_and(|parent| parent == topic_id || members.contains(&parent))
        };
        if belongs {
            members.insert(m.thread_id());
        }
        belongs
    });
    messages
}
