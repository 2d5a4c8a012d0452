//! Discovery rules for the Lobi group/user API

use crate::discovery::models::{self, Bookmarks, Chat, Contacts, Group, Replies, User};
use crate::discovery::paths::{self, ResourceKind};
use crate::discovery::{Discovery, DiscoveryPolicy};
use crate::error::TransientParse;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Crawl policy for group archives
///
/// Groups are walked exhaustively: metadata, member pages, bookmarks, thread
/// pages and replies, plus profile, contacts and followers of every user
/// seen along the way. User contact and follower lists are archived but only
/// expanded further when `follow_users` is set, since that recursion reaches
/// the whole user base.
#[derive(Debug, Clone, Default)]
pub struct LobiPolicy {
    follow_users: bool,
}

impl LobiPolicy {
    pub fn new(follow_users: bool) -> Self {
        Self { follow_users }
    }

    pub fn follows_users(&self) -> bool {
        self.follow_users
    }
}

impl DiscoveryPolicy for LobiPolicy {
    fn classify(&self, body: &[u8], path: &str, status: u16) -> Result<Discovery, TransientParse> {
        let mut found = Discovery::completed(status);

        let Some(kind) = ResourceKind::of_path(path) else {
            debug!(path, "No discovery rule for path");
            return Ok(found);
        };

        match kind {
            ResourceKind::GroupInfo { .. } => {
                group_info(decode(body, path)?, &mut found);
            }
            ResourceKind::GroupMembers { .. } => {
                group_members(decode(body, path)?, &mut found);
            }
            ResourceKind::GroupBookmarks { group } => {
                group_bookmarks(&group, decode(body, path)?, &mut found);
            }
            ResourceKind::GroupThreads { group } => {
                group_threads(&group, decode(body, path)?, &mut found);
            }
            ResourceKind::GroupReplies { .. } => {
                let replies: Replies = decode(body, path)?;
                for chat in &replies.chats {
                    chat_authored(chat, &mut found);
                }
            }
            ResourceKind::UserInfo { .. } => {
                let user: User = decode(body, path)?;
                found.add_asset(user.icon);
                found.add_asset(user.cover);
            }
            ResourceKind::UserList { .. } if self.follow_users => {
                let contacts: Contacts = decode(body, path)?;
                for user in &contacts.users {
                    found.add_user(user);
                }
            }
            ResourceKind::UserList { .. } => {}
        }

        Ok(found)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8], path: &str) -> Result<T, TransientParse> {
    serde_json::from_slice(body).map_err(|e| TransientParse {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn group_info(group: Group, found: &mut Discovery) {
    found.add_asset(group.icon);
    found.add_asset(group.wallpaper);

    found.add_child(paths::group_bookmarks(&group.uid, paths::FIRST_PAGE));
    found.add_child(paths::group_members(&group.uid, paths::FIRST_PAGE));
    found.add_child(paths::group_threads(&group.uid, paths::FIRST_PAGE));
    if let Some(owner) = &group.owner {
        found.add_user(owner);
    }
    for subleader in &group.subleaders {
        found.add_user(subleader);
    }
}

fn group_members(group: Group, found: &mut Discovery) {
    if let Some(cursor) = models::next_cursor(group.members_next_cursor.as_deref()) {
        found.add_child(paths::group_members(&group.uid, cursor));
    }
    for member in &group.members {
        found.add_user(member);
    }
}

fn group_bookmarks(group: &str, bookmarks: Bookmarks, found: &mut Discovery) {
    if let Some(cursor) = models::next_cursor(bookmarks.next_cursor.as_deref()) {
        found.add_child(paths::group_bookmarks(group, cursor));
    }
    for chat in &bookmarks.data {
        chat_authored(chat, found);
    }
}

fn group_threads(group: &str, threads: Vec<Chat>, found: &mut Discovery) {
    if let Some(last) = threads.last() {
        if !last.is_group_creation() {
            found.add_child(paths::group_threads(group, &last.id));
        }
    }

    for chat in &threads {
        found.add_assets(chat.asset_urls());
        if let Some(replies) = chat.replies.as_ref().filter(|r| r.count > 0) {
            if chat.has_reply_listing() {
                found.add_child(paths::group_replies(group, &chat.id));
            }
            for reply in &replies.chats {
                chat_authored(reply, found);
            }
        }
        if let Some(user) = &chat.user {
            found.add_user(user);
        }
    }
}

/// Assets of a chat plus its author
fn chat_authored(chat: &Chat, found: &mut Discovery) {
    found.add_assets(chat.asset_urls());
    if let Some(user) = &chat.user {
        found.add_user(user);
    }
}
