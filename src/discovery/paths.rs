//! Request paths and their priority classes
//!
//! Every job path is built here and every fetched path is recognised here, so
//! the cost table and the URL shapes cannot drift apart.

use regex::Regex;
use std::sync::LazyLock;

/// Group metadata: owner, subleaders, icon, wallpaper
pub const COST_GROUP_INFO: i32 = 7;
/// One page of group members
pub const COST_GROUP_MEMBERS: i32 = 6;
/// One page of bookmarked chats
pub const COST_GROUP_BOOKMARKS: i32 = 5;
/// One page of chat threads
pub const COST_GROUP_THREADS: i32 = 4;
/// Replies under one chat
pub const COST_GROUP_REPLIES: i32 = 3;
/// A user's contact or follower list
pub const COST_USER_LIST: i32 = 2;
/// User profile
pub const COST_USER_INFO: i32 = 1;

/// Cursor value that starts a paginated listing
pub const FIRST_PAGE: &str = "0";

static GROUP_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/group/([0-9a-f]{40})\?fields").expect("Invalid group info regex")
});

static GROUP_MEMBERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/group/([0-9a-f]{40})\?members_cursor").expect("Invalid group members regex")
});

static GROUP_BOOKMARKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/group/([0-9a-f]{40})/bookmarks").expect("Invalid group bookmarks regex")
});

static GROUP_THREADS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/group/([0-9a-f]{40})/chats\?").expect("Invalid group threads regex")
});

static GROUP_REPLIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/group/([0-9a-f]{40})/chats/replies").expect("Invalid group replies regex")
});

static USER_INFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/user/([0-9a-f]{40})\?fields").expect("Invalid user info regex")
});

static USER_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^api/user/([0-9a-f]{40})/").expect("Invalid user list regex")
});

/// Resource a request path points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    GroupInfo { group: String },
    GroupMembers { group: String },
    GroupBookmarks { group: String },
    GroupThreads { group: String },
    GroupReplies { group: String },
    UserInfo { user: String },
    /// Contacts or followers; both decode the same way
    UserList { user: String },
}

impl ResourceKind {
    /// Recognise a job path; `None` for shapes this crawler never builds
    pub fn of_path(path: &str) -> Option<Self> {
        if let Some(group) = capture(&GROUP_INFO, path) {
            Some(ResourceKind::GroupInfo { group })
        } else if let Some(group) = capture(&GROUP_MEMBERS, path) {
            Some(ResourceKind::GroupMembers { group })
        } else if let Some(group) = capture(&GROUP_BOOKMARKS, path) {
            Some(ResourceKind::GroupBookmarks { group })
        } else if let Some(group) = capture(&GROUP_THREADS, path) {
            Some(ResourceKind::GroupThreads { group })
        } else if let Some(group) = capture(&GROUP_REPLIES, path) {
            Some(ResourceKind::GroupReplies { group })
        } else if let Some(user) = capture(&USER_INFO, path) {
            Some(ResourceKind::UserInfo { user })
        } else {
            capture(&USER_LIST, path).map(|user| ResourceKind::UserList { user })
        }
    }
}

fn capture(re: &Regex, path: &str) -> Option<String> {
    re.captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn group_info(group: &str) -> (String, i32) {
    (
        format!(
            "api/group/{}?fields=game_info,group_bookmark_info,subleaders,category,join_applications_count&count=1&members_count=0",
            group
        ),
        COST_GROUP_INFO,
    )
}

pub fn group_members(group: &str, cursor: &str) -> (String, i32) {
    (
        format!(
            "api/group/{}?members_cursor={}&count=1&members_count=100",
            group, cursor
        ),
        COST_GROUP_MEMBERS,
    )
}

pub fn group_bookmarks(group: &str, cursor: &str) -> (String, i32) {
    (
        format!("api/group/{}/bookmarks?cursor={}&count=100", group, cursor),
        COST_GROUP_BOOKMARKS,
    )
}

/// Thread page older than `chat`; [`FIRST_PAGE`] for the newest page
pub fn group_threads(group: &str, chat: &str) -> (String, i32) {
    (
        format!("api/group/{}/chats?older_than={}&count=30", group, chat),
        COST_GROUP_THREADS,
    )
}

pub fn group_replies(group: &str, chat: &str) -> (String, i32) {
    (
        format!("api/group/{}/chats/replies?to={}", group, chat),
        COST_GROUP_REPLIES,
    )
}

pub fn user_info(user: &str) -> (String, i32) {
    (format!("api/user/{}?fields=premium", user), COST_USER_INFO)
}

pub fn user_contacts(user: &str) -> (String, i32) {
    (format!("api/user/{}/contacts", user), COST_USER_LIST)
}

pub fn user_followers(user: &str) -> (String, i32) {
    (format!("api/user/{}/followers", user), COST_USER_LIST)
}

/// Profile, contacts and followers of one user
pub fn user_triple(user: &str) -> [(String, i32); 3] {
    [user_info(user), user_contacts(user), user_followers(user)]
}
