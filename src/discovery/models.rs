//! Response bodies of the group/user API
//!
//! Only the fields discovery reads are modelled; everything else in the
//! payload is ignored. Collections the API omits or sends as `null` decode as
//! empty.

use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub uid: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub wallpaper: Option<String>,
    #[serde(default)]
    pub owner: Option<User>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subleaders: Vec<User>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub members: Vec<User>,
    #[serde(default)]
    pub members_count: Option<i64>,
    #[serde(default)]
    pub members_next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub raw_url: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub replies: Option<Replies>,
}

impl Chat {
    /// Chat that opens a group's history; threads paging stops here
    pub fn is_group_creation(&self) -> bool {
        self.kind.as_deref() == Some("system.created")
    }

    /// Only user-authored chats have a fetchable replies listing
    pub fn has_reply_listing(&self) -> bool {
        matches!(self.kind.as_deref(), Some("normal") | Some("shout"))
    }

    /// Both renditions of every attached asset
    pub fn asset_urls(&self) -> impl Iterator<Item = String> + '_ {
        self.assets
            .iter()
            .flat_map(|a| [a.url.clone(), a.raw_url.clone()])
            .flatten()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replies {
    #[serde(default)]
    pub count: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chats: Vec<Chat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bookmarks {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<Chat>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contacts {
    #[serde(default)]
    pub visibility: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<User>,
}

/// Next page cursor, or `None` when the listing is exhausted
///
/// The API signals the last page with a missing, empty, `"0"` or `"-1"`
/// cursor.
pub fn next_cursor(cursor: Option<&str>) -> Option<&str> {
    match cursor {
        None | Some("") | Some("0") | Some("-1") => None,
        Some(c) => Some(c),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
