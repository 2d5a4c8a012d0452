//! Turning fetched resources into more work
//!
//! A [`DiscoveryPolicy`] looks at one successfully fetched body and reports
//! what it links to: child jobs with their priority, and asset urls. The
//! orchestrator runs it on the blocking pool, one call per job, so a policy
//! must be pure with respect to its inputs.
//!
//! ```text
//! (body, path, 200) ──▶ classify ──┬─▶ Ok(Discovery { children, assets, code })
//!                                  └─▶ Err(TransientParse)  → job requeued
//! ```

pub mod lobi;
pub mod models;
pub mod paths;

pub use lobi::LobiPolicy;
pub use paths::ResourceKind;

use crate::error::TransientParse;
use models::User;

/// Everything one fetched resource points at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Child jobs as `(path, cost)`
    pub children: Vec<(String, i32)>,

    /// Asset urls, never empty strings
    pub assets: Vec<String>,

    /// Result code to record on the completed job
    pub code: i32,
}

impl Discovery {
    /// A completed outcome with nothing discovered yet
    pub fn completed(status: u16) -> Self {
        Self {
            children: Vec::new(),
            assets: Vec::new(),
            code: i32::from(status),
        }
    }

    pub fn add_child(&mut self, child: (String, i32)) {
        self.children.push(child);
    }

    pub fn add_asset(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.assets.push(url);
        }
    }

    pub fn add_assets<I: IntoIterator<Item = String>>(&mut self, urls: I) {
        self.assets
            .extend(urls.into_iter().filter(|u| !u.is_empty()));
    }

    /// Queue a user's profile, contacts and followers
    pub fn add_user(&mut self, user: &User) {
        self.children.extend(paths::user_triple(&user.uid));
    }
}

/// Classifies fetched bodies
pub trait DiscoveryPolicy: Send + Sync {
    /// Inspect one HTTP 200 body fetched from `path`
    ///
    /// `Err` means the body could not be interpreted right now; nothing from
    /// this attempt is committed and the job is fetched again later.
    fn classify(&self, body: &[u8], path: &str, status: u16) -> Result<Discovery, TransientParse>;
}
