//! Parent-first reads.
//!
//! A child listing is only read once its parent has been resolved through
//! the regular read path. When the parent cannot be resolved the child is
//! never fetched and the caller gets `ParentUnresolved` with the parent's
//! error attached.
//!
//! Forcing a child does not force its parent. Cascading is a separate flag,
//! taken from [`ReadOptions::cascade_force`] or, when unset, from
//! `OrchestratorConfig::cascade_force`.

use std::collections::HashSet;

use futures::future::{join, join_all};
use orgpulse_core::{EntityKind, FetchError, ReadError, ReadResult, Record};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheAsideController, Read};
use crate::threads::{parent_comment, MAX_THREAD_DEPTH};

/// Per-call read flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Skip the cache and refresh from the source.
    pub force: bool,
    /// Also force the parent of a forced child read.
    pub cascade_force: Option<bool>,
}

impl ReadOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            cascade_force: None,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade_force = Some(cascade);
        self
    }
}

/// Counts from a full page refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub posts: usize,
    pub employees: usize,
    pub comments: usize,
    /// Posts whose comments could not be refreshed.
    pub comment_failures: usize,
}

/// Reads entities and child listings in dependency order.
#[derive(Clone)]
pub struct HierarchicalFetcher {
    controller: CacheAsideController,
}

impl HierarchicalFetcher {
    pub fn new(controller: CacheAsideController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &CacheAsideController {
        &self.controller
    }

    fn parent_force(&self, opts: ReadOptions) -> bool {
        opts.force
            && opts
                .cascade_force
                .unwrap_or(self.controller.config().cascade_force)
    }

    async fn resolve_parent(
        &self,
        kind: EntityKind,
        key: &str,
        force: bool,
    ) -> ReadResult<Read<Record>> {
        self.controller
            .read_entity(kind, key, force)
            .await
            .map_err(|source| ReadError::ParentUnresolved {
                kind,
                key: key.to_string(),
                source: Box::new(source),
            })
    }

    /// Read any single entity. A summary is keyed by its page.
    pub async fn read(
        &self,
        kind: EntityKind,
        key: &str,
        opts: ReadOptions,
    ) -> ReadResult<Read<Record>> {
        match kind {
            EntityKind::AiSummary => self.read_summary(key, opts).await,
            _ => self.controller.read_entity(kind, key, opts.force).await,
        }
    }

    /// Read one child after its parent has been resolved.
    ///
    /// A child that belongs to another parent is reported as not found.
    pub async fn read_with_parent(
        &self,
        child_kind: EntityKind,
        child_key: &str,
        parent_kind: EntityKind,
        parent_key: &str,
        opts: ReadOptions,
    ) -> ReadResult<Read<Record>> {
        let foreign = |reason: String| ReadError::NotFound {
            kind: child_kind,
            key: child_key.to_string(),
            cause: FetchError::Invalid { reason },
        };
        if child_kind.parent() != Some(parent_kind) {
            return Err(foreign(format!("{} is not a child of {}", child_kind, parent_kind)));
        }

        self.resolve_parent(parent_kind, parent_key, self.parent_force(opts))
            .await?;
        let read = self.read(child_kind, child_key, opts).await?;
        let owner = match child_kind {
            EntityKind::AiSummary => Some(child_key),
            _ => read.value().parent_key.as_deref(),
        };
        if owner != Some(parent_key) {
            return Err(foreign(format!(
                "{} {} belongs to {} {}",
                child_kind,
                child_key,
                parent_kind,
                owner.unwrap_or("none")
            )));
        }
        Ok(read)
    }

    /// Read the `child_kind` children of `parent_key`.
    pub async fn read_children(
        &self,
        child_kind: EntityKind,
        parent_key: &str,
        opts: ReadOptions,
    ) -> ReadResult<Read<Vec<Record>>> {
        let Some(parent_kind) = child_kind.parent() else {
            return Err(ReadError::NotFound {
                kind: child_kind,
                key: parent_key.to_string(),
                cause: FetchError::Invalid {
                    reason: format!("{} has no parent kind", child_kind),
                },
            });
        };
        let parent = self
            .resolve_parent(parent_kind, parent_key, self.parent_force(opts))
            .await?;
        self.controller
            .read_children(child_kind, parent.value(), opts.force)
            .await
    }

    pub async fn read_posts(&self, page_key: &str, opts: ReadOptions) -> ReadResult<Read<Vec<Record>>> {
        self.read_children(EntityKind::Post, page_key, opts).await
    }

    pub async fn read_employees(
        &self,
        page_key: &str,
        opts: ReadOptions,
    ) -> ReadResult<Read<Vec<Record>>> {
        self.read_children(EntityKind::Employee, page_key, opts).await
    }

    pub async fn read_comments(
        &self,
        post_key: &str,
        opts: ReadOptions,
    ) -> ReadResult<Read<Vec<Record>>> {
        self.read_children(EntityKind::Comment, post_key, opts).await
    }

    /// Read the summary of a page.
    ///
    /// The page is read normally and never forced from here, even with
    /// cascading on: a summary is built from whatever page and post data
    /// currently exists.
    pub async fn read_summary(&self, page_key: &str, opts: ReadOptions) -> ReadResult<Read<Record>> {
        let page = self
            .resolve_parent(EntityKind::Page, page_key, false)
            .await?;
        self.controller.read_summary(page.value(), opts.force).await
    }

    /// Ancestors of a comment, starting with the comment itself and ending
    /// at its thread root. Only stored comments are consulted.
    pub async fn reply_chain(&self, comment_key: &str) -> ReadResult<Vec<Record>> {
        let store = self.controller.store();
        let Some(mut current) = store.get_by_key(EntityKind::Comment, comment_key).await? else {
            return Err(ReadError::NotFound {
                kind: EntityKind::Comment,
                key: comment_key.to_string(),
                cause: FetchError::NotFound {
                    kind: EntityKind::Comment,
                    key: comment_key.to_string(),
                },
            });
        };

        let mut seen = HashSet::from([current.key.clone()]);
        let mut chain = Vec::new();
        loop {
            let parent = parent_comment(&current).map(str::to_string);
            chain.push(current);
            let Some(parent) = parent else {
                break;
            };
            if chain.len() > MAX_THREAD_DEPTH || !seen.insert(parent.clone()) {
                warn!(comment = %comment_key, at = %parent, "Reply chain truncated");
                break;
            }
            match store.get_by_key(EntityKind::Comment, &parent).await? {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(chain)
    }

    /// Force-refresh a page, its posts and employees, then every post's
    /// comments.
    ///
    /// Page, post and employee failures abort the refresh. Comment failures
    /// are logged and counted.
    pub async fn refresh_page_tree(&self, page_key: &str) -> ReadResult<RefreshReport> {
        let page = self
            .controller
            .read_entity(EntityKind::Page, page_key, true)
            .await?;

        let (posts, employees) = join(
            self.controller
                .read_children(EntityKind::Post, page.value(), true),
            self.controller
                .read_children(EntityKind::Employee, page.value(), true),
        )
        .await;
        let posts = posts?;
        let employees = employees?;

        let comment_reads = posts.value().iter().map(|post| async move {
            let result = self
                .controller
                .read_children(EntityKind::Comment, post, true)
                .await;
            (post.key.as_str(), result)
        });

        let mut report = RefreshReport {
            posts: posts.value().len(),
            employees: employees.value().len(),
            ..RefreshReport::default()
        };
        for (post_key, result) in join_all(comment_reads).await {
            match result {
                Ok(comments) => report.comments += comments.value().len(),
                Err(e) => {
                    warn!(page = %page_key, post = %post_key, error = %e, "Comment refresh failed");
                    report.comment_failures += 1;
                }
            }
        }

        info!(
            page = %page_key,
            posts = report.posts,
            employees = report.employees,
            comments = report.comments,
            comment_failures = report.comment_failures,
            "Page tree refreshed"
        );
        Ok(report)
    }
}
