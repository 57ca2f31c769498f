//! Sort modes and page windows for post and comment listings

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::models::{Comment, Post};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Requested ordering; unknown values fall back to `Newest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortMode {
    #[default]
    Newest,
    Oldest,
    MostLiked,
    LeastLiked,
}

impl SortMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "OLDEST" => SortMode::Oldest,
            "MOST_LIKED" => SortMode::MostLiked,
            "LEAST_LIKED" => SortMode::LeastLiked,
            _ => SortMode::Newest,
        }
    }
}

/// 1-based page window, already clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    size: i64,
}

impl PageRequest {
    /// Page is clamped to >= 1, size to [1, 100] with a default of 20
    pub fn new(page: Option<i64>, size: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One window of a listing plus totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_items: i64) -> Self {
        let total_items = total_items.max(0);
        Self {
            items,
            page: request.page(),
            size: request.size(),
            total_items,
            total_pages: (total_items + request.size() - 1) / request.size(),
        }
    }

    pub fn empty(request: PageRequest) -> Self {
        Self::new(Vec::new(), request, 0)
    }
}

/// Query shape for post listings. Each variant is a single sort column with
/// the primary key as tie-break in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOrder {
    CreatedDesc,
    CreatedAsc,
    LikesDesc,
    LikesAsc,
}

impl From<SortMode> for PostOrder {
    fn from(mode: SortMode) -> Self {
        match mode {
            SortMode::Newest => PostOrder::CreatedDesc,
            SortMode::Oldest => PostOrder::CreatedAsc,
            SortMode::MostLiked => PostOrder::LikesDesc,
            SortMode::LeastLiked => PostOrder::LikesAsc,
        }
    }
}

impl PostOrder {
    pub fn order_by_sql(&self) -> &'static str {
        match self {
            PostOrder::CreatedDesc => "created_at DESC, id DESC",
            PostOrder::CreatedAsc => "created_at ASC, id ASC",
            PostOrder::LikesDesc => "like_count DESC, id DESC",
            PostOrder::LikesAsc => "like_count ASC, id ASC",
        }
    }

    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        match self {
            PostOrder::CreatedDesc => (b.created_at, b.id).cmp(&(a.created_at, a.id)),
            PostOrder::CreatedAsc => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
            PostOrder::LikesDesc => (b.like_count, b.id).cmp(&(a.like_count, a.id)),
            PostOrder::LikesAsc => (a.like_count, a.id).cmp(&(b.like_count, b.id)),
        }
    }
}

/// Comments have no like concept: every sort mode collapses onto a time order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOrder {
    CreatedDesc,
    CreatedAsc,
}

impl From<SortMode> for CommentOrder {
    fn from(mode: SortMode) -> Self {
        match mode {
            SortMode::Newest => CommentOrder::CreatedDesc,
            SortMode::Oldest | SortMode::MostLiked | SortMode::LeastLiked => {
                CommentOrder::CreatedAsc
            }
        }
    }
}

impl CommentOrder {
    pub fn order_by_sql(&self) -> &'static str {
        match self {
            CommentOrder::CreatedDesc => "created_at DESC, id DESC",
            CommentOrder::CreatedAsc => "created_at ASC, id ASC",
        }
    }

    pub fn compare(&self, a: &Comment, b: &Comment) -> Ordering {
        match self {
            CommentOrder::CreatedDesc => (b.created_at, b.id).cmp(&(a.created_at, a.id)),
            CommentOrder::CreatedAsc => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
        }
    }
}
