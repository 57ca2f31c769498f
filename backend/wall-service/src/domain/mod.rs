pub mod models;
pub mod pagination;
pub mod visibility;

pub use models::{
    normalize_domain, school_domain_from_email, Comment, ContentDraft, Counter, Delta, FeedScope,
    Like, NewComment, NewPost, Post, UserProfile,
};
pub use pagination::{CommentOrder, Page, PageRequest, PostOrder, SortMode};
pub use visibility::{check_access, Access, DenyReason, ListingFilter};
