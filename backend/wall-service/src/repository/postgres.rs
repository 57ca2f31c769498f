//! PostgreSQL implementations of the store collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db_pool::acquire_with_metrics;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    CasOutcome, CodePurpose, IdentityProvider, PostFilter, StoreResult, VerificationCode,
    VerificationCodeRepository, WallStore, WallTx, Window,
};
use crate::domain::{
    school_domain_from_email, Comment, CommentOrder, FeedScope, Like, NewComment, NewPost, Post,
    PostOrder, UserProfile,
};
use crate::error::StoreError;
use crate::SERVICE_NAME;

const POST_COLUMNS: &str = "id, author_id, content, scope, school_domain, like_count, \
                            comment_count, hidden, created_at, updated_at, version";

const COMMENT_COLUMNS: &str = "id, post_id, author_id, content, hidden, created_at, version";

const POST_FILTER: &str =
    "hidden = FALSE AND scope = $1 AND ($2::TEXT IS NULL OR school_domain = $2)";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    author_id: Uuid,
    content: String,
    scope: String,
    school_domain: Option<String>,
    like_count: i64,
    comment_count: i64,
    hidden: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<PostRow> for Post {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let scope = match row.scope.as_str() {
            "campus" => FeedScope::Campus,
            "national" => FeedScope::National,
            other => {
                return Err(StoreError::Database(sqlx::Error::Decode(
                    format!("unknown feed scope {:?} on post {}", other, row.id).into(),
                )))
            }
        };
        Ok(Post {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            scope,
            school_domain: row.school_domain,
            like_count: row.like_count,
            comment_count: row.comment_count,
            hidden: row.hidden,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    author_id: Uuid,
    content: String,
    hidden: bool,
    created_at: DateTime<Utc>,
    version: i64,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            content: row.content,
            hidden: row.hidden,
            created_at: row.created_at,
            version: row.version,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LikeRow {
    id: i64,
    post_id: i64,
    user_id: Uuid,
    created_at: DateTime<Utc>,
}

impl From<LikeRow> for Like {
    fn from(row: LikeRow) -> Self {
        Like {
            id: row.id,
            post_id: row.post_id,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Wall store over a PostgreSQL pool
#[derive(Clone)]
pub struct PgWallStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgWallStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }
}

#[async_trait]
impl WallStore for PgWallStore {
    async fn begin(&self) -> StoreResult<Box<dyn WallTx>> {
        let mut tx = self.pool.begin().await?;
        // SET LOCAL takes no bind parameters; the value is a plain integer
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts WHERE id = $1",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Post::try_from).transpose()
    }

    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {} FROM comments WHERE id = $1",
            COMMENT_COLUMNS
        ))
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Comment::from))
    }

    async fn list_posts(
        &self,
        filter: &PostFilter,
        order: PostOrder,
        window: Window,
    ) -> StoreResult<(Vec<Post>, i64)> {
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {}
            FROM posts
            WHERE {}
            ORDER BY {}
            LIMIT $3 OFFSET $4
            "#,
            POST_COLUMNS,
            POST_FILTER,
            order.order_by_sql()
        ))
        .bind(filter.scope.as_str())
        .bind(filter.school_domain.as_deref())
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&mut *conn)
        .await?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM posts WHERE {}", POST_FILTER))
                .bind(filter.scope.as_str())
                .bind(filter.school_domain.as_deref())
                .fetch_one(&mut *conn)
                .await?;

        let posts = rows
            .into_iter()
            .map(Post::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((posts, total))
    }

    async fn list_comments(
        &self,
        post_id: i64,
        order: CommentOrder,
        window: Window,
    ) -> StoreResult<(Vec<Comment>, i64)> {
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let rows = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            SELECT {}
            FROM comments
            WHERE post_id = $1 AND hidden = FALSE
            ORDER BY {}
            LIMIT $2 OFFSET $3
            "#,
            COMMENT_COLUMNS,
            order.order_by_sql()
        ))
        .bind(post_id)
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&mut *conn)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments WHERE post_id = $1 AND hidden = FALSE",
        )
        .bind(post_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok((rows.into_iter().map(Comment::from).collect(), total))
    }

    async fn post_ids_after(&self, after_id: i64, limit: i64) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM posts WHERE id > $1 ORDER BY id LIMIT $2")
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    /// Run the versioned post update under a savepoint so a timed-out or
    /// failed attempt leaves the surrounding transaction usable for a retry.
    async fn versioned_post_update(&mut self, post: &Post) -> StoreResult<Option<PostRow>> {
        sqlx::query("SAVEPOINT post_cas")
            .execute(&mut *self.tx)
            .await?;

        let result = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts
            SET like_count = $2, comment_count = $3, hidden = $4,
                updated_at = NOW(), version = version + 1
            WHERE id = $1 AND version = $5
            RETURNING {}
            "#,
            POST_COLUMNS
        ))
        .bind(post.id)
        .bind(post.like_count)
        .bind(post.comment_count)
        .bind(post.hidden)
        .bind(post.version)
        .fetch_optional(&mut *self.tx)
        .await;

        match result {
            Ok(row) => {
                sqlx::query("RELEASE SAVEPOINT post_cas")
                    .execute(&mut *self.tx)
                    .await?;
                Ok(row)
            }
            Err(err) => {
                sqlx::query("ROLLBACK TO SAVEPOINT post_cas")
                    .execute(&mut *self.tx)
                    .await?;
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl WallTx for PgTx {
    async fn find_post(&mut self, post_id: i64) -> StoreResult<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts WHERE id = $1",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Post::try_from).transpose()
    }

    async fn insert_post(&mut self, post: &NewPost) -> StoreResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            INSERT INTO posts (author_id, content, scope, school_domain)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            POST_COLUMNS
        ))
        .bind(post.author_id)
        .bind(&post.content)
        .bind(post.scope.as_str())
        .bind(post.school_domain.as_deref())
        .fetch_one(&mut *self.tx)
        .await?;

        Post::try_from(row)
    }

    async fn update_post(&mut self, post: &Post) -> StoreResult<CasOutcome<Post>> {
        if let Some(row) = self.versioned_post_update(post).await? {
            return Ok(CasOutcome::Applied(Post::try_from(row)?));
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM posts WHERE id = $1)")
            .bind(post.id)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(if exists {
            CasOutcome::Stale
        } else {
            CasOutcome::Missing
        })
    }

    async fn find_comment(&mut self, comment_id: i64) -> StoreResult<Option<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            "SELECT {} FROM comments WHERE id = $1",
            COMMENT_COLUMNS
        ))
        .bind(comment_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Comment::from))
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> StoreResult<Comment> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            INSERT INTO comments (post_id, author_id, content)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            COMMENT_COLUMNS
        ))
        .bind(comment.post_id)
        .bind(comment.author_id)
        .bind(&comment.content)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn update_comment(&mut self, comment: &Comment) -> StoreResult<CasOutcome<Comment>> {
        let row = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            UPDATE comments
            SET hidden = $2, version = version + 1
            WHERE id = $1 AND version = $3
            RETURNING {}
            "#,
            COMMENT_COLUMNS
        ))
        .bind(comment.id)
        .bind(comment.hidden)
        .bind(comment.version)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = row {
            return Ok(CasOutcome::Applied(row.into()));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM comments WHERE id = $1)")
                .bind(comment.id)
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(if exists {
            CasOutcome::Stale
        } else {
            CasOutcome::Missing
        })
    }

    async fn set_comments_hidden(&mut self, post_id: i64, hidden: bool) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE comments
            SET hidden = $2, version = version + 1
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .bind(hidden)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Option<Like>> {
        let row = sqlx::query_as::<_, LikeRow>(
            r#"
            SELECT id, post_id, user_id, created_at
            FROM likes
            WHERE post_id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Like::from))
    }

    async fn insert_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Like> {
        let row = sqlx::query_as::<_, LikeRow>(
            r#"
            INSERT INTO likes (post_id, user_id)
            VALUES ($1, $2)
            RETURNING id, post_id, user_id, created_at
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.into())
    }

    async fn delete_like(&mut self, like_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE id = $1")
            .bind(like_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_likes(&mut self, post_id: i64) -> StoreResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Reads school domains from the `users` table
#[derive(Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a user whose school domain is derived from `email`
    pub async fn register_user(&self, user_id: Uuid, email: &str) -> StoreResult<UserProfile> {
        let school_domain = school_domain_from_email(email);
        sqlx::query(
            r#"
            INSERT INTO users (id, email, school_domain)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email, school_domain = EXCLUDED.school_domain
            "#,
        )
        .bind(user_id)
        .bind(email.trim().to_ascii_lowercase())
        .bind(school_domain.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(UserProfile {
            id: user_id,
            school_domain,
        })
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        let row: Option<(Uuid, Option<String>)> =
            sqlx::query_as("SELECT id, school_domain FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, school_domain)| UserProfile { id, school_domain }))
    }
}

/// Verification codes in the `verification_codes` table
#[derive(Clone)]
pub struct PgVerificationCodes {
    pool: PgPool,
}

impl PgVerificationCodes {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationCodeRepository for PgVerificationCodes {
    async fn save(&self, code: &VerificationCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_codes (email, purpose, code, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email, purpose) DO UPDATE
            SET code = EXCLUDED.code, expires_at = EXCLUDED.expires_at, created_at = NOW()
            "#,
        )
        .bind(&code.email)
        .bind(code.purpose.as_str())
        .bind(&code.code)
        .bind(code.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM verification_codes
            WHERE email = $1 AND purpose = $2 AND code = $3 AND expires_at > $4
            "#,
        )
        .bind(email)
        .bind(purpose.as_str())
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
