use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage backend for images, posts and comments.
///
/// Every `save_*` call assigns a fresh id (overwriting whatever the caller put
/// in the record) and returns it.
pub trait Repository: Send + Sync {
    fn save_image(&self, image: &mut Image) -> StoreResult<String>;
    fn get_image(&self, id: &str) -> StoreResult<Image>;

    fn save_post(&self, post: &mut Post) -> StoreResult<String>;
    fn get_post(&self, id: &str) -> StoreResult<Post>;
    fn list_posts(&self) -> StoreResult<Vec<Post>>;

    fn save_comment(&self, comment: &mut Comment) -> StoreResult<String>;
    fn get_comment(&self, id: &str) -> StoreResult<Comment>;
    fn delete_comment(&self, id: &str) -> StoreResult<()>;

    /// Most recent comments on a post, newest first, at most `limit` of them.
    /// A post nobody has commented on yields an empty list.
    fn latest_comments(&self, post_id: &str, limit: usize) -> StoreResult<Vec<Comment>>;
    fn count_comments(&self, post_id: &str) -> StoreResult<usize>;

    /// Latest comments and the total count, read together so they agree.
    fn comment_summary(&self, post_id: &str, limit: usize) -> StoreResult<(Vec<Comment>, usize)>;
}

#[derive(Default)]
struct Tables {
    images: HashMap<String, Image>,
    posts: HashMap<String, Post>,
    post_order: Vec<String>,
    comments: HashMap<String, Comment>,
    // post id -> comment ids in insertion order
    post_comments: HashMap<String, Vec<String>>,
}

impl Tables {
    fn latest_comments(&self, post_id: &str, limit: usize) -> Vec<Comment> {
        let ids = match self.post_comments.get(post_id) {
            Some(ids) => ids,
            None => return Vec::new(),
        };

        // Walk the index newest-first so the stable sort breaks timestamp ties
        // in favour of the later insertion.
        let mut comments: Vec<Comment> = ids
            .iter()
            .rev()
            .filter_map(|id| match self.comments.get(id) {
                Some(c) => Some(c.clone()),
                None => {
                    log::warn!("Dangling comment {} in index of post {}", id, post_id);
                    None
                }
            })
            .collect();

        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        comments.truncate(limit);
        comments
    }

    fn count_comments(&self, post_id: &str) -> usize {
        self.post_comments
            .get(post_id)
            .map(|ids| ids.iter().filter(|id| self.comments.contains_key(*id)).count())
            .unwrap_or(0)
    }
}

/// Thread-safe in-memory store. One lock covers every table so the
/// comment index always moves together with the comment it points at.
#[derive(Default)]
pub struct Store {
    tables: Mutex<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Internal("store lock poisoned".to_string()))
    }
}

impl Repository for Store {
    // ==================== Image Operations ====================

    fn save_image(&self, image: &mut Image) -> StoreResult<String> {
        let mut tables = self.lock()?;
        image.id = Uuid::new_v4().to_string();
        image.created_at = Utc::now();
        tables.images.insert(image.id.clone(), image.clone());
        Ok(image.id.clone())
    }

    fn get_image(&self, id: &str) -> StoreResult<Image> {
        let tables = self.lock()?;
        tables
            .images
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Image {}", id)))
    }

    // ==================== Post Operations ====================

    fn save_post(&self, post: &mut Post) -> StoreResult<String> {
        let mut tables = self.lock()?;
        post.id = Uuid::new_v4().to_string();
        post.created_at = Utc::now();
        tables.post_order.push(post.id.clone());
        tables.posts.insert(post.id.clone(), post.clone());
        Ok(post.id.clone())
    }

    fn get_post(&self, id: &str) -> StoreResult<Post> {
        let tables = self.lock()?;
        tables
            .posts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Post {}", id)))
    }

    fn list_posts(&self) -> StoreResult<Vec<Post>> {
        let tables = self.lock()?;
        Ok(tables
            .post_order
            .iter()
            .filter_map(|id| tables.posts.get(id).cloned())
            .collect())
    }

    // ==================== Comment Operations ====================

    fn save_comment(&self, comment: &mut Comment) -> StoreResult<String> {
        let mut tables = self.lock()?;
        comment.id = Uuid::new_v4().to_string();
        comment.created_at = Utc::now();

        tables
            .post_comments
            .entry(comment.post_id.clone())
            .or_default()
            .push(comment.id.clone());
        tables.comments.insert(comment.id.clone(), comment.clone());
        Ok(comment.id.clone())
    }

    fn get_comment(&self, id: &str) -> StoreResult<Comment> {
        let tables = self.lock()?;
        tables
            .comments
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Comment {}", id)))
    }

    fn delete_comment(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let comment = tables
            .comments
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("Comment {}", id)))?;

        // The comment table is authoritative; a missing index entry is only logged.
        let removed = match tables.post_comments.get_mut(&comment.post_id) {
            Some(ids) => match ids.iter().position(|c| c == id) {
                Some(pos) => {
                    ids.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if !removed {
            log::warn!(
                "Comment {} was not indexed under post {}",
                id,
                comment.post_id
            );
        }
        Ok(())
    }

    fn latest_comments(&self, post_id: &str, limit: usize) -> StoreResult<Vec<Comment>> {
        Ok(self.lock()?.latest_comments(post_id, limit))
    }

    fn count_comments(&self, post_id: &str) -> StoreResult<usize> {
        Ok(self.lock()?.count_comments(post_id))
    }

    fn comment_summary(&self, post_id: &str, limit: usize) -> StoreResult<(Vec<Comment>, usize)> {
        let tables = self.lock()?;
        Ok((
            tables.latest_comments(post_id, limit),
            tables.count_comments(post_id),
        ))
    }
}
