use std::sync::Arc;
use thiserror::Error;

use crate::models::*;
use crate::store::{Repository, StoreError};

/// Comments attached to each post in a listing
pub const LATEST_COMMENTS_LIMIT: usize = 2;

/// Upper bound for an explicit comments query
pub const MAX_COMMENTS_LIMIT: usize = 50;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to save image: {0}")]
    ImageSave(#[source] StoreError),
    #[error("Failed to save post: {0}")]
    PostSave(#[source] StoreError),
    #[error("Post not found: {0}")]
    PostNotFound(String),
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Comment not found: {0}")]
    CommentNotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Builds post views and enforces comment ownership on top of a `Repository`.
pub struct FeedService {
    repo: Arc<dyn Repository>,
}

impl FeedService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    // ==================== Posts ====================

    /// Store the image, then the post that points at it
    pub fn create_post(
        &self,
        mut image: Image,
        caption: &str,
        author_id: &str,
    ) -> ServiceResult<String> {
        let image_id = self
            .repo
            .save_image(&mut image)
            .map_err(ServiceError::ImageSave)?;

        let mut post = Post {
            id: String::new(),
            caption: caption.to_string(),
            image_id,
            author_id: author_id.to_string(),
            created_at: image.created_at,
        };
        let post_id = self.repo.save_post(&mut post).map_err(ServiceError::PostSave)?;

        log::info!("Created post {} by {}", post_id, author_id);
        Ok(post_id)
    }

    pub fn get_post_by_id(&self, post_id: &str) -> ServiceResult<(Image, PostView)> {
        let post = self.repo.get_post(post_id).map_err(|e| match e {
            StoreError::NotFound(_) => ServiceError::PostNotFound(post_id.to_string()),
            e => ServiceError::Store(e),
        })?;

        let image = self.repo.get_image(&post.image_id).map_err(|e| match e {
            StoreError::NotFound(_) => {
                log::error!("Post {} references missing image {}", post.id, post.image_id);
                ServiceError::ImageNotFound(post.image_id.clone())
            }
            e => ServiceError::Store(e),
        })?;

        Ok((image, self.post_view(post)))
    }

    /// Every post with its latest comments. A post whose comments cannot be
    /// read is still listed, with no comments.
    pub fn list_posts(&self) -> ServiceResult<Vec<PostView>> {
        let posts = self.repo.list_posts()?;

        Ok(posts
            .into_iter()
            .map(|post| self.post_view(post))
            .collect())
    }

    /// A post with its latest comments. Comments that cannot be read leave the
    /// view empty rather than failing the read.
    fn post_view(&self, post: Post) -> PostView {
        let (comments, count) = self
            .repo
            .comment_summary(&post.id, LATEST_COMMENTS_LIMIT)
            .unwrap_or_else(|e| {
                log::warn!("Failed to load comments for post {}: {}", post.id, e);
                (Vec::new(), 0)
            });
        PostView::new(post, comments, count)
    }

    // ==================== Comments ====================

    pub fn comment_on_post(
        &self,
        post_id: &str,
        content: &str,
        author_id: &str,
    ) -> ServiceResult<String> {
        self.ensure_post_exists(post_id)?;

        let comment_id = self
            .repo
            .save_comment(&mut Comment::new(post_id, content, author_id))?;
        log::info!("Comment {} added to post {} by {}", comment_id, post_id, author_id);
        Ok(comment_id)
    }

    /// Only the comment's author may delete it
    pub fn delete_comment(&self, comment_id: &str, requester_id: &str) -> ServiceResult<()> {
        let comment = self.repo.get_comment(comment_id).map_err(|e| match e {
            StoreError::NotFound(_) => ServiceError::CommentNotFound(comment_id.to_string()),
            e => ServiceError::Store(e),
        })?;

        if comment.author_id != requester_id {
            log::warn!(
                "User {} tried to delete comment {} owned by {}",
                requester_id,
                comment_id,
                comment.author_id
            );
            return Err(ServiceError::Unauthorized);
        }

        self.repo.delete_comment(comment_id).map_err(|e| match e {
            // lost a race with another delete
            StoreError::NotFound(_) => ServiceError::CommentNotFound(comment_id.to_string()),
            e => ServiceError::Store(e),
        })?;
        log::info!("Comment {} deleted by {}", comment_id, requester_id);
        Ok(())
    }

    pub fn get_post_comments(&self, post_id: &str, limit: usize) -> ServiceResult<Vec<CommentView>> {
        self.ensure_post_exists(post_id)?;

        let limit = limit.clamp(1, MAX_COMMENTS_LIMIT);
        let comments = self.repo.latest_comments(post_id, limit)?;
        Ok(comments.into_iter().map(CommentView::from).collect())
    }

    fn ensure_post_exists(&self, post_id: &str) -> ServiceResult<()> {
        match self.repo.get_post(post_id) {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(ServiceError::PostNotFound(post_id.to_string())),
            Err(e) => Err(ServiceError::Store(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreResult};
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_image(bytes: &[u8]) -> Image {
        Image {
            id: String::new(),
            data: bytes.to_vec(),
            content_type: "image/png".to_string(),
            width: 10,
            height: 10,
            created_at: Utc::now(),
        }
    }

    fn service() -> (Arc<Store>, FeedService) {
        let store = Arc::new(Store::new());
        let service = FeedService::new(store.clone());
        (store, service)
    }

    /// Wraps a real store and fails selected operations
    #[derive(Default)]
    struct FlakyStore {
        inner: Store,
        fail_images: bool,
        fail_posts: bool,
        fail_comments_for: Option<String>,
        drop_images: AtomicBool,
    }

    impl Repository for FlakyStore {
        fn save_image(&self, image: &mut Image) -> StoreResult<String> {
            if self.fail_images {
                return Err(StoreError::Internal("disk on fire".to_string()));
            }
            self.inner.save_image(image)
        }
        fn get_image(&self, id: &str) -> StoreResult<Image> {
            if self.drop_images.load(Ordering::SeqCst) {
                return Err(StoreError::NotFound(format!("Image {}", id)));
            }
            self.inner.get_image(id)
        }
        fn save_post(&self, post: &mut Post) -> StoreResult<String> {
            if self.fail_posts {
                return Err(StoreError::Internal("disk on fire".to_string()));
            }
            self.inner.save_post(post)
        }
        fn get_post(&self, id: &str) -> StoreResult<Post> {
            self.inner.get_post(id)
        }
        fn list_posts(&self) -> StoreResult<Vec<Post>> {
            self.inner.list_posts()
        }
        fn save_comment(&self, comment: &mut Comment) -> StoreResult<String> {
            self.inner.save_comment(comment)
        }
        fn get_comment(&self, id: &str) -> StoreResult<Comment> {
            self.inner.get_comment(id)
        }
        fn delete_comment(&self, id: &str) -> StoreResult<()> {
            self.inner.delete_comment(id)
        }
        fn latest_comments(&self, post_id: &str, limit: usize) -> StoreResult<Vec<Comment>> {
            if self.fail_comments_for.as_deref() == Some(post_id) {
                return Err(StoreError::Internal("corrupt index".to_string()));
            }
            self.inner.latest_comments(post_id, limit)
        }
        fn count_comments(&self, post_id: &str) -> StoreResult<usize> {
            self.inner.count_comments(post_id)
        }
        fn comment_summary(
            &self,
            post_id: &str,
            limit: usize,
        ) -> StoreResult<(Vec<Comment>, usize)> {
            if self.fail_comments_for.as_deref() == Some(post_id) {
                return Err(StoreError::Internal("corrupt index".to_string()));
            }
            self.inner.comment_summary(post_id, limit)
        }
    }

    #[test]
    fn test_create_then_get_post() {
        let (_, service) = service();
        let post_id = service
            .create_post(test_image(&[1, 2, 3]), "Hello", "alice")
            .unwrap();

        let (image, view) = service.get_post_by_id(&post_id).unwrap();
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(view.id, post_id);
        assert_eq!(view.caption, "Hello");
        assert_eq!(view.creator_id, "alice");
        assert_eq!(view.image_id, image.id);
        assert!(view.comments.is_empty());
    }

    #[test]
    fn test_get_unknown_post() {
        let (_, service) = service();
        assert!(matches!(
            service.get_post_by_id("missing"),
            Err(ServiceError::PostNotFound(_))
        ));
    }

    #[test]
    fn test_image_save_failure_creates_no_post() {
        let repo = Arc::new(FlakyStore {
            fail_images: true,
            ..Default::default()
        });
        let service = FeedService::new(repo.clone());

        let result = service.create_post(test_image(&[1]), "Hello", "alice");
        assert!(matches!(result, Err(ServiceError::ImageSave(_))));
        assert!(repo.list_posts().unwrap().is_empty());
    }

    #[test]
    fn test_post_save_failure() {
        let service = FeedService::new(Arc::new(FlakyStore {
            fail_posts: true,
            ..Default::default()
        }));

        let result = service.create_post(test_image(&[1]), "Hello", "alice");
        assert!(matches!(result, Err(ServiceError::PostSave(_))));
    }

    #[test]
    fn test_missing_image_is_reported_not_panicked() {
        let repo = Arc::new(FlakyStore::default());
        let service = FeedService::new(repo.clone());
        let post_id = service.create_post(test_image(&[1]), "Hello", "alice").unwrap();

        repo.drop_images.store(true, Ordering::SeqCst);
        assert!(matches!(
            service.get_post_by_id(&post_id),
            Err(ServiceError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_list_posts_shows_latest_two_comments() {
        let (_, service) = service();
        let busy = service.create_post(test_image(&[1]), "busy", "alice").unwrap();
        let quiet = service.create_post(test_image(&[2]), "quiet", "alice").unwrap();

        for (content, author) in [("a", "A"), ("b", "B"), ("c", "C")] {
            service.comment_on_post(&busy, content, author).unwrap();
        }

        let posts = service.list_posts().unwrap();
        assert_eq!(posts.len(), 2);

        let busy_view = posts.iter().find(|p| p.id == busy).unwrap();
        let authors: Vec<&str> = busy_view.comments.iter().map(|c| c.creator_id.as_str()).collect();
        assert_eq!(authors, vec!["C", "B"]);
        assert_eq!(busy_view.comment_count, 3);

        let quiet_view = posts.iter().find(|p| p.id == quiet).unwrap();
        assert!(quiet_view.comments.is_empty());
    }

    #[test]
    fn test_list_posts_swallows_per_post_failures() {
        let inner = Store::new();
        let mut img = test_image(&[1]);
        let image_id = inner.save_image(&mut img).unwrap();
        let mut broken = Post {
            id: String::new(),
            caption: "broken".to_string(),
            image_id: image_id.clone(),
            author_id: "alice".to_string(),
            created_at: Utc::now(),
        };
        let broken_id = inner.save_post(&mut broken).unwrap();
        let mut fine = Post {
            caption: "fine".to_string(),
            ..broken.clone()
        };
        let fine_id = inner.save_post(&mut fine).unwrap();
        inner
            .save_comment(&mut Comment::new(&broken_id, "hidden", "bob"))
            .unwrap();
        inner
            .save_comment(&mut Comment::new(&fine_id, "shown", "bob"))
            .unwrap();

        let service = FeedService::new(Arc::new(FlakyStore {
            inner,
            fail_comments_for: Some(broken_id.clone()),
            ..Default::default()
        }));

        let posts = service.list_posts().unwrap();
        assert_eq!(posts.len(), 2);
        let broken_view = posts.iter().find(|p| p.id == broken_id).unwrap();
        assert!(broken_view.comments.is_empty());
        assert_eq!(broken_view.comment_count, 0);
        assert_eq!(posts.iter().find(|p| p.id == fine_id).unwrap().comments.len(), 1);
    }

    #[test]
    fn test_get_post_survives_unreadable_comments() {
        let inner = Store::new();
        let mut image = test_image(&[7, 7]);
        let image_id = inner.save_image(&mut image).unwrap();
        let mut post = Post {
            id: String::new(),
            caption: "still here".to_string(),
            image_id,
            author_id: "alice".to_string(),
            created_at: Utc::now(),
        };
        let post_id = inner.save_post(&mut post).unwrap();
        inner
            .save_comment(&mut Comment::new(&post_id, "hidden", "bob"))
            .unwrap();

        let service = FeedService::new(Arc::new(FlakyStore {
            inner,
            fail_comments_for: Some(post_id.clone()),
            ..Default::default()
        }));

        let (image, view) = service.get_post_by_id(&post_id).unwrap();
        assert_eq!(image.data, vec![7, 7]);
        assert_eq!(view.caption, "still here");
        assert!(view.comments.is_empty());
        assert_eq!(view.comment_count, 0);
    }

    #[test]
    fn test_comment_on_unknown_post_writes_nothing() {
        let (store, service) = service();
        let result = service.comment_on_post("ghost", "hi", "bob");

        assert!(matches!(result, Err(ServiceError::PostNotFound(_))));
        assert_eq!(store.count_comments("ghost").unwrap(), 0);
    }

    #[test]
    fn test_only_author_can_delete_comment() {
        let (store, service) = service();
        let post_id = service.create_post(test_image(&[1]), "p", "alice").unwrap();
        let comment_id = service.comment_on_post(&post_id, "mine", "bob").unwrap();

        assert!(matches!(
            service.delete_comment(&comment_id, "mallory"),
            Err(ServiceError::Unauthorized)
        ));
        // post owner is not the comment owner either
        assert!(matches!(
            service.delete_comment(&comment_id, "alice"),
            Err(ServiceError::Unauthorized)
        ));
        assert!(store.get_comment(&comment_id).is_ok());

        service.delete_comment(&comment_id, "bob").unwrap();
        assert!(store.get_comment(&comment_id).is_err());
        assert_eq!(store.count_comments(&post_id).unwrap(), 0);
    }

    #[test]
    fn test_delete_comment_twice() {
        let (_, service) = service();
        let post_id = service.create_post(test_image(&[1]), "p", "alice").unwrap();
        let comment_id = service.comment_on_post(&post_id, "bye", "bob").unwrap();

        service.delete_comment(&comment_id, "bob").unwrap();
        assert!(matches!(
            service.delete_comment(&comment_id, "bob"),
            Err(ServiceError::CommentNotFound(_))
        ));
    }

    #[test]
    fn test_get_post_comments() {
        let (_, service) = service();
        let post_id = service.create_post(test_image(&[1]), "p", "alice").unwrap();

        assert!(service.get_post_comments(&post_id, 5).unwrap().is_empty());
        assert!(matches!(
            service.get_post_comments("ghost", 5),
            Err(ServiceError::PostNotFound(_))
        ));

        for i in 0..4 {
            service
                .comment_on_post(&post_id, &format!("comment {}", i), "bob")
                .unwrap();
        }

        let three = service.get_post_comments(&post_id, 3).unwrap();
        let contents: Vec<&str> = three.iter().map(|c| c.comment.as_str()).collect();
        assert_eq!(contents, vec!["comment 3", "comment 2", "comment 1"]);

        // zero is clamped up to one
        assert_eq!(service.get_post_comments(&post_id, 0).unwrap().len(), 1);
    }
}
