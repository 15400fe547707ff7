use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image holds the validated upload behind a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    #[serde(skip_serializing)]
    pub data: Vec<u8>,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

/// Post is a caption attached to exactly one Image.
/// Posts are never updated or deleted once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub caption: String,
    pub image_id: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

/// Comment is text left on a Post by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(post_id: &str, content: &str, author_id: &str) -> Self {
        Self {
            id: String::new(),
            post_id: post_id.to_string(),
            content: content.to_string(),
            author_id: author_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// CommentView is the public shape of a Comment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentView {
    pub id: String,
    pub comment: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<Comment> for CommentView {
    fn from(c: Comment) -> Self {
        Self {
            id: c.id,
            comment: c.content,
            creator_id: c.author_id,
            created_at: c.created_at,
        }
    }
}

/// PostView is a Post together with its most recent comments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub id: String,
    pub caption: String,
    pub creator_id: String,
    pub image_id: String,
    pub created_at: DateTime<Utc>,
    pub comment_count: usize,
    pub comments: Vec<CommentView>,
}

impl PostView {
    pub fn new(post: Post, comments: Vec<Comment>, comment_count: usize) -> Self {
        Self {
            id: post.id,
            caption: post.caption,
            creator_id: post.author_id,
            image_id: post.image_id,
            created_at: post.created_at,
            comment_count,
            comments: comments.into_iter().map(CommentView::from).collect(),
        }
    }
}

// Request/Response types for API
#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteCommentRequest {
    #[serde(default)]
    pub author_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListCommentsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
