pub mod client;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{MessagePage, PageCursor, PageUser, SendAck};

pub use client::HttpInboxApi;

/// The REST surface the inbox consumes. Every call needs an established session.
#[async_trait]
pub trait InboxApi: Send + Sync {
    /// Newest page of a conversation, newest message first.
    async fn fetch_newest(&self, conversation_id: &str) -> Result<MessagePage, AppError>;

    /// Dereferences a cursor from a previous page's paging block.
    async fn fetch_page(&self, cursor: &PageCursor) -> Result<MessagePage, AppError>;

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendAck, AppError>;

    /// Users that have a conversation with the page.
    async fn list_users(&self) -> Result<Vec<PageUser>, AppError>;
}
