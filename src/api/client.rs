use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, error, Instrument};
use url::Url;
use uuid::Uuid;

use crate::api::InboxApi;
use crate::config::Session;
use crate::errors::AppError;
use crate::models::{MessagePage, NewestPage, PageCursor, PageUser, SendAck, SendMessageRequest, UserList};

/// `InboxApi` over HTTP, authenticated with the session cookie.
#[derive(Clone)]
pub struct HttpInboxApi {
    client: Client,
    base_url: String,
    session: Session,
}

impl HttpInboxApi {
    pub fn new(base_url: &str, session: Session, timeout: std::time::Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::network(base_url, e))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn messages_url(&self, conversation_id: &str) -> String {
        format!("{}/messenger/messages/{conversation_id}", self.base_url)
    }

    fn is_own_origin(&self, url: &str) -> bool {
        match (Url::parse(url), Url::parse(&self.base_url)) {
            (Ok(target), Ok(base)) => target.origin() == base.origin(),
            _ => false,
        }
    }

    /// Attaches the session cookie, but only to our own backend. Cursor URLs
    /// may point at the platform directly and carry their own token.
    fn authorize(&self, url: &str, request: RequestBuilder) -> RequestBuilder {
        if self.is_own_origin(url) {
            request.header(COOKIE, self.session.cookie())
        } else {
            request
        }
    }

    async fn execute<T: DeserializeOwned>(&self, url: &str, request: RequestBuilder) -> Result<T, AppError> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("inbox_api", %request_id, %url);
        async move {
            let resp = self
                .authorize(url, request)
                .header(CONTENT_TYPE, "application/json")
                .header("X-Request-Id", request_id.to_string())
                .send()
                .await
                .map_err(|e| {
                    error!("Network error: {e}");
                    AppError::network(url, e)
                })?;

            if !resp.status().is_success() {
                error!("Server error: {}", resp.status());
                return Err(AppError::HttpStatus {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                });
            }

            let body = resp.text().await.map_err(|e| AppError::network(url, e))?;
            debug!("Received {} bytes", body.len());
            serde_json::from_str::<T>(&body).map_err(|e| {
                error!("Parse error: {e}");
                AppError::decode(url, e)
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl InboxApi for HttpInboxApi {
    async fn fetch_newest(&self, conversation_id: &str) -> Result<MessagePage, AppError> {
        let url = self.messages_url(conversation_id);
        let page: NewestPage = self.execute(&url, self.client.get(&url)).await?;
        Ok(page.into_page())
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<MessagePage, AppError> {
        let url = cursor.as_str();
        self.execute(url, self.client.get(url)).await
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendAck, AppError> {
        let url = self.messages_url(conversation_id);
        let body = SendMessageRequest { message: text };
        self.execute(&url, self.client.post(&url).json(&body)).await
    }

    async fn list_users(&self) -> Result<Vec<PageUser>, AppError> {
        let url = format!("{}/messenger/users", self.base_url);
        let list: UserList = self.execute(&url, self.client.get(&url)).await?;
        Ok(list.users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api() -> HttpInboxApi {
        HttpInboxApi::new(
            "https://inbox.example.com/",
            Session::new("sid=abc").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn messages_url_is_built_from_base() {
        assert_eq!(
            api().messages_url("42"),
            "https://inbox.example.com/messenger/messages/42"
        );
    }

    #[test]
    fn cookie_only_goes_to_own_backend() {
        let api = api();
        let own = api
            .authorize("https://inbox.example.com/messenger/users", api.client.get("https://inbox.example.com/messenger/users"))
            .build()
            .unwrap();
        assert_eq!(own.headers().get(COOKIE).unwrap(), "sid=abc");

        let foreign_url = "https://graph.example.com/v19.0/t_1/messages?after=xyz";
        let foreign = api.authorize(foreign_url, api.client.get(foreign_url)).build().unwrap();
        assert!(foreign.headers().get(COOKIE).is_none());

        let lookalike = "https://inbox.example.com.evil.test/messenger/users";
        assert!(!api.is_own_origin(lookalike));
    }
}
