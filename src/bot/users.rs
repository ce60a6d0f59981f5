//! In-memory user store backing the demo bot's conversation state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::STATE_NONE;
use crate::core::conversation::Context;
use crate::core::handler::{HandlerResult, StateProvider};

/// A known chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub chat_id: i64,
    pub username: Option<String>,
    /// Pending step; empty when nothing is pending.
    pub state: String,
}

/// Shared handle to the users map. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Arc<RwLock<HashMap<i64, User>>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, chat_id: i64) -> Option<User> {
        self.users.read().await.get(&chat_id).cloned()
    }

    pub async fn store(&self, user: User) {
        self.users.write().await.insert(user.chat_id, user);
    }

    pub async fn remove(&self, chat_id: i64) -> Option<User> {
        self.users.write().await.remove(&chat_id)
    }
}

/// Unknown chats have no state. Known chats with nothing pending are in
/// `STATE_NONE`.
#[async_trait]
impl StateProvider for UserStore {
    async fn state(&self, ctx: &Context) -> HandlerResult<String> {
        Ok(match self.get(ctx.chat_id()).await {
            None => String::new(),
            Some(user) if user.state.is_empty() => STATE_NONE.to_string(),
            Some(user) => user.state,
        })
    }
}
