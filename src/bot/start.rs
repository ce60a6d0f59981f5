//! `/start`: register the chat and ask for a username.

use anyhow::anyhow;
use async_trait::async_trait;

use super::users::{User, UserStore};
use super::STATE_START;
use crate::core::conversation::{Context, Reply};
use crate::core::handler::{CommandHandler, HandlerResult, StateHandler};

pub const GREETING: &str = "Hey, enter your username below so I know what to call you 😁";
pub const INVALID_USERNAME: &str = "Please do enter valid username";

/// Starts registration.
pub struct StartCommand {
    users: UserStore,
}

impl StartCommand {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CommandHandler for StartCommand {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        if let Some(user) = self.users.get(ctx.chat_id()).await {
            return Ok(ctx.reply(format!(
                "You're already registered, you know. Your username is {}.",
                user.username.as_deref().unwrap_or("unknown")
            )));
        }

        self.users
            .store(User {
                chat_id: ctx.chat_id(),
                username: None,
                state: STATE_START.to_string(),
            })
            .await;

        Ok(ctx.reply(GREETING))
    }
}

/// Waits for the username after `/start`.
pub struct UsernameStep {
    users: UserStore,
}

impl UsernameStep {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

#[async_trait]
impl StateHandler for UsernameStep {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        let mut user = self
            .users
            .get(ctx.chat_id())
            .await
            .ok_or_else(|| anyhow!("user {} not found", ctx.chat_id()))?;

        let username = ctx.text().trim();
        if username.is_empty() {
            return Ok(ctx.reply(INVALID_USERNAME));
        }

        user.username = Some(username.to_string());
        user.state.clear();
        self.users.store(user).await;

        Ok(ctx.reply(format!(
            "Cheers, {}. You now have access to all the other commands. To see them use the /help command",
            username
        )))
    }

    /// Forget the half-finished registration.
    async fn cleanup(&self, ctx: &Context) -> HandlerResult<()> {
        self.users.remove(ctx.chat_id()).await;
        Ok(())
    }
}
