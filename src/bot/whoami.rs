//! `/whoami`.

use async_trait::async_trait;

use super::users::UserStore;
use crate::core::conversation::{Context, Reply};
use crate::core::handler::{CommandHandler, HandlerResult};

pub const NOT_REGISTERED: &str = "You're not registered yet. Enter /start to begin";

pub struct WhoamiCommand {
    users: UserStore,
}

impl WhoamiCommand {
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

#[async_trait]
impl CommandHandler for WhoamiCommand {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        // A registration interrupted by this command was just rolled back.
        let username = self
            .users
            .get(ctx.chat_id())
            .await
            .and_then(|user| user.username);

        Ok(match username {
            Some(username) => ctx.reply(format!(
                "Your name is {}, you're a registered user",
                username
            )),
            None => ctx.reply(NOT_REGISTERED),
        })
    }
}
