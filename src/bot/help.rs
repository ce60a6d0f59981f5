//! `/help`, and the prompt pointing registered users to it.

use async_trait::async_trait;

use crate::core::conversation::{Context, Reply};
use crate::core::handler::{CommandHandler, HandlerResult, StateHandler};

pub const HELP_TEXT: &str = r#"tgmux demo bot

/start - Register and pick a username
/whoami - Show your username
/help - Show this help"#;

pub const HELP_PROMPT: &str = "Use /help command to see what you can do here";

pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        Ok(ctx.reply(HELP_TEXT))
    }
}

/// Free text from a registered user with nothing pending.
pub struct IdleStep;

#[async_trait]
impl StateHandler for IdleStep {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        Ok(ctx.reply(HELP_PROMPT))
    }

    async fn cleanup(&self, _ctx: &Context) -> HandlerResult<()> {
        Ok(())
    }
}
