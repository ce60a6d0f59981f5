//! Handler and state-provider seams.
//!
//! Business logic plugs into the router through these traits. Plain closures
//! work too, as long as the argument type is spelled out: `|ctx: &Context| ...`.

use async_trait::async_trait;

use super::conversation::{Context, Reply};

/// Result type returned by handlers and state providers.
pub type HandlerResult<T> = anyhow::Result<T>;

/// Handles one named command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply>;
}

#[async_trait]
impl<F> CommandHandler for F
where
    F: Fn(&Context) -> HandlerResult<Reply> + Send + Sync,
{
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        self(ctx)
    }
}

/// Handles free text while a conversation sits in one multi-turn step.
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Handle a non-command message in this state.
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply>;

    /// Roll back the unfinished step when a command interrupts it.
    async fn cleanup(&self, ctx: &Context) -> HandlerResult<()>;
}

/// A state handler assembled from two closures.
pub struct FnStateHandler<H, C> {
    handle: H,
    cleanup: C,
}

impl<H, C> FnStateHandler<H, C>
where
    H: Fn(&Context) -> HandlerResult<Reply> + Send + Sync,
    C: Fn(&Context) -> HandlerResult<()> + Send + Sync,
{
    pub fn new(handle: H, cleanup: C) -> Self {
        Self { handle, cleanup }
    }
}

#[async_trait]
impl<H, C> StateHandler for FnStateHandler<H, C>
where
    H: Fn(&Context) -> HandlerResult<Reply> + Send + Sync,
    C: Fn(&Context) -> HandlerResult<()> + Send + Sync,
{
    async fn handle(&self, ctx: &Context) -> HandlerResult<Reply> {
        (self.handle)(ctx)
    }

    async fn cleanup(&self, ctx: &Context) -> HandlerResult<()> {
        (self.cleanup)(ctx)
    }
}

/// Looks up the current state token of a conversation.
///
/// An empty token with no error means the conversation isn't registered yet;
/// an error means the lookup itself failed.
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn state(&self, ctx: &Context) -> HandlerResult<String>;
}

#[async_trait]
impl<F> StateProvider for F
where
    F: Fn(&Context) -> HandlerResult<String> + Send + Sync,
{
    async fn state(&self, ctx: &Context) -> HandlerResult<String> {
        self(ctx)
    }
}
