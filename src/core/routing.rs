//! Message routing for tgmux.
//!
//! Handles:
//! - Unregistered-conversation gating (empty state)
//! - Command routing, with cleanup of an interrupted multi-turn step
//! - State routing for free text
//! - Failure containment: errors and panics become the generic error reply

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::conversation::{Context, Message, Reply};
use super::handler::{CommandHandler, HandlerResult, StateHandler, StateProvider};
use super::manager::QueueManager;
use super::queue::{panic_message, MessageProcessor};
use crate::config::{Localization, QueueSettings, RouterSettings};
use crate::error::{ProcessingError, Result};
use crate::transport::Transport;

/// Collects handlers before the router starts.
pub struct RouterBuilder {
    transport: Arc<dyn Transport>,
    state_provider: Arc<dyn StateProvider>,
    commands: HashMap<String, Box<dyn CommandHandler>>,
    states: HashMap<String, Box<dyn StateHandler>>,
    localization: Localization,
    settings: RouterSettings,
    queue_settings: QueueSettings,
}

impl RouterBuilder {
    /// Register a command handler. A later registration for the same name wins.
    pub fn command(mut self, name: &str, handler: impl CommandHandler + 'static) -> Self {
        self.commands.insert(name.to_string(), Box::new(handler));
        self
    }

    /// Register the handler (and cleanup) for a state token.
    pub fn state(mut self, state: &str, handler: impl StateHandler + 'static) -> Self {
        self.states.insert(state.to_string(), Box::new(handler));
        self
    }

    /// Replace the texts the router sends on its own.
    pub fn localization(mut self, localization: Localization) -> Self {
        self.localization = localization;
        self
    }

    pub fn settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn queue_settings(mut self, queue_settings: QueueSettings) -> Self {
        self.queue_settings = queue_settings;
        self
    }

    pub fn build(self) -> Router {
        Router {
            transport: self.transport.clone(),
            queue_settings: self.queue_settings,
            dispatcher: Arc::new(Dispatcher {
                transport: self.transport,
                state_provider: self.state_provider,
                commands: self.commands,
                states: self.states,
                localization: self.localization,
                settings: self.settings,
            }),
        }
    }
}

/// Routes messages from a transport to handlers, one queue per conversation.
pub struct Router {
    transport: Arc<dyn Transport>,
    queue_settings: QueueSettings,
    dispatcher: Arc<Dispatcher>,
}

impl Router {
    /// Start registering handlers.
    ///
    /// `state_provider` must return an empty string for conversations that
    /// aren't registered yet, and an error only for lookup failures.
    pub fn builder(
        transport: Arc<dyn Transport>,
        state_provider: impl StateProvider + 'static,
    ) -> RouterBuilder {
        RouterBuilder {
            transport,
            state_provider: Arc::new(state_provider),
            commands: HashMap::new(),
            states: HashMap::new(),
            localization: Localization::default(),
            settings: RouterSettings::default(),
            queue_settings: QueueSettings::default(),
        }
    }

    /// Registered command names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dispatcher.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the dispatch loop until `cancel` fires or the inbound stream ends.
    ///
    /// Dispatch waits while a conversation's buffer and overflow are both
    /// full, so a stuck conversation slows intake down instead of piling up
    /// messages.
    ///
    /// Only `cancel` stops the workers. When the stream ends instead, workers
    /// finish what they hold and exit at their idle deadlines; cancel the
    /// token after `run` returns to stop them sooner.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut updates = self.transport.updates().await?;

        let manager = QueueManager::new(
            self.dispatcher.clone(),
            self.queue_settings.clone(),
            cancel.clone(),
        );
        let sweeper = manager.spawn_sweeper();

        tracing::info!(
            commands = self.dispatcher.commands.len(),
            states = self.dispatcher.states.len(),
            "router started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.transport.stop_receiving();
                    tracing::info!("router stopping");
                    break;
                }
                received = updates.recv() => match received {
                    Some(message) => manager.dispatch(message).await,
                    None => {
                        tracing::info!("inbound stream closed, router stopping");
                        break;
                    }
                },
            }
        }

        sweeper.abort();
        Ok(())
    }
}

/// The immutable routing tables plus the collaborators they need.
struct Dispatcher {
    transport: Arc<dyn Transport>,
    state_provider: Arc<dyn StateProvider>,
    commands: HashMap<String, Box<dyn CommandHandler>>,
    states: HashMap<String, Box<dyn StateHandler>>,
    localization: Localization,
    settings: RouterSettings,
}

/// Run a handler future, turning a panic into an error.
async fn guarded<T, F>(handler: F) -> std::result::Result<HandlerResult<T>, ProcessingError>
where
    F: Future<Output = HandlerResult<T>>,
{
    AssertUnwindSafe(handler)
        .catch_unwind()
        .await
        .map_err(|payload| ProcessingError::Panicked(panic_message(payload.as_ref())))
}

impl Dispatcher {
    async fn route(&self, ctx: &Context) -> std::result::Result<Reply, ProcessingError> {
        let state = self
            .state_provider
            .state(ctx)
            .await
            .map_err(ProcessingError::State)?;

        let command = ctx.command().map(|c| c.name.as_str());
        let bootstrap = command.is_some_and(|name| self.settings.is_bootstrap(name));
        if state.is_empty() && !bootstrap {
            return Ok(ctx.reply(&self.localization.use_start_to_register));
        }

        match command {
            Some(name) => self.route_command(ctx, name, &state).await,
            None => self.route_state(ctx, &state).await,
        }
    }

    async fn route_command(
        &self,
        ctx: &Context,
        name: &str,
        state: &str,
    ) -> std::result::Result<Reply, ProcessingError> {
        // Roll back the unfinished step before switching context.
        if !state.is_empty() {
            let handler = self
                .states
                .get(state)
                .ok_or_else(|| ProcessingError::UnregisteredState(state.to_string()))?;
            guarded(handler.cleanup(ctx))
                .await?
                .map_err(|source| ProcessingError::Cleanup {
                    state: state.to_string(),
                    source,
                })?;
        }

        let Some(handler) = self.commands.get(name) else {
            tracing::debug!(
                conversation = %ctx.conversation_id(),
                command = name,
                "command isn't registered"
            );
            return Ok(ctx.reply(&self.localization.command_not_found));
        };

        guarded(handler.handle(ctx))
            .await?
            .map_err(|source| ProcessingError::Command {
                command: name.to_string(),
                source,
            })
    }

    async fn route_state(
        &self,
        ctx: &Context,
        state: &str,
    ) -> std::result::Result<Reply, ProcessingError> {
        let handler = self
            .states
            .get(state)
            .ok_or_else(|| ProcessingError::UnregisteredState(state.to_string()))?;

        guarded(handler.handle(ctx))
            .await?
            .map_err(|source| ProcessingError::StateHandler {
                state: state.to_string(),
                source,
            })
    }

    async fn send(&self, reply: Reply) {
        if let Err(e) = self.transport.send(&reply).await {
            tracing::error!(chat_id = reply.chat_id, error = %e, "while sending reply");
        }
    }
}

#[async_trait]
impl MessageProcessor for Dispatcher {
    async fn process(&self, message: Message) {
        let ctx = Context::new(message);
        tracing::debug!(
            conversation = %ctx.conversation_id(),
            sender = ctx.sender().username.as_deref().unwrap_or(""),
            command = ctx.command().map(|c| c.name.as_str()).unwrap_or(""),
            "processing message"
        );

        let reply = match self.route(&ctx).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(
                    conversation = %ctx.conversation_id(),
                    error = %e,
                    "failed to process message"
                );
                ctx.reply(&self.localization.on_error)
            }
        };

        self.send(reply).await;
    }
}
