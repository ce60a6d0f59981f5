//! Demo onboarding bot: `/start` asks for a username, `/whoami` shows it and
//! `/help` lists commands.

pub mod help;
pub mod start;
pub mod users;
pub mod whoami;

pub use help::{HelpCommand, IdleStep};
pub use start::{StartCommand, UsernameStep};
pub use users::{User, UserStore};
pub use whoami::WhoamiCommand;

use crate::core::routing::RouterBuilder;

/// Waiting for a username after `/start`.
pub const STATE_START: &str = "start";
/// Registered, nothing pending.
pub const STATE_NONE: &str = "none";

/// Command names and descriptions published to Telegram.
pub const COMMANDS: &[(&str, &str)] = &[
    ("start", "Register and pick a username"),
    ("whoami", "Show your username"),
    ("help", "Show available commands"),
];

/// Register the demo handlers on `builder`.
pub fn register(builder: RouterBuilder, users: &UserStore) -> RouterBuilder {
    builder
        .command("start", StartCommand::new(users.clone()))
        .command("whoami", WhoamiCommand::new(users.clone()))
        .command("help", HelpCommand)
        .state(STATE_START, UsernameStep::new(users.clone()))
        .state(STATE_NONE, IdleStep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{Message, Sender};
    use crate::core::routing::Router;
    use crate::error::Result;
    use crate::transport::ChannelTransport;
    use std::sync::Arc;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    const CHAT: i64 = 777;

    async fn ask(transport: &ChannelTransport, text: &str) -> String {
        transport
            .push(Message::new(CHAT, Sender::default(), text))
            .await
            .unwrap();
        transport.recv_sent().await.unwrap().text
    }

    fn start_bot(
        transport: &Arc<ChannelTransport>,
        users: &UserStore,
    ) -> (CancellationToken, JoinHandle<Result<()>>) {
        crate::logging::init_test();
        let router = register(Router::builder(transport.clone(), users.clone()), users).build();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(router.run(cancel.clone()));
        (cancel, handle)
    }

    #[tokio::test]
    async fn test_onboarding_scenario() {
        let transport = Arc::new(ChannelTransport::new());
        let users = UserStore::new();
        let (cancel, handle) = start_bot(&transport, &users);

        assert_eq!(ask(&transport, "asdf").await, "To use the bot, enter /start");
        assert!(users.get(CHAT).await.is_none());

        assert_eq!(ask(&transport, "/start").await, start::GREETING);
        assert_eq!(users.get(CHAT).await.unwrap().state, STATE_START);

        assert_eq!(ask(&transport, "").await, start::INVALID_USERNAME);
        assert_eq!(users.get(CHAT).await.unwrap().state, STATE_START);

        assert_eq!(
            ask(&transport, "te5se").await,
            "Cheers, te5se. You now have access to all the other commands. To see them use the /help command"
        );
        let user = users.get(CHAT).await.unwrap();
        assert!(user.state.is_empty());
        assert_eq!(user.username.as_deref(), Some("te5se"));

        assert_eq!(ask(&transport, "asdf").await, help::HELP_PROMPT);
        assert_eq!(
            ask(&transport, "/whoami").await,
            "Your name is te5se, you're a registered user"
        );

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_start_again_after_registration() {
        let transport = Arc::new(ChannelTransport::new());
        let users = UserStore::new();
        users
            .store(User {
                chat_id: CHAT,
                username: Some("ann".to_string()),
                state: String::new(),
            })
            .await;
        let (cancel, handle) = start_bot(&transport, &users);

        assert_eq!(
            ask(&transport, "/start").await,
            "You're already registered, you know. Your username is ann."
        );
        assert_eq!(ask(&transport, "/help").await, help::HELP_TEXT);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_start_during_registration_restarts_it() {
        let transport = Arc::new(ChannelTransport::new());
        let users = UserStore::new();
        let (cancel, handle) = start_bot(&transport, &users);

        assert_eq!(ask(&transport, "/start").await, start::GREETING);
        // Cleanup of the pending step forgets the user, so /start begins over.
        assert_eq!(ask(&transport, "/start").await, start::GREETING);
        assert_eq!(users.get(CHAT).await.unwrap().state, STATE_START);

        // /help from the middle of registration also drops the pending step.
        assert_eq!(ask(&transport, "/help").await, help::HELP_TEXT);
        assert!(users.get(CHAT).await.is_none());

        assert_eq!(ask(&transport, "/start").await, start::GREETING);
        assert_eq!(ask(&transport, "/whoami").await, whoami::NOT_REGISTERED);
        assert!(users.get(CHAT).await.is_none());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
