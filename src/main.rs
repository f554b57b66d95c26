mod cache;
mod chat;
mod messages;
mod notifier;
mod upstream;

use chat::{ChatStates, UserState};
use notifier::{ChatTransport, MealNotifier};
use teloxide::adaptors::throttle::{Limits, Throttle};
use teloxide::dptree;
use teloxide::macros::BotCommands;
use teloxide::prelude::*;

pub type Bot = Throttle<teloxide::Bot>;

impl ChatTransport for Bot {
    type Error = teloxide::RequestError;

    async fn send(&self, chat_id: ChatId, text: String) -> Result<(), Self::Error> {
        self.send_message(chat_id, text).await?;
        Ok(())
    }
}

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "show this help message.")]
    Help,
    #[command(description = "start over and enter a new phone number.")]
    Start,
    #[command(description = "remove your phone number from the system.")]
    Unsubscribe,
    #[command(description = "get today's menu for your phone number.")]
    Menu,
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    states: ChatStates,
    notifier: MealNotifier<Bot>,
) -> ResponseResult<()> {
    log::info!("{}: {cmd:?}", msg.chat.id);
    let chat_id = msg.chat.id;

    match cmd {
        Command::Help => {
            bot.send_message(chat_id, messages::help()).await?;
        }
        Command::Start => {
            // /start is idempotent: drop any existing registration first so a
            // chat can never accumulate more than one
            let previous = states.lock().await.insert(chat_id, UserState::AwaitingPhone);
            if let Some(UserState::Registered { phone }) = previous {
                notifier.unregister_user(chat_id);
                notifier.clear_menu(&phone);
            }
            bot.send_message(chat_id, messages::welcome()).await?;
        }
        Command::Unsubscribe => {
            let previous = states.lock().await.remove(&chat_id);
            if let Some(UserState::Registered { phone }) = &previous {
                notifier.unregister_user(chat_id);
                notifier.clear_menu(phone);
            }
            bot.send_message(chat_id, messages::unsubscribed(previous.is_some()))
                .await?;
        }
        Command::Menu => {
            let state = states.lock().await.get(&chat_id).cloned();
            let Some(UserState::Registered { phone }) = state else {
                bot.send_message(chat_id, messages::no_phone_yet()).await?;
                return Ok(());
            };

            let reply = match notifier.get_today_menu(&phone).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("{chat_id}: today's menu unavailable: {e}");
                    messages::menu_unavailable()
                }
            };
            bot.send_message(chat_id, reply).await?;
        }
    }

    Ok(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    states: ChatStates,
    notifier: MealNotifier<Bot>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        return Ok(());
    };

    // a slash message reaching this handler is a command we don't know
    if text.starts_with('/') {
        bot.send_message(chat_id, messages::unknown_command()).await?;
        return Ok(());
    }

    let state = states.lock().await.get(&chat_id).cloned();
    match state {
        None => {
            states.lock().await.insert(chat_id, UserState::AwaitingPhone);
            bot.send_message(chat_id, messages::welcome()).await?;
        }
        Some(UserState::AwaitingPhone) => match chat::parse_phone(text) {
            Some(phone) => {
                let registered = notifier.register_user(chat_id, &phone).await;
                states
                    .lock()
                    .await
                    .insert(chat_id, UserState::Registered { phone });

                match registered {
                    Ok(()) => {
                        bot.send_message(chat_id, messages::phone_saved(text.trim()))
                            .await?;
                        bot.send_message(chat_id, messages::help()).await?;
                    }
                    Err(e) => {
                        log::warn!("{chat_id}: enabling notifications failed: {e}");
                        bot.send_message(chat_id, messages::registration_failed())
                            .await?;
                    }
                }
            }
            None => {
                bot.send_message(chat_id, messages::invalid_phone()).await?;
            }
        },
        Some(UserState::Registered { .. }) => {
            bot.send_message(chat_id, messages::help()).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let token = match std::env::var("TELEGRAM_API_TOKEN") {
        Ok(token) if !token.is_empty() => token,
        _ => {
            log::error!("TELEGRAM_API_TOKEN environment variable is not set");
            std::process::exit(1);
        }
    };

    log::info!("Starting meal notification bot...");

    let bot: Bot = teloxide::Bot::new(token).throttle(Limits::default());
    let notifier = MealNotifier::new(bot.clone());
    notifier.start();

    let states = ChatStates::default();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(dptree::endpoint(handle_text)),
    )
    .dependencies(dptree::deps![states, notifier.clone()])
    .default_handler(|_| async {})
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    notifier.stop().await;
}
