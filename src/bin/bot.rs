use std::sync::{Arc, OnceLock};

use anyhow::{Context as _, Result};
use log::{error, info};
use serenity::async_trait;
use serenity::model::channel::{Message, MessageType};
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild, Member, UnavailableGuild};
use serenity::prelude::*;

use tokio::sync::watch;

use steward::{
    Config, Dispatcher, DiscordPlatform, GuildRegistry, GuildState, ReminderScheduler,
};

struct Handler {
    registry: Arc<GuildRegistry>,
    // Built once on the first gateway event; the context carries the
    // shared Http client and the cached bot user.
    platform: OnceLock<Arc<DiscordPlatform>>,
    dispatcher: OnceLock<Dispatcher>,
}

impl Handler {
    fn new(registry: Arc<GuildRegistry>) -> Self {
        Handler {
            registry,
            platform: OnceLock::new(),
            dispatcher: OnceLock::new(),
        }
    }

    fn platform(&self, ctx: &Context) -> Arc<DiscordPlatform> {
        self.platform
            .get_or_init(|| {
                Arc::new(DiscordPlatform::new(
                    ctx.http.clone(),
                    ctx.cache.current_user_id(),
                ))
            })
            .clone()
    }

    fn dispatcher(&self, ctx: &Context) -> &Dispatcher {
        let platform = self.platform(ctx);
        self.dispatcher
            .get_or_init(|| Dispatcher::new(self.registry.clone(), platform))
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            "connected as {} serving {} guild(s)",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: bool) {
        // The slot is claimed before the bootstrap task is spawned, so a
        // re-sent guild-create (reconnect) or a racing duplicate event
        // never bootstraps the same guild twice.
        if !self.registry.begin(guild.id) {
            return;
        }
        let registry = self.registry.clone();
        let platform = self.platform(&ctx);
        tokio::spawn(async move {
            match GuildState::initialize(platform, guild.id).await {
                Ok(state) => {
                    registry.insert(guild.id, state);
                    info!("guild {}: registered", guild.id);
                }
                Err(e) => {
                    error!("guild {}: bootstrap failed, leaving unregistered: {e:#}", guild.id);
                    registry.release(guild.id);
                }
            }
        });
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // `unavailable` means an outage, not a removal.
        if incomplete.unavailable {
            return;
        }
        if self.registry.remove(incomplete.id) {
            info!("guild {}: removed from registry", incomplete.id);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.kind != MessageType::Regular {
            return;
        }
        self.dispatcher(&ctx)
            .handle_message(msg.guild_id, msg.channel_id, msg.author.id, &msg.content)
            .await;
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        if new_member.user.bot {
            return;
        }
        self.dispatcher(&ctx)
            .handle_member_join(new_member.guild_id, new_member.user.id)
            .await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    let registry = Arc::new(GuildRegistry::new());
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler::new(registry.clone()))
        .await
        .context("building discord client")?;

    let bot_user = client
        .cache_and_http
        .http
        .get_current_user()
        .await
        .context("resolving bot user")?
        .id;
    let platform = Arc::new(DiscordPlatform::new(
        client.cache_and_http.http.clone(),
        bot_user,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler = ReminderScheduler::new(registry.clone(), platform, stop_rx);
    let scheduler_task = tokio::spawn(scheduler.run());

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shard_manager.lock().await.shutdown_all().await;
        }
    });

    client.start().await.context("running gateway client")?;

    // Gateway is down; stop the scheduler and let the current pass finish.
    stop_tx.send(true).ok();
    scheduler_task.await.ok();
    Ok(())
}
