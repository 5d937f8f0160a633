use member_sentry::audit::{AuditLevel, AuditLog, AuditRecord, WebhookAuditSink};
use member_sentry::config::dotenv_problem;
use member_sentry::discord::{ChannelAuditSink, DiscordGateway, fetch_guild_name};
use member_sentry::enforcement::{
    Collaborators, ComplianceEvaluator, EnforcementEngine, EnforcementSettings,
    ReconciliationScheduler, WarningLedger,
};
use member_sentry::{
    BOT_NAME, Config, Data, ERROR_TARGET, Error, commands, handlers, logging,
};
use poise::serenity_prelude::{self as serenity, GatewayIntents, GuildId, Http};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resolve a guild's display name, falling back to the configured one
async fn resolve_guild_name(
    http: &Http,
    audit: &AuditLog,
    guild_id: GuildId,
    role: &str,
    configured: &str,
) -> String {
    match fetch_guild_name(http, guild_id).await {
        Ok(name) => name,
        Err(e) => {
            audit
                .record(
                    AuditRecord::new(
                        AuditLevel::Critical,
                        format!("Cannot access {role} server (ID: {guild_id})"),
                    )
                    .error(e),
                )
                .await;
            configured.to_string()
        }
    }
}

fn audit_log(config: &Config, http: &Arc<Http>, server: &str) -> AuditLog {
    let mut audit = AuditLog::new(config.audit_level);
    if let Some(channel) = config.log_channel {
        audit = audit.with_sink(Arc::new(ChannelAuditSink::new(Arc::clone(http), channel)));
    }
    if let Some(webhook) = &config.audit_webhook {
        match WebhookAuditSink::new(&webhook.url, &webhook.secret, server) {
            Ok(sink) => audit = audit.with_sink(Arc::new(sink)),
            Err(e) => warn!("Webhook audit sink disabled: {e}"),
        }
    }
    audit
}

/// Build the engine and start the scheduler once the gateway is connected
async fn start_enforcement(ctx: &serenity::Context, config: Config) -> Data {
    let http = Arc::clone(&ctx.http);

    let startup_audit = audit_log(&config, &http, &config.target_name);
    let reference_name = resolve_guild_name(
        &http,
        &startup_audit,
        config.reference_guild,
        "reference",
        &config.reference_name,
    )
    .await;
    let target_name = resolve_guild_name(
        &http,
        &startup_audit,
        config.target_guild,
        "target",
        &config.target_name,
    )
    .await;

    let gateway = Arc::new(DiscordGateway::new(
        Arc::clone(&http),
        config.reference_guild,
        config.target_guild,
    ));
    let audit = audit_log(&config, &http, &target_name);
    let engine = EnforcementEngine::new(
        ComplianceEvaluator::new(config.criterion, config.exempt_roles.clone()),
        Collaborators::from_shared(gateway),
        EnforcementSettings {
            reference_name,
            target_name,
            grace_period: config.grace_period(),
            warning_channel: config.warning_channel,
            templates: config.notice_templates(),
        },
        audit,
        WarningLedger::new(),
    );

    let (scheduler, _task) = ReconciliationScheduler::new(
        Arc::new(engine),
        config.startup_delay,
        config.check_interval,
    )
    .start();

    let bot_name = ctx.cache.current_user().name.clone();
    scheduler
        .engine()
        .audit()
        .info(format!("Bot {bot_name} is starting up ({})", config.criterion))
        .await;

    Data::new(config, scheduler)
}

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let dotenv = dotenv_problem(dotenvy::dotenv());

    logging::init()?;

    if let Some(e) = dotenv {
        warn!("Ignoring unreadable .env file: {e}");
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(target: ERROR_TARGET, "Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let token = config.token.expose().to_string();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| Box::pin(commands::on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::event_handler(ctx, event, framework, data))
            },
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("!".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!("Registering commands for {BOT_NAME}"));
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let data = start_enforcement(ctx, config).await;

                let scheduler = data.scheduler.clone();
                let shard_manager = Arc::clone(framework.shard_manager());
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!(target: ERROR_TARGET, "Failed to listen for shutdown signal: {e}");
                        return;
                    }
                    info!("Shutdown requested");
                    scheduler.shutdown().await;
                    shard_manager.shutdown_all().await;
                });

                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    client.start().await?;
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
