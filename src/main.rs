use anyhow::Context;
use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use video_vault::bot::handlers::setup_handler;
use video_vault::bot::{Command, DispatchRouter, MessageCleanup};
use video_vault::config::Settings;
use video_vault::health::{self, HealthState};
use video_vault::scheduler::BroadcastScheduler;
use video_vault::storage::{SqliteStorage, Storage};
use video_vault::supervisor::{run_supervised, stop_on_cancel, RetryPolicy};
use video_vault::transport::{TelegramTransport, Transport, TransportError};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
    db_credentials: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            db_credentials: Regex::new(r"([a-z][a-z0-9+.-]*://[^:/@\s]+:)[^@\s]+@")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3");
        let output = self.token_bare.replace_all(&output, "[TELEGRAM_TOKEN]");
        let output = self
            .token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]");
        self.db_credentials
            .replace_all(&output, "$1[MASKED]@")
            .into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's whole buffer is consumed even if redaction changed its length.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    // Compile redaction patterns before anything can log a secret
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Video Vault bot...");

    let settings = init_settings();
    let storage = init_storage(&settings).await?;

    let telegram = Arc::new(TelegramTransport::new(Bot::new(
        settings.telegram_token.clone(),
    )));
    let transport: Arc<dyn Transport> = telegram.clone();

    let token = CancellationToken::new();
    spawn_ctrl_c_listener(token.clone());

    let cleanup = MessageCleanup::new(
        Arc::clone(&transport),
        settings.video_ttl(),
        token.child_token(),
    );
    let router = Arc::new(DispatchRouter::new(
        Arc::clone(&settings),
        Arc::clone(&storage),
        Arc::clone(&transport),
        cleanup.clone(),
    ));

    let tasks = spawn_background_tasks(&settings, &storage, &transport, &token);

    let policy = RetryPolicy::from_settings(&settings);
    let result = run_supervised(policy, token.clone(), || {
        run_dispatcher(Arc::clone(&telegram), Arc::clone(&router), token.clone())
    })
    .await;

    info!("Shutting down...");
    token.cancel();
    cleanup.shutdown().await;
    tasks.close();
    tasks.wait().await;

    result.context("Telegram polling stopped")
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!(
                admins = s.admins().len(),
                channels = s.channels().len(),
                "Configuration loaded successfully."
            );
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_storage(settings: &Settings) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = SqliteStorage::connect(&settings.database_url)
        .await
        .context("Failed to open the database")?;
    info!("Storage initialized.");
    Ok(Arc::new(storage))
}

fn spawn_ctrl_c_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        info!("Ctrl-C received");
        token.cancel();
    });
}

fn spawn_background_tasks(
    settings: &Settings,
    storage: &Arc<dyn Storage>,
    transport: &Arc<dyn Transport>,
    token: &CancellationToken,
) -> TaskTracker {
    let tasks = TaskTracker::new();

    let scheduler = BroadcastScheduler::new(
        Arc::clone(storage),
        Arc::clone(transport),
        settings.scheduler_interval(),
    );
    let scheduler_token = token.clone();
    tasks.spawn(async move { scheduler.run(scheduler_token).await });

    let health_state = HealthState::new(Arc::clone(transport));
    let port = settings.port;
    let health_token = token.clone();
    tasks.spawn(async move {
        if let Err(e) = health::serve(port, health_state, health_token).await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Some(url) = settings
        .render_external_url
        .clone()
        .filter(|u| !u.trim().is_empty())
    {
        tasks.spawn(health::run_keep_alive(
            url,
            Duration::from_secs(settings.keep_alive_interval_secs),
            token.clone(),
        ));
    }

    tasks
}

async fn run_dispatcher(
    telegram: Arc<TelegramTransport>,
    router: Arc<DispatchRouter>,
    token: CancellationToken,
) -> Result<(), TransportError> {
    let username = telegram.refresh_identity().await?;
    if let Err(e) = telegram
        .bot()
        .set_my_commands(Command::bot_commands())
        .await
    {
        warn!(error = %e, "Failed to register the command list");
    }
    if token.is_cancelled() {
        return Ok(());
    }

    info!(username = %username, "Bot is running...");
    let mut dispatcher = Dispatcher::builder(telegram.bot().clone(), setup_handler())
        .dependencies(dptree::deps![router])
        .build();

    // The process token is the only shutdown signal the dispatcher follows.
    // `shutdown()` switches the dispatcher state at once; `dispatch()` below
    // returns when it has drained.
    let shutdown = dispatcher.shutdown_token();
    let watcher = tokio::spawn(stop_on_cancel(token, move || {
        shutdown
            .shutdown()
            .is_ok()
            .then(|| std::future::ready(()))
    }));

    dispatcher.dispatch().await;
    watcher.abort();
    Ok(())
}
