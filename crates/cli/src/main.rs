use clap::{Parser, Subcommand};
use ferrocord::commands::{
    ButtonStyle, CommandOptionSpec, CommandSpec, Component, InteractionResponse, Invocation,
    MessageResponse, OptionType,
};
use ferrocord::config::{load_config, load_credentials, resolve_credentials_path};
use ferrocord::net::NetContext;
use ferrocord::rest::RestSender;
use ferrocord::{codec, Bot, BotSpec, EventHandlers};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ferrocord")]
#[command(about = "ferrocord CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect to the gateway and run the demo bot until Ctrl-C. Registers a `hello` command.
    Run {
        /// Config file path (default: FERROCORD_CONFIG_PATH or ~/.ferrocord/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Credentials file (default: credentialsPath from config, or bot.json next to it)
        #[arg(long, value_name = "PATH")]
        credentials: Option<PathBuf>,
    },

    /// Encode or decode component custom ids.
    CustomId {
        #[command(subcommand)]
        action: CustomIdAction,
    },
}

#[derive(Subcommand)]
enum CustomIdAction {
    /// Encode UTF-8 text as a custom id
    Encode { text: String },
    /// Decode a custom id and print its bytes as text
    Decode { id: String },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("ferrocord {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run {
            config,
            credentials,
        }) => {
            if let Err(e) = run_bot(config, credentials) {
                log::error!("bot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::CustomId { action }) => {
            if let Err(e) = run_custom_id(action) {
                log::error!("custom-id failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_custom_id(action: CustomIdAction) -> anyhow::Result<()> {
    match action {
        CustomIdAction::Encode { text } => {
            let id = codec::encode(text.as_bytes());
            if id.len() > codec::MAX_CUSTOM_ID_LEN {
                log::warn!(
                    "encoded id is {} characters; the limit is {}",
                    id.len(),
                    codec::MAX_CUSTOM_ID_LEN
                );
            }
            println!("{}", id);
        }
        CustomIdAction::Decode { id } => {
            let bytes = codec::decode(&id)?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
    }
    Ok(())
}

fn run_bot(config_path: Option<PathBuf>, credentials_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = load_config(config_path)?;
    let credentials_path =
        credentials_path.unwrap_or_else(|| resolve_credentials_path(&config, &path));
    let credentials = load_credentials(&credentials_path)?;
    log::info!("loaded credentials for app {}", credentials.app_id);

    let handlers = EventHandlers::new()
        .on_ready(|ctx, _| {
            if ctx.commands.get("hello").is_some() {
                return;
            }
            if let Err(e) = ctx.register_command(hello_command()) {
                log::error!("could not register hello: {}", e);
            }
            ctx.commands.set_component_handler(on_wave);
        })
        .on_error(|e| log::error!("bot error: {}", e));

    let ctx = NetContext::with_request_timeout(config.request_timeout());
    let mut bot = Bot::create(
        &ctx,
        BotSpec {
            config,
            credentials,
            handlers,
        },
    )?;

    let running = Arc::new(AtomicBool::new(true));
    watch_ctrl_c(Arc::clone(&running))?;
    bot.run(&running)?;
    Ok(())
}

fn hello_command() -> CommandSpec<RestSender> {
    CommandSpec::new("hello", "Say hello", |rest: &mut RestSender, inv: &Invocation<'_>| {
        let name = inv
            .options
            .get("name")
            .map(String::as_str)
            .unwrap_or("there");
        let mut message = MessageResponse::text(format!("Hello, {}!", name));
        message.components = vec![Component::action_row(vec![Component::button(
            ButtonStyle::Primary,
            "Wave back",
            format!("wave:{}", name).into_bytes(),
        )])];
        let reply = InteractionResponse::message(message);
        if let Err(e) = rest.respond_to_interaction(inv.interaction.id, &inv.interaction.token, &reply)
        {
            log::error!("hello reply failed: {}", e);
        }
    })
    .option(CommandOptionSpec::new("name", "Who to greet", OptionType::String))
}

fn on_wave(rest: &mut RestSender, interaction: &ferrocord::commands::Interaction, payload: &[u8]) {
    let Some(name) = payload.strip_prefix(b"wave:") else {
        log::debug!("click with unknown payload ignored");
        return;
    };
    let text = format!("{} waves back!", String::from_utf8_lossy(name));
    let reply = InteractionResponse::message(MessageResponse::text(text));
    if let Err(e) = rest.respond_to_interaction(interaction.id, &interaction.token, &reply) {
        log::error!("wave reply failed: {}", e);
    }
}

/// Clear `running` on the first interrupt so the tick loop can close the connection cleanly.
fn watch_ctrl_c(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            rt.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("interrupt received; stopping");
                        running.store(false, Ordering::SeqCst);
                    }
                    Err(e) => log::error!("listening for ctrl-c failed: {}", e),
                }
            })
        })?;
    Ok(())
}
