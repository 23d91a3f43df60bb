use anyhow::{anyhow, bail, Context, Result};
use chatwright::state::{Role, UserInput};
use chatwright::storage::JsonFileStore;
use chatwright::tools::FeatureFlags;
use chatwright::{Config, ConversationManager, ConversationStreamUpdate, StopReason, TurnOutcome};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const TITLE_WAIT: Duration = Duration::from_secs(5);

const HELP: &str = "\
commands:
  /new <name>            start a named session
  /sessions              list sessions
  /switch <n>            make session n active
  /rename <n> <name>     rename session n
  /delete <n>            delete session n
  /history               show the active session
  /edit <text>           replace your last message and regenerate
  /redo                  regenerate the last response
  /revamp <change>       rewrite the last response
  /system <prompt>       set the system prompt
  /tools <web|image|learn|cot> <on|off>
  /quit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    config.validate()?;

    let storage = Arc::new(JsonFileStore::new(&config.data_dir));
    let mut manager = ConversationManager::new(config, storage)
        .await
        .context("failed to load sessions")?;

    let stop = manager.stop_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stop.is_streaming() {
                stop.stop(StopReason::User);
            } else {
                std::process::exit(0);
            }
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(print_updates(rx));

    println!("chatwright: type a message, or /help");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if let Err(error) = manager.apply_session_titles().await {
            tracing::warn!(error = %error, "could not apply session titles");
        }
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        if let Err(error) = run_command(&mut manager, line, &tx).await {
            eprintln!("error: {error:#}");
        }
    }

    if tokio::time::timeout(TITLE_WAIT, manager.wait_for_session_titles())
        .await
        .is_err()
    {
        tracing::warn!("gave up waiting for session titles");
    }
    manager.save_current_session().await?;
    Ok(())
}

async fn run_command(
    manager: &mut ConversationManager,
    line: &str,
    tx: &mpsc::UnboundedSender<ConversationStreamUpdate>,
) -> Result<()> {
    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "/help" => println!("{HELP}"),
        "/new" => {
            manager.sessions_mut().create(rest).await?;
            println!("started '{rest}'");
        }
        "/sessions" => {
            let current = manager.sessions().current_index();
            for (index, session) in manager.sessions().sessions().iter().enumerate() {
                let marker = if Some(index) == current { "*" } else { " " };
                println!(
                    "{marker} {index}: {} ({} messages)",
                    session.name,
                    session.messages.len()
                );
            }
        }
        "/switch" => manager.sessions_mut().switch_to(parse_index(rest)?).await?,
        "/rename" => {
            let (index, name) = rest.split_once(' ').unwrap_or((rest, ""));
            manager
                .sessions_mut()
                .rename(parse_index(index)?, name)
                .await?;
        }
        "/delete" => manager.sessions_mut().delete(parse_index(rest)?).await?,
        "/history" => {
            if let Some(history) = manager.history() {
                for (index, message) in history.filter_visible() {
                    let label = match (&message.role, &message.name) {
                        (_, Some(tool)) => format!("tool:{tool}"),
                        (Role::User, None) => "you".to_string(),
                        _ => "assistant".to_string(),
                    };
                    println!("[{index}] {label}: {}", message.content);
                    for url in &message.generated_images {
                        println!("      image: {url}");
                    }
                }
            }
        }
        "/edit" => {
            let index = latest_index(manager, Role::User)?;
            report(
                manager
                    .edit_user_message(index, UserInput::text(rest), Some(tx))
                    .await?,
            );
        }
        "/redo" => {
            let index = latest_index(manager, Role::Assistant)?;
            report(manager.redo_assistant_message(index, Some(tx)).await?);
        }
        "/revamp" => {
            let index = latest_index(manager, Role::Assistant)?;
            report(
                manager
                    .revamp_assistant_message(index, rest, Some(tx))
                    .await?,
            );
        }
        "/system" => {
            manager.set_system_prompt(Some(rest.to_string())).await?;
        }
        "/tools" => {
            let flags = toggle_tool(manager.feature_flags(), rest)?;
            manager.set_feature_flags(flags).await?;
            println!("{flags:?}");
        }
        _ if command.starts_with('/') => println!("unknown command, try /help"),
        _ => report(
            manager
                .send_message(UserInput::text(line), Some(tx))
                .await?,
        ),
    }
    Ok(())
}

fn report(outcome: TurnOutcome) {
    if let TurnOutcome::Failed = outcome {
        eprintln!("(response failed)");
    }
}

fn parse_index(text: &str) -> Result<usize> {
    text.trim()
        .parse()
        .with_context(|| format!("expected a session number, got '{text}'"))
}

/// Latest message with `role`, skipping tool results.
fn latest_index(manager: &ConversationManager, role: Role) -> Result<usize> {
    manager
        .history()
        .and_then(|history| {
            history
                .iter()
                .rposition(|message| message.role == role && !message.is_tool_result())
        })
        .ok_or_else(|| anyhow!("no {role:?} message in this session"))
}

fn toggle_tool(mut flags: FeatureFlags, args: &str) -> Result<FeatureFlags> {
    let (tool, state) = args.split_once(' ').unwrap_or((args, ""));
    let enabled = chatwright::util::parse_bool_str(state.trim()).unwrap_or(true);
    match tool {
        "web" => flags.web_grounding = enabled,
        "image" => flags.image_generation = enabled,
        "learn" => flags.learning = enabled,
        "cot" => flags.multi_turn_cot = enabled,
        other => bail!("unknown tool '{other}', expected web, image, learn or cot"),
    }
    Ok(flags)
}

async fn print_updates(mut rx: mpsc::UnboundedReceiver<ConversationStreamUpdate>) {
    let mut stdout = std::io::stdout();
    while let Some(update) = rx.recv().await {
        match update {
            ConversationStreamUpdate::Delta { text, .. } => {
                let _ = write!(stdout, "{text}");
            }
            ConversationStreamUpdate::ToolProcessing { name, .. } => {
                let _ = writeln!(stdout, "\n[using {name}...]");
            }
            ConversationStreamUpdate::ToolCompleted { name, .. } => {
                let _ = writeln!(stdout, "[{name} done]");
            }
            ConversationStreamUpdate::TurnFinished(_) => {
                let _ = writeln!(stdout);
            }
            ConversationStreamUpdate::AssistantStarted { .. } => {}
        }
        let _ = stdout.flush();
    }
}
