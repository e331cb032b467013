// src/cli/chat.rs — Interactive REPL

use std::io::Write;
use std::sync::Arc;

use crossterm::style::Stylize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::core::conversation::{ConversationController, ConversationSettings};
use crate::core::orchestrator::{Orchestrator, RetryPolicy, TurnOutcome, TurnSummary};
use crate::core::system_prompt::load_system_prompt;
use crate::core::types::{ConversationState, Role};
use crate::infra::config::{Config, PlayerConfig};
use crate::player::process::ProcessEndpoint;
use crate::player::Player;
use crate::provider::{ModelProvider, ModelRef};

/// Run the interactive session until `/quit`, EOF or Ctrl-C at the prompt.
/// The audio engine is released on every exit path.
pub async fn run_chat(
    provider: Arc<dyn ModelProvider>,
    model_ref: &ModelRef,
    config: &Config,
) -> anyhow::Result<()> {
    let mut settings =
        ConversationSettings::new(model_ref.model.clone(), load_system_prompt(&config.model)?);
    settings.max_tokens = config.model.max_tokens;
    settings.temperature = config.model.temperature;
    settings.languages = config.extractor.languages.clone();

    let conversation = Arc::new(ConversationController::new(provider, settings));
    let player = Arc::new(Player::new());

    let started = start_engine_until(&player, &config.player, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await;
    if !started {
        eprintln!();
        player.shutdown().await;
        return Ok(());
    }

    eprintln!(
        "{} v{} | {} | engine: {}",
        "riff".cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        model_ref,
        if player.is_ready() { "ready" } else { "not running" },
    );
    eprintln!("{}", "Describe some music. /help for commands, Ctrl-C cancels.\n".dim());

    let orchestrator = Orchestrator::new(
        conversation.clone(),
        player.clone(),
        RetryPolicy {
            max_corrections: config.retry.max_corrections,
        },
    )
    .with_progress(super::progress::terminal_progress());

    let mut printer = ReplyPrinter::new(conversation.subscribe(), std::io::stdout());
    let result = repl(&orchestrator, &mut printer).await;

    player.shutdown().await;
    result
}

/// Start the audio engine unless `interrupt` resolves first.
/// Returns `false` when interrupted; the half-started engine is dropped.
async fn start_engine_until(
    player: &Player,
    cfg: &PlayerConfig,
    interrupt: impl std::future::Future<Output = ()>,
) -> bool {
    tokio::select! {
        biased;
        _ = interrupt => false,
        _ = start_engine(player, cfg) => true,
    }
}

async fn start_engine(player: &Player, cfg: &PlayerConfig) {
    let endpoint = match ProcessEndpoint::spawn(cfg) {
        Ok(endpoint) => Arc::new(endpoint),
        Err(e) => {
            eprintln!("{} {}", "warning:".yellow(), e);
            return;
        }
    };
    if let Err(e) = player
        .init(endpoint, cfg.ready_timeout(), cfg.ready_poll_interval())
        .await
    {
        eprintln!("{} {}", "warning:".yellow(), e);
    }
}

async fn repl<W: Write>(
    orchestrator: &Orchestrator,
    printer: &mut ReplyPrinter<W>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", ">".cyan());
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };
        let Some(line) = line else { break };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if input.starts_with('/') {
            match handle_slash_command(input, orchestrator).await {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        let summary = run_turn(orchestrator, input, printer).await;
        tracing::debug!(outcome = ?summary.outcome, corrections = summary.corrections, "Turn done");
        report(&summary);
    }

    Ok(())
}

/// Drive one turn, printing the reply as it streams. Ctrl-C while it runs
/// cancels the streaming reply. Everything the turn wrote to the
/// conversation is printed before this returns.
async fn run_turn<W: Write>(
    orchestrator: &Orchestrator,
    input: &str,
    printer: &mut ReplyPrinter<W>,
) -> TurnSummary {
    let turn = orchestrator.handle_turn(input);
    tokio::pin!(turn);

    let summary = loop {
        tokio::select! {
            summary = &mut turn => break summary,
            Ok(()) = printer.rx.changed() => printer.print_pending(),
            _ = tokio::signal::ctrl_c() => {
                if orchestrator.conversation().cancel() {
                    eprintln!("{}", "[cancelled]".dim());
                }
            }
        }
    };
    printer.print_pending();
    summary
}

fn report(summary: &TurnSummary) {
    if let TurnOutcome::GaveUp { last_code, .. } = &summary.outcome {
        eprintln!("{}", "Last attempted pattern:".dim());
        eprintln!("{}", last_code.as_str().dim());
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_slash_command(input: &str, orchestrator: &Orchestrator) -> Flow {
    let cmd = input.split_whitespace().next().unwrap_or(input);
    let player = orchestrator.player();
    let conversation = orchestrator.conversation();

    match cmd {
        "/stop" => {
            player.stop().await;
            eprintln!("  Stopped.");
        }

        "/status" => {
            let status = player.status();
            eprintln!("  Playback: {}", status.state);
            eprintln!(
                "  Engine: {}",
                if player.is_ready() { "ready" } else { "not running" }
            );
            eprintln!(
                "  Corrections: up to {} per turn",
                orchestrator.policy().max_corrections
            );
            eprintln!("  Messages: {}", conversation.messages().len());
            if let Some(error) = status.error {
                eprintln!("  Error: {}", error.red());
            }
        }

        "/pattern" => {
            let status = player.status();
            match (status.current_pattern, status.last_attempted) {
                (Some(current), _) => {
                    eprintln!("  Playing:");
                    println!("{current}");
                }
                (None, Some(attempted)) => {
                    eprintln!("  Nothing playing. Last attempt:");
                    println!("{attempted}");
                }
                (None, None) => eprintln!("  No pattern yet."),
            }
        }

        "/history" => {
            let messages = conversation.messages();
            if messages.is_empty() {
                eprintln!("  No messages yet.");
            }
            for (i, m) in messages.iter().enumerate() {
                let marker = if m.pattern.is_some() { " *" } else { "" };
                eprintln!(
                    "  {}. {:<9} {}{}",
                    i + 1,
                    m.role.to_string(),
                    preview(&m.content, 60),
                    marker
                );
            }
        }

        "/help" => {
            eprintln!("Slash commands:");
            eprintln!("  /stop              Stop playback");
            eprintln!("  /status            Playback state and last error");
            eprintln!("  /pattern           Print the current pattern");
            eprintln!("  /history           List messages (* = has pattern)");
            eprintln!("  /help              Show this help");
            eprintln!("  /quit, quit, exit  End session");
            eprintln!("Ctrl-C cancels a streaming reply, or quits at the prompt.");
        }

        "/quit" | "/exit" => return Flow::Quit,

        _ => {
            eprintln!("Unknown command: {}. Type /help for commands.", cmd);
        }
    }
    Flow::Continue
}

/// First line of `text`, cut to `max` chars.
fn preview(text: &str, max: usize) -> String {
    let first = text.lines().next().unwrap_or("");
    if first.chars().count() > max {
        let cut: String = first.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else if text.lines().nth(1).is_some() {
        format!("{first} ...")
    } else {
        first.to_string()
    }
}

/// Writes assistant replies from conversation snapshots to `out`.
struct ReplyPrinter<W> {
    rx: watch::Receiver<ConversationState>,
    renderer: ReplyRenderer,
    out: W,
}

impl<W: Write> ReplyPrinter<W> {
    fn new(rx: watch::Receiver<ConversationState>, out: W) -> Self {
        Self {
            rx,
            renderer: ReplyRenderer::default(),
            out,
        }
    }

    /// Print whatever the latest snapshot adds to the screen.
    fn print_pending(&mut self) {
        let output = self.renderer.update(&self.rx.borrow_and_update());
        if let Some(text) = output {
            self.out.write_all(text.as_bytes()).ok();
            self.out.flush().ok();
        }
    }
}

/// Turns successive conversation snapshots into text to print.
#[derive(Default)]
struct ReplyRenderer {
    /// Id of the reply being shown.
    current: Option<String>,
    /// Text of that reply already printed.
    shown: String,
    /// Last reply printed to completion.
    last_done: Option<String>,
}

impl ReplyRenderer {
    fn update(&mut self, state: &ConversationState) -> Option<String> {
        if let Some(msg) = &state.in_flight {
            let mut out = String::new();
            if self.current.as_deref() != Some(msg.id.as_str()) {
                self.current = Some(msg.id.clone());
                self.shown.clear();
                out.push('\n');
            }
            if let Some(rest) = msg.content.strip_prefix(self.shown.as_str()) {
                out.push_str(rest);
            }
            self.shown.clone_from(&msg.content);
            return (!out.is_empty()).then_some(out);
        }

        // The reply was finalized; its content may have been replaced.
        let last = state.messages.last().filter(|m| m.role == Role::Assistant)?;
        if self.last_done.as_deref() == Some(last.id.as_str()) {
            return None;
        }
        self.last_done = Some(last.id.clone());

        let streamed = self.current.take().as_deref() == Some(last.id.as_str());
        let mut out = match last.content.strip_prefix(self.shown.as_str()) {
            Some(rest) if streamed => rest.to_string(),
            _ => format!("\n{}", last.content),
        };
        out.push_str("\n\n");
        self.shown.clear();
        Some(out)
    }
}
