// Terminal chat session.
// Plays the landing view (pick or type a prompt) and then the chat view,
// driving the same controller the web UI uses.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info};

use crate::chat_store::ChatStore;
use crate::clarification::{ClarificationSequence, Step, Typewriter};
use crate::controller::{ConversationController, ConversationEvent};
use crate::conversation::ConversationConfig;
use crate::message::{Answer, Message, MessageBody};
use crate::preview::{Field, PreviewPanel};
use crate::questions::EXAMPLE_PROMPTS;

type InputLines = Lines<BufReader<Stdin>>;

const HELP: &str = "Commands: /fix, /restore <version>, /report, /set <field> <value>, /preview, /clear, /quit";

/// Runs an interactive session. Returns once the user quits, clears the
/// conversation, or closes stdin.
pub async fn run_chat_session(
    store: ChatStore,
    config: Arc<ConversationConfig>,
    prompt: Option<String>,
) -> Result<()> {
    info!("Starting chat session...");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let prompt = match prompt {
        Some(prompt) => prompt,
        None => match ask_for_prompt(&mut lines).await? {
            Some(prompt) => prompt,
            None => {
                println!("No prompt provided. Nothing to build.");
                return Ok(());
            }
        },
    };
    store
        .start_conversation(&prompt)
        .await
        .context("Failed to start conversation")?;

    let controller = ConversationController::mount(store, config.clone())
        .await
        .context("Failed to open chat view")?;
    let mut events = controller.subscribe();
    let mut preview = PreviewPanel::new();

    for message in controller.snapshot().await.messages {
        print_message(&message);
    }
    if controller.resume().await? {
        println!("Space is thinking...");
        controller.settled().await;
    }
    let result = chat_loop(&controller, &mut events, &mut lines, &mut preview, &config).await;
    controller.dispose().await;
    info!("Chat session finished.");
    result
}

async fn ask_for_prompt(lines: &mut InputLines) -> Result<Option<String>> {
    println!("What can I help you ship?");
    println!("Try these examples:");
    for (i, example) in EXAMPLE_PROMPTS.iter().enumerate() {
        println!("  {}. {}", i + 1, example);
    }
    prompt_marker("> ")?;
    let Some(line) = lines.next_line().await? else {
        return Ok(None);
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let chosen = line
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| EXAMPLE_PROMPTS.get(i));
    Ok(Some(chosen.map(|e| e.to_string()).unwrap_or_else(|| line.to_string())))
}

async fn chat_loop(
    controller: &ConversationController,
    events: &mut broadcast::Receiver<ConversationEvent>,
    lines: &mut InputLines,
    preview: &mut PreviewPanel,
    config: &ConversationConfig,
) -> Result<()> {
    println!("{}", HELP);
    loop {
        if !drain_events(controller, events, lines, preview, config).await? {
            return Ok(());
        }
        let composer = controller.snapshot().await.composer;
        if !composer.is_empty() {
            println!("Draft: {} (press Enter to send)", composer);
        }
        prompt_marker("> ")?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        let outcome = match command {
            "/quit" | "/exit" => return Ok(()),
            "/help" => {
                println!("{}", HELP);
                Ok(())
            }
            "/fix" => controller.fix_error().await.map(|_| ()),
            "/restore" => match rest.trim().parse::<u32>() {
                Ok(version) => controller.restore_version(version).await.map(|_| ()),
                Err(_) => {
                    println!("Usage: /restore <version>");
                    Ok(())
                }
            },
            "/report" => {
                let snapshot = controller.snapshot().await;
                match snapshot.messages.iter().rev().find(|m| m.is_error()) {
                    Some(error) => controller.report_issue(error.id).await.map(|_| {
                        println!("Issue reported. Thanks!");
                    }),
                    None => {
                        println!("There is no error to report.");
                        Ok(())
                    }
                }
            }
            "/set" => {
                let (field, value) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
                match preview.set_field_by_name(field, value.trim()) {
                    Ok(_) => print_preview(preview),
                    Err(e) => println!("{}", e),
                }
                Ok(())
            }
            "/preview" => {
                print_preview(preview);
                Ok(())
            }
            "/clear" => {
                controller.clear().await?;
                println!("Conversation cleared.");
                return Ok(());
            }
            _ => {
                let text = if line.is_empty() { composer.as_str() } else { line };
                if text.is_empty() {
                    continue;
                }
                match controller.submit(text).await {
                    Ok(_) => {
                        println!("Space is thinking...");
                        controller.settled().await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = outcome {
            println!("{}", e);
        }
    }
}

/// Prints everything published since the last call. Returns false when stdin
/// closed during a clarification sequence.
async fn drain_events(
    controller: &ConversationController,
    events: &mut broadcast::Receiver<ConversationEvent>,
    lines: &mut InputLines,
    preview: &mut PreviewPanel,
    config: &ConversationConfig,
) -> Result<bool> {
    loop {
        match events.try_recv() {
            Ok(ConversationEvent::MessageAppended { message }) => {
                preview.decorate(Some(&message), controller.is_loading());
                print_message(&message);
                if let MessageBody::Clarification { .. } = message.body {
                    let mut sequence = {
                        let mut rng = rand::rng();
                        ClarificationSequence::expand(&message, &config.question_bank, &mut rng)?
                    };
                    if !play_sequence(&mut sequence, controller, lines, config.typing_speed).await? {
                        return Ok(false);
                    }
                }
            }
            Ok(ConversationEvent::ComposerChanged { .. })
            | Ok(ConversationEvent::Cleared)
            | Ok(ConversationEvent::Replaced)
            | Ok(ConversationEvent::TurnReleased) => {}
            Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "Chat session lagged behind events"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(true),
        }
    }
}

async fn play_sequence(
    sequence: &mut ClarificationSequence,
    controller: &ConversationController,
    lines: &mut InputLines,
    speed: Duration,
) -> Result<bool> {
    if let Some(intro) = sequence.current_text() {
        type_out(&mut std::io::stdout(), &intro.to_string(), speed).await?;
    }
    sequence.skip_typing();

    while let Step::Question(index) = sequence.step() {
        if let Some(question) = sequence.current_text() {
            type_out(&mut std::io::stdout(), &question.to_string(), speed).await?;
        }
        let answer = loop {
            prompt_marker("  [y/n] ")?;
            let Some(line) = lines.next_line().await? else {
                return Ok(false);
            };
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => break Answer::Yes,
                "n" | "no" => break Answer::No,
                _ => println!("  Please answer y or n."),
            }
        };
        let intent = sequence.resolve(index, answer)?;
        controller.answer_clarification(&intent).await?;
    }

    if let Some(outro) = sequence.current_text() {
        type_out(&mut std::io::stdout(), &outro.to_string(), speed).await?;
    }
    sequence.skip_typing();
    Ok(true)
}

async fn type_out<W: Write>(out: &mut W, text: &str, speed: Duration) -> std::io::Result<()> {
    let mut writer = Typewriter::new(text);
    let mut printed = 0;
    loop {
        tokio::time::sleep(speed).await;
        let done = writer.tick();
        let visible = writer.visible();
        out.write_all(visible[printed..].as_bytes())?;
        out.flush()?;
        printed = visible.len();
        if done {
            break;
        }
    }
    writeln!(out)
}

fn prompt_marker(marker: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(marker.as_bytes())?;
    stdout.flush()
}

pub fn format_message(message: &Message) -> String {
    match &message.body {
        MessageBody::User => format!("You: {}", message.content),
        MessageBody::Version { version, features } => {
            let mut out = format!("✅ Version {} created\n   Features included:", version);
            for feature in features {
                out.push_str(&format!("\n   - {}", feature));
            }
            out
        }
        MessageBody::Error => format!(
            "❌ Error occurred: {}\n   /fix to fix error, /restore <version>, /report to report issue",
            message.content
        ),
        MessageBody::Clarification { .. } => format!("Space: {}", message.content),
    }
}

fn print_message(message: &Message) {
    println!("{}", format_message(message));
}

fn print_preview(preview: &PreviewPanel) {
    println!("Carbon Footprint Calculator");
    for field in Field::ALL {
        println!("  {}: {}", field.label(), preview.value(field));
    }
    println!("  Estimated Carbon Emissions: {} tonnes CO2e/year", preview.display_total());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_lists_features() {
        let message = Message::version("v", 2, vec!["Charts".into(), "Export".into()]);
        let text = format_message(&message);
        assert!(text.starts_with("✅ Version 2 created"));
        assert!(text.contains("- Charts"));
        assert!(text.contains("- Export"));
    }

    #[test]
    fn test_format_error_offers_recovery() {
        let text = format_message(&Message::error("Build failed"));
        assert!(text.contains("Build failed"));
        assert!(text.contains("/fix"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_out_writes_whole_text() {
        let mut out = Vec::new();
        type_out(&mut out, "Héllo", Duration::from_millis(30)).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Héllo\n");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_out_reports_write_errors() {
        let err = type_out(&mut BrokenPipe, "hi", Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_format_user_and_clarification() {
        assert_eq!(format_message(&Message::user("Hi")), "You: Hi");
        assert_eq!(
            format_message(&Message::clarification("Checking requirements", "q?")),
            "Space: Checking requirements"
        );
    }
}
