//! Chat command - interactive conversation with the assistant.

use folio_chat::{fetch_github_bio, ChatConfig, ChatSession, ModelTier, WorkerEvent};
use folio_local_ai::LocalServerRuntime;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub(crate) async fn run(
    tier: Option<ModelTier>,
    json: bool,
    github: Option<&str>,
) -> miette::Result<()> {
    let mut config = ChatConfig::from_env();

    if let Some(username) = github {
        match fetch_github_bio(username).await {
            Some(bio) => {
                if !json {
                    println!("Using GitHub bio of {} as context.", username);
                }
                config.persona = config.persona.with_context(bio);
            }
            None => eprintln!("Could not fetch a bio for {}; continuing without it.", username),
        }
    }

    let runtime = Arc::new(LocalServerRuntime::from_env());
    let mut session = ChatSession::new(runtime, config);
    let requested = tier.unwrap_or_else(|| session.initial_tier());

    start(&mut session, requested, json, false).await?;

    if !json {
        println!("Type a question, or /help for commands.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if !json {
            print!("> ");
            std::io::stdout().flush().ok();
        }

        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| miette::miette!("Failed to read input: {}", e))?
        else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if execute(&mut session, ReplCommand::parse(line), json)
            .await
            .is_break()
        {
            break;
        }
    }

    session.shutdown();
    Ok(())
}

/// Run one REPL command. Failures are reported and the REPL keeps going.
async fn execute(
    session: &mut ChatSession,
    command: ReplCommand<'_>,
    json: bool,
) -> ControlFlow<()> {
    match command {
        ReplCommand::Quit => return ControlFlow::Break(()),
        ReplCommand::Help => print_help(),
        ReplCommand::Clear => {
            session.clear_history();
            println!("History cleared.");
        }
        ReplCommand::Reset => match session.reset_preference() {
            Ok(()) => println!("Stored tier preference cleared."),
            Err(e) => eprintln!("Failed to reset preference: {}", e),
        },
        ReplCommand::Tier(Ok(tier)) => {
            if let Err(e) = start(session, tier, json, true).await {
                eprintln!("{:?}", e);
                match session.active_tier() {
                    Some(active) => eprintln!("Still on the {} tier.", active),
                    None => eprintln!("No model is loaded. Use /tier to load one."),
                }
            }
        }
        ReplCommand::Tier(Err(message)) => eprintln!("{}", message),
        ReplCommand::Unknown(command) => {
            eprintln!("Unknown command {}. Type /help for commands.", command)
        }
        ReplCommand::Message(text) => {
            if let Err(e) = ask(session, text, json).await {
                eprintln!("{:?}", e);
                if !session.is_started() {
                    eprintln!("No model is loaded. Use /tier to load one.");
                }
            }
        }
    }
    ControlFlow::Continue(())
}

async fn start(
    session: &mut ChatSession,
    tier: ModelTier,
    json: bool,
    remember: bool,
) -> miette::Result<()> {
    let mut display = LoadDisplay::new(json);
    let result = if remember {
        session
            .switch_tier(tier, |event| display.observe(event))
            .await
    } else {
        session.start(tier, |event| display.observe(event)).await
    };
    display.finish();

    let loaded = result.map_err(|e| miette::miette!("{}", e))?;
    if !json {
        if loaded == tier {
            println!("Ready ({} tier).", loaded);
        } else {
            println!("Ready ({} tier, fell back from {}).", loaded, tier);
        }
    }
    Ok(())
}

async fn ask(session: &mut ChatSession, text: &str, json: bool) -> miette::Result<()> {
    let result = if json {
        session.send_observed(text, print_json).await
    } else {
        session
            .send(text, |chunk| {
                print!("{}", chunk);
                std::io::stdout().flush().ok();
            })
            .await
    };

    result.map_err(|e| miette::miette!("{}", e))?;
    if !json {
        println!();
    }
    Ok(())
}

fn print_json(event: &WorkerEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("Failed to encode event: {}", e),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /tier <small|medium|large>  Switch model tier and remember the choice");
    println!("  /clear                      Clear the conversation");
    println!("  /reset                      Forget the stored tier");
    println!("  /quit                       Exit");
}

/// Shows load progress as a bar, or as JSON lines.
struct LoadDisplay {
    bar: Option<ProgressBar>,
}

impl LoadDisplay {
    fn new(json: bool) -> Self {
        let bar = (!json).then(|| {
            let bar = ProgressBar::new(100);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        });
        Self { bar }
    }

    fn observe(&mut self, event: &WorkerEvent) {
        let Some(bar) = &self.bar else {
            print_json(event);
            return;
        };

        match event {
            WorkerEvent::Initiate { message } => {
                bar.set_position(0);
                bar.set_message(message.clone());
            }
            WorkerEvent::Load {
                progress: Some(percent),
                ..
            } => bar.set_position(percent.round() as u64),
            WorkerEvent::FallbackModel { message, .. } => bar.println(message),
            WorkerEvent::Error { error } => bar.println(format!("Error: {}", error)),
            _ => {}
        }
    }

    fn finish(self) {
        if let Some(bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

/// One line of REPL input.
#[derive(Debug, PartialEq)]
enum ReplCommand<'a> {
    Message(&'a str),
    Tier(Result<ModelTier, String>),
    Clear,
    Reset,
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> ReplCommand<'a> {
    fn parse(line: &'a str) -> Self {
        if !line.starts_with('/') {
            return ReplCommand::Message(line);
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or(line);
        match command {
            "/quit" | "/exit" => ReplCommand::Quit,
            "/help" => ReplCommand::Help,
            "/clear" => ReplCommand::Clear,
            "/reset" => ReplCommand::Reset,
            "/tier" => ReplCommand::Tier(match parts.next() {
                Some(name) => name.parse().map_err(|e| format!("{}", e)),
                None => Err("Usage: /tier <small|medium|large>".to_string()),
            }),
            other => ReplCommand::Unknown(other),
        }
    }
}
