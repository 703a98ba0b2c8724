use std::error::Error;
use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use whispernet::audio::{decode_pcm, AudioClip, AudioSink, PcmFileSink};
use whispernet::bus::{LocalBus, RoomTransport};
use whispernet::cli::{parse_repl_line, Args, Command, ReplCommand, REPL_HELP};
use whispernet::config::{load_config, ChatConfig};
use whispernet::error::{ChatError, Result as ChatResult};
use whispernet::generation::{ContentGenerator, GeminiClient};
use whispernet::identity::{SessionId, SessionIdentity};
use whispernet::message::{ChatMessage, RoomName};
use whispernet::session::{RoomController, RoomSession};

type BoxResult<T> = Result<T, Box<dyn Error>>;

/// How long the demo waits for a peer to see a message.
const DEMO_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

fn init_logging(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_message(message: &ChatMessage, me: &SessionId) -> String {
    let time = format!("[{}]", message.display_time()).dimmed();
    if message.is_from(me) {
        format!("{} {}: {}", time, "you".bright_green().bold(), message.text())
    } else {
        format!(
            "{} {}: {}",
            time,
            message.sender_id().short().bright_cyan(),
            message.text()
        )
    }
}

fn print_welcome(room: &RoomName, me: &SessionId) {
    println!(
        "{} {}",
        "Welcome to".bright_magenta(),
        format!("#{room}").bright_magenta().bold()
    );
    println!(
        "  You are anonymous here ({}). Nothing leaves this machine and the",
        me.short().bright_white()
    );
    println!("  room forgets everything once you leave.");
}

// ---------------------------------------------------------------------------
// Chat REPL
// ---------------------------------------------------------------------------

/// One simulated context: its own identity and controller on the shared bus.
struct Tab {
    index: usize,
    controller: RoomController,
}

impl Tab {
    fn new(index: usize, transport: Arc<dyn RoomTransport>) -> Self {
        Self {
            index,
            controller: RoomController::new(Arc::new(SessionIdentity::new()), transport),
        }
    }

    fn room(&self) -> Option<&RoomName> {
        self.controller.session().map(RoomSession::room)
    }

    /// Enter `name` and print incoming messages while this tab has focus.
    fn join(&mut self, name: &str, focus: &Arc<AtomicUsize>) -> ChatResult<()> {
        if self.room().is_some_and(|r| r.as_str() == name.trim()) {
            println!("{}", "already in that room".dimmed());
            return Ok(());
        }
        let index = self.index;
        let focused = focus.load(Ordering::SeqCst) == index;
        let session = self.controller.enter_room(name)?;
        let me = session.session_id();
        if focused && session.messages().is_empty() {
            print_welcome(session.room(), &me);
        }

        let focus = Arc::clone(focus);
        session.observe(move |message| {
            if focus.load(Ordering::SeqCst) == index {
                println!("\r{}", render_message(message, &me));
            }
        });
        Ok(())
    }
}

fn prompt(tab: &Tab) {
    let room = tab
        .room()
        .map(|r| format!("#{r}"))
        .unwrap_or_else(|| "(no room)".to_string());
    print!("{} {}> ", format!("[tab {}]", tab.index).bright_yellow(), room);
    let _ = std::io::stdout().flush();
}

/// Apply one REPL command. Returns `false` when the REPL should exit.
fn dispatch(
    command: ReplCommand,
    tabs: &mut [Tab],
    current: &mut usize,
    focus: &Arc<AtomicUsize>,
) -> ChatResult<bool> {
    match command {
        ReplCommand::Tab(k) => {
            let index = k
                .checked_sub(1)
                .filter(|i| *i < tabs.len())
                .ok_or_else(|| {
                    ChatError::InvalidInput(format!("tabs are numbered 1 to {}", tabs.len()))
                })?;
            *current = index;
            focus.store(k, Ordering::SeqCst);
            println!("{}", format!("switched to tab {k}").dimmed());
        }
        ReplCommand::Join(name) => tabs[*current].join(&name, focus)?,
        ReplCommand::Leave => match tabs[*current].controller.leave_room() {
            Some(room) => println!("{}", format!("left #{room}").dimmed()),
            None => println!("{}", "not in a room".dimmed()),
        },
        ReplCommand::Who => {
            let tab = &tabs[*current];
            let id = tab.controller.current_session_id()?;
            let room = tab.room().map(ToString::to_string).unwrap_or_default();
            println!("{}: {}", "id".bright_yellow(), id);
            println!("{}: {}", "room".bright_yellow(), room);
        }
        ReplCommand::History => {
            let tab = &tabs[*current];
            let me = tab.controller.current_session_id()?;
            for message in tab.controller.messages() {
                println!("{}", render_message(&message, &me));
            }
        }
        ReplCommand::Help => println!("{REPL_HELP}"),
        ReplCommand::Quit => return Ok(false),
        ReplCommand::Say(text) => {
            tabs[*current].controller.send(&text)?;
        }
    }
    Ok(true)
}

async fn run_chat(config: &ChatConfig, room: Option<String>, tabs: Option<usize>) -> BoxResult<()> {
    let count = tabs.unwrap_or(config.tabs).max(1);
    let bus = LocalBus::with_capacity(config.channel_capacity);
    let transport: Arc<dyn RoomTransport> = Arc::new(bus.clone());
    let focus = Arc::new(AtomicUsize::new(1));
    let mut tabs: Vec<Tab> = (1..=count)
        .map(|index| Tab::new(index, Arc::clone(&transport)))
        .collect();

    println!("\n{}", "WHISPERNET".bright_cyan().bold());
    println!("{}: {}", "Contexts".bright_yellow(), count);
    println!("{}", "Type /help for commands.".dimmed());
    println!("{}", "=".repeat(50).bright_blue());

    if let Some(room) = room.or_else(|| config.default_room.clone()) {
        for tab in &mut tabs {
            tab.join(&room, &focus)?;
        }
    }

    let mut current = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&tabs[current]);
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        match parse_repl_line(&line).and_then(|command| match command {
            Some(command) => dispatch(command, &mut tabs, &mut current, &focus),
            None => Ok(true),
        }) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("{}", err.to_string().bright_red()),
        }
    }

    for tab in &mut tabs {
        tab.controller.leave_room();
    }
    bus.shutdown();
    Ok(())
}

// ---------------------------------------------------------------------------
// Demo
// ---------------------------------------------------------------------------

/// Messages `session` receives from peers, in arrival order.
fn arrivals(session: &RoomSession) -> mpsc::UnboundedReceiver<ChatMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    let me = session.session_id();
    session.observe(move |message| {
        if !message.is_from(&me) {
            let _ = tx.send(message.clone());
        }
    });
    rx
}

async fn run_demo(config: &ChatConfig, room: &str) -> BoxResult<()> {
    let bus = LocalBus::with_capacity(config.channel_capacity);
    let transport: Arc<dyn RoomTransport> = Arc::new(bus.clone());
    let mut tabs = [
        RoomController::new(Arc::new(SessionIdentity::new()), Arc::clone(&transport)),
        RoomController::new(Arc::new(SessionIdentity::new()), Arc::clone(&transport)),
    ];

    let mut inboxes = Vec::with_capacity(tabs.len());
    for tab in &mut tabs {
        inboxes.push(arrivals(tab.enter_room(room)?));
    }

    let script = [
        (0, "hello? is anyone else here?"),
        (1, "just me, taking a breath."),
        (0, "same. see you around."),
    ];
    for (from, text) in script {
        let to = 1 - from;
        let sent = tabs[from].send(text)?;
        let me = tabs[from].current_session_id()?;
        println!("{} {}", format!("tab {}", from + 1).bright_yellow(), render_message(&sent, &me));

        let received = tokio::time::timeout(DEMO_DELIVERY_TIMEOUT, inboxes[to].recv())
            .await
            .ok()
            .flatten()
            .ok_or_else(|| ChatError::TransportUnavailable("peer never saw the message".to_string()))?;
        let peer = tabs[to].current_session_id()?;
        println!("{} {}", format!("tab {}", to + 1).bright_yellow(), render_message(&received, &peer));
    }

    for (i, tab) in tabs.iter().enumerate() {
        println!("{}: {} messages", format!("tab {} history", i + 1).bright_blue(), tab.messages().len());
    }
    for tab in &mut tabs {
        tab.leave_room();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

async fn run_imagine(config: &ChatConfig, prompt: &str) -> BoxResult<()> {
    let client = GeminiClient::from_config(&config.generation)?;
    eprintln!("{}", "Generating image...".bright_magenta());
    let uri = client.generate_image(prompt).await?;
    println!("{uri}");
    Ok(())
}

async fn run_speak(config: &ChatConfig, script: &str, out: &std::path::Path) -> BoxResult<()> {
    let client = GeminiClient::from_config(&config.generation)?;
    eprintln!("{}", "Synthesizing speech...".bright_magenta());
    let encoded = client.generate_speech(script).await?;
    let clip = decode_pcm(&encoded, config.generation.sample_rate, 1)?;
    let mut sink = PcmFileSink::new(out);
    sink.play(&clip)?;
    println!(
        "{} {:.1}s of {} Hz mono PCM to {}",
        "Wrote".bright_green(),
        clip.duration().as_secs_f64(),
        clip.sample_rate,
        sink.path().display()
    );
    play_on_device(clip).await
}

/// Play `clip` on the default output device. Ctrl-C stops playback.
#[cfg(feature = "playback")]
async fn play_on_device(clip: AudioClip) -> BoxResult<()> {
    use whispernet::audio::DeviceSink;

    let mut sink = match DeviceSink::default_output() {
        Ok(sink) => sink,
        Err(err) => {
            tracing::warn!("skipping playback: {err}");
            return Ok(());
        }
    };
    let controls = sink.controls();
    eprintln!("{}", "Playing... (Ctrl-C to stop)".bright_magenta());
    let mut playback = tokio::task::spawn_blocking(move || sink.play(&clip));
    tokio::select! {
        result = &mut playback => result??,
        _ = tokio::signal::ctrl_c() => {
            controls.stop();
            playback.await??;
        }
    }
    Ok(())
}

#[cfg(not(feature = "playback"))]
async fn play_on_device(_clip: AudioClip) -> BoxResult<()> {
    tracing::debug!("built without the playback feature; audio written only");
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> BoxResult<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_logging(&config.log_filter);
    tracing::info!(config = %args.config.display(), "starting whispernet");

    match args.command {
        Command::Chat { room, tabs } => run_chat(&config, room, tabs).await,
        Command::Demo { room } => run_demo(&config, &room).await,
        Command::Imagine { prompt } => run_imagine(&config, &prompt).await,
        Command::Speak { script, out } => run_speak(&config, &script, &out).await,
    }
}
