use clap::{Parser, Subcommand};
use joshua::config::EndpointConfig;
use joshua::upload::Attachment;
use joshua::{ChatClient, ClientEvent, ConnectionEvent, ConnectionHandle, MessageBody, Role, SubmitError};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "joshua")]
#[command(about = "Joshua CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: JOSHUA_CONFIG_PATH or ~/.joshua/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Chat with the backend over WebSocket (interactive). Reconnects automatically.
    Chat {
        /// Config file path (default: JOSHUA_CONFIG_PATH or ~/.joshua/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Backend host (default from JOSHUA_HOST, config, or 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Backend port (default from config or 8768)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

const HELP: &str = "commands:
  /attach <path>         show an image (or a file name) in the conversation
  /caps                  show the capabilities the server advertised
  /connect <host[:port]> switch to another backend (reconnects now)
  /save <path>           write the conversation as an HTML page
  /help                  show this help
  /exit, /quit           leave";

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("joshua {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, host, port }) => {
            if let Err(e) = run_chat(config, host, port).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(joshua::config::default_config_path);
    let dir = joshua::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (config, _) = joshua::config::load_config(config_path)?;
    let mut endpoint = joshua::config::resolve_endpoint(&config, host, port);
    println!("connecting to {} (/help for commands)", endpoint.url());

    let (handle, mut events, task) =
        joshua::connection::spawn(endpoint.clone(), config.reconnect.clone());
    let mut client = ChatClient::new();
    let mut view = TerminalView::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            ev = events.recv() => {
                let Some(ev) = ev else { break };
                report_connection_event(&ev);
                client.apply(&ev);
                view.render(&mut client)?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let flow = handle_input(&mut client, &handle, &mut endpoint, line.trim());
                view.render(&mut client)?;
                if matches!(flow, Flow::Quit) {
                    break;
                }
            }
        }
    }

    handle.shutdown();
    let _ = task.await;
    Ok(())
}

fn report_connection_event(ev: &ConnectionEvent) {
    match ev {
        ConnectionEvent::Connecting { url } => log::debug!("dialling {}", url),
        ConnectionEvent::ReconnectScheduled { delay, attempt } => {
            eprintln!("[reconnecting in {}s, attempt {}]", delay.as_secs_f32(), attempt);
        }
        _ => {}
    }
}

/// A line starting with `/`, split into the command word and its argument.
#[derive(Debug, PartialEq)]
enum SlashCommand<'a> {
    Quit,
    Help,
    Caps,
    Attach(&'a str),
    Connect(&'a str),
    Save(&'a str),
    /// Known command with a missing argument; carries the usage line.
    Usage(&'static str),
    Unknown(&'a str),
}

/// `None` for ordinary chat input.
fn parse_command(input: &str) -> Option<SlashCommand<'_>> {
    if !input.starts_with('/') {
        return None;
    }
    let (command, arg) = match input.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (input, ""),
    };
    let parsed = match (command.to_ascii_lowercase().as_str(), arg) {
        ("/exit" | "/quit", _) => SlashCommand::Quit,
        ("/help", _) => SlashCommand::Help,
        ("/caps", _) => SlashCommand::Caps,
        ("/attach", "") => SlashCommand::Usage("usage: /attach <path>"),
        ("/attach", path) => SlashCommand::Attach(path),
        ("/connect", "") => SlashCommand::Usage("usage: /connect <host[:port]>"),
        ("/connect", address) => SlashCommand::Connect(address),
        ("/save", "") => SlashCommand::Usage("usage: /save <path>"),
        ("/save", path) => SlashCommand::Save(path),
        _ => SlashCommand::Unknown(command),
    };
    Some(parsed)
}

fn handle_input(
    client: &mut ChatClient,
    handle: &ConnectionHandle,
    endpoint: &mut EndpointConfig,
    input: &str,
) -> Flow {
    let Some(command) = parse_command(input) else {
        send_message(client, handle, input);
        return Flow::Continue;
    };
    match command {
        SlashCommand::Quit => return Flow::Quit,
        SlashCommand::Help => println!("{}", HELP),
        SlashCommand::Caps => match client.capabilities() {
            Some(caps) => println!("{}", joshua::client::capability_summary(caps)),
            None => println!("no capabilities received yet"),
        },
        SlashCommand::Attach(path) => match Attachment::from_path(std::path::Path::new(path)) {
            Ok(a) => {
                client.attach(a);
            }
            Err(e) => {
                client.push_error(format!("{:#}", e));
            }
        },
        SlashCommand::Connect(address) => match endpoint.with_address(address) {
            Some(next) => {
                println!("switching to {}", next.url());
                if let Err(e) = handle.set_endpoint(next.clone()) {
                    client.push_error(e);
                }
                *endpoint = next;
            }
            None => println!("usage: /connect <host[:port]>"),
        },
        SlashCommand::Save(path) => {
            let html = joshua::client::transcript_html(client.messages());
            match std::fs::write(path, html) {
                Ok(()) => println!("saved transcript to {}", path),
                Err(e) => {
                    client.push_error(format!("writing transcript to {}: {}", path, e));
                }
            }
        }
        SlashCommand::Usage(usage) => println!("{}", usage),
        SlashCommand::Unknown(command) => {
            println!("unknown command {} (/help lists commands)", command)
        }
    }
    Flow::Continue
}

fn send_message(client: &mut ChatClient, handle: &ConnectionHandle, input: &str) {
    match client.submit(input) {
        Ok(payload) => {
            if let Err(e) = handle.send_text(payload) {
                client.on_send_failed(&e);
            }
        }
        Err(SubmitError::Empty) => {}
        Err(SubmitError::Generating) => println!("(still answering, wait for the reply to finish)"),
        Err(SubmitError::NotConnected) => {}
    }
}

/// Prints transcript changes as they happen; streamed text is written chunk by chunk.
#[derive(Default)]
struct TerminalView {
    /// An assistant line has been started and not yet terminated.
    streaming: bool,
}

impl TerminalView {
    fn render(&mut self, client: &mut ChatClient) -> std::io::Result<()> {
        let mut stdout = std::io::stdout();
        for ev in client.drain_events() {
            match ev {
                ClientEvent::MessageAdded(id) => {
                    let Some(m) = client.message(id) else { continue };
                    match (m.role, &m.body) {
                        (Role::User, MessageBody::Text(_)) => {}
                        (Role::User, MessageBody::Image { name, data, .. }) => {
                            println!("[image {} attached, {} KB]", name, data.len() * 3 / 4 / 1024);
                        }
                        (Role::User, MessageBody::File { name }) => println!("[file {}]", name),
                        (Role::Assistant, _) => {
                            self.end_line();
                            write!(stdout, "< ")?;
                            self.streaming = true;
                        }
                        (Role::System, _) => {
                            self.end_line();
                            println!("* {}", m.text().unwrap_or_default());
                        }
                        (Role::Error, _) => {
                            self.end_line();
                            eprintln!("! {}", m.text().unwrap_or_default());
                        }
                    }
                }
                ClientEvent::MessageRemoved(_) => {
                    if self.streaming {
                        write!(stdout, "(no response)")?;
                        self.end_line();
                    }
                }
                ClientEvent::ResponseChunk { delta, .. } => {
                    write!(stdout, "{}", delta)?;
                }
                ClientEvent::ResponseFinished { .. } => self.end_line(),
                ClientEvent::ConnectionChanged(true) => eprintln!("[connected]"),
                ClientEvent::ConnectionChanged(false) => {
                    self.end_line();
                    eprintln!("[disconnected]");
                }
            }
        }
        stdout.flush()
    }

    fn end_line(&mut self) {
        if self.streaming {
            println!();
            self.streaming = false;
        }
    }
}
