//! Joshua Desktop: egui app state and UI.

use eframe::egui;
use joshua::config::{Config, EndpointConfig};
use joshua::connection::{self, ConnectionEvent, ConnectionHandle};
use joshua::markup::{self, Inline};
use joshua::upload::Attachment;
use joshua::{ChatClient, ChatMessage, MessageBody, Role};
use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

const CHAT_INPUT_HEIGHT: f32 = 90.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        // tungstenite and rustls are chatty at debug.
        metadata.target().starts_with("joshua")
            || metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        push_log_line(format!(
            "{} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: DesktopLogger = DesktopLogger;

pub fn install_logger() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Debug);
    log::info!("desktop started");
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Chat,
    Connection,
    Logs,
}

/// Layout unit of a text bubble: wrapped inline runs, or a standalone code block.
#[derive(Debug, PartialEq)]
enum Block<'a> {
    Line(Vec<&'a Inline>),
    Code { lang: Option<&'a str>, code: &'a str },
}

/// Group spans into lines and code blocks so each can get its own layout.
fn blocks(spans: &[Inline]) -> Vec<Block<'_>> {
    let mut out = Vec::new();
    let mut line = Vec::new();
    for span in spans {
        match span {
            // The break that ends a fence line belongs to the code block.
            Inline::LineBreak
                if line.is_empty() && matches!(out.last(), Some(Block::Code { .. })) => {}
            Inline::LineBreak => out.push(Block::Line(std::mem::take(&mut line))),
            Inline::CodeBlock { lang, code } => {
                if !line.is_empty() {
                    out.push(Block::Line(std::mem::take(&mut line)));
                }
                out.push(Block::Code {
                    lang: lang.as_deref(),
                    code,
                });
            }
            other => line.push(other),
        }
    }
    if !line.is_empty() {
        out.push(Block::Line(line));
    }
    out
}

pub struct JoshuaApp {
    /// Owns the worker threads the connection driver runs on.
    _runtime: tokio::runtime::Runtime,
    handle: ConnectionHandle,
    events: UnboundedReceiver<ConnectionEvent>,
    client: ChatClient,
    endpoint: EndpointConfig,
    /// What the driver is doing when not connected ("Connecting to ...", "Retrying in 6s").
    link_status: String,
    chat_input: String,
    attach_path: String,
    address_input: String,
    address_error: Option<String>,
    current_screen: Screen,
}

impl JoshuaApp {
    /// Space between the main screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(runtime: tokio::runtime::Runtime, config: &Config) -> Self {
        let endpoint = joshua::config::resolve_endpoint(config, None, None);
        let (handle, events, _task) = {
            let _guard = runtime.enter();
            connection::spawn(endpoint.clone(), config.reconnect.clone())
        };
        Self {
            _runtime: runtime,
            handle,
            events,
            client: ChatClient::new(),
            address_input: format!("{}:{}", endpoint.host, endpoint.port),
            endpoint,
            link_status: String::new(),
            chat_input: String::new(),
            attach_path: String::new(),
            address_error: None,
            current_screen: Screen::default(),
        }
    }

    /// Drain driver events into the client. Call each frame.
    fn poll_connection(&mut self) {
        while let Ok(ev) = self.events.try_recv() {
            match &ev {
                ConnectionEvent::Connecting { url } => {
                    self.link_status = format!("Connecting to {}", url);
                }
                ConnectionEvent::ReconnectScheduled { delay, attempt } => {
                    self.link_status =
                        format!("Retrying in {}s (attempt {})", delay.as_secs(), attempt);
                }
                _ => {}
            }
            self.client.apply(&ev);
        }
        // Views re-render from the transcript; incremental events are only for the terminal.
        self.client.drain_events();
    }

    fn send(&mut self) {
        match self.client.submit(&self.chat_input) {
            Ok(payload) => {
                self.chat_input.clear();
                if let Err(e) = self.handle.send_text(payload) {
                    self.client.on_send_failed(&e);
                }
            }
            Err(e) => log::debug!("not sending: {}", e),
        }
    }

    fn attach(&mut self) {
        let path = self.attach_path.trim();
        if path.is_empty() {
            return;
        }
        match Attachment::from_path(std::path::Path::new(path)) {
            Ok(a) => {
                log::info!("attached {}", a.name());
                self.client.attach(a);
                self.attach_path.clear();
            }
            Err(e) => {
                self.client.push_error(format!("{:#}", e));
            }
        }
    }

    fn reconnect_to(&mut self) {
        let Some(next) = self.endpoint.with_address(&self.address_input) else {
            self.address_error = Some("Expected host or host:port".to_string());
            return;
        };
        self.address_error = None;
        log::info!("switching endpoint to {}", next.url());
        if let Err(e) = self.handle.set_endpoint(next.clone()) {
            self.address_error = Some(e);
            return;
        }
        self.endpoint = next;
    }

    fn render_spans(ui: &mut egui::Ui, spans: &[Inline]) {
        for block in blocks(spans) {
            match block {
                Block::Line(runs) => {
                    ui.horizontal_wrapped(|ui| {
                        ui.spacing_mut().item_spacing.x = 0.0;
                        if runs.is_empty() {
                            ui.label("");
                        }
                        for run in runs {
                            let text = match run {
                                Inline::Text(t) => egui::RichText::new(t),
                                Inline::Bold(t) => egui::RichText::new(t).strong(),
                                Inline::Italic(t) => egui::RichText::new(t).italics(),
                                Inline::Code(t) => egui::RichText::new(t).code(),
                                Inline::LineBreak | Inline::CodeBlock { .. } => continue,
                            };
                            ui.label(text);
                        }
                    });
                }
                Block::Code { lang, code } => {
                    egui::Frame::none()
                        .fill(ui.style().visuals.code_bg_color)
                        .rounding(egui::Rounding::same(4.0))
                        .inner_margin(egui::Margin::same(6.0))
                        .show(ui, |ui| {
                            if let Some(lang) = lang {
                                ui.label(egui::RichText::new(lang).small().weak());
                            }
                            ui.label(egui::RichText::new(code).monospace());
                        });
                }
            }
        }
    }

    /// One bubble: role-based fill, formatted text or an attachment card.
    fn render_chat_message(ui: &mut egui::Ui, m: &ChatMessage, streaming: bool) {
        let visuals = &ui.style().visuals;
        let fill = match m.role {
            Role::User => visuals.extreme_bg_color,
            Role::Error => egui::Color32::from_rgb(80, 24, 24),
            _ => visuals.panel_fill,
        };
        let frame = egui::Frame::none()
            .fill(fill)
            .stroke(egui::Stroke::new(
                1.0,
                visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            ui.set_width(ui.available_width());
            match (&m.body, m.role) {
                (MessageBody::Text(t), Role::Error) => {
                    ui.colored_label(egui::Color32::LIGHT_RED, t.as_str());
                }
                (MessageBody::Text(t), Role::System) => {
                    ui.label(egui::RichText::new(t).italics().weak());
                }
                (MessageBody::Text(t), _) if t.is_empty() && streaming => {
                    ui.spinner();
                }
                (MessageBody::Text(t), _) => Self::render_spans(ui, &markup::parse(t)),
                (MessageBody::Image { name, mime, data }, _) => {
                    ui.label(egui::RichText::new(format!("🖼 {}", name)).strong());
                    ui.label(
                        egui::RichText::new(format!("{}, {} KB", mime, data.len() * 3 / 4 / 1024))
                            .small()
                            .weak(),
                    );
                }
                (MessageBody::File { name }, _) => {
                    ui.label(format!("📎 {}", name));
                }
            }
            ui.label(
                egui::RichText::new(m.sent_at.format("%H:%M").to_string())
                    .small()
                    .weak(),
            );
        });
    }

    /// Messages fill the space with stick-to-bottom; input, attach row and Send sit below.
    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        let row_height = ui.spacing().interact_size.y + 8.0;
        let bottom_section_height =
            CHAT_INPUT_HEIGHT + 16.0 + 2.0 * row_height + Self::SCREEN_FOOTER_SPACING;
        let messages_height =
            (ui.available_height() - bottom_section_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        let in_flight = self.client.in_flight_id();
        ui.allocate_ui(egui::vec2(ui.available_width(), messages_height), |ui| {
            egui::ScrollArea::vertical()
                .max_height(messages_height)
                .stick_to_bottom(true)
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    for m in self.client.messages() {
                        Self::render_chat_message(ui, m, in_flight == Some(m.id));
                        ui.add_space(8.0);
                    }
                    if self.client.messages().is_empty() {
                        ui.label("No messages yet.");
                    }
                });
        });

        ui.add_space(8.0);
        let input = ui.add_enabled_ui(self.client.input_enabled(), |ui| {
            ui.add_sized(
                [ui.available_width(), CHAT_INPUT_HEIGHT],
                egui::TextEdit::multiline(&mut self.chat_input)
                    .hint_text("Type a message (Ctrl+Enter to send)"),
            )
        });
        let input = input.inner;
        ui.add_space(8.0);

        let mut send_now = false;
        ui.horizontal(|ui| {
            let can_send = self.client.can_send(&self.chat_input);
            let send_button = ui
                .add_enabled(can_send, egui::Button::new("Send"))
                .on_hover_text(self.client.send_title())
                .on_disabled_hover_text(self.client.send_title());
            if send_button.clicked() {
                send_now = true;
            }
            if can_send && input.has_focus() {
                let submit = ui.input(|i| {
                    (i.modifiers.command || i.modifiers.ctrl) && i.key_pressed(egui::Key::Enter)
                });
                send_now |= submit;
            }
            if self.client.is_generating() {
                ui.spinner();
                ui.label(egui::RichText::new("Waiting for response").weak());
            }
        });
        if send_now {
            self.send();
        }

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            ui.label("Attach");
            let field = ui.add(
                egui::TextEdit::singleline(&mut self.attach_path)
                    .hint_text("path to an image or file")
                    .desired_width(ui.available_width() - 80.0),
            );
            let entered = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Add").clicked() || entered {
                self.attach();
            }
        });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_connection_screen(&mut self, ui: &mut egui::Ui) {
        const LINE_SPACING: f32 = 6.0;
        ui.add_space(24.0);
        ui.heading("Connection");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        ui.label(format!("Endpoint: {}", self.endpoint.url()));
        ui.add_space(LINE_SPACING);
        if self.client.is_connected() {
            ui.label("Status: connected");
        } else {
            ui.label(format!("Status: disconnected. {}", self.link_status));
        }
        ui.add_space(18.0);

        ui.label(egui::RichText::new("Capabilities").strong());
        ui.add_space(LINE_SPACING);
        match self.client.capabilities() {
            Some(caps) => {
                let list = |items: &[String]| {
                    if items.is_empty() {
                        "none".to_string()
                    } else {
                        items.join(", ")
                    }
                };
                ui.label(format!("Input: {}", list(&caps.modalities.input)));
                ui.label(format!("Output: {}", list(&caps.modalities.output)));
                ui.label(format!("Features: {}", list(&caps.features)));
            }
            None => {
                ui.label("Not received yet.");
            }
        }
        ui.add_space(18.0);

        ui.label(egui::RichText::new("Reconnect to").strong());
        ui.add_space(LINE_SPACING);
        ui.horizontal(|ui| {
            let field = ui.text_edit_singleline(&mut self.address_input);
            let entered = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Connect").clicked() || entered {
                self.reconnect_to();
            }
        });
        if let Some(ref err) = self.address_error {
            ui.add_space(LINE_SPACING);
            ui.colored_label(egui::Color32::RED, err);
        }
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let scroll_height = (ui.available_height() - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl Drop for JoshuaApp {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

impl eframe::App for JoshuaApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_connection();
        // The driver has no handle on the egui context; poll faster while a reply streams.
        let poll = if self.client.is_generating() { 30 } else { 250 };
        ctx.request_repaint_after(Duration::from_millis(poll));

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(12.0);
                    ui.horizontal(|ui| {
                        ui.heading("Joshua");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if self.client.is_connected() {
                                ui.colored_label(egui::Color32::GREEN, "● Connected");
                            } else {
                                ui.colored_label(egui::Color32::GRAY, "● Disconnected");
                                ui.label(egui::RichText::new(&self.link_status).weak());
                            }
                        });
                    });
                    ui.add_space(12.0);
                });
        });

        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        for (screen, label) in [
                            (Screen::Chat, "Chat"),
                            (Screen::Connection, "Connection"),
                            (Screen::Logs, "Logs"),
                        ] {
                            if ui.selectable_label(*current_screen == screen, label).clicked() {
                                *current_screen = screen;
                            }
                            ui.add_space(12.0);
                        }
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Chat => {
                        ui.add_space(24.0);
                        ui.heading("Chat");
                        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);
                        self.ui_chat(ui);
                    }
                    Screen::Connection => self.ui_connection_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });
    }
}
