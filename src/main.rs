mod api;
mod config;
mod diff;
mod drafts;
mod error;
mod history;
mod labels;
mod marker;
mod models;
mod poller;
mod progress;
mod references;
mod render;
mod resolver;
mod view;

use anyhow::Context;
use iced::{
    alignment,
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    time,
    widget::{button, column, container, horizontal_rule, row, scrollable, text, text_input, text_input::Id, Column},
    window, clipboard, Element, Font, Length, Padding, Subscription, Task, Theme,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::{BackendClient, TaskBackend};
use config::Config;
use drafts::DraftTabs;
use history::{HistoryStore, QueryHistory, SqliteHistoryStore};
use models::{CreatedTask, TaskState};
use poller::{PollUpdate, Poller};
use render::Document;
use resolver::{RenderedSection, Resolver};

const LOG_ENV: &str = "SCHOLAR_BAR_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> iced::Result {
    init_logging();
    let config = Config::load();
    let window_settings = window::Settings {
        size: iced::Size::new(config.window.width as f32, config.window.height as f32),
        min_size: Some(iced::Size::new(config.window.min_width as f32, config.window.min_height as f32)),
        position: window::Position::Centered,
        ..Default::default()
    };

    iced::application("Scholar Bar", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window_settings)
        .default_font(Font::MONOSPACE)
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    TaskCreated(Result<CreatedTask, String>),
    OpenTask(String),
    Poll(String, PollUpdate),
    Resolved {
        task_id: String,
        index: usize,
        section: Box<RenderedSection>,
    },
    SelectDraft(usize),
    ToggleDiff,
    ToggleEvidence(usize),
    OpenUrl(String),
    DeleteTask(String),
    NewQuestion,
    Tick,
    CopyOutput,
    Exit,
}

struct Section {
    rendered: RenderedSection,
    document: Document,
}

struct ActiveTask {
    task: models::Task,
    cancel: CancellationToken,
    drafts: DraftTabs,
    sections: Vec<Option<Section>>,
    open_evidence: Option<usize>,
}

impl ActiveTask {
    fn selected_section(&self) -> Option<&Section> {
        self.drafts
            .selected()
            .and_then(|i| self.sections.get(i))
            .and_then(Option::as_ref)
    }
}

struct App {
    config: Config,
    backend: Arc<BackendClient>,
    resolver: Resolver,
    history: Option<Box<dyn HistoryStore>>,
    history_cache: QueryHistory,
    input_text: String,
    input_id: Id,
    creating: bool,
    status_line: Option<String>,
    loading_frame: usize,
    active: Option<ActiveTask>,
}

fn open_history() -> anyhow::Result<Box<dyn HistoryStore>> {
    let store = SqliteHistoryStore::open_default().context("opening query history")?;
    info!(path = %store.path().display(), "query history opened");
    Ok(Box::new(store))
}

fn notify_finished(query: &str) {
    let body = view::truncate(query, 80);
    std::thread::spawn(move || {
        if let Err(e) = notify_rust::Notification::new()
            .summary("Scholar Bar: answer ready")
            .body(&body)
            .show()
        {
            warn!(error = %e, "desktop notification failed");
        }
    });
}

impl App {
    fn new(config: Config) -> (Self, Task<Message>) {
        let backend = Arc::new(BackendClient::with_config(&config.backend));
        let resolver = Resolver::new(backend.clone(), config.papers.fields.clone());

        let history = match open_history() {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "history disabled");
                None
            }
        };
        let history_cache = history
            .as_ref()
            .and_then(|store| store.load().ok())
            .unwrap_or_default();
        info!(entries = history_cache.len(), "history loaded");

        let input_id = Id::unique();
        let app = App {
            config,
            backend,
            resolver,
            history,
            history_cache,
            input_text: String::new(),
            input_id: input_id.clone(),
            creating: false,
            status_line: None,
            loading_frame: 0,
            active: None,
        };
        progress::log("ready");

        (app, text_input::focus(input_id))
    }

    fn is_busy(&self) -> bool {
        self.creating || self.active.as_ref().map_or(false, |a| a.task.is_running())
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }

    fn refresh_history(&mut self) {
        if let Some(store) = &self.history {
            match store.load() {
                Ok(history) => self.history_cache = history,
                Err(e) => warn!(error = %e, "could not reload history"),
            }
        }
    }

    fn start_task(&mut self, task_id: String, query: String) -> Task<Message> {
        self.cancel_active();
        self.status_line = None;

        let backend: Arc<dyn TaskBackend> = self.backend.clone();
        let poller = match Poller::new(backend, task_id.clone(), self.config.poll_interval()) {
            Ok(poller) => poller,
            Err(e) => {
                self.status_line = Some(format!("Cannot poll task: {}", e));
                return Task::none();
            }
        };
        info!(task_id = %poller.task_id(), "following task");
        progress::log_with(progress::Kind::Poll, format!("following task {}", task_id));

        self.active = Some(ActiveTask {
            task: models::Task::new(task_id.clone(), query),
            cancel: poller.cancellation_token(),
            drafts: DraftTabs::default(),
            sections: Vec::new(),
            open_evidence: None,
        });

        Task::run(poller.into_stream(), move |update| Message::Poll(task_id.clone(), update))
    }

    fn resolve_drafts(&mut self, range: std::ops::Range<usize>) -> Task<Message> {
        let Some(active) = self.active.as_mut() else {
            return Task::none();
        };
        let count = active.task.iterations.len();
        active.sections.resize_with(count, || None);
        active.drafts.sync(count);

        let tasks = range.filter_map(|index| {
            let iteration = active.task.iterations.get(index)?.clone();
            let resolver = self.resolver.clone();
            let task_id = active.task.id.clone();
            Some(Task::perform(
                async move { resolver.resolve(&iteration).await },
                move |section| Message::Resolved {
                    task_id: task_id.clone(),
                    index,
                    section: Box::new(section),
                },
            ))
        });
        Task::batch(tasks.collect::<Vec<_>>())
    }

    fn record_update(&mut self, update: &PollUpdate, fallback_query: &str) {
        let Some(store) = &self.history else { return };
        match history::apply_poll_update(store.as_ref(), update, fallback_query, chrono::Utc::now()) {
            Ok(Some(entry)) => {
                self.refresh_history();
                if self.config.notifications.enabled {
                    notify_finished(&entry.query);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not record history entry"),
        }
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.input_text = value;
                Task::none()
            }
            Message::Submit => {
                let query = self.input_text.trim().to_string();
                if query.is_empty() || self.creating {
                    return Task::none();
                }
                self.creating = true;
                self.status_line = None;
                let backend = self.backend.clone();
                Task::perform(
                    async move { backend.create_task(&query).await.map_err(|e| e.to_string()) },
                    Message::TaskCreated,
                )
            }
            Message::TaskCreated(Ok(created)) => {
                self.creating = false;
                let query = created
                    .query
                    .filter(|q| !q.is_empty())
                    .unwrap_or_else(|| self.input_text.trim().to_string());
                self.input_text.clear();
                self.start_task(created.task_id, query)
            }
            Message::TaskCreated(Err(e)) => {
                self.creating = false;
                self.status_line = Some(format!("Error: {}", e));
                Task::none()
            }
            Message::OpenTask(task_id) => {
                if self.active.as_ref().map_or(false, |a| a.task.id == task_id) {
                    return Task::none();
                }
                let query = self
                    .history_cache
                    .get(&task_id)
                    .map(|e| e.query.clone())
                    .unwrap_or_default();
                self.start_task(task_id, query)
            }
            Message::Poll(task_id, update) => {
                let Some(query) = self
                    .active
                    .as_ref()
                    .filter(|a| a.task.id == task_id)
                    .map(|a| a.task.query.clone())
                else {
                    return Task::none();
                };
                self.record_update(&update, &query);
                let Some(active) = self.active.as_mut() else {
                    return Task::none();
                };
                match update {
                    PollUpdate::Running(status) => {
                        let range = active.task.apply_running(status);
                        self.resolve_drafts(range)
                    }
                    PollUpdate::Done(finished) => {
                        let range = active.task.apply_done(finished);
                        self.resolve_drafts(range)
                    }
                    PollUpdate::NotFound { detail, .. } => {
                        active.task.mark_not_found();
                        self.status_line = Some(match detail {
                            Some(detail) => format!("Task not found: {}", detail),
                            None => "Task not found. It may have expired.".to_string(),
                        });
                        Task::none()
                    }
                    PollUpdate::Failed { message, .. } => {
                        active.task.fail(message.clone());
                        self.status_line = Some(format!("Error: {}", message));
                        Task::none()
                    }
                }
            }
            Message::Resolved { task_id, index, section } => {
                let papers = &self.config.papers;
                if let Some(active) = self.active.as_mut().filter(|a| a.task.id == task_id) {
                    if let Some(slot) = active.sections.get_mut(index) {
                        let document = render::render_section(&section, papers);
                        *slot = Some(Section {
                            rendered: *section,
                            document,
                        });
                    }
                }
                Task::none()
            }
            Message::SelectDraft(index) => {
                if let Some(active) = self.active.as_mut() {
                    active.drafts.select(index);
                    active.open_evidence = None;
                }
                Task::none()
            }
            Message::ToggleDiff => {
                if let Some(active) = self.active.as_mut() {
                    active.drafts.toggle_diff();
                }
                Task::none()
            }
            Message::ToggleEvidence(occurrence) => {
                if let Some(active) = self.active.as_mut() {
                    active.open_evidence = match active.open_evidence {
                        Some(open) if open == occurrence => None,
                        _ => Some(occurrence),
                    };
                }
                Task::none()
            }
            Message::OpenUrl(url) => {
                if let Err(e) = open::that(&url) {
                    warn!(%url, error = %e, "could not open link");
                }
                Task::none()
            }
            Message::DeleteTask(task_id) => {
                if let Some(store) = &self.history {
                    if let Err(e) = history::delete_entry(store.as_ref(), &task_id) {
                        warn!(error = %e, "could not delete history entry");
                    }
                }
                if self.active.as_ref().map_or(false, |a| a.task.id == task_id) {
                    self.cancel_active();
                }
                self.refresh_history();
                Task::none()
            }
            Message::NewQuestion => {
                self.cancel_active();
                self.status_line = None;
                self.input_text.clear();
                text_input::focus(self.input_id.clone())
            }
            Message::Tick => {
                if self.is_busy() {
                    self.loading_frame = (self.loading_frame + 1) % 80;
                }
                Task::none()
            }
            Message::CopyOutput => {
                match self.active.as_ref().and_then(ActiveTask::selected_section) {
                    Some(section) => clipboard::write(section.document.plain_text()),
                    None => Task::none(),
                }
            }
            Message::Exit => {
                self.cancel_active();
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.is_busy() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn sidebar(&self) -> Element<Message> {
        let active_id = self.active.as_ref().map(|a| a.task.id.as_str());
        let mut list = Column::new().spacing(4);
        if self.history_cache.is_empty() {
            list = list.push(text("No saved questions yet.").size(13));
        }
        for entry in self.history_cache.newest_first() {
            let label = view::truncate(&entry.query, 28);
            let style: fn(&Theme, button::Status) -> button::Style = if Some(entry.task_id.as_str()) == active_id {
                button::primary
            } else {
                button::text
            };
            list = list.push(
                row![
                    button(text(label).size(13))
                        .style(style)
                        .width(Length::Fill)
                        .on_press(Message::OpenTask(entry.task_id.clone())),
                    button(text("x").size(13))
                        .style(button::text)
                        .on_press(Message::DeleteTask(entry.task_id.clone())),
                ]
                .spacing(2),
            );
        }

        container(
            column![
                button(text("+ New question").size(14))
                    .style(button::secondary)
                    .width(Length::Fill)
                    .on_press(Message::NewQuestion),
                horizontal_rule(1),
                scrollable(list).height(Length::Fill),
            ]
            .spacing(8),
        )
        .width(Length::Fixed(240.0))
        .height(Length::Fill)
        .padding(10)
        .into()
    }

    fn progress_card(&self, active: &ActiveTask) -> Element<Message> {
        let loading_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let spinner = loading_frames[self.loading_frame % loading_frames.len()];

        let message = active
            .task
            .progress
            .as_ref()
            .map(|p| p.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Waiting for the backend...".to_string());
        let mut details = Vec::new();
        if let Some(elapsed) = active
            .task
            .progress
            .as_ref()
            .and_then(|p| p.elapsed_label(chrono::Utc::now()))
        {
            details.push(format!("started {}", elapsed));
        }
        if let Some(estimate) = active.task.estimated_time.as_ref().filter(|e| !e.is_empty()) {
            details.push(format!("estimated {}", estimate));
        }

        container(
            column![
                row![text(spinner).size(20), text(message).size(15)].spacing(10),
                text(details.join(" / ")).size(13),
            ]
            .spacing(4),
        )
        .padding(12)
        .width(Length::Fill)
        .style(container::rounded_box)
        .into()
    }

    fn answer_pane<'a>(&'a self, active: &'a ActiveTask) -> Element<'a, Message> {
        let running = active.task.is_running();
        let mut content = Column::new().spacing(12).push(text(active.task.query.as_str()).size(18));

        if running {
            content = content.push(self.progress_card(active));
        }
        match active.task.state {
            TaskState::NotFound | TaskState::Error => {
                if let Some(status) = &self.status_line {
                    content = content.push(text(status.as_str()).size(14));
                }
            }
            _ => {}
        }

        if active.drafts.count() > 0 {
            content = content.push(view::draft_tabs(&active.drafts, running));
        }

        let body: Option<Element<Message>> = match (active.drafts.selected(), active.selected_section()) {
            (Some(_), Some(section)) => {
                let previous = active
                    .drafts
                    .previous()
                    .and_then(|p| active.sections.get(p))
                    .and_then(Option::as_ref)
                    .filter(|_| active.drafts.show_diff());
                Some(match previous {
                    Some(prev) => view::diff_columns(diff::diff_drafts(&prev.rendered.text, &section.rendered.text)),
                    None => view::document(&section.document, active.open_evidence),
                })
            }
            (Some(_), None) => Some(text("Resolving citations...").size(14).into()),
            _ => None,
        };
        if let Some(body) = body {
            content = content.push(body);
        }

        scrollable(container(content).padding(15).width(Length::Fill))
            .height(Length::Fill)
            .into()
    }

    fn view(&self) -> Element<Message> {
        let input = text_input("Ask a scientific question...", &self.input_text)
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let main: Element<Message> = match &self.active {
            Some(active) => self.answer_pane(active),
            None if self.creating => container(text("Submitting question...").size(15))
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(alignment::Horizontal::Center)
                .align_y(alignment::Vertical::Center)
                .into(),
            None => container(text(self.status_line.clone().unwrap_or_default()).size(15))
                .width(Length::Fill)
                .height(Length::Fill)
                .padding(15)
                .into(),
        };

        let mut content_column = column![input, main].spacing(10).padding(10);

        let can_copy = self
            .active
            .as_ref()
            .map_or(false, |a| a.selected_section().is_some() && !a.drafts.show_diff());
        let activity = progress::recent(1)
            .into_iter()
            .map(|e| e.to_string())
            .next()
            .unwrap_or_default();
        let mut footer = row![text(activity).size(12).width(Length::Fill)].align_y(iced::Alignment::Center);
        if can_copy {
            footer = footer.push(
                button(text("[Copy]").size(14))
                    .on_press(Message::CopyOutput)
                    .padding(10),
            );
        }
        content_column = content_column.push(container(footer).padding(Padding::from([0, 10])));

        container(row![self.sidebar(), content_column])
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
