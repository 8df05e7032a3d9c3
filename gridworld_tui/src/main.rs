use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gridworld_core::{
    Color as WorldColor, Direction as Heading,
    agent::{Policy, RandomPolicy},
    config::EnvConfig,
    entity::{DoorState, Entity, EntityKind},
    environment::{Action, AgentState, Environment, Reward, StepOutcome},
    generate::{EmptyRoom, Generator, KeyCorridor, MultiDoorKey, TextMap, UnlockDoorGoal},
    observation::Observation,
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    fs::File,
    io::{self, Stdout},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{info, warn};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    Empty,
    Doorkey,
    Unlock,
    Corridor,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Map file to load instead of a generated layout
    #[arg(short, long, value_name = "MAP_FILE")]
    map: Option<PathBuf>,

    /// Layout generator used when no map is given
    #[arg(short, long, value_enum, default_value_t = Scenario::Doorkey)]
    generator: Scenario,

    /// Number of agents for generated layouts
    #[arg(short, long, default_value_t = 2)]
    agents: usize,

    /// Room size for generated layouts
    #[arg(long, default_value_t = 8)]
    size: usize,

    #[arg(long, default_value_t = 1337)]
    seed: u64,

    #[arg(long, default_value_t = 7)]
    view_size: usize,

    #[arg(long, default_value_t = 100)]
    max_steps: u32,

    /// Enable observation sharing
    #[arg(long)]
    comm: bool,

    /// Write logs to this file (filtered by RUST_LOG)
    #[arg(long, value_name = "LOG_FILE")]
    log: Option<PathBuf>,
}

impl Args {
    fn generator(&self) -> Result<Box<dyn Generator>> {
        if let Some(path) = &self.map {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read map file {}", path.display()))?;
            return Ok(Box::new(TextMap::new(source)));
        }
        Ok(match self.generator {
            Scenario::Empty => Box::new(EmptyRoom::new(self.size, self.agents)),
            Scenario::Doorkey => Box::new(MultiDoorKey::new(self.size, self.agents)),
            Scenario::Unlock => Box::new(UnlockDoorGoal::new(self.agents)),
            Scenario::Corridor => Box::new(KeyCorridor::new(self.size, self.agents)),
        })
    }

    fn config(&self) -> EnvConfig {
        EnvConfig {
            agent_view_size: self.view_size,
            max_steps: self.max_steps,
            communication: self.comm,
            seed: self.seed,
            ..EnvConfig::default()
        }
    }
}

struct App {
    /// The core simulation environment.
    environment: Environment,
    observations: Vec<Observation>,
    /// Actions chosen so far for the coming tick.
    pending: Vec<Option<Action>>,
    signals: Vec<bool>,
    selected: usize,
    policies: Vec<RandomPolicy>,
    autoplay: bool,
    last: Option<StepOutcome>,
    status: String,
    /// Flag to control the main loop.
    should_quit: bool,
}

impl App {
    fn new(mut environment: Environment) -> Result<Self> {
        let observations = environment.reset()?;
        let agents = environment.agents().len();
        let seed = environment.config().seed;
        Ok(App {
            environment,
            observations,
            pending: vec![None; agents],
            signals: vec![false; agents],
            selected: 0,
            policies: (0..agents as u64)
                .map(|i| RandomPolicy::new(seed.wrapping_add(i)).with_signal_chance(0.2))
                .collect(),
            autoplay: false,
            last: None,
            status: "New episode".to_string(),
            should_quit: false,
        })
    }

    fn reset(&mut self) {
        match self.environment.reset() {
            Ok(observations) => {
                let agents = self.environment.agents().len();
                self.observations = observations;
                self.pending = vec![None; agents];
                self.signals = vec![false; agents];
                self.selected = 0;
                self.last = None;
                self.status = "New episode".to_string();
            }
            Err(err) => {
                warn!(%err, "reset failed");
                self.status = format!("Reset failed: {err}");
            }
        }
    }

    /// Records a manual action for the selected agent and steps once every
    /// agent has one.
    fn choose(&mut self, action: Action) {
        if self.environment.is_done() {
            self.status = "Episode over, press 'r' to reset".to_string();
            return;
        }
        self.pending[self.selected] = Some(action);
        self.selected = (self.selected + 1) % self.pending.len();
        let actions: Option<Vec<Action>> = self.pending.iter().copied().collect();
        if let Some(actions) = actions {
            let signals = self.signals.clone();
            self.advance(&actions, &signals);
        }
    }

    fn advance(&mut self, actions: &[Action], signals: &[bool]) {
        match self.environment.step_with_signals(actions, signals) {
            Ok(outcome) => {
                self.observations = outcome.observations.clone();
                self.status = match outcome.info.termination {
                    Some(reason) => format!("Episode finished: {reason:?}"),
                    None => format!("Step {}", outcome.info.step_count),
                };
                self.last = Some(outcome);
            }
            Err(err) => {
                warn!(%err, "step rejected");
                self.status = format!("Step rejected: {err}");
            }
        }
        self.pending.fill(None);
        self.signals.fill(false);
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) {
        if !self.autoplay || self.environment.is_done() {
            return;
        }
        let (actions, signals): (Vec<Action>, Vec<bool>) = self
            .policies
            .iter_mut()
            .zip(&self.observations)
            .map(|(policy, obs)| (policy.act(obs), policy.signal(obs)))
            .unzip();
        self.advance(&actions, &signals);
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Left => self.choose(Action::Left),
            KeyCode::Right => self.choose(Action::Right),
            KeyCode::Up => self.choose(Action::Forward),
            KeyCode::Char('p') => self.choose(Action::Pickup),
            KeyCode::Char('d') => self.choose(Action::Drop),
            KeyCode::Char('t') => self.choose(Action::Toggle),
            KeyCode::Char('n') => self.choose(Action::Done),
            KeyCode::Tab => self.selected = (self.selected + 1) % self.pending.len(),
            KeyCode::Char('c') => self.signals[self.selected] ^= true,
            KeyCode::Char('a') => self.autoplay ^= true,
            KeyCode::Char('r') => self.reset(),
            _ => {}
        }
    }
}

fn init_tracing(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to install log subscriber: {err}"))
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    // The terminal owns stdout, so logs only go to a file
    if let Some(path) = &args.log {
        init_tracing(path)?;
    }

    let environment = Environment::new(args.config(), args.generator()?)?;
    let mut app = App::new(environment)?;
    info!(agents = app.pending.len(), "starting grid world session");

    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;
    result
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(65), // Area for the map
            Constraint::Percentage(25), // Area for agents
            Constraint::Percentage(10), // Area for status/help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.environment);
    render_agents(frame, main_layout[1], app);

    let help_text = Paragraph::new(vec![
        Line::from(app.status.as_str()),
        Line::from(
            "←/→ turn  ↑ forward  p pickup  d drop  t toggle  n done  Tab next agent  \
             c signal  a autoplay  r reset  q quit",
        ),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn tui_color(color: WorldColor) -> Color {
    match color {
        WorldColor::Red => Color::Red,
        WorldColor::Green => Color::Green,
        WorldColor::Blue => Color::Blue,
        WorldColor::Purple => Color::Magenta,
        WorldColor::Yellow => Color::Yellow,
        WorldColor::Grey => Color::DarkGray,
    }
}

fn entity_span(entity: &Entity) -> Span<'static> {
    let text = match entity.kind {
        EntityKind::Wall => "██",
        EntityKind::Floor => "░░",
        EntityKind::Door(DoorState::Open) => "__",
        EntityKind::Door(DoorState::Closed) => "[]",
        EntityKind::Door(DoorState::Locked) => "[#",
        EntityKind::Key => "k ",
        EntityKind::Ball => "o ",
        EntityKind::Box(_) => "▣ ",
        EntityKind::Goal => "GG",
        EntityKind::Lava => "~~",
    };
    let color = match entity.kind {
        EntityKind::Lava => Color::LightRed,
        _ => tui_color(entity.color),
    };
    Span::styled(text, Style::default().fg(color))
}

fn agent_span(agent: &AgentState) -> Span<'static> {
    let arrow = match agent.direction {
        Heading::Right => ">>",
        Heading::Down => "VV",
        Heading::Left => "<<",
        Heading::Up => "^^",
    };
    Span::styled(arrow, Style::default().fg(tui_color(agent.color())).bold())
}

/// Renders the environment map onto the frame.
fn render_map(frame: &mut Frame, area: Rect, environment: &Environment) {
    let grid = environment.grid();
    let agents = environment.agents();

    let mut lines: Vec<Line> = Vec::with_capacity(grid.height());
    for y in 0..grid.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(grid.width());
        for x in 0..grid.width() {
            let agent = agents
                .iter()
                .find(|a| a.position.x == x && a.position.y == y);
            let span = match (agent, &grid[(x, y)]) {
                (Some(agent), _) => agent_span(agent),
                (None, Some(entity)) => entity_span(entity),
                (None, None) => Span::raw("  "),
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let title = format!(
        "Grid World: {} (step {}/{})",
        environment.mission(),
        environment.step_count(),
        environment.config().max_steps
    );
    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title(title).borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}

/// Renders one status line per agent.
fn render_agents(frame: &mut Frame, area: Rect, app: &App) {
    let reward = app.last.as_ref().map(|outcome| &outcome.reward);
    let applied = app.last.as_ref().map(|outcome| &outcome.info.applied);

    let mut items: Vec<ListItem> = app
        .environment
        .agents()
        .iter()
        .map(|agent| {
            let marker = if agent.id == app.selected { "▶ " } else { "  " };
            let carrying = agent
                .carrying
                .as_ref()
                .map_or_else(|| "nothing".to_string(), |e| format!("{:?}", e.object_kind()));
            let pending = app.pending[agent.id].map_or_else(|| "-".to_string(), |a| format!("{a:?}"));
            let last = applied
                .and_then(|applied| applied.get(agent.id))
                .map_or("", |ok| if *ok { "ok" } else { "blocked" });
            let reward = reward.map_or(0.0, |r| r.for_agent(agent.id));
            ListItem::from(Line::from(vec![
                Span::raw(marker),
                agent_span(agent),
                Span::raw(format!(
                    " Agent {} at ({}, {}) carrying {} | next {} | signal {} | last {} | reward {:.3}",
                    agent.id,
                    agent.position.x,
                    agent.position.y,
                    carrying,
                    pending,
                    app.signals[agent.id],
                    last,
                    reward,
                )),
            ]))
        })
        .collect();

    let shared = matches!(reward, Some(Reward::Shared(_)));
    items.push(ListItem::from(Line::from(format!(
        "State {}  autoplay {}  communication {}{}",
        app.environment.state_hash(),
        app.autoplay,
        app.environment.config().communication,
        if shared { "  (shared reward)" } else { "" },
    ))));

    let agents_widget =
        List::new(items).block(Block::default().borders(Borders::ALL).title("Agents"));
    frame.render_widget(agents_widget, area);
}
