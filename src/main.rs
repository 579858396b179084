mod cli;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind};
use ratatui::{backend::CrosstermBackend, Terminal};
use serde::Serialize;
use tracing::info;

use gpu_guard::app::App;
use gpu_guard::config::FleetConfig;
use gpu_guard::fleet::{read_host_list, NodeFleet};
use gpu_guard::logging;
use gpu_guard::models::{FleetOverview, GuardPolicy, NodeSnapshot};
use gpu_guard::ui;

use crate::cli::{Cli, Commands};

#[derive(Serialize)]
struct StatusReport {
    overview: FleetOverview,
    nodes: Vec<NodeSnapshot>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        FleetConfig::load(cli.global.config.as_deref()).context("failed to load configuration")?;
    cli.global.apply(&mut config);
    let policy = config.policy().context("invalid guard policy")?;

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => run_watch(config, policy).await,
        Commands::Status => {
            logging::init_stderr();
            let mut fleet = load_fleet(&config).await?;
            fleet.update().await;
            let report = StatusReport {
                overview: fleet.overview(),
                nodes: fleet.snapshot(),
            };
            fleet.close().await;
            print_json(&report)
        }
        Commands::Start { hosts } => {
            logging::init_stderr();
            let mut fleet = load_fleet(&config).await?;
            let result = fleet.start_guard(&hosts).await;
            fleet.close().await;
            print_json(&result)
        }
        Commands::Stop { hosts } => {
            logging::init_stderr();
            let mut fleet = load_fleet(&config).await?;
            let result = fleet.stop_guard(&hosts).await;
            fleet.close().await;
            print_json(&result)
        }
        Commands::NeedGuard { hosts } => {
            logging::init_stderr();
            let mut fleet = load_fleet(&config).await?;
            fleet.update().await;
            let result = fleet.need_guard(&hosts);
            fleet.close().await;
            print_json(&result)
        }
    }
}

async fn load_fleet(config: &FleetConfig) -> Result<NodeFleet> {
    if let Some(count) = config.simulate {
        info!(count, "using simulated hosts");
        return Ok(NodeFleet::simulated(count, config)?);
    }
    let hosts = read_host_list(&config.host_file)?;
    info!(hosts = hosts.len(), file = %config.host_file.display(), "loaded host list");
    Ok(NodeFleet::load(hosts, config).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_watch(config: FleetConfig, policy: GuardPolicy) -> Result<()> {
    std::fs::create_dir_all(&config.guard.log_root).with_context(|| {
        format!("failed to create log directory {}", config.guard.log_root.display())
    })?;
    let _guard = logging::init_file(&config.guard.log_root);

    let fleet = load_fleet(&config).await?;
    info!(nodes = fleet.len(), "starting dashboard");

    let mut app = App::new(fleet, policy, config.auto_guard, config.refresh_interval());
    if config.auto_guard {
        app.push_log("auto-guard enabled");
    }
    let poller = app.spawn_poller();

    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(io::stdout(), crossterm::terminal::EnterAlternateScreen)?;

    let result = draw_loop(&mut app);

    crossterm::execute!(io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    crossterm::terminal::disable_raw_mode()?;

    poller.abort();
    app.shutdown().await;
    info!("dashboard closed");
    result
}

fn draw_loop(app: &mut App) -> Result<()> {
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    loop {
        app.drain();
        app.tick();
        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.handle_key(key.code) {
                    return Ok(());
                }
            }
        }
    }
}
