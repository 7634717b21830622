use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use logsieve::filter::KeywordConfig;
use logsieve::logging;
use logsieve::output;
use logsieve::server::protocol::{SearchResponse, SessionStatus, WindowResponse};
use logsieve::server::{
    self, get_socket_path, is_daemon_running, poll_until_done, FilterService, PollEvent,
    ProgressSource, SieveClient,
};
use logsieve::utils::progress::filter_progress_bar;
use logsieve::utils::AppConfig;
use std::io::Write;

#[derive(Parser)]
#[command(name = "logsieve")]
#[command(about = "Filter large log files by keyword and page through the result")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter a source log, then show a window of the result
    Filter {
        /// Source id (file name inside the configured log directory)
        source: String,

        /// Keep lines containing any of these keywords
        #[arg(short, long = "keep")]
        keep: Vec<String>,

        /// Drop lines containing any of these keywords
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,

        /// Named keyword configuration to merge in
        #[arg(short, long = "config")]
        config: Vec<String>,

        /// Lines to print once finished, as START:END
        #[arg(long, default_value = "1:50")]
        view: String,

        /// Jump to the first line containing this keyword
        #[arg(long)]
        find: Option<String>,

        /// Override the index checkpoint stride
        #[arg(long)]
        stride: Option<u32>,
    },
    /// Print lines START..=END of a session held by the daemon
    Window {
        session: String,
        start: u64,
        end: u64,
    },
    /// Print a window centered on a line
    Jump {
        session: String,
        line: u64,

        /// Window size in lines
        #[arg(long)]
        size: Option<u64>,
    },
    /// Find the next (or previous) line containing a keyword
    Search {
        session: String,
        keyword: String,

        /// Line to start from
        #[arg(long, default_value_t = 1)]
        from: u64,

        /// Search backwards from the line before --from
        #[arg(long)]
        prev: bool,

        #[arg(long)]
        case_sensitive: bool,
    },
    /// List selectable source logs
    Sources,
    /// Drop a session and its files, or every session
    Clear {
        session: Option<String>,
    },
    /// Manage the filter daemon (keeps sessions alive between commands)
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Run daemon in foreground (for debugging)
    Foreground,
}

/// Where a filter session lives: in the daemon, or in this process
enum Backend {
    Daemon(SieveClient),
    Local(FilterService),
}

impl Backend {
    fn connect() -> Result<Self> {
        if let Some(client) = SieveClient::connect() {
            return Ok(Backend::Daemon(client));
        }
        let config = AppConfig::load()?;
        Ok(Backend::Local(FilterService::new(config)?))
    }

    /// Merge named configurations with the command-line keywords. The merged
    /// lists are what gets filtered and highlighted.
    fn resolve_keywords(
        &self,
        configs: &[String],
        keep: &[String],
        exclude: &[String],
    ) -> Result<KeywordConfig> {
        match self {
            Backend::Daemon(_) => {
                let config = AppConfig::load()?.with_absolute_paths()?;
                Ok(KeywordConfig::resolve(&config.keyword_config_dir, configs, keep, exclude)?)
            }
            Backend::Local(service) => Ok(service.resolve_keywords(configs, keep, exclude)?),
        }
    }

    fn start_filter(&mut self, source: &str, keywords: &KeywordConfig) -> Result<String> {
        match self {
            Backend::Daemon(client) => {
                Ok(client.start_filter(source, &keywords.keep, &keywords.exclude, &[])?)
            }
            Backend::Local(service) => {
                Ok(service.start_filter(source, &keywords.keep, &keywords.exclude)?)
            }
        }
    }

    fn get_window(&mut self, session: &str, start: u64, end: u64) -> Result<WindowResponse> {
        match self {
            Backend::Daemon(client) => Ok(client.get_window(session, start, end)?),
            Backend::Local(service) => Ok(service.get_window(session, start, end)?),
        }
    }

    fn get_window_around(&mut self, session: &str, line: u64) -> Result<WindowResponse> {
        match self {
            Backend::Daemon(client) => Ok(client.get_window_around(session, line, None)?),
            Backend::Local(service) => Ok(service.get_window_around(session, line, None)?),
        }
    }

    fn search_next(&mut self, session: &str, keyword: &str) -> Result<SearchResponse> {
        match self {
            Backend::Daemon(client) => Ok(client.search_next(session, keyword, 1, false)?),
            Backend::Local(service) => Ok(service.search_next(session, keyword, 1, false)?),
        }
    }

    fn poll_interval(&self) -> std::time::Duration {
        match self {
            Backend::Daemon(_) => AppConfig::default().poll_interval(),
            Backend::Local(service) => service.config().poll_interval(),
        }
    }

    fn progress_source(&mut self) -> &mut dyn ProgressSource {
        match self {
            Backend::Daemon(client) => client,
            Backend::Local(service) => service,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The detached daemon sets up its own file logger after forking
    let verbosity = match &cli.command {
        Commands::Daemon {
            action: DaemonAction::Start,
        } => None,
        Commands::Daemon {
            action: DaemonAction::Foreground,
        } => Some("info"),
        _ => Some("warn"),
    };
    if let Some(level) = verbosity {
        logging::init_stderr(level);
    }

    let color = !cli.no_color;
    match cli.command {
        Commands::Filter {
            source,
            keep,
            exclude,
            config,
            view,
            find,
            stride,
        } => run_filter(&source, &keep, &exclude, &config, &view, find, stride, color)?,
        Commands::Window { session, start, end } => {
            let mut client = SieveClient::connect_required()?;
            let window = client.get_window(&session, start, end)?;
            output::print_window(&mut output::stdout(color), &window, None)?;
        }
        Commands::Jump { session, line, size } => {
            let mut client = SieveClient::connect_required()?;
            let window = client.get_window_around(&session, line, size)?;
            output::print_window(&mut output::stdout(color), &window, None)?;
        }
        Commands::Search {
            session,
            keyword,
            from,
            prev,
            case_sensitive,
        } => {
            let mut client = SieveClient::connect_required()?;
            let result = if prev {
                client.search_prev(&session, &keyword, from, case_sensitive)?
            } else {
                client.search_next(&session, &keyword, from, case_sensitive)?
            };
            output::print_search_result(&mut output::stdout(color), &keyword, &result)?;
        }
        Commands::Sources => {
            let sources = match SieveClient::connect() {
                Some(mut client) => client.list_sources()?,
                None => FilterService::new(AppConfig::load()?)?.list_sources()?,
            };
            output::print_sources(&mut output::stdout(color), &sources)?;
        }
        Commands::Clear { session } => {
            let mut client = SieveClient::connect_required()?;
            let removed = client.clear(session.as_deref())?;
            println!("Removed {} session(s)", removed);
        }
        Commands::Daemon { action } => handle_daemon_command(action)?,
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_filter(
    source: &str,
    keep: &[String],
    exclude: &[String],
    configs: &[String],
    view: &str,
    find: Option<String>,
    stride: Option<u32>,
    color: bool,
) -> Result<()> {
    let (view_start, view_end) = parse_view(view)?;

    let mut backend = match stride {
        // A custom stride only applies to a service this process owns
        Some(stride) => {
            let config = AppConfig {
                index_stride: stride,
                ..AppConfig::load()?
            };
            Backend::Local(FilterService::new(config)?)
        }
        None => Backend::connect()?,
    };

    let keywords = backend
        .resolve_keywords(configs, keep, exclude)
        .context("Failed to load keyword configurations")?;
    let session = backend
        .start_filter(source, &keywords)
        .with_context(|| format!("Failed to start filtering {}", source))?;
    if matches!(backend, Backend::Daemon(_)) {
        eprintln!("Session {}", session);
    }

    let bar = filter_progress_bar(source);
    let interval = backend.poll_interval();
    let report = poll_until_done(backend.progress_source(), &session, interval, |event| match event {
        PollEvent::FirstChunk(chunk) => {
            let lines = chunk.lines().count();
            bar.println(format!("first {} lines ready", lines));
        }
        PollEvent::Progress(report) => bar.set_position(report.percent.round() as u64),
    })?;

    match report.status {
        SessionStatus::Finished => {
            bar.finish_with_message(format!("{} lines", report.lines_written));
        }
        SessionStatus::Error => {
            bar.abandon_with_message("failed");
            bail!(
                "Filter failed: {}",
                report.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        SessionStatus::NoJob | SessionStatus::Running => {
            bar.abandon_with_message("cancelled");
            bail!("Session {} was removed before it finished", session);
        }
    }

    let mut out = output::stdout(color);
    let highlight = output::highlight_regex(&keywords.keep);
    let window = match find {
        Some(keyword) => {
            let hit = backend.search_next(&session, &keyword)?;
            output::print_search_result(&mut out, &keyword, &hit)?;
            match hit.match_line {
                Some(line) => backend.get_window_around(&session, line)?,
                None => return Ok(()),
            }
        }
        None => backend.get_window(&session, view_start, view_end)?,
    };
    output::print_window(&mut out, &window, highlight.as_ref())?;
    out.flush()?;
    Ok(())
}

/// Parse `START:END` into an inclusive 1-based range
fn parse_view(view: &str) -> Result<(u64, u64)> {
    let (start, end) = view
        .split_once(':')
        .with_context(|| format!("Invalid view {:?}, expected START:END", view))?;
    let start: u64 = start.trim().parse().context("Invalid view start")?;
    let end: u64 = end.trim().parse().context("Invalid view end")?;
    if start == 0 || end < start {
        bail!("Invalid view {:?}: lines are 1-based and END must not precede START", view);
    }
    Ok((start, end))
}

fn handle_daemon_command(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if is_daemon_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            let config = AppConfig::load()?.with_absolute_paths()?;
            println!("Starting logsieve daemon...");
            server::daemon::daemonize(config)?;

            // Wait a moment for daemon to start
            std::thread::sleep(std::time::Duration::from_millis(500));

            if is_daemon_running() {
                println!("Daemon started (socket: {})", get_socket_path().display());
            } else {
                println!(
                    "Daemon may have failed to start. Check {}",
                    server::daemon::error_log_path().display()
                );
            }
        }

        DaemonAction::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");

            // Try graceful shutdown via client first
            if let Some(mut client) = SieveClient::connect() {
                let _ = client.shutdown();
                std::thread::sleep(std::time::Duration::from_millis(500));
            }

            // Force stop if still running
            if is_daemon_running() {
                server::daemon::stop_daemon()?;
            }

            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            match SieveClient::connect() {
                Some(mut client) => match client.status() {
                    Ok(status) => {
                        println!("logsieve daemon status:");
                        println!("  Uptime: {}s", status.uptime_secs);
                        println!("  Sessions: {}", status.sessions.len());
                        for session in &status.sessions {
                            println!("    - {}", session);
                        }
                        println!("  Running jobs: {}", status.running_jobs);
                        println!("  Requests served: {}", status.requests_served);
                        println!("  Log directory: {}", status.log_dir.display());
                        println!("  Work directory: {}", status.work_dir.display());
                    }
                    Err(e) => {
                        println!("Failed to get status: {}", e);
                    }
                },
                None => {
                    println!("Daemon is running but not responding");
                }
            }
        }

        DaemonAction::Foreground => {
            if is_daemon_running() {
                println!("Daemon is already running in background. Stop it first with 'logsieve daemon stop'");
                return Ok(());
            }

            let config = AppConfig::load()?.with_absolute_paths()?;
            println!("Running daemon in foreground (Ctrl+C to stop)...");
            server::daemon::run_foreground(config)?;
        }
    }

    Ok(())
}
