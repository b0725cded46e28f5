use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use daybook::checkbox::{
    checkbox_state, compute_bulk_toggle_edits, compute_cookie_refresh_edits, compute_toggle_edits,
    find_checkbox_cookie, upsert_checkbox_cookie, CookieMode,
};
use daybook::config::{EngineConfig, EngineSettings};
use daybook::dates::compute_reschedule_replacements;
use daybook::edit::{apply_edits, apply_replacements, Replacement};
use daybook::journal::scan_tasks;
use daybook::outline::heading_level;
use daybook::reorder::{compute_move_block, MoveDirection};
use daybook::transition::compute_cycle_edits;
use daybook::workflow::CycleDirection;

#[derive(Debug, Parser)]
#[command(
    name = "daybook",
    about = "Journal and task tooling built on the daybook crate",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the task headings in a journal file.
    Tasks(TasksArgs),

    /// Step a task to the next or previous workflow state.
    Cycle(CycleArgs),

    /// Toggle checkboxes, then refresh the affected cookies.
    Toggle(ToggleArgs),

    /// Insert or refresh checkbox statistics cookies.
    Cookies(CookiesArgs),

    /// Swap a heading or list subtree with its sibling.
    Move(MoveArgs),

    /// Shift SCHEDULED and DEADLINE dates by one day.
    Reschedule(RescheduleArgs),
}

#[derive(Debug, Args)]
struct TasksArgs {
    /// Journal file to scan.
    file: PathBuf,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON instead of a human-readable list.
    #[arg(long)]
    json: bool,
    /// Include states the agenda normally hides.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Args)]
struct CycleArgs {
    /// Journal file to edit.
    file: PathBuf,
    /// 1-based line whose task should change state.
    #[arg(long)]
    line: usize,
    /// Step backwards through the cycle.
    #[arg(long)]
    backward: bool,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the resulting document instead of rewriting the file.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ToggleArgs {
    /// Journal file to edit.
    file: PathBuf,
    /// 1-based checkbox lines; one line propagates, several toggle as a set.
    #[arg(long, required = true, num_args = 1..)]
    line: Vec<usize>,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the resulting document instead of rewriting the file.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct CookiesArgs {
    /// Journal file to edit.
    file: PathBuf,
    /// 1-based line to put a cookie on; omit to refresh every existing cookie.
    #[arg(long)]
    line: Option<usize>,
    /// Style for a newly inserted cookie.
    #[arg(long, value_enum)]
    mode: Option<CookieModeArg>,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the resulting document instead of rewriting the file.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CookieModeArg {
    Fraction,
    Percent,
}

#[derive(Debug, Args)]
struct MoveArgs {
    /// Journal file to edit.
    file: PathBuf,
    /// 1-based line anywhere inside the block to move.
    #[arg(long)]
    line: usize,
    /// Which sibling to swap with.
    #[arg(long, value_enum)]
    direction: MoveDirectionArg,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the resulting document instead of rewriting the file.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MoveDirectionArg {
    Up,
    Down,
}

#[derive(Debug, Args)]
struct RescheduleArgs {
    /// Journal file to edit.
    file: PathBuf,
    /// 1-based lines selecting tasks or planning lines.
    #[arg(long, required = true, num_args = 1..)]
    line: Vec<usize>,
    /// Shift dates one day earlier instead of later.
    #[arg(long)]
    backward: bool,
    /// Settings file (JSON) overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the resulting document instead of rewriting the file.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    match cli.command {
        Commands::Tasks(args) => handle_tasks(args),
        Commands::Cycle(args) => handle_cycle(args),
        Commands::Toggle(args) => handle_toggle(args),
        Commands::Cookies(args) => handle_cookies(args),
        Commands::Move(args) => handle_move(args),
        Commands::Reschedule(args) => handle_reschedule(args),
    }
}

fn setup_logging(verbose: bool) {
    env_logger::Builder::from_default_env()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();
}

fn handle_tasks(args: TasksArgs) -> Result<()> {
    let TasksArgs {
        file,
        config,
        json,
        all,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let doc = Document::read(&file)?;

    let mut rows = scan_tasks(&doc.lines, &settings.registry, &settings.formats, &[]);
    if !all {
        rows.retain(|row| row.visible);
    }
    if rows.is_empty() {
        eprintln!("No task headings found in {:?}.", file);
        return Ok(());
    }
    // line numbers are 1-based on the command line
    for row in &mut rows {
        row.line += 1;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in rows {
            let day = row
                .day
                .map(|d| settings.date_format.render(d))
                .unwrap_or_else(|| "-".to_string());
            let tags = if row.tags.is_empty() {
                String::new()
            } else {
                format!(" :{}:", row.tags.join(":"))
            };
            let mut planning = String::new();
            if let Some(date) = row.scheduled {
                planning.push_str(&format!(" SCHEDULED {}", settings.date_format.render(date)));
            }
            if let Some(date) = row.deadline {
                planning.push_str(&format!(" DEADLINE {}", settings.date_format.render(date)));
            }
            println!(
                "{:>5}  {:<10} {:<12} {}{}{}",
                row.line, day, row.keyword, row.title, tags, planning
            );
        }
    }
    Ok(())
}

fn handle_cycle(args: CycleArgs) -> Result<()> {
    let CycleArgs {
        file,
        line,
        backward,
        config,
        dry_run,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let mut doc = Document::read(&file)?;
    let cursor = to_index(line, doc.lines.len())?;
    let direction = if backward {
        CycleDirection::Backward
    } else {
        CycleDirection::Forward
    };

    let now = Local::now().naive_local();
    let Some(outcome) = compute_cycle_edits(
        &doc.lines,
        cursor,
        direction,
        &settings.registry,
        &settings.formats,
        &[],
        now,
    ) else {
        anyhow::bail!("line {line} is not inside a task subtree");
    };
    apply_edits(&mut doc.lines, &outcome.edits)?;

    if dry_run {
        doc.print();
        return Ok(());
    }
    doc.write(&file)?;
    if outcome.repeated {
        println!(
            "Task on line {line} repeats; reset to {} with a new SCHEDULED date",
            outcome.landed
        );
    } else {
        println!("Task on line {line} is now {}", outcome.landed);
    }
    Ok(())
}

fn handle_toggle(args: ToggleArgs) -> Result<()> {
    let ToggleArgs {
        file,
        line,
        config,
        dry_run,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let mut doc = Document::read(&file)?;
    let glyphs = settings.registry.outline_glyphs(&[]);

    let mut idxs = Vec::with_capacity(line.len());
    for &number in &line {
        idxs.push(to_index(number, doc.lines.len())?);
    }
    let toggles = if idxs.len() == 1 {
        compute_toggle_edits(&doc.lines, idxs[0], &glyphs)
    } else {
        compute_bulk_toggle_edits(&doc.lines, &idxs)
    };
    if toggles.is_empty() {
        anyhow::bail!("no checkbox found on the selected lines");
    }
    apply_replacements(&mut doc.lines, &toggles)?;

    let refresh = compute_cookie_refresh_edits(&doc.lines, &glyphs);
    apply_replacements(&mut doc.lines, &refresh)?;
    log::debug!(
        "{} checkbox lines toggled, {} cookies refreshed",
        toggles.len(),
        refresh.len()
    );

    if dry_run {
        doc.print();
        return Ok(());
    }
    doc.write(&file)?;
    println!("Updated {:?}", file);
    Ok(())
}

fn handle_cookies(args: CookiesArgs) -> Result<()> {
    let CookiesArgs {
        file,
        line,
        mode,
        config,
        dry_run,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let mut doc = Document::read(&file)?;
    let glyphs = settings.registry.outline_glyphs(&[]);

    if let Some(number) = line {
        let idx = to_index(number, doc.lines.len())?;
        let is_target = heading_level(&doc.lines[idx], &glyphs).is_some()
            || checkbox_state(&doc.lines[idx]).is_some();
        if !is_target {
            anyhow::bail!("line {number} is neither a heading nor a checkbox item");
        }
        let mode = match mode {
            Some(CookieModeArg::Fraction) => CookieMode::Fraction,
            Some(CookieModeArg::Percent) => CookieMode::Percent,
            None => settings.cookie_mode,
        };
        let seeded = upsert_checkbox_cookie(&doc.lines[idx], mode);
        doc.lines[idx] = seeded;
        let fills: Vec<Replacement> = compute_cookie_refresh_edits(&doc.lines, &glyphs)
            .into_iter()
            .filter(|edit| edit.line_index == idx)
            .collect();
        apply_replacements(&mut doc.lines, &fills)?;

        if dry_run {
            doc.print();
            return Ok(());
        }
        doc.write(&file)?;
        if let Some(cookie) = find_checkbox_cookie(&doc.lines[idx]) {
            println!("Cookie on line {number} now reads {}", cookie.raw);
        }
        return Ok(());
    }

    let refresh = compute_cookie_refresh_edits(&doc.lines, &glyphs);
    apply_replacements(&mut doc.lines, &refresh)?;
    log::debug!("{} cookies refreshed", refresh.len());

    if dry_run {
        doc.print();
        return Ok(());
    }
    doc.write(&file)?;
    println!("Updated {:?}", file);
    Ok(())
}

fn handle_move(args: MoveArgs) -> Result<()> {
    let MoveArgs {
        file,
        line,
        direction,
        config,
        dry_run,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let mut doc = Document::read(&file)?;
    let glyphs = settings.registry.outline_glyphs(&[]);
    let cursor = to_index(line, doc.lines.len())?;
    let direction = match direction {
        MoveDirectionArg::Up => MoveDirection::Up,
        MoveDirectionArg::Down => MoveDirection::Down,
    };

    let Some(reordered) = compute_move_block(&doc.lines, cursor, direction, &glyphs) else {
        anyhow::bail!("nothing to move at line {line}");
    };
    doc.lines = reordered;

    if dry_run {
        doc.print();
        return Ok(());
    }
    doc.write(&file)?;
    println!("Updated {:?}", file);
    Ok(())
}

fn handle_reschedule(args: RescheduleArgs) -> Result<()> {
    let RescheduleArgs {
        file,
        line,
        backward,
        config,
        dry_run,
    } = args;
    let settings = load_settings(config.as_deref())?;
    let mut doc = Document::read(&file)?;
    let glyphs = settings.registry.outline_glyphs(&[]);

    let mut idxs = Vec::with_capacity(line.len());
    for &number in &line {
        idxs.push(to_index(number, doc.lines.len())?);
    }
    let outcome = compute_reschedule_replacements(
        &doc.lines,
        &idxs,
        !backward,
        &settings.formats,
        &glyphs,
    );
    if outcome.warned_parse {
        log::warn!("some dates did not parse and were left alone");
    }
    if outcome.replacements.is_empty() {
        eprintln!("No dates changed.");
        return Ok(());
    }
    let edits: Vec<Replacement> = outcome
        .replacements
        .into_iter()
        .map(|(idx, text)| Replacement::new(idx, text))
        .collect();
    apply_replacements(&mut doc.lines, &edits)?;

    if dry_run {
        doc.print();
        return Ok(());
    }
    doc.write(&file)?;
    println!("Updated {:?}", file);
    Ok(())
}

/// A journal file held as a line array. Lines split on `\n` alone, and the
/// original trailing-newline state is restored on write.
#[derive(Debug, Clone)]
struct Document {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Document {
    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let doc = Self::from_text(&text);
        log::debug!("loaded {} lines from {:?}", doc.lines.len(), path);
        Ok(doc)
    }

    fn from_text(text: &str) -> Self {
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        Self {
            lines: body.split('\n').map(str::to_string).collect(),
            trailing_newline,
        }
    }

    fn render(&self) -> String {
        let mut text = self.lines.join("\n");
        if self.trailing_newline {
            text.push('\n');
        }
        text
    }

    fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render().as_bytes()).with_context(|| format!("writing {:?}", path))
    }

    fn print(&self) {
        let text = self.render();
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
}

/// Command-line line numbers are 1-based; the engines index from zero.
fn to_index(line: usize, len: usize) -> Result<usize> {
    let idx = line
        .checked_sub(1)
        .with_context(|| format!("line numbers start at 1, got {line}"))?;
    if idx >= len {
        anyhow::bail!("line {line} is past the end of the file ({len} lines)");
    }
    Ok(idx)
}

fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let config = match path {
        Some(path) => {
            let text =
                fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
            serde_json::from_str::<EngineConfig>(&text)
                .with_context(|| format!("parsing config {:?}", path))?
        }
        None => EngineConfig::default(),
    };
    let settings = config.resolve();
    for error in &settings.errors {
        log::warn!("config: {error}");
    }
    Ok(settings)
}
