use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::calendar::{CalendarIndex, CalendarView, week_of};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{local_date, parse_day_expr};
use crate::filter::{PostFilter, upcoming};
use crate::post::Post;
use crate::render::{MonthView, Renderer};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "month",
        "week",
        "day",
        "upcoming",
        "list",
        "summary",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

/// Whether `command` reads the post list. Commands that do not are run
/// without waiting on the provider.
pub fn command_uses_posts(command: &str) -> bool {
    matches!(
        command,
        "month" | "week" | "day" | "upcoming" | "list" | "summary"
    )
}

/// Clock and calendar inputs shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

impl Session {
    pub fn today(&self) -> NaiveDate {
        local_date(self.now, self.tz)
    }

    pub fn index(&self) -> CalendarIndex {
        CalendarIndex::new(self.tz)
    }
}

#[instrument(skip(posts, cfg, renderer, inv))]
pub fn dispatch(
    posts: &[Post],
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
    session: Session,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let filter = PostFilter::parse(&inv.filter_terms)?;
    let visible: Vec<&Post> = posts.iter().filter(|post| filter.matches(post)).collect();

    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        total = posts.len(),
        visible = visible.len(),
        "dispatching command"
    );

    match command {
        "month" => cmd_month(&visible, cfg, renderer, &inv.command_args, session),
        "week" => cmd_week(&visible, renderer, &inv.command_args, session),
        "day" => cmd_day(&visible, renderer, &inv.command_args, session),
        "upcoming" => cmd_upcoming(&visible, cfg, renderer, &inv.command_args, session),
        "list" => cmd_list(&visible, renderer),
        "summary" => cmd_summary(&visible, renderer, &inv.command_args, session),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Resolves the month argument of `month`/`summary`: `next`, `prev`, a
/// signed month offset such as `+2`, or any date expression.
pub fn resolve_month_arg(arg: Option<&str>, session: Session) -> anyhow::Result<CalendarView> {
    let base = CalendarView::new(session.today());
    let Some(raw) = arg.map(str::trim) else {
        return Ok(base);
    };

    match raw.to_ascii_lowercase().as_str() {
        "next" => return Ok(base.next_month()),
        "prev" | "previous" => return Ok(base.prev_month()),
        _ => {}
    }

    let is_offset = raw
        .strip_prefix(['+', '-'])
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
    if is_offset {
        let delta: i32 = raw
            .parse()
            .with_context(|| format!("invalid month offset: {raw}"))?;
        return Ok(base.shifted(delta));
    }

    let day = parse_day_expr(raw, session.now, session.tz)?;
    Ok(CalendarView::new(day))
}

fn upcoming_limit(cfg: &Config, args: &[String]) -> anyhow::Result<usize> {
    let limit = match args.first() {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid upcoming limit: {raw}"))?,
        None => cfg.get_usize("upcoming.limit")?.unwrap_or(5),
    };
    if limit == 0 {
        return Err(anyhow!("upcoming limit must be at least 1"));
    }
    Ok(limit)
}

#[instrument(skip(posts, cfg, renderer, args, session))]
fn cmd_month(
    posts: &[&Post],
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    session: Session,
) -> anyhow::Result<()> {
    info!("command month");

    let mut view = resolve_month_arg(args.first().map(String::as_str), session)?;
    if let Some(raw) = args.get(1) {
        view = view.select(parse_day_expr(raw, session.now, session.tz)?);
    }

    render_month(posts, renderer, view, session)?;

    let limit = upcoming_limit(cfg, &[])?;
    let next = upcoming(posts.iter().copied(), session.now, limit);
    println!();
    renderer.print_upcoming(&next, limit)?;

    if let Some(day) = view.selected() {
        println!();
        let on_day = session.index().posts_for_day(posts.iter().copied(), day);
        renderer.print_day(day, &on_day)?;
    }
    Ok(())
}

fn render_month(
    posts: &[&Post],
    renderer: &mut Renderer,
    view: CalendarView,
    session: Session,
) -> anyhow::Result<()> {
    let grid = view.grid();
    let buckets = session.index().bucket_month(posts.iter().copied(), &grid);
    debug!(
        year = grid.year,
        month = grid.month,
        busy_days = buckets.len(),
        "rendering month"
    );

    renderer.print_month(&MonthView {
        grid: &grid,
        buckets: &buckets,
        today: session.today(),
        selected: view.selected(),
    })
}

#[instrument(skip(posts, renderer, args, session))]
fn cmd_week(
    posts: &[&Post],
    renderer: &mut Renderer,
    args: &[String],
    session: Session,
) -> anyhow::Result<()> {
    info!("command week");

    let anchor = match args.first() {
        Some(raw) => parse_day_expr(raw, session.now, session.tz)?,
        None => session.today(),
    };
    let index = session.index();
    let days: Vec<(NaiveDate, Vec<&Post>)> = week_of(anchor)
        .into_iter()
        .map(|day| (day, index.posts_for_day(posts.iter().copied(), day)))
        .collect();

    renderer.print_week(&days)
}

#[instrument(skip(posts, renderer, args, session))]
fn cmd_day(
    posts: &[&Post],
    renderer: &mut Renderer,
    args: &[String],
    session: Session,
) -> anyhow::Result<()> {
    info!("command day");

    let raw = args
        .first()
        .ok_or_else(|| anyhow!("day requires a date argument"))?;
    let day = parse_day_expr(raw, session.now, session.tz)?;
    let view = CalendarView::new(day).select(day);

    render_month(posts, renderer, view, session)?;
    println!();

    let on_day = session.index().posts_for_day(posts.iter().copied(), day);
    renderer.print_day(day, &on_day)
}

#[instrument(skip(posts, cfg, renderer, args, session))]
fn cmd_upcoming(
    posts: &[&Post],
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    session: Session,
) -> anyhow::Result<()> {
    info!("command upcoming");

    let limit = upcoming_limit(cfg, args)?;
    let next = upcoming(posts.iter().copied(), session.now, limit);
    debug!(limit, found = next.len(), now = %renderer.timestamp(session.now), "selected upcoming posts");
    renderer.print_upcoming(&next, limit)
}

#[instrument(skip(posts, renderer))]
fn cmd_list(posts: &[&Post], renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command list");
    renderer.print_post_table(posts)
}

#[instrument(skip(posts, renderer, args, session))]
fn cmd_summary(
    posts: &[&Post],
    renderer: &mut Renderer,
    args: &[String],
    session: Session,
) -> anyhow::Result<()> {
    info!("command summary");

    let view = resolve_month_arg(args.first().map(String::as_str), session)?;
    let grid = view.grid();
    let summary = session.index().month_summary(posts.iter().copied(), &grid);
    renderer.print_summary(&grid.title(), &summary)
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<(&String, &String)> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

const HELP_TEXT: &str = "\
usage: pilot [platform:<name>] [search words] <command> [args]

commands:
  month [next|prev|+N|-N|DATE] [DAY]   month grid, upcoming posts, selected day
  week [DATE]                           Sunday-started week
  day DATE                              month grid plus that day's posts
  upcoming [N]                          next N scheduled posts
  list                                  every matching post
  summary [MONTH]                       scheduled/published/failed counts
  _show, _commands, help, version

The platform filter and search words narrow every view, the month grid
included. Prefix a word with `search:` when it would otherwise be read as
a command, e.g. `pilot search:day upcoming`.";

fn cmd_help() -> anyhow::Result<()> {
    println!("{HELP_TEXT}");
    Ok(())
}
