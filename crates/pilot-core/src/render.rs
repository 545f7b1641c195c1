use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{GridCell, MonthGrid, MonthSummary, WEEKDAY_LABELS, day_badges};
use crate::config::Config;
use crate::datetime::format_local;
use crate::post::{Platform, Post, PostStatus};

const CELL_WIDTH: usize = 12;
const TIME_FORMAT: &str = "%-I:%M %p";

/// Month grid plus the state needed to decorate its cells.
#[derive(Debug, Clone)]
pub struct MonthView<'a> {
    pub grid: &'a MonthGrid,
    pub buckets: &'a BTreeMap<NaiveDate, Vec<&'a Post>>,
    pub today: NaiveDate,
    pub selected: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
    badges: usize,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let badges = cfg.get_usize("calendar.badges")?.unwrap_or(2);

        Ok(Self { color, tz, badges })
    }

    #[tracing::instrument(skip(self, view), fields(year = view.grid.year, month = view.grid.month))]
    pub fn print_month(&mut self, view: &MonthView<'_>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_month(&mut out, view)
    }

    #[tracing::instrument(skip(self, days))]
    pub fn print_week(&mut self, days: &[(NaiveDate, Vec<&Post>)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_week(&mut out, days)
    }

    #[tracing::instrument(skip(self, posts))]
    pub fn print_post_table(&mut self, posts: &[&Post]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_post_table(&mut out, posts)
    }

    #[tracing::instrument(skip(self, posts))]
    pub fn print_upcoming(&mut self, posts: &[&Post], limit: usize) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_upcoming(&mut out, posts, limit)
    }

    #[tracing::instrument(skip(self, posts))]
    pub fn print_day(&mut self, day: NaiveDate, posts: &[&Post]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_day(&mut out, day, posts)
    }

    #[tracing::instrument(skip(self, summary))]
    pub fn print_summary(&mut self, title: &str, summary: &MonthSummary) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_summary(&mut out, title, summary)
    }

    pub(crate) fn write_month<W: Write>(
        &self,
        mut out: W,
        view: &MonthView<'_>,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", view.grid.title())?;
        let labels: Vec<String> = WEEKDAY_LABELS.iter().map(|l| l.to_string()).collect();
        write_cell_line(&mut out, &labels)?;
        write_rule(&mut out)?;

        for row in view.grid.rows() {
            let cells: Vec<Vec<String>> = row
                .iter()
                .map(|cell| self.month_cell_lines(*cell, view))
                .collect();
            let height = cells.iter().map(Vec::len).max().unwrap_or(1).max(1);

            for line_idx in 0..height {
                let line: Vec<String> = cells
                    .iter()
                    .map(|lines| lines.get(line_idx).cloned().unwrap_or_default())
                    .collect();
                write_cell_line(&mut out, &line)?;
            }
            write_rule(&mut out)?;
        }

        Ok(())
    }

    fn month_cell_lines(&self, cell: GridCell, view: &MonthView<'_>) -> Vec<String> {
        let GridCell::Day(day) = cell else {
            return vec![];
        };

        let mut label = day.format("%-d").to_string();
        if Some(day) == view.selected {
            label = format!("[{label}]");
        }
        if day == view.today {
            label = self.paint(&format!("{label}*"), "33");
        }

        let mut lines = vec![label];
        if let Some(posts) = view.buckets.get(&day) {
            let badges = day_badges(posts, self.badges);
            for post in &badges.shown {
                lines.push(format!(
                    "{} {}",
                    platform_code(post.platform),
                    format_local(post.scheduled_at, self.tz, TIME_FORMAT)
                ));
            }
            if badges.overflow > 0 {
                lines.push(format!("+{} more", badges.overflow));
            }
        }
        lines
    }

    pub(crate) fn write_week<W: Write>(
        &self,
        mut out: W,
        days: &[(NaiveDate, Vec<&Post>)],
    ) -> anyhow::Result<()> {
        for (day, posts) in days {
            writeln!(out, "{}", day.format("%a %b %-d"))?;
            if posts.is_empty() {
                writeln!(out, "  -")?;
                continue;
            }
            for post in posts {
                writeln!(
                    out,
                    "  {} {:<10} {}",
                    format_local(post.scheduled_at, self.tz, "%H:%M"),
                    post.platform,
                    post.content
                )?;
            }
        }
        Ok(())
    }

    pub(crate) fn write_post_table<W: Write>(
        &self,
        out: W,
        posts: &[&Post],
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "When".to_string(),
            "Platform".to_string(),
            "Status".to_string(),
            "Content".to_string(),
        ];

        let rows = posts
            .iter()
            .map(|post| {
                vec![
                    self.paint(&post.id, "33"),
                    format_local(post.scheduled_at, self.tz, "%Y-%m-%d %H:%M"),
                    post.platform.to_string(),
                    self.paint_status(post.status),
                    post.content.clone(),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    pub(crate) fn write_upcoming<W: Write>(
        &self,
        mut out: W,
        posts: &[&Post],
        limit: usize,
    ) -> anyhow::Result<()> {
        writeln!(out, "Upcoming Posts (next {limit})")?;
        if posts.is_empty() {
            writeln!(out, "No upcoming posts scheduled")?;
            return Ok(());
        }
        for post in posts {
            writeln!(
                out,
                "{} [{}] {} at {}",
                post.content,
                post.platform,
                format_local(post.scheduled_at, self.tz, "%b %-d"),
                format_local(post.scheduled_at, self.tz, TIME_FORMAT)
            )?;
        }
        Ok(())
    }

    pub(crate) fn write_day<W: Write>(
        &self,
        mut out: W,
        day: NaiveDate,
        posts: &[&Post],
    ) -> anyhow::Result<()> {
        writeln!(out, "Posts for {}", day.format("%A, %B %-d"))?;
        if posts.is_empty() {
            writeln!(out, "No posts scheduled for this date")?;
            return Ok(());
        }
        for post in posts {
            writeln!(
                out,
                "{:>8}  {:<10} {:<10} {}",
                format_local(post.scheduled_at, self.tz, TIME_FORMAT),
                post.platform,
                self.paint_status(post.status),
                post.content
            )?;
        }
        Ok(())
    }

    pub fn timestamp(&self, at: DateTime<Utc>) -> String {
        format_local(at, self.tz, "%Y-%m-%d %H:%M %Z")
    }

    fn paint_status(&self, status: PostStatus) -> String {
        let code = match status {
            PostStatus::Scheduled => "36",
            PostStatus::Published => "32",
            PostStatus::Failed => "31",
        };
        self.paint(status.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn platform_code(platform: Platform) -> &'static str {
    match platform {
        Platform::Instagram => "IG",
        Platform::TikTok => "TT",
        Platform::LinkedIn => "IN",
        Platform::Twitter => "TW",
    }
}

fn write_summary<W: Write>(mut out: W, title: &str, summary: &MonthSummary) -> anyhow::Result<()> {
    writeln!(out, "{title}")?;
    writeln!(out, "  Scheduled  {} posts", summary.scheduled)?;
    writeln!(out, "  Published  {} posts", summary.published)?;
    writeln!(out, "  Failed     {} posts", summary.failed)?;
    writeln!(out, "  Total      {}", summary.total())?;
    Ok(())
}

fn write_cell_line<W: Write>(mut writer: W, cells: &[String]) -> anyhow::Result<()> {
    for cell in cells {
        let visible = strip_ansi(cell);
        let clipped = clip_to_width(&visible, CELL_WIDTH);
        let shown = if clipped.len() == visible.len() {
            cell.clone()
        } else {
            clipped.clone()
        };
        let padding = CELL_WIDTH.saturating_sub(UnicodeWidthStr::width(clipped.as_str()));
        write!(writer, "|{}{}", shown, " ".repeat(padding))?;
    }
    writeln!(writer, "|")?;
    Ok(())
}

fn write_rule<W: Write>(mut writer: W) -> anyhow::Result<()> {
    for _ in 0..WEEKDAY_LABELS.len() {
        write!(writer, "+{:-<width$}", "", width = CELL_WIDTH)?;
    }
    writeln!(writer, "+")?;
    Ok(())
}

fn clip_to_width(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        let mut next = out.clone();
        next.push(ch);
        if UnicodeWidthStr::width(next.as_str()) > max {
            break;
        }
        out = next;
    }
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
