use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "pilot-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "PILOT_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "PILOT_TIME_CONFIG";
const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Picks the calendar timezone once at
/// start-up. Callers pass the result
/// down explicitly.
///
/// Order: configured value, the
/// `PILOT_TIMEZONE` variable, the
/// `pilot-time.toml` file, then UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Some(raw) = configured
    && let Some(tz) = parse_timezone(
      raw,
      "calendar.timezone"
    )
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_TIMEZONE,
    "DEFAULT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: Tz,
  fmt: &str
) -> String {
  dt.with_timezone(&tz)
    .format(fmt)
    .to_string()
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured calendar timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

pub fn to_utc_from_local(
  local_naive: NaiveDateTime,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Ok(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in timezone {tz}: \
         {context}"
      ))
    }
  }
}

fn local_midnight(
  date: NaiveDate,
  tz: Tz,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  let midnight = date
    .and_hms_opt(0, 0, 0)
    .ok_or_else(|| {
      anyhow!(
        "failed to construct \
         midnight for {date}"
      )
    })?;
  to_utc_from_local(
    midnight, tz, context
  )
}

/// Parses a user-supplied date
/// expression into an instant. Local
/// forms are read as wall-clock time
/// in `tz`.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_now = now.with_timezone(&tz);

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return local_midnight(
        local_now.date_naive(),
        tz,
        "today"
      );
    }
    | "tomorrow" => {
      let day = local_now
        .date_naive()
        .succ_opt()
        .ok_or_else(|| {
          anyhow!("tomorrow is out of range")
        })?;
      return local_midnight(
        day, tz, "tomorrow"
      );
    }
    | "yesterday" => {
      let day = local_now
        .date_naive()
        .pred_opt()
        .ok_or_else(|| {
          anyhow!(
            "yesterday is out of range"
          )
        })?;
      return local_midnight(
        day,
        tz,
        "yesterday"
      );
    }
    | _ => {}
  }

  if token.len() == 4
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let year: i32 =
      token.parse().context(
        "invalid 4-digit year"
      )?;
    let date = NaiveDate::from_ymd_opt(
      year, 1, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid year value: {year}"
      )
    })?;
    return local_midnight(
      date,
      tz,
      "year-4digit"
    );
  }

  if let Some(date) =
    parse_year_month(token)
  {
    return local_midnight(
      date,
      tz,
      "year-month"
    );
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    let target_date = next_weekday_date(
      local_now.date_naive(),
      target_weekday
    );
    return local_midnight(
      target_date,
      tz,
      "weekday-name"
    );
  }

  if let Some((hour, minute)) =
    parse_clock_time(token)
  {
    let mut day =
      local_now.date_naive();
    let local_candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct clock \
           time candidate"
        )
      })?;
    if local_candidate
      <= local_now.naive_local()
    {
      day = day
        .checked_add_signed(
          Duration::days(1)
        )
        .ok_or_else(|| {
          anyhow!(
            "failed to advance to \
             next day"
          )
        })?;
    }
    let next_candidate = day
      .and_hms_opt(hour, minute, 0)
      .ok_or_else(|| {
        anyhow!(
          "failed to construct next \
           clock time candidate"
        )
      })?;
    return to_utc_from_local(
      next_candidate,
      tz,
      "clock-time"
    );
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    let mut year = local_now.year();
    let this_year =
      NaiveDate::from_ymd_opt(
        year,
        target_month,
        1
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid month value: \
           {target_month}"
        )
      })?;

    if this_year
      <= local_now.date_naive()
    {
      year = year.saturating_add(1);
    }

    let next =
      NaiveDate::from_ymd_opt(
        year,
        target_month,
        1
      )
      .ok_or_else(|| {
        anyhow!(
          "invalid month/year \
           candidate"
        )
      })?;

    return local_midnight(
      next,
      tz,
      "month-name"
    );
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(token)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let duration = match unit {
      | "d" => Duration::days(num),
      | "h" => Duration::hours(num),
      | "m" => Duration::minutes(num),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };

    return Ok(
      if sign == "-" {
        now - duration
      } else {
        now + duration
      }
    );
  }

  if let Ok(ndt) =
    NaiveDateTime::parse_from_str(
      token,
      "%Y%m%dT%H%M%SZ"
    )
  {
    return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_midnight(
      date, tz, "date"
    );
  }

  for fmt in [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M"
  ] {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        ndt, tz, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     4-digit year, YYYY-MM, weekday \
     names (e.g. monday), month names \
     (e.g. march), clock times (e.g. \
     3:23pm or 15:23), +Nd/+Nh/+Nm, \
     RFC3339, YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM, YYYY-MM-DD \
     HH:MM, YYYYMMDDTHHMMSSZ"
  })
}

/// Same as [`parse_date_expr`] but
/// reduced to the local calendar day.
pub fn parse_day_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<NaiveDate> {
  parse_date_expr(input, now, tz)
    .map(|dt| local_date(dt, tz))
}

fn parse_year_month(
  token: &str
) -> Option<NaiveDate> {
  let (year, month) =
    token.split_once('-')?;
  if year.len() != 4 || month.len() != 2
  {
    return None;
  }
  let year = year.parse::<i32>().ok()?;
  let month =
    month.parse::<u32>().ok()?;
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match (ampm.as_str(), raw_hour) {
      | ("am", 12) => 0,
      | ("am", h) => h,
      | ("pm", 12) => 12,
      | ("pm", h) => h + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };
  use chrono_tz::Tz;

  use super::{
    local_date,
    parse_date_expr,
    parse_day_expr,
    resolve_timezone,
    to_utc_from_local
  };

  fn now() -> chrono::DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2024, 1, 16, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  fn new_york() -> Tz {
    "America/New_York"
      .parse()
      .expect("tz")
  }

  fn ymd(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("date")
  }

  #[test]
  fn spring_forward_gap_is_an_error() {
    let gap = ymd(2024, 3, 10)
      .and_hms_opt(2, 30, 0)
      .expect("naive");
    let err = to_utc_from_local(
      gap,
      new_york(),
      "gap"
    )
    .expect_err("02:30 is skipped");
    assert!(
      err
        .to_string()
        .contains("does not exist")
    );
  }

  #[test]
  fn fall_back_overlap_takes_earliest() {
    let repeated = ymd(2024, 11, 3)
      .and_hms_opt(1, 30, 0)
      .expect("naive");
    let at = to_utc_from_local(
      repeated,
      new_york(),
      "overlap"
    )
    .expect("ambiguous resolves");
    assert_eq!(
      at,
      Utc
        .with_ymd_and_hms(
          2024, 11, 3, 5, 30, 0
        )
        .single()
        .expect("utc")
    );
  }

  #[test]
  fn relative_days_follow_local_calendar_across_dst() {
    let tz = new_york();
    let fall = Utc
      .with_ymd_and_hms(
        2024, 11, 3, 17, 0, 0
      )
      .single()
      .expect("now");
    assert_eq!(
      parse_day_expr("today", fall, tz)
        .expect("today"),
      ymd(2024, 11, 3)
    );
    assert_eq!(
      parse_day_expr(
        "tomorrow", fall, tz
      )
      .expect("tomorrow"),
      ymd(2024, 11, 4)
    );

    let spring = Utc
      .with_ymd_and_hms(
        2024, 3, 11, 16, 0, 0
      )
      .single()
      .expect("now");
    assert_eq!(
      parse_day_expr(
        "yesterday", spring, tz
      )
      .expect("yesterday"),
      ymd(2024, 3, 10)
    );
  }

  #[test]
  fn parses_year_month_as_first_day() {
    let day = parse_day_expr(
      "2024-02",
      now(),
      chrono_tz::UTC
    )
    .expect("parse year-month");
    assert_eq!(
      day,
      NaiveDate::from_ymd_opt(
        2024, 2, 1
      )
      .expect("date")
    );
  }

  #[test]
  fn parses_month_name_as_next_occurrence()
   {
    let jan = parse_day_expr(
      "january",
      now(),
      chrono_tz::UTC
    )
    .expect("parse month");
    assert_eq!(
      jan.format("%Y-%m-%d").to_string(),
      "2025-01-01"
    );

    let mar = parse_day_expr(
      "mar",
      now(),
      chrono_tz::UTC
    )
    .expect("parse month");
    assert_eq!(
      mar.format("%Y-%m-%d").to_string(),
      "2024-03-01"
    );
  }

  #[test]
  fn local_forms_follow_the_given_timezone()
   {
    let tz: Tz = "Asia/Tokyo"
      .parse()
      .expect("tz");
    let parsed = parse_date_expr(
      "2024-01-17 09:00",
      now(),
      tz
    )
    .expect("parse local datetime");
    assert_eq!(
      parsed,
      Utc
        .with_ymd_and_hms(
          2024, 1, 17, 0, 0, 0
        )
        .single()
        .expect("utc")
    );
  }

  #[test]
  fn today_is_local_midnight() {
    let tz: Tz = "America/New_York"
      .parse()
      .expect("tz");
    let late = Utc
      .with_ymd_and_hms(
        2024, 1, 17, 3, 0, 0
      )
      .single()
      .expect("valid");
    let today =
      parse_date_expr("today", late, tz)
        .expect("today");
    assert_eq!(
      local_date(today, tz),
      NaiveDate::from_ymd_opt(
        2024, 1, 16
      )
      .expect("date")
    );
  }

  #[test]
  fn relative_and_clock_expressions() {
    let plus = parse_date_expr(
      "+2d",
      now(),
      chrono_tz::UTC
    )
    .expect("relative");
    assert_eq!(
      plus,
      now() + chrono::Duration::days(2)
    );

    let clock = parse_date_expr(
      "3:30pm",
      now(),
      chrono_tz::UTC
    )
    .expect("clock");
    assert_eq!(
      clock
        .format("%Y-%m-%d %H:%M")
        .to_string(),
      "2024-01-16 15:30"
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_date_expr(
        "someday",
        now(),
        chrono_tz::UTC
      )
      .is_err()
    );
  }

  #[test]
  fn configured_timezone_wins() {
    let tz = resolve_timezone(Some(
      "Europe/Berlin"
    ));
    assert_eq!(
      tz,
      chrono_tz::Europe::Berlin
    );
  }
}

pub mod post_date_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  const COMPACT_FORMAT: &str =
    "%Y%m%dT%H%M%SZ";

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::Secs,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(&raw)
    {
      return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, COMPACT_FORMAT)
            .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            .map_err(serde::de::Error::custom)
  }
}
