//! Month grids and day bucketing for
//! the scheduler calendar.
//!
//! Everything here is pure: callers hand
//! in posts, the reference month and the
//! timezone, and get borrowed views back.

use std::collections::BTreeMap;

use chrono::{
  Datelike,
  Duration,
  NaiveDate
};
use chrono_tz::Tz;

use crate::datetime::local_date;
use crate::post::{
  Post,
  PostStatus
};

pub const WEEKDAY_LABELS: [&str; 7] = [
  "Sun", "Mon", "Tue", "Wed", "Thu",
  "Fri", "Sat"
];

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum GridCell {
  Empty,
  Day(NaiveDate)
}

impl GridCell {
  pub fn date(self) -> Option<NaiveDate> {
    match self {
      | GridCell::Empty => None,
      | GridCell::Day(date) => Some(date)
    }
  }
}

/// One calendar month laid out in
/// Sunday-first columns.
///
/// `cells` carries the leading padding
/// and one cell per day; there is no
/// trailing padding. Use [`rows`] for
/// complete weeks.
///
/// [`rows`]: MonthGrid::rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
  pub year:  i32,
  pub month: u32,
  pub cells: Vec<GridCell>
}

impl MonthGrid {
  pub fn first_day(&self) -> NaiveDate {
    first_day_of_month(
      self.year, self.month
    )
  }

  pub fn leading_blanks(&self) -> usize {
    self
      .cells
      .iter()
      .take_while(|cell| {
        **cell == GridCell::Empty
      })
      .count()
  }

  pub fn day_count(&self) -> usize {
    self.cells.len()
      - self.leading_blanks()
  }

  pub fn days(
    &self
  ) -> impl Iterator<Item = NaiveDate> + '_
  {
    self
      .cells
      .iter()
      .filter_map(|cell| cell.date())
  }

  pub fn contains(
    &self,
    day: NaiveDate
  ) -> bool {
    day.year() == self.year
      && day.month() == self.month
  }

  pub fn rows(&self) -> Vec<[GridCell; 7]> {
    self
      .cells
      .chunks(7)
      .map(|chunk| {
        let mut row = [GridCell::Empty; 7];
        row[..chunk.len()]
          .copy_from_slice(chunk);
        row
      })
      .collect()
  }

  pub fn title(&self) -> String {
    self
      .first_day()
      .format("%B %Y")
      .to_string()
  }
}

pub fn is_leap_year(year: i32) -> bool {
  year % 4 == 0
    && (year % 100 != 0 || year % 400 == 0)
}

pub fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  match month {
    | 1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
    | 4 | 6 | 9 | 11 => 30,
    | 2 if is_leap_year(year) => 29,
    | _ => 28
  }
}

fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

#[tracing::instrument(level = "trace")]
pub fn build_month_grid(
  reference: NaiveDate
) -> MonthGrid {
  let year = reference.year();
  let month = reference.month();
  let first =
    first_day_of_month(year, month);
  let blanks = first
    .weekday()
    .num_days_from_sunday()
    as usize;
  let total = days_in_month(year, month);

  let mut cells = Vec::with_capacity(
    blanks + total as usize
  );
  cells.extend(
    std::iter::repeat_n(
      GridCell::Empty,
      blanks
    )
  );
  cells.extend(
    first
      .iter_days()
      .take(total as usize)
      .map(GridCell::Day)
  );

  MonthGrid {
    year,
    month,
    cells
  }
}

/// Moves the month cursor by `delta`
/// months. The result is always the 1st
/// so that long months never spill into
/// the month after the target.
pub fn shift_month(
  reference: NaiveDate,
  delta: i32
) -> NaiveDate {
  let index = reference.year() as i64
    * 12
    + reference.month0() as i64
    + delta as i64;
  let year = index.div_euclid(12) as i32;
  let month =
    index.rem_euclid(12) as u32 + 1;
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(reference)
}

/// The Sunday-started week containing
/// `day`.
pub fn week_of(
  day: NaiveDate
) -> [NaiveDate; 7] {
  let back = day
    .weekday()
    .num_days_from_sunday()
    as i64;
  let start = day
    .checked_sub_signed(Duration::days(
      back
    ))
    .unwrap_or(day);
  let mut out = [start; 7];
  for (offset, slot) in
    out.iter_mut().enumerate()
  {
    *slot = start
      .checked_add_signed(
        Duration::days(offset as i64)
      )
      .unwrap_or(start);
  }
  out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBadges<'a> {
  pub shown:    Vec<&'a Post>,
  pub overflow: usize
}

/// Splits a day's posts into the badges
/// that fit in a cell and a "+N more"
/// count.
pub fn day_badges<'a>(
  posts: &[&'a Post],
  limit: usize
) -> DayBadges<'a> {
  let shown_len = posts.len().min(limit);
  DayBadges {
    shown:    posts[..shown_len].to_vec(),
    overflow: posts.len() - shown_len
  }
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub struct MonthSummary {
  pub scheduled: usize,
  pub published: usize,
  pub failed:    usize
}

impl MonthSummary {
  pub fn total(&self) -> usize {
    self.scheduled
      + self.published
      + self.failed
  }
}

/// Buckets posts onto calendar days as
/// seen from one timezone.
#[derive(Debug, Clone, Copy)]
pub struct CalendarIndex {
  tz: Tz
}

impl CalendarIndex {
  pub fn new(tz: Tz) -> Self {
    Self {
      tz
    }
  }

  pub fn timezone(&self) -> Tz {
    self.tz
  }

  pub fn day_of(
    &self,
    post: &Post
  ) -> NaiveDate {
    local_date(
      post.scheduled_at,
      self.tz
    )
  }

  pub fn posts_for_day<'a, I>(
    &self,
    posts: I,
    day: NaiveDate
  ) -> Vec<&'a Post>
  where
    I: IntoIterator<Item = &'a Post>
  {
    posts
      .into_iter()
      .filter(|post| {
        self.day_of(post) == day
      })
      .collect()
  }

  #[tracing::instrument(skip(self, posts, grid), fields(year = grid.year, month = grid.month))]
  pub fn bucket_month<'a, I>(
    &self,
    posts: I,
    grid: &MonthGrid
  ) -> BTreeMap<NaiveDate, Vec<&'a Post>>
  where
    I: IntoIterator<Item = &'a Post>
  {
    let mut buckets: BTreeMap<
      NaiveDate,
      Vec<&'a Post>
    > = BTreeMap::new();
    for post in posts {
      let day = self.day_of(post);
      if grid.contains(day) {
        buckets
          .entry(day)
          .or_default()
          .push(post);
      }
    }
    tracing::trace!(
      days = buckets.len(),
      "bucketed posts by day"
    );
    buckets
  }

  pub fn month_summary<'a, I>(
    &self,
    posts: I,
    grid: &MonthGrid
  ) -> MonthSummary
  where
    I: IntoIterator<Item = &'a Post>
  {
    let mut summary =
      MonthSummary::default();
    for post in posts {
      if !grid.contains(self.day_of(post))
      {
        continue;
      }
      match post.status {
        | PostStatus::Scheduled => {
          summary.scheduled += 1
        }
        | PostStatus::Published => {
          summary.published += 1
        }
        | PostStatus::Failed => {
          summary.failed += 1
        }
      }
    }
    summary
  }
}

/// Month cursor plus the optional
/// selected day. The two never merge:
/// moving the cursor keeps the
/// selection as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarView {
  cursor:   NaiveDate,
  selected: Option<NaiveDate>
}

impl CalendarView {
  pub fn new(
    reference: NaiveDate
  ) -> Self {
    Self {
      cursor:   shift_month(reference, 0),
      selected: None
    }
  }

  pub fn cursor(&self) -> NaiveDate {
    self.cursor
  }

  pub fn selected(
    &self
  ) -> Option<NaiveDate> {
    self.selected
  }

  #[must_use]
  pub fn shifted(
    &self,
    delta: i32
  ) -> Self {
    Self {
      cursor:   shift_month(
        self.cursor,
        delta
      ),
      selected: self.selected
    }
  }

  #[must_use]
  pub fn next_month(&self) -> Self {
    self.shifted(1)
  }

  #[must_use]
  pub fn prev_month(&self) -> Self {
    self.shifted(-1)
  }

  #[must_use]
  pub fn select(
    &self,
    day: NaiveDate
  ) -> Self {
    Self {
      cursor:   self.cursor,
      selected: Some(day)
    }
  }

  #[must_use]
  pub fn clear_selection(&self) -> Self {
    Self {
      cursor:   self.cursor,
      selected: None
    }
  }

  pub fn grid(&self) -> MonthGrid {
    build_month_grid(self.cursor)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Datelike,
    NaiveDate,
    TimeZone,
    Utc,
    Weekday
  };
  use chrono_tz::Tz;

  use super::{
    CalendarIndex,
    CalendarView,
    GridCell,
    build_month_grid,
    day_badges,
    days_in_month,
    shift_month,
    week_of
  };
  use crate::post::{
    Platform,
    Post,
    PostStatus
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .unwrap()
  }

  fn at(
    y: i32,
    m: u32,
    d: u32,
    h: u32,
    min: u32,
    s: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, h, min, s)
      .unwrap()
  }

  fn post(
    id: &str,
    when: DateTime<Utc>
  ) -> Post {
    Post::new(
      id,
      Platform::Instagram,
      id,
      id,
      when,
      PostStatus::Scheduled
    )
  }

  #[test]
  fn leap_february_2024_grid() {
    let grid =
      build_month_grid(date(2024, 2, 1));
    assert_eq!(grid.leading_blanks(), 4);
    assert_eq!(grid.day_count(), 29);
    assert_eq!(
      grid.title(),
      "February 2024"
    );
  }

  #[test]
  fn grid_columns_match_weekdays_1900_to_2100()
   {
    for year in 1900..=2100 {
      for month in 1..=12 {
        let reference =
          date(year, month, 15);
        let grid =
          build_month_grid(reference);
        let first = date(year, month, 1);

        assert_eq!(
          grid.leading_blanks(),
          first
            .weekday()
            .num_days_from_sunday()
            as usize,
          "{year}-{month}"
        );

        let expected = match month {
          | 2 => {
            if year % 4 == 0
              && (year % 100 != 0
                || year % 400 == 0)
            {
              29
            } else {
              28
            }
          }
          | 4 | 6 | 9 | 11 => 30,
          | _ => 31
        };
        assert_eq!(
          grid.day_count(),
          expected,
          "{year}-{month}"
        );

        for (idx, cell) in
          grid.cells.iter().enumerate()
        {
          if let GridCell::Day(day) = cell
          {
            assert_eq!(
              day
                .weekday()
                .num_days_from_sunday()
                as usize,
              idx % 7
            );
          }
        }
      }
    }
  }

  #[test]
  fn century_rules() {
    assert_eq!(days_in_month(1900, 2), 28);
    assert_eq!(days_in_month(2000, 2), 29);
    assert_eq!(days_in_month(2100, 2), 28);
  }

  #[test]
  fn rows_pad_the_last_week() {
    let grid =
      build_month_grid(date(2024, 1, 9));
    let rows = grid.rows();
    assert_eq!(rows.len(), 5);
    assert_eq!(
      rows[0][0],
      GridCell::Empty
    );
    assert_eq!(
      rows[0][1],
      GridCell::Day(date(2024, 1, 1))
    );
    assert_eq!(
      rows[4][3],
      GridCell::Day(date(2024, 1, 31))
    );
    assert_eq!(
      rows[4][4],
      GridCell::Empty
    );
  }

  #[test]
  fn shift_month_normalizes_and_rolls_years()
   {
    assert_eq!(
      shift_month(date(2024, 1, 31), 1),
      date(2024, 2, 1)
    );
    assert_eq!(
      shift_month(date(2024, 12, 31), 1),
      date(2025, 1, 1)
    );
    assert_eq!(
      shift_month(date(2024, 1, 15), -1),
      date(2023, 12, 1)
    );
    assert_eq!(
      shift_month(date(2024, 3, 5), -27),
      date(2021, 12, 1)
    );
  }

  #[test]
  fn shift_month_round_trips() {
    let mut d = date(1999, 1, 31);
    while d.year() < 2002 {
      let back =
        shift_month(shift_month(d, 1), -1);
      assert_eq!(
        (back.year(), back.month()),
        (d.year(), d.month())
      );

      let mut twelve = d;
      for _ in 0..12 {
        twelve = shift_month(twelve, 1);
      }
      assert_eq!(
        (twelve.year(), twelve.month()),
        (d.year() + 1, d.month())
      );

      d = d.succ_opt().unwrap();
    }
  }

  #[test]
  fn posts_for_day_covers_whole_day_only()
   {
    let index =
      CalendarIndex::new(chrono_tz::UTC);
    let posts = vec![
      post("start", at(2024, 1, 16, 0, 0, 0)),
      post("prev", at(2024, 1, 15, 23, 59, 59)),
      post("end", at(2024, 1, 16, 23, 59, 59)),
      post("next", at(2024, 1, 17, 0, 0, 0)),
    ];

    let ids: Vec<&str> = index
      .posts_for_day(
        &posts,
        date(2024, 1, 16)
      )
      .iter()
      .map(|p| p.id.as_str())
      .collect();
    assert_eq!(ids, vec!["start", "end"]);

    let mut reversed = posts.clone();
    reversed.reverse();
    let mut rev_ids: Vec<&str> = index
      .posts_for_day(
        &reversed,
        date(2024, 1, 16)
      )
      .iter()
      .map(|p| p.id.as_str())
      .collect();
    rev_ids.sort_unstable();
    assert_eq!(rev_ids, vec!["end", "start"]);
  }

  #[test]
  fn bucketing_uses_the_index_timezone() {
    let tokyo: Tz =
      "Asia/Tokyo".parse().unwrap();
    let late_utc =
      post("late", at(2024, 1, 16, 20, 0, 0));
    let posts = vec![late_utc];

    let utc_index =
      CalendarIndex::new(chrono_tz::UTC);
    let tokyo_index =
      CalendarIndex::new(tokyo);

    assert_eq!(
      utc_index
        .posts_for_day(
          &posts,
          date(2024, 1, 16)
        )
        .len(),
      1
    );
    assert!(
      tokyo_index
        .posts_for_day(
          &posts,
          date(2024, 1, 16)
        )
        .is_empty()
    );
    assert_eq!(
      tokyo_index
        .posts_for_day(
          &posts,
          date(2024, 1, 17)
        )
        .len(),
      1
    );
  }

  #[test]
  fn bucket_month_and_summary_ignore_other_months()
   {
    let index =
      CalendarIndex::new(chrono_tz::UTC);
    let mut published =
      post("p", at(2024, 1, 15, 10, 0, 0));
    published.status =
      PostStatus::Published;
    let posts = vec![
      post("a", at(2024, 1, 16, 14, 0, 0)),
      post("b", at(2024, 1, 16, 16, 30, 0)),
      published,
      post("feb", at(2024, 2, 1, 9, 0, 0)),
    ];
    let grid =
      build_month_grid(date(2024, 1, 1));

    let buckets =
      index.bucket_month(&posts, &grid);
    assert_eq!(buckets.len(), 2);
    assert_eq!(
      buckets[&date(2024, 1, 16)].len(),
      2
    );
    assert!(
      !buckets
        .contains_key(&date(2024, 2, 1))
    );

    let summary =
      index.month_summary(&posts, &grid);
    assert_eq!(summary.scheduled, 2);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total(), 3);
  }

  #[test]
  fn badges_report_overflow() {
    let posts = vec![
      post("a", at(2024, 1, 16, 9, 0, 0)),
      post("b", at(2024, 1, 16, 10, 0, 0)),
      post("c", at(2024, 1, 16, 11, 0, 0)),
    ];
    let refs: Vec<&Post> =
      posts.iter().collect();

    let badges = day_badges(&refs, 2);
    assert_eq!(badges.shown.len(), 2);
    assert_eq!(badges.shown[0].id, "a");
    assert_eq!(badges.overflow, 1);

    let roomy = day_badges(&refs, 5);
    assert_eq!(roomy.shown.len(), 3);
    assert_eq!(roomy.overflow, 0);
  }

  #[test]
  fn week_starts_on_sunday() {
    let week = week_of(date(2024, 1, 17));
    assert_eq!(week[0], date(2024, 1, 14));
    assert_eq!(
      week[0].weekday(),
      Weekday::Sun
    );
    assert_eq!(week[6], date(2024, 1, 20));

    let sunday = week_of(date(2024, 1, 14));
    assert_eq!(sunday[0], date(2024, 1, 14));
  }

  #[test]
  fn view_navigation_keeps_selection() {
    let view =
      CalendarView::new(date(2024, 1, 31))
        .select(date(2024, 1, 16));
    assert_eq!(
      view.cursor(),
      date(2024, 1, 1)
    );

    let next = view.next_month();
    assert_eq!(
      next.cursor(),
      date(2024, 2, 1)
    );
    assert_eq!(
      next.selected(),
      Some(date(2024, 1, 16))
    );
    assert_eq!(next.grid().day_count(), 29);

    let back = next.prev_month();
    assert_eq!(back, view);
    assert_eq!(
      back.clear_selection().selected(),
      None
    );
  }
}
