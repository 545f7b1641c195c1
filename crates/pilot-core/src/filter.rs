use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Utc
};
use tracing::trace;

use crate::post::{
  Platform,
  Post
};

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum PlatformFilter {
  #[default]
  All,
  Only(Platform)
}

impl PlatformFilter {
  pub fn accepts(
    self,
    platform: Platform
  ) -> bool {
    match self {
      | PlatformFilter::All => true,
      | PlatformFilter::Only(wanted) => {
        wanted == platform
      }
    }
  }
}

impl FromStr for PlatformFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all")
    {
      return Ok(PlatformFilter::All);
    }
    s.parse::<Platform>()
      .map(PlatformFilter::Only)
  }
}

impl fmt::Display for PlatformFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | PlatformFilter::All => {
        f.write_str("all")
      }
      | PlatformFilter::Only(p) => {
        write!(f, "{p}")
      }
    }
  }
}

/// The platform dropdown and search box
/// of the scheduler, as one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFilter {
  pub platform: PlatformFilter,
  pub query:    String
}

impl PostFilter {
  pub fn new(
    platform: PlatformFilter,
    query: impl Into<String>
  ) -> Self {
    Self {
      platform,
      query: query.into()
    }
  }

  /// Builds a filter from command-line
  /// terms. `platform:<name>` picks the
  /// platform; the remaining terms form
  /// the search text. `search:<word>`
  /// adds a word that would otherwise
  /// read as a command.
  #[tracing::instrument(skip(terms))]
  pub fn parse(
    terms: &[String]
  ) -> anyhow::Result<Self> {
    let mut platform =
      PlatformFilter::All;
    let mut words = Vec::new();

    for term in terms {
      if let Some(value) =
        term.strip_prefix("platform:")
      {
        platform = value.parse()?;
        continue;
      }
      let word = term
        .strip_prefix("search:")
        .unwrap_or(term.as_str());
      if !word.is_empty() {
        words.push(word);
      }
    }

    Ok(Self {
      platform,
      query: words.join(" ")
    })
  }

  pub fn is_empty(&self) -> bool {
    self.platform == PlatformFilter::All
      && self.query.is_empty()
  }

  pub fn matches(
    &self,
    post: &Post
  ) -> bool {
    let needle =
      self.query.to_lowercase();
    let ok = self
      .platform
      .accepts(post.platform)
      && text_matches(post, &needle);
    trace!(id = %post.id, ok, "filter evaluation");
    ok
  }
}

fn text_matches(
  post: &Post,
  needle: &str
) -> bool {
  needle.is_empty()
    || post
      .content
      .to_lowercase()
      .contains(needle)
    || post
      .caption
      .to_lowercase()
      .contains(needle)
}

/// Keeps posts on the chosen platform
/// whose title or caption contains
/// `query`, ignoring case. Input order
/// is kept.
pub fn filter_posts<'a, I>(
  posts: I,
  platform: PlatformFilter,
  query: &str
) -> Vec<&'a Post>
where
  I: IntoIterator<Item = &'a Post>
{
  let needle = query.to_lowercase();
  posts
    .into_iter()
    .filter(|post| {
      platform.accepts(post.platform)
        && text_matches(post, &needle)
    })
    .collect()
}

/// The next `limit` scheduled posts
/// after `now`, soonest first. Equal
/// times keep their input order.
#[tracing::instrument(skip(posts))]
pub fn upcoming<'a, I>(
  posts: I,
  now: DateTime<Utc>,
  limit: usize
) -> Vec<&'a Post>
where
  I: IntoIterator<Item = &'a Post>
{
  let mut out: Vec<&'a Post> = posts
    .into_iter()
    .filter(|post| post.is_upcoming(now))
    .collect();
  out.sort_by_key(|post| {
    post.scheduled_at
  });
  out.truncate(limit);
  out
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    TimeZone,
    Utc
  };

  use super::{
    PlatformFilter,
    PostFilter,
    filter_posts,
    upcoming
  };
  use crate::post::{
    Platform,
    Post,
    PostStatus
  };

  fn at(
    d: u32,
    h: u32,
    m: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(2024, 1, d, h, m, 0)
      .unwrap()
  }

  fn scheduled(
    id: &str,
    platform: Platform,
    when: DateTime<Utc>
  ) -> Post {
    Post::new(
      id,
      platform,
      format!("title {id}"),
      format!("caption {id}"),
      when,
      PostStatus::Scheduled
    )
  }

  fn ids(posts: &[&Post]) -> Vec<String> {
    posts
      .iter()
      .map(|p| p.id.clone())
      .collect()
  }

  #[test]
  fn all_and_empty_query_is_identity() {
    let posts = vec![
      scheduled("3", Platform::Twitter, at(17, 9, 0)),
      scheduled("1", Platform::Instagram, at(16, 14, 0)),
      scheduled("2", Platform::TikTok, at(16, 16, 30)),
    ];
    let out = filter_posts(
      &posts,
      PlatformFilter::All,
      ""
    );
    assert_eq!(ids(&out), vec!["3", "1", "2"]);
  }

  #[test]
  fn platform_and_text_are_combined() {
    let mut a = scheduled(
      "a",
      Platform::Instagram,
      at(16, 14, 0)
    );
    a.caption =
      "These AI tools rock".to_string();
    let mut b = scheduled(
      "b",
      Platform::LinkedIn,
      at(17, 9, 0)
    );
    b.content =
      "The future of AI".to_string();
    let c = scheduled(
      "c",
      Platform::Instagram,
      at(18, 9, 0)
    );
    let posts = vec![a, b, c];

    let insta_ai = filter_posts(
      &posts,
      PlatformFilter::Only(
        Platform::Instagram
      ),
      "ai"
    );
    assert_eq!(ids(&insta_ai), vec!["a"]);

    let any_ai = filter_posts(
      &posts,
      PlatformFilter::All,
      "Ai"
    );
    assert_eq!(
      ids(&any_ai),
      vec!["a", "b"]
    );
  }

  #[test]
  fn upcoming_sorts_filters_and_truncates()
   {
    let mut published = scheduled(
      "5",
      Platform::Instagram,
      at(15, 10, 0)
    );
    published.status =
      PostStatus::Published;
    let posts = vec![
      scheduled("4", Platform::Twitter, at(17, 15, 45)),
      scheduled("2", Platform::TikTok, at(16, 16, 30)),
      published,
      scheduled("3", Platform::LinkedIn, at(17, 9, 0)),
      scheduled("1", Platform::Instagram, at(16, 14, 0)),
    ];

    let out =
      upcoming(&posts, at(16, 0, 0), 3);
    assert_eq!(
      ids(&out),
      vec!["1", "2", "3"]
    );

    let all =
      upcoming(&posts, at(16, 0, 0), 10);
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| {
      w[0].scheduled_at
        <= w[1].scheduled_at
    }));

    assert!(
      upcoming(&posts, at(18, 0, 0), 5)
        .is_empty()
    );
  }

  #[test]
  fn upcoming_ties_keep_input_order() {
    let when = at(20, 12, 0);
    let posts = vec![
      scheduled("x", Platform::Twitter, when),
      scheduled("y", Platform::TikTok, when),
    ];
    let out =
      upcoming(&posts, at(19, 0, 0), 2);
    assert_eq!(ids(&out), vec!["x", "y"]);
  }

  #[test]
  fn post_filter_parses_terms() {
    let filter = PostFilter::parse(&[
      "platform:linkedin".to_string(),
      "future".to_string(),
      "of".to_string(),
    ])
    .unwrap();
    assert_eq!(
      filter.platform,
      PlatformFilter::Only(
        Platform::LinkedIn
      )
    );
    assert_eq!(filter.query, "future of");

    assert!(
      PostFilter::parse(&[
        "platform:friendster".to_string()
      ])
      .is_err()
    );
    assert!(
      PostFilter::parse(&[])
        .unwrap()
        .is_empty()
    );
  }

  #[test]
  fn search_prefix_escapes_command_words() {
    let filter = PostFilter::parse(&[
      "search:day".to_string(),
      "one".to_string()
    ])
    .unwrap();
    assert_eq!(filter.query, "day one");
    assert_eq!(
      filter.platform,
      PlatformFilter::All
    );
  }
}
