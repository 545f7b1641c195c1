use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::config::Config;
use crate::datetime::to_utc_from_local;
use crate::post::{Platform, Post, PostStatus};

/// Source of the post list fed to the calendar.
///
/// The calendar only runs once `fetch_posts` has resolved.
#[async_trait]
pub trait PostProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_posts(&self) -> anyhow::Result<Vec<Post>>;
}

/// Built-in demo posts, optionally delayed to mimic a slow backend.
#[derive(Debug, Clone)]
pub struct SamplePostProvider {
    tz: Tz,
    delay: Duration,
}

impl SamplePostProvider {
    pub fn new(tz: Tz, delay: Duration) -> Self {
        Self { tz, delay }
    }

    pub fn posts(&self) -> anyhow::Result<Vec<Post>> {
        let tz = self.tz;
        let local = |d: u32, h: u32, m: u32| -> anyhow::Result<_> {
            let naive: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 1, d)
                .and_then(|date| date.and_hms_opt(h, m, 0))
                .with_context(|| format!("invalid sample date 2024-01-{d:02} {h:02}:{m:02}"))?;
            to_utc_from_local(naive, tz, "sample post")
        };

        let mut first = Post::new(
            "1",
            Platform::Instagram,
            "5 AI tools that will revolutionize your workflow",
            "🤖 Ready to 10x your productivity? These AI tools are game-changers!\n\n\
             1. ChatGPT for writing\n2. Midjourney for visuals\n3. Notion AI for notes\n\
             4. Jasper for marketing\n5. Loom AI for videos\n\n\
             Which one are you excited to try? 👇\n\n#AITools #Productivity",
            local(16, 14, 0)?,
            PostStatus::Scheduled,
        );
        first.image = Some("/api/placeholder/64/64".to_string());

        Ok(vec![
            first,
            Post::new(
                "2",
                Platform::TikTok,
                "Behind the scenes: My content creation process",
                "POV: You discover the secret to viral content 🤯 \
                 #ContentCreator #BehindTheScenes #Viral",
                local(16, 16, 30)?,
                PostStatus::Scheduled,
            ),
            Post::new(
                "3",
                Platform::LinkedIn,
                "The future of AI in business automation",
                "After 5 years in tech, here's my take on AI:\n\n\
                 → It's not replacing jobs, it's transforming them\n\
                 → Early adopters will have a massive advantage\n\
                 → The key is human + AI collaboration\n\n\
                 What's your experience with AI tools?",
                local(17, 9, 0)?,
                PostStatus::Scheduled,
            ),
            Post::new(
                "4",
                Platform::Twitter,
                "Thread: 10 ChatGPT prompts for better productivity",
                "🧵 Thread: 10 ChatGPT prompts that will boost your productivity by 200%\n\n\
                 1/ \"Act as a productivity coach and help me prioritize my tasks...\"",
                local(17, 15, 45)?,
                PostStatus::Scheduled,
            ),
            Post::new(
                "5",
                Platform::Instagram,
                "Weekly motivation: Consistency beats perfection",
                "✨ Monday Motivation ✨\n\n\
                 Consistency beats perfection every single time.\n\n\
                 You don't need to be perfect, you just need to show up.\n\n\
                 💭 What's one thing you're going to be consistent with this week?",
                local(15, 10, 0)?,
                PostStatus::Published,
            ),
        ])
    }
}

#[async_trait]
impl PostProvider for SamplePostProvider {
    fn name(&self) -> &str {
        "sample"
    }

    #[tracing::instrument(skip(self), fields(delay_ms = self.delay.as_millis() as u64))]
    async fn fetch_posts(&self) -> anyhow::Result<Vec<Post>> {
        if !self.delay.is_zero() {
            debug!("simulating backend delay");
            tokio::time::sleep(self.delay).await;
        }
        let posts = self.posts()?;
        info!(count = posts.len(), "loaded sample posts");
        Ok(posts)
    }
}

/// Reads posts from a JSON-lines file, one post per line.
#[derive(Debug, Clone)]
pub struct JsonlPostProvider {
    path: PathBuf,
}

impl JsonlPostProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PostProvider for JsonlPostProvider {
    fn name(&self) -> &str {
        "file"
    }

    #[tracing::instrument(skip(self), fields(file = %self.path.display()))]
    async fn fetch_posts(&self) -> anyhow::Result<Vec<Post>> {
        load_jsonl(&self.path).with_context(|| format!("failed to load {}", self.path.display()))
    }
}

/// Picks the provider named by `posts.source`; an explicit file path always
/// selects the JSON-lines provider.
#[tracing::instrument(skip(cfg, override_path, tz))]
pub fn from_config(
    cfg: &Config,
    override_path: Option<&Path>,
    tz: Tz,
) -> anyhow::Result<Box<dyn PostProvider>> {
    if let Some(path) = override_path {
        return Ok(Box::new(JsonlPostProvider::new(path)));
    }

    let source = cfg.get("posts.source").unwrap_or_else(|| "sample".to_string());
    match source.trim().to_ascii_lowercase().as_str() {
        "sample" => {
            let delay_ms = cfg.get_usize("sample.delay_ms")?.unwrap_or(0) as u64;
            Ok(Box::new(SamplePostProvider::new(
                tz,
                Duration::from_millis(delay_ms),
            )))
        }
        "file" => {
            let path = cfg
                .get_path("posts.file")
                .ok_or_else(|| anyhow!("posts.source=file requires posts.file"))?;
            Ok(Box::new(JsonlPostProvider::new(path)))
        }
        other => Err(anyhow!("invalid posts.source: {other} (expected sample or file)")),
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Post>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let post: Post = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(post);
    }

    debug!(count = out.len(), "loaded posts from jsonl");
    Ok(out)
}
