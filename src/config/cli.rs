use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the talentgrid binary.
#[derive(Debug, Parser)]
#[command(
    name = "talentgrid",
    version,
    about = "Recruiting platform data layer toolkit"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TALENTGRID_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the render window for a list geometry as JSON.
    Window(WindowArgs),
    /// Rank a JSON array of feed posts for a viewer.
    Rank(RankArgs),
    /// Run the feed scenario against the in-memory backend.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the default cache TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the cache capacity.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<usize>,

    /// Override the default page size.
    #[arg(long = "query-page-size", value_name = "COUNT", global = true)]
    pub query_page_size: Option<usize>,

    /// Override the feed page size.
    #[arg(long = "query-feed-page-size", value_name = "COUNT", global = true)]
    pub query_feed_page_size: Option<usize>,

    /// Override the backend base URL.
    #[arg(long = "backend-url", value_name = "URL", global = true)]
    pub backend_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct WindowArgs {
    /// Number of items in the list.
    #[arg(long, value_name = "COUNT")]
    pub count: usize,

    /// Fixed row height in pixels.
    #[arg(long = "item-height", value_name = "PX")]
    pub item_height: f64,

    /// Viewport height in pixels.
    #[arg(long, value_name = "PX")]
    pub viewport: f64,

    /// Scroll offset in pixels.
    #[arg(long, value_name = "PX", default_value_t = 0.0)]
    pub scroll: f64,

    /// Rows rendered beyond each edge; defaults to `window.overscan`.
    #[arg(long, value_name = "COUNT")]
    pub overscan: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct RankArgs {
    /// JSON file holding an array of feed posts; `-` reads stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath, default_value = "-")]
    pub input: PathBuf,

    /// The viewer the feed is ranked for.
    #[arg(long, value_name = "UUID")]
    pub viewer: Uuid,

    /// Users the viewer is connected to.
    #[arg(long = "connection", value_name = "UUID")]
    pub connections: Vec<Uuid>,

    /// The viewer's industry.
    #[arg(long, value_name = "NAME")]
    pub industry: Option<String>,

    /// Reference time (RFC 3339); defaults to now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub now: Option<String>,

    /// Include the per-factor breakdown.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub explain: bool,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Posts seeded into the in-memory feed.
    #[arg(long, value_name = "COUNT", default_value_t = 25)]
    pub posts: usize,

    /// Feed page size used by the scenario.
    #[arg(long = "page-size", value_name = "COUNT", default_value_t = 10)]
    pub page_size: usize,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            posts: 25,
            page_size: 10,
        }
    }
}
