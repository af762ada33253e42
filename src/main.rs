use std::{io::Read, path::Path, process};

use serde::Serialize;
use talentgrid::{
    config::{self, Command, DemoArgs, RankArgs, Settings, WindowArgs},
    demo,
    error::AppError,
    infra::telemetry,
    ranking::{self, ViewerContext},
    types::FeedPost,
    window::{compute_window, is_end_reached},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Demo(DemoArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Window(args) => run_window(&settings, &args),
        Command::Rank(args) => run_rank(&args).await,
        Command::Demo(args) => run_demo(&settings, &args).await,
    }
}

#[derive(Serialize)]
struct WindowOutput {
    start_index: usize,
    end_index: usize,
    offset_pixels: f64,
    total_pixels: f64,
    end_reached: bool,
}

fn run_window(settings: &Settings, args: &WindowArgs) -> Result<(), AppError> {
    if !(args.item_height.is_finite() && args.item_height > 0.0) {
        return Err(AppError::validation("item height must be a positive number"));
    }

    let window = compute_window(
        args.count,
        args.item_height,
        args.viewport,
        args.scroll,
        settings.window.overscan,
    );
    let output = WindowOutput {
        start_index: window.start_index,
        end_index: window.end_index,
        offset_pixels: window.offset_pixels,
        total_pixels: window.total_pixels,
        end_reached: is_end_reached(
            args.scroll,
            args.viewport,
            window.total_pixels,
            settings.window.end_threshold,
        ),
    };
    print_json(&output)
}

async fn run_rank(args: &RankArgs) -> Result<(), AppError> {
    let raw = read_input(&args.input).await?;
    let posts: Vec<FeedPost> = serde_json::from_str(&raw)?;
    let now = match args.now.as_deref() {
        Some(text) => OffsetDateTime::parse(text, &Rfc3339)
            .map_err(|err| AppError::validation(format!("invalid --now `{text}`: {err}")))?,
        None => OffsetDateTime::now_utc(),
    };

    let mut viewer =
        ViewerContext::new(args.viewer, now).with_connections(args.connections.iter().copied());
    if let Some(industry) = args.industry.as_ref() {
        viewer = viewer.with_industry(industry.clone());
    }
    debug!(posts = posts.len(), viewer = %args.viewer, "Ranking feed");

    if args.explain {
        let mut explained: Vec<ExplainedPost> = posts
            .iter()
            .map(|post| ExplainedPost {
                id: post.id,
                breakdown: ranking::explain(post, &viewer),
            })
            .collect();
        explained.sort_by(|a, b| b.breakdown.total.total_cmp(&a.breakdown.total));
        return print_json(&explained);
    }

    let ranked: Vec<RankedOutput> = ranking::rank(posts, &viewer)
        .into_iter()
        .map(|ranked| RankedOutput {
            id: ranked.item.id,
            author_id: ranked.item.author_id,
            score: ranked.score,
        })
        .collect();
    print_json(&ranked)
}

#[derive(Serialize)]
struct RankedOutput {
    id: uuid::Uuid,
    author_id: uuid::Uuid,
    score: f64,
}

#[derive(Serialize)]
struct ExplainedPost {
    id: uuid::Uuid,
    breakdown: ranking::ScoreBreakdown,
}

async fn run_demo(settings: &Settings, args: &DemoArgs) -> Result<(), AppError> {
    let report = demo::run(settings, args).await?;
    print_json(&report)?;
    if !report.published_on_top || report.open_handles_after_unmount != 0 {
        return Err(AppError::unexpected("demo scenario did not hold"));
    }
    Ok(())
}

async fn read_input(path: &Path) -> Result<String, AppError> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
