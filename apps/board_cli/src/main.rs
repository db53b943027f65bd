use anyhow::{anyhow, Context, Result};
use board_core::{load_settings, BoardClient, BoardEvent, GestureOutcome};
use clap::Parser;
use shared::domain::{DealId, PipelineId, StageId};

/// Headless driver for the pipeline board engine: loads a board, prints the
/// stage headers, and optionally performs one stage move.
#[derive(Parser, Debug)]
struct Args {
    /// Overrides the backend URL from board.toml / BOARD_SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    pipeline_id: i64,
    /// Stage move to perform after loading, as "<deal_id>:<stage_id>".
    #[arg(long)]
    move_deal: Option<String>,
}

fn parse_move(raw: &str) -> Result<(DealId, StageId)> {
    let (deal, stage) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <deal_id>:<stage_id>, got '{raw}'"))?;
    Ok((
        DealId(deal.parse().context("deal id must be an integer")?),
        StageId(stage.parse().context("stage id must be an integer")?),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let client = BoardClient::from_settings(&settings);
    let mut events = client.subscribe_events();

    let model = client.load_pipeline(PipelineId(args.pipeline_id)).await?;
    println!("{} ({} stages)", model.pipeline.name, model.stages.len());
    for (column, stats) in model.stages.iter().zip(model.stage_statistics()) {
        println!(
            "  {:<24} {:>3} deals  {:>12.2}",
            column.stage.name, stats.deal_count, stats.amount_total
        );
    }

    let Some(raw) = args.move_deal else {
        return Ok(());
    };
    let (deal_id, target_stage_id) = parse_move(&raw)?;
    if model.stage_of(deal_id) == Some(target_stage_id) {
        println!("deal {} is already in stage {}", deal_id.0, target_stage_id.0);
        return Ok(());
    }

    client
        .drop_deal(GestureOutcome::Drop {
            deal_id,
            target_stage_id,
        })
        .await;

    loop {
        match events.recv().await? {
            BoardEvent::MoveConfirmed { deal } if deal.deal_id == deal_id => {
                println!("moved deal {} to stage {}", deal.deal_id.0, deal.stage_id.0);
                break;
            }
            BoardEvent::MoveAdjusted { deal, reason } if deal.deal_id == deal_id => {
                println!(
                    "moved deal {} to stage {}; server adjustment: {reason}",
                    deal.deal_id.0, deal.stage_id.0
                );
                break;
            }
            BoardEvent::MoveFailed {
                deal_id: failed,
                reason,
            } if failed == deal_id => {
                println!("move failed: {reason}");
                break;
            }
            BoardEvent::MoveRejected { reason } => {
                println!("move rejected: {reason}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
