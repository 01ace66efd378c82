use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use contracts::{ChartHandle, ExpeditionTier};
use economy_api::{EconomyApi, Notify, NotifyError, RenderChart, RenderError};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("economy-cli <command>");
    println!("commands:");
    println!("  init <guild> <member>");
    println!("  balance <guild> <member>");
    println!("  daily <guild> <member>");
    println!("  invest <guild> <member> <shares>");
    println!("  divest <guild> <member> <shares>");
    println!("  stocks");
    println!("  cringe <guild> <member>");
    println!("  expedition <guild> <member> <tier>");
    println!("    tiers: short, normal, long");
    println!("  leave-guild <guild>");
    println!("  recover");
    println!("data dir: $ECONOMY_DATA_DIR, default ./economy_data");
}

struct ConsoleNotify;

impl Notify for ConsoleNotify {
    fn notify(&self, recipient_id: &str, text: &str) -> Result<(), NotifyError> {
        println!("[notice -> {recipient_id}] {text}");
        Ok(())
    }
}

/// Stand-in for the real plotting collaborator: dumps the elapsed values as
/// CSV next to the data files and hands back the path.
struct CsvChart {
    dir: PathBuf,
}

impl RenderChart for CsvChart {
    fn render_chart(
        &self,
        values: &[i64],
        _xlim: (usize, usize),
    ) -> Result<ChartHandle, RenderError> {
        let path = self.dir.join("market_chart.csv");
        let mut body = String::new();
        for (step, value) in values.iter().enumerate() {
            body.push_str(&format!("{step},{value}\n"));
        }
        std::fs::write(&path, body).map_err(|err| RenderError {
            message: err.to_string(),
        })?;
        Ok(ChartHandle(path.display().to_string()))
    }
}

fn data_dir() -> PathBuf {
    env::var("ECONOMY_DATA_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("economy_data"))
}

fn open_api(dir: &Path) -> Arc<EconomyApi> {
    Arc::new(EconomyApi::open(
        dir,
        Arc::new(ConsoleNotify),
        Arc::new(CsvChart {
            dir: dir.to_path_buf(),
        }),
    ))
}

fn require<'a>(args: &'a [String], index: usize, label: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {}", label))
}

fn parse_shares(value: Option<&String>) -> Result<i64, String> {
    let raw = value.ok_or_else(|| "missing shares".to_string())?;
    raw.parse::<i64>()
        .map_err(|_| format!("invalid shares: {raw}"))
}

async fn run_command(api: &Arc<EconomyApi>, args: &[String]) -> Result<(), String> {
    let now = Local::now().naive_local();
    let command = args.get(1).map(String::as_str).unwrap_or("");

    match command {
        "init" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let fresh = api
                .register_member(guild, member)
                .await
                .map_err(|err| err.to_string())?;
            if fresh {
                println!("registered {member} in {guild}");
            } else {
                println!("{member} is already registered in {guild}");
            }
        }
        "balance" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let view = api
                .balance(guild, member, now)
                .await
                .map_err(|err| err.to_string())?;
            println!(
                "{}: {} coins, {} shares @ {} = {} total",
                view.member_id, view.coins, view.shares, view.unit_price, view.combined_worth
            );
        }
        "daily" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let claimed = api
                .claim_daily(guild, member, now.date())
                .await
                .map_err(|err| err.to_string())?;
            if claimed {
                println!("daily reward claimed");
            } else {
                println!("already claimed today");
            }
        }
        "invest" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let shares = parse_shares(args.get(4))?;
            let cost = api
                .invest(guild, member, shares, now)
                .await
                .map_err(|err| err.to_string())?;
            println!("bought {shares} shares for {cost} coins");
        }
        "divest" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let shares = parse_shares(args.get(4))?;
            let gain = api
                .divest(guild, member, shares, now)
                .await
                .map_err(|err| err.to_string())?;
            println!("sold {shares} shares for {gain} coins");
        }
        "stocks" => {
            let summary = api
                .market_summary(now)
                .await
                .map_err(|err| err.to_string())?;
            println!("{summary}");
            if let Some(chart) = &summary.chart {
                println!("chart: {}", chart.0);
            }
        }
        "cringe" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let view = api
                .cringe_meter(guild, member)
                .await
                .map_err(|err| err.to_string())?;
            println!("{}: {} {}", view.member_id, view.status, view.bar);
        }
        "expedition" => {
            let guild = require(args, 2, "guild")?;
            let member = require(args, 3, "member")?;
            let tier = require(args, 4, "tier")?;
            let tier: ExpeditionTier = api
                .start_expedition(guild, member, tier)
                .await
                .map_err(|err| err.to_string())?;
            // The completion task lives in this process; stay alive for it.
            tokio::time::sleep(tier.duration() + Duration::from_secs(1)).await;
        }
        "leave-guild" => {
            let guild = require(args, 2, "guild")?;
            let removed = api.leave_guild(guild).await.map_err(|err| err.to_string())?;
            if removed {
                println!("removed guild {guild}");
            } else {
                println!("no records for guild {guild}");
            }
        }
        "recover" => {
            let cleared = api
                .recover_stale_expeditions()
                .await
                .map_err(|err| err.to_string())?;
            println!("cleared {cleared} stale expedition flags");
        }
        _ => {
            print_usage();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let dir = data_dir();
    if let Err(err) = std::fs::create_dir_all(&dir) {
        eprintln!("error: cannot create data dir {}: {err}", dir.display());
        std::process::exit(1);
    }

    let api = open_api(&dir);
    if let Err(err) = run_command(&api, &args).await {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}
