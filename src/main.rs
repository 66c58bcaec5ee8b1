use std::str::FromStr;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info, warn};

use edgesim::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use edgesim::scenario::ScenarioConfig;
use edgesim::simulation::SimulationEngine;

fn build_cli() -> Command {
    Command::new("edgesim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("エッジ・ドローン群シミュレータ (Edge Drone Fleet Simulator)")
        .long_about(
            "2次元ワールド上の巡回機・消火機を固定時間刻みで動かし、\n\
             ジオフェンスのイベントと機体の状態遷移を記録します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するシナリオファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、既定のエッジ構成で実行されます。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("fast")
                .short('f')
                .long("fast")
                .action(ArgAction::SetTrue)
                .help("実時間で待機せずに最大時間まで実行"),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(f64))
                .help("シミュレーション最大時間を上書き（秒）"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("詳細出力レベル (-v: debug, -vv: trace)"),
        )
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let output = match matches.get_one::<String>("log-output").map(|s| LogOutput::from_str(s)) {
        Some(Ok(output)) => output,
        Some(Err(e)) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
        None => LogOutput::Console,
    };
    let base_level = parse_log_level(matches.get_one::<String>("log-level").map_or("info", String::as_str));
    let log_config = LogConfig {
        level: level_for_verbosity(base_level, matches.get_count("verbose")),
        output,
        ..LogConfig::default()
    };

    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&matches).await {
        error!(error = %e, "SIM_ABORTED: シミュレーションを中断しました");
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = match matches.get_one::<String>("scenario") {
        Some(path) => ScenarioConfig::from_file(path)?,
        None => {
            info!("シナリオ未指定のため既定のエッジ構成を使用します");
            ScenarioConfig::edge_default()
        }
    };

    if let Some(duration) = matches.get_one::<f64>("duration") {
        scenario.sim.t_max_s = *duration;
        scenario.validate()?;
    }

    if matches.get_flag("info") {
        scenario.print_summary();
        return Ok(());
    }

    scenario.print_summary();
    println!();

    let t_max = scenario.sim.t_max_s;
    let mut engine = SimulationEngine::from_scenario(&scenario)?;

    if matches.get_flag("fast") {
        engine.run_fast(t_max);
    } else {
        engine.start()?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::try_from_secs_f64(t_max).unwrap_or(Duration::MAX)) => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("SIM_INTERRUPTED: 割り込みを受けたため停止します"),
                    Err(e) => warn!(error = %e, "シグナル待機に失敗しました"),
                }
            }
        }
        engine.stop().await;
    }

    let snapshot = engine.snapshot();
    info!(
        ts = snapshot.ts,
        steps = snapshot.step_count,
        agents = snapshot.agents.len(),
        events = snapshot.recent_events.len(),
        "SIM_FINISHED: 最終スナップショットを出力します"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
