use std::time::Duration;

use clap::{Arg, Command};
use tracing::{error, info};

use arenasim::logging::{init_logging, LogConfig, LogOutput};
use arenasim::scenario::ArenaScenario;
use arenasim::simulation::{ArenaCollaborators, ArenaSimulation, RunSummary, SimulationError};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("arenasim")
        .version("0.1.0")
        .about("戦闘アリーナ シミュレーション (Arena Simulation)")
        .long_about("プール化されたAIエージェントとプレイヤーが戦う戦闘アリーナのシミュレーション\n\
                     固定時間刻みのティックループで目標獲得・攻撃・撃破集計を評価します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、既定値のシナリオで実行されます。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .value_parser(clap::value_parser!(u64))
                .help("乱数シードを上書き")
        )
        .arg(
            Arg::new("realtime")
                .long("realtime")
                .action(clap::ArgAction::SetTrue)
                .help("実時間に同期してティックを進める")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログフィルタ (trace, debug, info, warn, error または target=level)")
        )
        .get_matches();

    println!("戦闘アリーナ シミュレーション - arenasim v0.1.0");
    println!();

    let output = match matches
        .get_one::<String>("log-output")
        .map_or(Ok(LogOutput::Console), |value| value.parse::<LogOutput>())
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };

    let mut log_config = LogConfig {
        output,
        ..LogConfig::default()
    };
    if let Some(filter) = matches.get_one::<String>("log-level") {
        log_config.filter = filter.clone();
    }
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化に失敗しました: {}", e);
            std::process::exit(1);
        }
    };

    // 詳細レベルの設定
    let verbose_level = matches.get_count("verbose");
    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    let options = RunOptions {
        info_only: matches.get_flag("info"),
        realtime: matches.get_flag("realtime"),
        seed: matches.get_one::<u64>("seed").copied(),
        verbose_level,
    };

    let scenario_path = matches.get_one::<String>("scenario").map(String::as_str);
    match run_scenario(scenario_path, &options) {
        Ok(_) => {
            if verbose_level > 0 {
                println!("シナリオ実行が正常に完了しました。");
            }
        }
        Err(e) => {
            error!(error = %e, "RUN_FAILED");
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
    }
}

struct RunOptions {
    info_only: bool,
    realtime: bool,
    seed: Option<u64>,
    verbose_level: u8,
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: Option<&str>, options: &RunOptions) -> Result<(), SimulationError> {
    let mut scenario = match scenario_path {
        Some(path) => {
            let scenario = ArenaScenario::from_file(path)?;
            if options.verbose_level > 0 {
                println!("シナリオファイル読み込み完了: {}", path);
            }
            scenario
        }
        None => {
            println!("シナリオ未指定のため既定値で実行します (-h でヘルプ)");
            ArenaScenario::default()
        }
    };

    if let Some(seed) = options.seed {
        scenario.sim.seed = seed;
    }
    if options.realtime {
        scenario.sim.realtime = true;
    }

    // 情報表示のみの場合
    if options.info_only {
        scenario.validate()?;
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, options.verbose_level)
}

/// シナリオの実行
fn execute_scenario(scenario: ArenaScenario, verbose_level: u8) -> Result<(), SimulationError> {
    scenario.print_summary();
    println!();

    if verbose_level > 0 {
        println!("シミュレーション設定:");
        println!("  時間刻み: {:.3}秒", scenario.sim.dt_s);
        println!("  最大時間: {:.1}秒", scenario.sim.t_max_s);
        println!("  シード値: {}", scenario.sim.seed);
        println!("  実時間同期: {}", scenario.sim.realtime);
        println!();
    }

    let realtime = scenario.sim.realtime;
    let collaborators = ArenaCollaborators::reference(&scenario);
    let mut simulation = ArenaSimulation::new(scenario, collaborators, verbose_level)?;
    simulation.initialize();

    let summary = if realtime {
        run_realtime(&mut simulation)?
    } else {
        simulation.run()
    };

    print_run_summary(&summary);
    Ok(())
}

/// 実時間に同期して実行
///
/// 1ティックごとに Δt 秒待機します。ティック処理自体は同期的です。
fn run_realtime(simulation: &mut ArenaSimulation) -> Result<RunSummary, SimulationError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    runtime.block_on(async {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(simulation.dt));
        info!(dt = simulation.dt, "REALTIME_START: 実時間同期で実行します");
        while !simulation.is_finished() {
            interval.tick().await;
            simulation.tick();
        }
    });

    Ok(simulation.summary())
}

fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("=== 実行結果 ===");
    println!("  結果: {}", summary.outcome);
    println!("  経過時間: {:.2}秒 ({} ステップ)", summary.duration, summary.steps);
    println!("  生存数: {}  AI撃破数: {}", summary.alive, summary.ai_dead);
    println!("  プレイヤースコア: {}", summary.player_score);
    println!("  リーダーボード:");
    for (rank, entry) in summary.leaderboard.iter().enumerate() {
        println!("    {}. {} - {}", rank + 1, entry.name, entry.score);
    }
}
