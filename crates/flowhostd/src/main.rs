mod commands;
mod platform;

use clap::{Parser, Subcommand};
use colored::Colorize;
use flowhost_core::Plan;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flowhostd")]
#[command(about = "n8n インスタンスのライフサイクル管理デーモン", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 監視・DNS スイープ・ロールアップのループを起動 (Ctrl-C で停止)
    Run,
    /// 孤立した DNS リライトを一度だけ掃除
    Sweep {
        /// 削除せずに対象を表示
        #[arg(long)]
        dry_run: bool,
    },
    /// 有効な設定を YAML で表示
    Config,
    /// インスタンス名から導出される名前を表示
    Name {
        /// オーナー ID
        owner: Uuid,
        /// インスタンス名
        instance_name: String,
    },
    /// インスタンス操作
    #[command(subcommand)]
    Instance(InstanceCommands),
}

#[derive(Subcommand)]
enum InstanceCommands {
    /// インスタンスを作成して起動
    Create {
        owner: Uuid,
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// オーナーのプラン (free, basic, pro, enterprise)
        #[arg(short, long, default_value = "free")]
        plan: Plan,
    },
    /// 停止中のインスタンスを起動
    Start { id: Uuid },
    /// インスタンスを停止
    Stop { id: Uuid },
    /// インスタンスを再起動
    Restart { id: Uuid },
    /// インスタンスを削除
    Delete { id: Uuid },
    /// インスタンスの詳細
    Get { id: Uuid },
    /// オーナーのインスタンス一覧
    List { owner: Uuid },
    /// 現在のリソース使用量
    Stats { id: Uuid },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match flowhost_config::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    init_tracing(&settings.server.log_level);

    match cli.command {
        Commands::Config => commands::print_config(&settings),
        Commands::Name {
            owner,
            instance_name,
        } => {
            commands::print_names(&settings, owner, &instance_name);
            Ok(())
        }
        Commands::Run => {
            let platform = platform::Platform::build(settings).await?;
            commands::run(&platform).await
        }
        Commands::Sweep { dry_run } => {
            let platform = platform::Platform::build(settings).await?;
            commands::sweep(&platform, dry_run).await
        }
        Commands::Instance(command) => {
            let platform = platform::Platform::build(settings).await?;
            let result = commands::instance(&platform, command).await;
            // 遅延ボリューム削除はプロセス終了前に完了させる
            let reports = platform.cleanup.drain().await;
            commands::print_task_reports(&reports);
            result
        }
    }
}
