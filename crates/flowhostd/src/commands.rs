use crate::InstanceCommands;
use crate::platform::Platform;
use colored::Colorize;
use flowhost_config::Settings;
use flowhost_core::naming::{container_identifier, subdomain};
use flowhost_core::{CreateRequest, Instance, Outcome, ResourceSample, TaskReport};
use flowhost_dns::SweepReport;
use tokio::sync::watch;
use uuid::Uuid;

pub fn print_config(settings: &Settings) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(settings)?);
    Ok(())
}

pub fn print_names(settings: &Settings, owner: Uuid, instance_name: &str) {
    let identifier = container_identifier(owner, instance_name);
    let sub = subdomain(&identifier);
    println!("{:<12} {}", "container:", identifier);
    println!("{:<12} {}", "subdomain:", sub);
    println!("{:<12} {}.{}", "label:", sub, settings.dns.internal_suffix);
    println!("{:<12} https://{}.{}", "url:", sub, settings.server.domain);
}

/// Ctrl-C までバックグラウンドループを回す
pub async fn run(platform: &Platform) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = platform.scheduler();
    let sweep = platform.sweep_job();
    let rollup = platform.rollup_job();

    tracing::info!(
        interval = ?platform.settings.monitoring.interval,
        sweep_interval = ?platform.settings.dns.sweep_interval,
        "flowhostd started"
    );
    println!("{}", "flowhostd を起動しました (Ctrl-C で停止)".green());

    let loops = async {
        tokio::join!(
            scheduler.run(shutdown_rx.clone()),
            sweep.run(shutdown_rx.clone()),
            rollup.run(shutdown_rx.clone()),
        );
    };
    let signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    };
    tokio::join!(loops, signal);

    let reports = platform.cleanup.drain().await;
    print_task_reports(&reports);
    println!("{}", "停止しました".green());
    Ok(())
}

pub async fn sweep(platform: &Platform, dry_run: bool) -> anyhow::Result<()> {
    let report = platform
        .reconciler
        .sweep_orphans(platform.docker.as_ref(), dry_run)
        .await?;
    print_sweep_report(&report);
    Ok(())
}

fn print_sweep_report(report: &SweepReport) {
    if report.dry_run {
        println!("{}", "[dry-run] 削除は行いません".yellow());
    }
    println!(
        "スキャン: {}  稼働中: {}  孤立: {}",
        report.scanned,
        report.kept,
        report.orphans.len()
    );
    for orphan in &report.orphans {
        println!("  {} {} -> {}", "•".cyan(), orphan.label, orphan.answer);
    }
    for label in &report.removed {
        println!("  {} {}", "✓ 削除".green(), label);
    }
    for label in &report.lingering {
        println!("  {} {}", "! 残存".yellow(), label);
    }
    for (label, error) in &report.failed {
        println!("  {} {}: {}", "✗ 失敗".red(), label, error);
    }
}

pub async fn instance(platform: &Platform, command: InstanceCommands) -> anyhow::Result<()> {
    let provisioner = &platform.provisioner;
    match command {
        InstanceCommands::Create {
            owner,
            name,
            description,
            plan,
        } => {
            platform.quotas.assign(owner, plan).await;
            let request = CreateRequest::new(name).with_description(description);
            print_outcome(&provisioner.create(owner, request).await?);
        }
        InstanceCommands::Start { id } => print_outcome(&provisioner.start(id).await?),
        InstanceCommands::Stop { id } => print_instance(&provisioner.stop(id).await?),
        InstanceCommands::Restart { id } => print_outcome(&provisioner.restart(id).await?),
        InstanceCommands::Delete { id } => print_outcome(&provisioner.delete(id).await?),
        InstanceCommands::Get { id } => print_instance(&provisioner.get(id).await?),
        InstanceCommands::List { owner } => {
            let instances = provisioner.list_for_owner(owner).await?;
            if instances.is_empty() {
                println!("{}", "インスタンスはありません".dimmed());
            }
            for instance in &instances {
                println!(
                    "{}  {:<8}  {:<24}  {}",
                    instance.id,
                    instance.status.to_string(),
                    instance.name,
                    instance.url
                );
            }
        }
        InstanceCommands::Stats { id } => print_sample(&provisioner.stats(id).await?),
    }
    Ok(())
}

fn print_instance(instance: &Instance) {
    println!("{} {}", instance.name.bold(), format!("({})", instance.status).dimmed());
    println!("  id:        {}", instance.id);
    println!("  url:       {}", instance.url);
    println!("  container: {}", instance.container_name);
    if let Some(ip) = &instance.container_ip {
        println!("  ip:        {}", ip);
    }
}

fn print_outcome(outcome: &Outcome<Instance>) {
    print_instance(&outcome.primary);
    for effect in &outcome.side_effects {
        match &effect.result {
            Ok(detail) => println!("  {} {:?}: {}", "✓".green(), effect.kind, detail),
            Err(error) => println!("  {} {:?}: {}", "!".yellow(), effect.kind, error),
        }
    }
}

fn print_sample(sample: &ResourceSample) {
    println!("CPU:     {:.2}%", sample.cpu_percent);
    println!(
        "Memory:  {} / {} bytes ({:.1}%)",
        sample.memory_usage, sample.memory_limit, sample.memory_percent
    );
    println!("Network: in {} / out {} bytes", sample.network_in, sample.network_out);
}

pub fn print_task_reports(reports: &[TaskReport]) {
    for report in reports {
        match &report.result {
            Ok(()) => println!("  {} {} ({})", "✓".green(), report.label, report.task_id),
            Err(error) => println!(
                "  {} {} ({}): {}",
                "✗".red(),
                report.label,
                report.task_id,
                error
            ),
        }
    }
}
