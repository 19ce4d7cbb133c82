//! Interactive demo of a peer-to-peer task node fleet running on a single host.
use std::io::BufRead;
use std::io::Write;

use anyhow::Context as _;
use clap::Parser;
use serde_json::json;

use tasknode::bus::EventBus;
use tasknode::bus::LocalBus;
use tasknode::node::TaskResult;
use tasknode::NodeConf;
use tasknode::TaskNode;
use tasknode::TaskRegistry;

mod cli;
mod logging;

use cli::Cli;

fn build_registry() -> TaskRegistry {
    let registry = TaskRegistry::new();
    registry
        .register_task(
            "double",
            std::sync::Arc::new(|args: serde_json::Value, _kwargs| {
                let n = args
                    .get(0)
                    .and_then(serde_json::Value::as_i64)
                    .context("double expects a single integer argument")?;
                Ok(json!(n * 2))
            }),
        )
        .expect("registering 'double' cannot fail");
    registry
        .register_task(
            "fail",
            std::sync::Arc::new(|_args, _kwargs| anyhow::bail!("this task always fails")),
        )
        .expect("registering 'fail' cannot fail");
    registry
}

fn main() -> anyhow::Result<()> {
    // Demo binaries built on top of this crate re-exec themselves to run a task in isolation;
    // that re-exec must be handled before anything else in `main` touches the bus or spawns
    // background threads.
    let registry = build_registry();
    if tasknode::execute::is_worker_process() {
        tasknode::execute::maybe_enter_worker_mode(&registry);
    }

    let cli = Cli::parse();
    let logger = logging::configure(cli.log_level.clone());

    std::fs::create_dir_all(&cli.tmp_path)
        .with_context(|| format!("failed to create {}", cli.tmp_path.display()))?;
    if let Some(parent) = cli.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let bus: EventBus = if cli.join {
        LocalBus::connect(&cli.socket)
            .with_context(|| format!("failed to join fleet at {}", cli.socket.display()))?
            .into()
    } else {
        LocalBus::bind(cli.socket.clone())
            .with_context(|| format!("failed to bind bus at {}", cli.socket.display()))?
            .into()
    };

    let mut conf = NodeConf::default();
    conf.pool = cli.pool.clone();
    conf.tmp_path = cli.tmp_path.clone();
    if let Some(limit) = cli.task_limit {
        conf.task_limit = tasknode::model::TaskLimit::Bounded(limit);
    }

    let node = TaskNode::with_registry(conf, bus, logger.clone(), registry);
    node.start(false)?;
    slog::info!(logger, "node started"; "ident" => node.ident());

    repl(&node, &logger);

    node.stop(true)?;
    Ok(())
}

fn repl(node: &TaskNode, logger: &slog::Logger) {
    println!("tasknode-demo ready. commands: double <n> | fail | status <id> | result <id> | quit");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        let _ = stdout.flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let mut parts = line.trim().split_whitespace();
        match parts.next() {
            Some("quit") | None => break,
            Some("double") => {
                let arg: i64 = match parts.next().and_then(|s| s.parse().ok()) {
                    Some(n) => n,
                    None => {
                        println!("usage: double <n>");
                        continue;
                    }
                };
                submit_and_report(node, logger, "double", json!([arg]));
            }
            Some("fail") => submit_and_report(node, logger, "fail", json!([])),
            Some("status") => {
                if let Some(id) = parts.next() {
                    match node.get_task_status(id) {
                        Ok(status) => println!("{status:?}"),
                        Err(error) => println!("error: {error:#}"),
                    }
                }
            }
            Some("result") => {
                if let Some(id) = parts.next() {
                    match node.get_task_result(id) {
                        Ok(TaskResult::Return(value)) => println!("=> {value}"),
                        Ok(TaskResult::NoResult) => println!("(no result yet)"),
                        Err(error) => println!("error: {error:#}"),
                    }
                }
            }
            Some(other) => println!("unknown command '{other}'"),
        }
    }
}

fn submit_and_report(node: &TaskNode, logger: &slog::Logger, name: &str, args: serde_json::Value) {
    match node.start_task(name, args, json!({}), None, None) {
        Ok(Some(task_id)) => {
            slog::info!(logger, "task accepted by the fleet"; "task_id" => &task_id, "name" => name);
            match node.join_task(&task_id, Some(std::time::Duration::from_secs(10))) {
                Ok(TaskResult::Return(value)) => println!("{task_id} => {value}"),
                Ok(TaskResult::NoResult) => println!("{task_id} finished with no result"),
                Err(error) => println!("{task_id} raised: {error:#}"),
            }
        }
        Ok(None) => println!("no node volunteered to run '{name}'"),
        Err(error) => println!("error: {error:#}"),
    }
}
