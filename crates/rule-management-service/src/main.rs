//! 规则管理服务命令行入口
//!
//! 对规则存储的本地运维入口：查看与列出规则块，新增、替换、删除
//! 规则块，手动触发一次评估，查看当前编译产物信息。

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rule_management::{BlockEngine, Fact, RuleStore};
use rules_shared::config::AppConfig;
use rules_shared::observability;
use tracing::info;

#[derive(Parser)]
#[command(name = "rule-management", version, about = "规则管理服务命令行")]
struct Cli {
    /// 规则源文件路径，覆盖配置中的 storage.path
    #[arg(long, global = true)]
    rules_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 输出完整规则源文本
    Get,
    /// 按文本顺序列出规则块名
    List,
    /// 追加一个规则块，`-` 表示从标准输入读取
    Add { input: String },
    /// 以新文本替换第一个同名规则块
    Update { name: String, input: String },
    /// 删除第一个同名规则块
    Delete { name: String },
    /// 以给定事实执行一次评估
    Evaluate {
        fact: String,
        /// 把事实按 JSON 解析而非当作纯文本
        #[arg(long)]
        json: bool,
    },
    /// 显示当前编译产物信息
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 统一加载配置：config 目录下 default、环境、服务三层 TOML 加上 RULES_ 前缀环境变量
    let config = AppConfig::load("rule-management-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let _guard = observability::init(&config.service_name, &config.observability)?;

    let path = cli
        .rules_file
        .unwrap_or_else(|| config.storage.path.clone());
    info!(path = %path.display(), "Starting rule-management service...");

    let store = RuleStore::open(path, Arc::new(BlockEngine::new()))?;

    match cli.command {
        Command::Get => {
            print!("{}", store.get_all()?);
        }
        Command::List => {
            for name in store.rule_names()? {
                println!("{name}");
            }
        }
        Command::Add { input } => {
            let block = read_input(&input)?;
            store.add(&block)?;
            println!("Rule added successfully");
        }
        Command::Update { name, input } => {
            let block = read_input(&input)?;
            store.update(&name, &block)?;
            println!("Rule updated successfully");
        }
        Command::Delete { name } => {
            store.delete(&name)?;
            println!("Rule deleted successfully");
        }
        Command::Evaluate { fact, json } => {
            let fact = if json {
                Fact::json(serde_json::from_str(&fact).context("事实不是合法的 JSON")?)
            } else {
                Fact::text(fact)
            };
            let fired = store.evaluate(fact)?;
            println!("Fired {fired} rules");
        }
        Command::Info => match store.ruleset_info() {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => println!("No compiled ruleset"),
        },
    }

    Ok(())
}

/// 读取规则块文本，`-` 表示标准输入
fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("读取标准输入失败")?;
        Ok(buffer)
    } else {
        fs::read_to_string(input).with_context(|| format!("读取规则块文件失败: {input}"))
    }
}
