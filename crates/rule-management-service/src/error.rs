//! 规则管理服务错误类型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则未找到: {name}")]
    RuleNotFound { name: String },

    #[error("规则编译失败: {0}")]
    Compilation(String),

    #[error("规则源{op}失败 [{}]: {source}", .path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("尚无可用的规则集, 请先加载规则")]
    NoRuleset,

    #[error("评估会话失败: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, RuleError>;
