//! 规则评估引擎能力边界
//!
//! 存储子系统不解释规则的条件与动作，编译和执行都委托给实现了本模块
//! trait 的引擎。契约沿用会话式引擎的固定生命周期：编译产出规则集，
//! 规则集开启短生命周期会话，会话内插入事实，触发全部规则，撤回事实，
//! 最后销毁。会话一次性使用，不跨调用复用。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::fact::{Fact, FactHandle};

pub mod block;

pub use block::BlockEngine;

/// 规则引擎：把完整规则源编译为可执行规则集
#[cfg_attr(test, mockall::automock)]
pub trait RuleEngine: Send + Sync {
    /// 全量编译。输入始终是完整源文本，不支持增量编译
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableRuleset>>;
}

/// 编译产出的可执行规则集
pub trait ExecutableRuleset: Send + Sync {
    /// 开启一个新的评估会话
    fn new_session(&self) -> Box<dyn EngineSession>;

    /// 规则条数，诊断用
    fn rule_count(&self) -> usize;
}

/// 一次性评估会话
pub trait EngineSession: Send {
    /// 插入事实，返回用于撤回的句柄
    fn insert(&mut self, fact: Fact) -> Result<FactHandle>;

    /// 触发全部规则，返回触发次数
    fn fire_all(&mut self) -> Result<u64>;

    /// 撤回已插入的事实
    fn retract(&mut self, handle: FactHandle) -> Result<()>;

    /// 销毁会话，释放其持有的资源
    fn dispose(self: Box<Self>);
}

/// 最近一次成功编译的产物及其元数据
#[derive(Clone)]
pub struct CompiledRuleset {
    ruleset: Arc<dyn ExecutableRuleset>,
    version: u64,
    compiled_at: DateTime<Utc>,
    source_len: usize,
}

impl CompiledRuleset {
    pub(crate) fn new(
        ruleset: Arc<dyn ExecutableRuleset>,
        version: u64,
        source_len: usize,
    ) -> Self {
        Self {
            ruleset,
            version,
            compiled_at: Utc::now(),
            source_len,
        }
    }

    /// 编译版本号，每次成功编译递增
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn compiled_at(&self) -> DateTime<Utc> {
        self.compiled_at
    }

    /// 编译时源文本的字节长度
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    pub fn rule_count(&self) -> usize {
        self.ruleset.rule_count()
    }

    pub(crate) fn new_session(&self) -> Box<dyn EngineSession> {
        self.ruleset.new_session()
    }
}

/// 以固定生命周期执行一次评估：插入 -> 触发 -> 撤回 -> 销毁
pub(crate) fn run_once(ruleset: &CompiledRuleset, fact: Fact) -> Result<u64> {
    let session_id = Uuid::new_v4();
    let mut session = ruleset.new_session();
    let handle = session.insert(fact)?;
    let fired = session.fire_all()?;
    session.retract(handle)?;
    session.dispose();
    debug!(%session_id, version = ruleset.version(), fired, "评估会话完成");
    Ok(fired)
}
