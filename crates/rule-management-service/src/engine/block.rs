//! 块语法结构引擎
//!
//! 引擎边界的内置实现。编译阶段只校验块语法的良构性：每个开始标记
//! 必须有对应的终止标记，块外的文本一律当作头部说明忽略。执行阶段
//! 对会话内每个事实触发每条规则一次，并以 tracing 事件记录触发。
//! 条件与动作语义不在这里解释，那是外部引擎的职责。

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::error::{Result, RuleError};
use crate::fact::{Fact, FactHandle};
use crate::locator;

use super::{EngineSession, ExecutableRuleset, RuleEngine};

/// 结构校验引擎
#[derive(Debug, Default)]
pub struct BlockEngine;

impl BlockEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RuleEngine for BlockEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn ExecutableRuleset>> {
        let names = parse_block_names(source)?;
        info!(rule_count = names.len(), "规则源编译完成");
        Ok(Arc::new(BlockRuleset {
            rule_names: names.into(),
        }))
    }
}

/// 解析全部块名，遇到未终止的开始标记报编译错误
fn parse_block_names(source: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut from = 0;
    while let Some(marker) = locator::next_marker(source, from) {
        match locator::terminator_end(source, marker.body_start) {
            Some(end) => {
                names.push(marker.name);
                from = end;
            }
            None => {
                return Err(RuleError::Compilation(format!(
                    "规则块 \"{}\" 缺少终止标记 end",
                    marker.name
                )));
            }
        }
    }
    Ok(names)
}

struct BlockRuleset {
    rule_names: Arc<[String]>,
}

impl ExecutableRuleset for BlockRuleset {
    fn new_session(&self) -> Box<dyn EngineSession> {
        Box::new(BlockSession {
            rule_names: Arc::clone(&self.rule_names),
            facts: Vec::new(),
            next_handle: 0,
        })
    }

    fn rule_count(&self) -> usize {
        self.rule_names.len()
    }
}

struct BlockSession {
    rule_names: Arc<[String]>,
    facts: Vec<(FactHandle, Fact)>,
    next_handle: u64,
}

impl EngineSession for BlockSession {
    fn insert(&mut self, fact: Fact) -> Result<FactHandle> {
        let handle = FactHandle::new(self.next_handle);
        self.next_handle += 1;
        trace!(handle = handle.id(), %fact, "事实已插入");
        self.facts.push((handle, fact));
        Ok(handle)
    }

    fn fire_all(&mut self) -> Result<u64> {
        let mut fired = 0u64;
        for (_, fact) in &self.facts {
            for name in self.rule_names.iter() {
                debug!(rule = %name, %fact, "规则触发");
                fired += 1;
            }
        }
        Ok(fired)
    }

    fn retract(&mut self, handle: FactHandle) -> Result<()> {
        match self.facts.iter().position(|(h, _)| *h == handle) {
            Some(index) => {
                self.facts.remove(index);
                Ok(())
            }
            None => Err(RuleError::Session(format!(
                "撤回了未知的事实句柄 {}",
                handle.id()
            ))),
        }
    }

    fn dispose(self: Box<Self>) {
        trace!("会话已销毁");
    }
}
