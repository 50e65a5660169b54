//! 评估事实模型
//!
//! 事实是单次评估调用的瞬态输入，不做持久化。变更后的自动评估只
//! 使用固定的文本字面量事实，这里同时保留任意 JSON 值的形态供外部
//! 调用方使用。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 提交给评估会话的事实
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fact(Value);

impl Fact {
    /// 从任意 JSON 值创建事实
    pub fn json(value: Value) -> Self {
        Self(value)
    }

    /// 从纯文本创建事实
    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// 文本事实的内容，非文本事实返回 None
    pub fn as_text(&self) -> Option<&str> {
        self.0.as_str()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 会话内已插入事实的句柄，用于撤回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactHandle(u64);

impl FactHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}
