//! 规则管理服务核心库
//!
//! 把扁平的规则源文本当作命名块的集合来管理，提供：
//! - 基于标记定界的块定位与文本手术（新增、替换、删除）
//! - 每次变更后的持久化，全量重编译与规则集原子替换
//! - 绑定单一事实的一次性评估会话
//!
//! 规则的条件与动作语义由实现 [`RuleEngine`] 边界的引擎负责，内置的
//! [`BlockEngine`] 只做块语法结构校验。

pub mod engine;
pub mod error;
pub mod fact;
pub mod locator;
pub mod source;
pub mod store;

pub use engine::{BlockEngine, EngineSession, ExecutableRuleset, RuleEngine};
pub use error::{Result, RuleError};
pub use fact::{Fact, FactHandle};
pub use locator::{BlockLocator, BlockSpan};
pub use source::RuleSource;
pub use store::{FACT_ON_ADD, FACT_ON_UPDATE, RuleStore, RulesetInfo};
