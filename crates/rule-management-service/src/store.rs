//! 规则存储
//!
//! 所有变更操作在单一互斥锁内串行执行完整序列：定位块 -> 文本手术 ->
//! 持久化 -> 全量重编译 -> 自动评估。先持久化后编译，编译失败时文本
//! 不回滚，当前规则集保持为上一个成功版本。评估只读不取锁，通过
//! 原子引用单元读取最近一次成功编译的规则集。

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::engine::{CompiledRuleset, RuleEngine, run_once};
use crate::error::{Result, RuleError};
use crate::fact::Fact;
use crate::locator::BlockLocator;
use crate::source::RuleSource;

/// 新增规则后的自动评估使用的固定文本事实
pub const FACT_ON_ADD: &str = "ABC";

/// 更新规则后的自动评估使用的固定文本事实（与新增时不同，属对外契约）
pub const FACT_ON_UPDATE: &str = "abc";

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 变更互斥锁保护的源与版本计数
    inner: Arc<Mutex<StoreInner>>,
    /// 最近一次成功编译的规则集，仅由重编译路径写入
    current: Arc<ArcSwapOption<CompiledRuleset>>,
    /// 编译与执行引擎
    engine: Arc<dyn RuleEngine>,
}

struct StoreInner {
    source: RuleSource,
    compile_version: u64,
}

impl RuleStore {
    /// 打开规则存储并尝试初始编译
    ///
    /// 源文件不存在或为空时跳过初始编译；已有内容编译失败时只告警，
    /// 服务以无规则集状态启动，待下一次成功变更恢复。
    pub fn open(path: impl Into<PathBuf>, engine: Arc<dyn RuleEngine>) -> Result<Self> {
        let store = Self {
            inner: Arc::new(Mutex::new(StoreInner {
                source: RuleSource::new(path),
                compile_version: 0,
            })),
            current: Arc::new(ArcSwapOption::empty()),
            engine,
        };

        {
            let mut inner = store.inner.lock();
            let text = inner.source.read()?;
            if text.is_empty() {
                info!(
                    path = %inner.source.path().display(),
                    "规则源为空, 跳过初始编译"
                );
            } else if let Err(e) = store.recompile_and_swap(&mut inner) {
                warn!(error = %e, "初始编译失败, 以无规则集状态启动");
            }
        }

        Ok(store)
    }

    /// 返回完整规则源文本
    pub fn get_all(&self) -> Result<String> {
        self.inner.lock().source.read()
    }

    /// 按文本顺序列出规则块名
    pub fn rule_names(&self) -> Result<Vec<String>> {
        let text = self.inner.lock().source.read()?;
        Ok(BlockLocator::block_names(&text))
    }

    /// 追加一个规则块并重编译，成功后以固定事实 [`FACT_ON_ADD`] 评估一次
    #[instrument(skip(self, block_text), fields(bytes = block_text.len()))]
    pub fn add(&self, block_text: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.source.append(block_text)?;
        info!("规则块已追加");
        let compiled = self.recompile_and_swap(&mut inner)?;
        run_once(&compiled, Fact::text(FACT_ON_ADD))?;
        Ok(())
    }

    /// 以新文本替换第一个同名规则块，重编译后以 [`FACT_ON_UPDATE`] 评估一次
    ///
    /// 替换按字节精确进行：新文本原样落在旧块的位置上，块外的文本
    /// 一个字节都不动。
    #[instrument(skip(self, block_text))]
    pub fn update(&self, name: &str, block_text: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let text = inner.source.read()?;
        let Some(span) = BlockLocator::find(&text, name) else {
            warn!("更新不存在的规则: {}", name);
            return Err(RuleError::RuleNotFound {
                name: name.to_string(),
            });
        };

        let mut updated = String::with_capacity(text.len() - span.len() + block_text.len());
        updated.push_str(&text[..span.start]);
        updated.push_str(block_text);
        updated.push_str(&text[span.end..]);
        inner.source.overwrite(&updated)?;
        info!("规则块已替换: {}", name);

        let compiled = self.recompile_and_swap(&mut inner)?;
        run_once(&compiled, Fact::text(FACT_ON_UPDATE))?;
        Ok(())
    }

    /// 删除第一个同名规则块并重编译，删除后不执行评估
    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let text = inner.source.read()?;
        let Some(span) = BlockLocator::find(&text, name) else {
            warn!("删除不存在的规则: {}", name);
            return Err(RuleError::RuleNotFound {
                name: name.to_string(),
            });
        };

        let mut updated = String::with_capacity(text.len() - span.len());
        updated.push_str(&text[..span.start]);
        updated.push_str(&text[span.end..]);
        inner.source.overwrite(&updated)?;
        info!("规则块已删除: {}", name);

        self.recompile_and_swap(&mut inner)?;
        Ok(())
    }

    /// 以给定事实执行一次评估，返回规则触发次数
    ///
    /// 评估不取变更锁，读取的是最近一次成功编译的规则集；与变更并发
    /// 时可能落在上一个版本上。
    #[instrument(skip(self, fact))]
    pub fn evaluate(&self, fact: Fact) -> Result<u64> {
        let Some(current) = self.current.load_full() else {
            return Err(RuleError::NoRuleset);
        };
        run_once(&current, fact)
    }

    /// 当前编译产物的元数据，尚无产物时为 None
    pub fn ruleset_info(&self) -> Option<RulesetInfo> {
        self.current.load_full().map(|c| RulesetInfo {
            version: c.version(),
            compiled_at: c.compiled_at(),
            source_len: c.source_len(),
            rule_count: c.rule_count(),
        })
    }

    /// 全量重编译并原子替换当前规则集
    ///
    /// 编译失败时当前规则集保持不变，已持久化的文本不回滚。
    fn recompile_and_swap(&self, inner: &mut StoreInner) -> Result<Arc<CompiledRuleset>> {
        let text = inner.source.read()?;
        let ruleset = self.engine.compile(&text).inspect_err(|e| {
            warn!(error = %e, "重编译失败, 沿用上一个规则集");
        })?;

        inner.compile_version += 1;
        let compiled = Arc::new(CompiledRuleset::new(
            ruleset,
            inner.compile_version,
            text.len(),
        ));
        self.current.store(Some(compiled.clone()));
        info!(
            version = compiled.version(),
            rules = compiled.rule_count(),
            "规则集已重编译"
        );
        Ok(compiled)
    }
}

/// 当前编译产物信息
#[derive(Debug, Clone, Serialize)]
pub struct RulesetInfo {
    /// 编译版本号，每次成功编译递增
    pub version: u64,
    /// 编译完成时间
    pub compiled_at: DateTime<Utc>,
    /// 编译时源文本的字节长度
    pub source_len: usize,
    /// 规则条数
    pub rule_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BlockEngine, EngineSession, ExecutableRuleset, MockRuleEngine};
    use crate::fact::FactHandle;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tempfile::TempDir;

    fn block(name: &str) -> String {
        format!("rule \"{name}\"\n    when\n    then\nend\n")
    }

    fn store_in(dir: &TempDir) -> RuleStore {
        RuleStore::open(dir.path().join("rules.drl"), Arc::new(BlockEngine::new())).unwrap()
    }

    /// 记录编译调用与评估事实的计数器
    #[derive(Default)]
    struct EngineCounters {
        compile_calls: AtomicU64,
        fail_compile: AtomicBool,
        evaluated: parking_lot::Mutex<Vec<Fact>>,
    }

    struct CountingEngine {
        counters: Arc<EngineCounters>,
    }

    impl RuleEngine for CountingEngine {
        fn compile(&self, _source: &str) -> Result<Arc<dyn ExecutableRuleset>> {
            self.counters.compile_calls.fetch_add(1, Ordering::SeqCst);
            if self.counters.fail_compile.load(Ordering::SeqCst) {
                return Err(RuleError::Compilation("forced failure".to_string()));
            }
            Ok(Arc::new(CountingRuleset {
                counters: self.counters.clone(),
            }))
        }
    }

    struct CountingRuleset {
        counters: Arc<EngineCounters>,
    }

    impl ExecutableRuleset for CountingRuleset {
        fn new_session(&self) -> Box<dyn EngineSession> {
            Box::new(CountingSession {
                counters: self.counters.clone(),
                facts: Vec::new(),
                next_handle: 0,
            })
        }

        fn rule_count(&self) -> usize {
            1
        }
    }

    struct CountingSession {
        counters: Arc<EngineCounters>,
        facts: Vec<(FactHandle, Fact)>,
        next_handle: u64,
    }

    impl EngineSession for CountingSession {
        fn insert(&mut self, fact: Fact) -> Result<FactHandle> {
            let handle = FactHandle::new(self.next_handle);
            self.next_handle += 1;
            self.facts.push((handle, fact));
            Ok(handle)
        }

        fn fire_all(&mut self) -> Result<u64> {
            let mut evaluated = self.counters.evaluated.lock();
            for (_, fact) in &self.facts {
                evaluated.push(fact.clone());
            }
            Ok(self.facts.len() as u64)
        }

        fn retract(&mut self, handle: FactHandle) -> Result<()> {
            match self.facts.iter().position(|(h, _)| *h == handle) {
                Some(index) => {
                    self.facts.remove(index);
                    Ok(())
                }
                None => Err(RuleError::Session("unknown handle".to_string())),
            }
        }

        fn dispose(self: Box<Self>) {}
    }

    fn counting_store(dir: &TempDir) -> (RuleStore, Arc<EngineCounters>) {
        let counters = Arc::new(EngineCounters::default());
        let engine = Arc::new(CountingEngine {
            counters: counters.clone(),
        });
        let store = RuleStore::open(dir.path().join("rules.drl"), engine).unwrap();
        (store, counters)
    }

    #[test]
    fn test_add_appends_and_compiles() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.add(&block("a")).unwrap();

        assert_eq!(store.get_all().unwrap(), block("a"));
        assert_eq!(store.rule_names().unwrap(), vec!["a"]);
        let info = store.ruleset_info().unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.rule_count, 1);
    }

    #[test]
    fn test_add_is_byte_exact_append() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.add(&block("a")).unwrap();
        store.add(&block("b")).unwrap();

        let expected = format!("{}{}", block("a"), block("b"));
        assert_eq!(store.get_all().unwrap(), expected);
    }

    #[test]
    fn test_open_compiles_existing_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.drl");
        std::fs::write(&path, format!("{}{}", block("a"), block("b"))).unwrap();

        let store = RuleStore::open(&path, Arc::new(BlockEngine::new())).unwrap();

        let info = store.ruleset_info().unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.rule_count, 2);
    }

    #[test]
    fn test_open_missing_file_has_no_ruleset() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.ruleset_info().is_none());
        assert!(matches!(
            store.evaluate(Fact::text("x")),
            Err(RuleError::NoRuleset)
        ));
    }

    #[test]
    fn test_open_with_broken_source_starts_without_ruleset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.drl");
        std::fs::write(&path, "rule \"half\"\nwhen\nthen").unwrap();

        let store = RuleStore::open(&path, Arc::new(BlockEngine::new())).unwrap();

        assert!(store.ruleset_info().is_none());
        assert_eq!(store.get_all().unwrap(), "rule \"half\"\nwhen\nthen");
    }

    #[test]
    fn test_update_replaces_first_duplicate_only() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let second = "rule \"dup\"\nwhen C\nthen D;\nend\n";
        store
            .add("rule \"dup\"\nwhen A\nthen B;\nend\n")
            .unwrap();
        store.add(second).unwrap();

        let replacement = "rule \"dup\"\nwhen E\nthen F;\nend";
        store.update("dup", replacement).unwrap();

        // 只有第一个同名块被替换，第二个按字节原样保留
        let expected = format!("{replacement}\n{second}");
        assert_eq!(store.get_all().unwrap(), expected);
    }

    #[test]
    fn test_update_missing_rule_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&block("a")).unwrap();
        let before = store.get_all().unwrap();

        let err = store.update("missing", &block("missing")).unwrap_err();

        match err {
            RuleError::RuleNotFound { name } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.get_all().unwrap(), before);
        assert_eq!(store.ruleset_info().unwrap().version, 1);
    }

    #[test]
    fn test_delete_removes_span_exactly() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&block("a")).unwrap();
        store.add(&block("b")).unwrap();
        let before = store.get_all().unwrap();
        let span = BlockLocator::find(&before, "a").unwrap();

        store.delete("a").unwrap();

        let after = store.get_all().unwrap();
        assert_eq!(after.len(), before.len() - span.len());
        // 块后的换行不属于块，删除后保留
        assert_eq!(after, format!("\n{}", block("b")));
    }

    #[test]
    fn test_delete_missing_rule_is_error() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&block("a")).unwrap();

        assert!(matches!(
            store.delete("missing"),
            Err(RuleError::RuleNotFound { .. })
        ));
        assert_eq!(store.get_all().unwrap(), block("a"));
    }

    #[test]
    fn test_failed_recompile_keeps_previous_ruleset() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(&block("a")).unwrap();

        let err = store.add("rule \"broken\"\nwhen\n").unwrap_err();

        assert!(matches!(err, RuleError::Compilation(_)));
        // 文本已持久化，不回滚
        assert!(store.get_all().unwrap().contains("broken"));
        // 规则集仍是上一个成功版本
        let info = store.ruleset_info().unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.rule_count, 1);
        assert_eq!(store.evaluate(Fact::text("x")).unwrap(), 1);
    }

    #[test]
    fn test_version_increments_per_successful_compile() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.add(&block("a")).unwrap();
        store.add(&block("b")).unwrap();
        store.delete("a").unwrap();

        assert_eq!(store.ruleset_info().unwrap().version, 3);
    }

    #[test]
    fn test_add_evaluates_fixed_fact() {
        let dir = TempDir::new().unwrap();
        let (store, counters) = counting_store(&dir);

        store.add(&block("a")).unwrap();

        assert_eq!(counters.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*counters.evaluated.lock(), vec![Fact::text(FACT_ON_ADD)]);
    }

    #[test]
    fn test_update_evaluates_fixed_fact() {
        let dir = TempDir::new().unwrap();
        let (store, counters) = counting_store(&dir);
        store.add(&block("a")).unwrap();

        store.update("a", &block("a")).unwrap();

        assert_eq!(
            *counters.evaluated.lock(),
            vec![Fact::text(FACT_ON_ADD), Fact::text(FACT_ON_UPDATE)]
        );
    }

    #[test]
    fn test_delete_does_not_evaluate() {
        let dir = TempDir::new().unwrap();
        let (store, counters) = counting_store(&dir);
        store.add(&block("a")).unwrap();

        store.delete("a").unwrap();

        assert_eq!(counters.compile_calls.load(Ordering::SeqCst), 2);
        // 删除重编译后不做自动评估
        assert_eq!(*counters.evaluated.lock(), vec![Fact::text(FACT_ON_ADD)]);
    }

    #[test]
    fn test_failed_compile_skips_evaluation() {
        let dir = TempDir::new().unwrap();
        let (store, counters) = counting_store(&dir);
        store.add(&block("a")).unwrap();

        counters.fail_compile.store(true, Ordering::SeqCst);
        assert!(store.add(&block("b")).is_err());

        // 编译调用已发生，但失败的变更不做自动评估
        assert_eq!(counters.compile_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*counters.evaluated.lock(), vec![Fact::text(FACT_ON_ADD)]);
    }

    #[test]
    fn test_evaluate_passes_caller_fact() {
        let dir = TempDir::new().unwrap();
        let (store, counters) = counting_store(&dir);
        store.add(&block("a")).unwrap();

        let fact = Fact::json(json!({"order_id": 42}));
        store.evaluate(fact.clone()).unwrap();

        assert_eq!(counters.evaluated.lock().last(), Some(&fact));
    }

    #[test]
    fn test_compile_receives_full_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.drl");
        let content = format!("{}{}", block("a"), block("b"));
        std::fs::write(&path, &content).unwrap();

        let counters = Arc::new(EngineCounters::default());
        let ruleset_counters = counters.clone();
        let mut engine = MockRuleEngine::new();
        engine
            .expect_compile()
            .withf(move |source| source == content)
            .times(1)
            .returning(move |_| {
                Ok(Arc::new(CountingRuleset {
                    counters: ruleset_counters.clone(),
                }))
            });

        let store = RuleStore::open(&path, Arc::new(engine)).unwrap();
        assert_eq!(store.ruleset_info().unwrap().version, 1);
    }

    #[test]
    fn test_concurrent_adds() {
        use std::thread;

        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let store_clone = store.clone();

        let handle = thread::spawn(move || {
            for i in 0..20 {
                store_clone.add(&block(&format!("left-{i}"))).unwrap();
            }
        });
        for i in 0..20 {
            store.add(&block(&format!("right-{i}"))).unwrap();
        }
        handle.join().unwrap();

        assert_eq!(store.rule_names().unwrap().len(), 40);
        assert_eq!(store.ruleset_info().unwrap().version, 40);
    }
}
