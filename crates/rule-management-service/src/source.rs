//! 规则源持久化
//!
//! 规则源的持久化形态是单个 UTF-8 文本文件：读取整读，追加用于新增，
//! 全量覆写用于替换与删除。文件不存在视为空源，首次写入时自动创建
//! 文件及其父目录。
//!
//! `RuleSource` 自身不做并发控制，它只在 [`RuleStore`] 的变更互斥锁
//! 内被访问。
//!
//! [`RuleStore`]: crate::store::RuleStore

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RuleError};

/// 文件承载的规则源
#[derive(Debug)]
pub struct RuleSource {
    path: PathBuf,
}

impl RuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取完整源文本，文件不存在时返回空串
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.storage_error("读取", e)),
        }
    }

    /// 在源末尾追加文本，文件不存在时创建
    pub fn append(&self, text: &str) -> Result<()> {
        self.ensure_parent_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.storage_error("追加", e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| self.storage_error("追加", e))
    }

    /// 以给定文本全量覆写源
    pub fn overwrite(&self, text: &str) -> Result<()> {
        self.ensure_parent_dir()?;
        fs::write(&self.path, text).map_err(|e| self.storage_error("覆写", e))
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.storage_error("创建目录", e))?;
            }
        }
        Ok(())
    }

    fn storage_error(&self, op: &'static str, source: std::io::Error) -> RuleError {
        RuleError::Storage {
            op,
            path: self.path.clone(),
            source,
        }
    }
}
