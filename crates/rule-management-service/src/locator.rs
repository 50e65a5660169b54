//! 规则块定位
//!
//! 规则源是一段扁平文本，其中的命名块由两类标记定界：
//!
//! - 开始标记：独立 token `rule` 后跟至少一个空白与双引号包裹的块名
//! - 终止标记：第一个独立 token `end`
//!
//! "独立" 指 token 两侧都不是标识符字符（字母、数字、下划线），因此
//! 块体中的 `weekend`、`endless` 不会提前终止块。定位按字节偏移逐一
//! 扫描，块名按字节精确比较，名字中的任何字符都不具有特殊含义。

/// 单个规则块在源文本中的位置，半开区间 `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    /// 起始字节偏移，指向开始标记的 `rule`
    pub start: usize,
    /// 结束字节偏移，位于终止标记 `end` 之后
    pub end: usize,
    /// 块名（不含引号）
    pub name: String,
}

impl BlockSpan {
    /// 块文本的字节长度
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// 开始标记的扫描结果
pub(crate) struct Marker {
    /// 开始标记的起始偏移
    pub(crate) start: usize,
    /// 块名
    pub(crate) name: String,
    /// 块名闭合引号之后的偏移，终止标记从这里开始找
    pub(crate) body_start: usize,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// 从 `from` 起查找下一个两侧均非标识符字符的 token
fn find_token(source: &str, token: &str, from: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut pos = from;
    while pos + token.len() <= source.len() {
        let at = pos + source[pos..].find(token)?;
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after = at + token.len();
        let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
        if before_ok && after_ok {
            return Some(at);
        }
        pos = at + 1;
    }
    None
}

/// 从 `from` 起扫描下一个开始标记
pub(crate) fn next_marker(source: &str, from: usize) -> Option<Marker> {
    let bytes = source.as_bytes();
    let mut pos = from;
    loop {
        let at = find_token(source, "rule", pos)?;
        let mut cursor = at + 4;
        let ws_start = cursor;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor == ws_start || cursor >= bytes.len() || bytes[cursor] != b'"' {
            // token 后不是 `空白 + 引号`，不构成开始标记
            pos = at + 4;
            continue;
        }
        let name_start = cursor + 1;
        // 名字的闭合引号；源文本剩余部分没有引号时也不可能再有完整标记
        let rel = source[name_start..].find('"')?;
        let name_end = name_start + rel;
        return Some(Marker {
            start: at,
            name: source[name_start..name_end].to_string(),
            body_start: name_end + 1,
        });
    }
}

/// 从 `from` 起查找第一个终止标记，返回其后的偏移
pub(crate) fn terminator_end(source: &str, from: usize) -> Option<usize> {
    find_token(source, "end", from).map(|at| at + 3)
}

/// 规则块定位器
pub struct BlockLocator;

impl BlockLocator {
    /// 查找名为 `name` 的第一个规则块
    ///
    /// 匹配纯按标记模式进行：名字逐字节精确比较，块在第一个终止标记处
    /// 结束。同名块存在多个时只返回最靠前的一个；某个候选标记之后没有
    /// 终止标记时，该候选不构成块，扫描继续向后进行。
    pub fn find(source: &str, name: &str) -> Option<BlockSpan> {
        let mut from = 0;
        while let Some(marker) = next_marker(source, from) {
            if marker.name == name {
                if let Some(end) = terminator_end(source, marker.body_start) {
                    return Some(BlockSpan {
                        start: marker.start,
                        end,
                        name: marker.name,
                    });
                }
            }
            from = marker.body_start;
        }
        None
    }

    /// 按文本顺序列出所有规则块的名字
    ///
    /// 与 [`BlockLocator::find`] 不同，清单按结构遍历：每找到一个块就
    /// 跳过其块体，块体内出现的开始标记不计入清单。末尾未终止的开始
    /// 标记仍计入，便于诊断写了一半的块。
    pub fn block_names(source: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut from = 0;
        while let Some(marker) = next_marker(source, from) {
            from = match terminator_end(source, marker.body_start) {
                Some(end) => end,
                None => marker.body_start,
            };
            names.push(marker.name);
        }
        names
    }
}
