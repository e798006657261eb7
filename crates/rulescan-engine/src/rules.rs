//! 规则源解析（TOML）
use serde::Deserialize;

use crate::error::CompileError;

/// 单条规则的配置（literal 与 regex 二选一，pattern 为 regex 的别名）
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub literal: Option<String>,
    #[serde(default, alias = "pattern")]
    pub regex: Option<String>,
    /// 正则必含的字面量；声明后只在锚点命中附近的窗口内确认（匹配须在锚点后 2048 字节内结束）
    #[serde(default)]
    pub anchors: Vec<String>,
    /// 正则与锚点均按 ASCII 大小写不敏感处理
    #[serde(default)]
    pub nocase: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: toml::Table,
}

/// 顶层规则文件结构
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// 规则的匹配方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PatternSpec {
    /// 精确字面量，直接进入 AC 自动机
    Literal(Vec<u8>),
    /// 正则；anchors 非空时走窗口匹配，否则整段匹配
    Regex { pat: String, anchors: Vec<Vec<u8>>, nocase: bool },
}

/// 归一化后的规则规格（内部使用）
#[derive(Debug, Clone)]
pub(crate) struct RuleSpec {
    pub id: String,
    pub namespace: String,
    pub name: Option<String>,
    pub pattern: PatternSpec,
    pub tags: Vec<String>,
    /// 元数据序列化为 JSON 文本，经 C ABI 原样交给调用方
    pub metadata_json: String,
}

/// 解析 TOML 规则源并归一化为 RuleSpec 列表
pub(crate) fn parse_rule_specs(src: &str, namespace: &str) -> Result<Vec<RuleSpec>, CompileError> {
    let parsed: RuleFile = toml::from_str(src)?;
    let mut out = Vec::with_capacity(parsed.rules.len());

    for e in parsed.rules {
        let pattern = match (e.literal, e.regex) {
            (Some(lit), None) => {
                if !e.anchors.is_empty() {
                    return Err(CompileError::AnchorsOnLiteral { id: e.id });
                }
                if lit.is_empty() {
                    return Err(CompileError::EmptyPattern { id: e.id });
                }
                PatternSpec::Literal(lit.into_bytes())
            }
            (None, Some(pat)) => {
                if e.anchors.iter().any(|a| a.is_empty()) {
                    return Err(CompileError::EmptyPattern { id: e.id });
                }
                let anchors = e.anchors.into_iter().map(String::into_bytes).collect();
                PatternSpec::Regex { pat, anchors, nocase: e.nocase }
            }
            (Some(_), Some(_)) => return Err(CompileError::AmbiguousPattern { id: e.id }),
            (None, None) => return Err(CompileError::MissingPattern { id: e.id }),
        };
        let metadata_json = serde_json::to_string(&e.metadata)
            .map_err(|source| CompileError::Metadata { id: e.id.clone(), source })?;
        out.push(RuleSpec {
            id: e.id,
            namespace: namespace.to_string(),
            name: e.name,
            pattern,
            tags: e.tags,
            metadata_json,
        });
    }

    Ok(out)
}
