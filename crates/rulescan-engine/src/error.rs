//! 规则编译错误
use thiserror::Error;

/// 编译规则时可能出现的错误
#[derive(Error, Debug)]
pub enum CompileError {
    /// TOML 语法或结构错误
    #[error("invalid rule source")]
    Syntax(#[from] toml::de::Error),

    #[error("rule `{id}`: exactly one of `literal` or `regex` is required, found both")]
    AmbiguousPattern { id: String },

    #[error("rule `{id}`: one of `literal` or `regex` is required")]
    MissingPattern { id: String },

    #[error("rule `{id}`: literals and anchors must not be empty")]
    EmptyPattern { id: String },

    #[error("rule `{id}`: `anchors` only apply to regex rules")]
    AnchorsOnLiteral { id: String },

    #[error("rule `{id}`: invalid regex: {message}")]
    Regex { id: String, message: String },

    #[error("rule `{id}`: metadata is not representable as JSON")]
    Metadata {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate rule `{namespace}:{id}`")]
    DuplicateRule { namespace: String, id: String },

    /// 自动机构建失败（模式过多等）
    #[error("failed to build pattern automaton: {0}")]
    Automaton(#[from] aho_corasick::BuildError),
}
