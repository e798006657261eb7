//! 规则编译：RuleSpec → 不可变的 CompiledRules
use std::collections::HashSet;

use regex_automata::meta;
use regex_automata::util::syntax;

use crate::error::CompileError;
use crate::prefilter::{build_prefilter_plan, PrefilterPlan};
use crate::rules::{parse_rule_specs, PatternSpec, RuleSpec};

/// 默认命名空间
pub const DEFAULT_NAMESPACE: &str = "default";

/// 单条规则的匹配器
pub(crate) enum Matcher {
    /// 由 AC 自动机直接判定
    Literal,
    /// 锚点窗口内运行 meta 正则
    Windowed(meta::Regex),
    /// 无锚点，整段运行 bytes 正则
    Full(regex::bytes::Regex),
}

/// 编译后的单条规则；其字段在扫描期间只读
pub(crate) struct CompiledRule {
    pub(crate) spec: RuleSpec,
    pub(crate) matcher: Matcher,
}

/// 编译后的规则集合（构建后不可变，可跨线程共享只读）
pub struct CompiledRules {
    pub(crate) rules: Vec<CompiledRule>,
    pub(crate) plan: PrefilterPlan,
}

impl CompiledRules {
    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// 规则编译器：可多次 add_source，最后 build
#[derive(Default)]
pub struct Compiler {
    specs: Vec<CompiledRule>,
    seen: HashSet<(String, String)>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析一段规则源并加入命名空间 `namespace`。
    /// 出错时本次 source 的规则全部不生效。
    pub fn add_source(&mut self, src: &str, namespace: &str) -> Result<(), CompileError> {
        let specs = parse_rule_specs(src, namespace)?;

        let mut batch = Vec::with_capacity(specs.len());
        let mut batch_keys: HashSet<(String, String)> = HashSet::new();
        for spec in specs {
            let key = (spec.namespace.clone(), spec.id.clone());
            if self.seen.contains(&key) || !batch_keys.insert(key) {
                return Err(CompileError::DuplicateRule { namespace: spec.namespace, id: spec.id });
            }
            let matcher = compile_matcher(&spec)?;
            batch.push(CompiledRule { spec, matcher });
        }

        self.seen.extend(batch_keys);
        self.specs.extend(batch);
        Ok(())
    }

    /// 构建规则集合并清空编译器；失败时已加入的规则保持不变
    pub fn build(&mut self) -> Result<CompiledRules, CompileError> {
        self.build_with(|rules| Ok(build_prefilter_plan(rules)?))
    }

    fn build_with(
        &mut self,
        plan_for: impl FnOnce(&[CompiledRule]) -> Result<PrefilterPlan, CompileError>,
    ) -> Result<CompiledRules, CompileError> {
        let plan = plan_for(&self.specs)?;
        let rules = std::mem::take(&mut self.specs);
        self.seen.clear();
        tracing::debug!(rules = rules.len(), patterns = plan.pattern_count(), "rules compiled");
        Ok(CompiledRules { rules, plan })
    }
}

fn compile_matcher(spec: &RuleSpec) -> Result<Matcher, CompileError> {
    let regex_err = |message: String| CompileError::Regex { id: spec.id.clone(), message };
    match &spec.pattern {
        PatternSpec::Literal(_) => Ok(Matcher::Literal),
        PatternSpec::Regex { pat, anchors, nocase } if !anchors.is_empty() => {
            let re = meta::Regex::builder()
                .syntax(syntax::Config::new().case_insensitive(*nocase))
                .build(pat)
                .map_err(|e| regex_err(e.to_string()))?;
            Ok(Matcher::Windowed(re))
        }
        PatternSpec::Regex { pat, nocase, .. } => {
            let re = regex::bytes::RegexBuilder::new(pat)
                .case_insensitive(*nocase)
                .build()
                .map_err(|e| regex_err(e.to_string()))?;
            Ok(Matcher::Full(re))
        }
    }
}
