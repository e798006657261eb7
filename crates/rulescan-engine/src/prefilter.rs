//! 预筛与锚点计划（Aho-Corasick）
//!
//! 设计目标：
//! - 字面量规则与大小写敏感正则的锚点共用一个全局 AC 自动机，去重后按首次出现顺序编号。
//! - `nocase` 正则的锚点单独放进一个 ASCII 大小写不敏感的自动机，保证大小写变体也能打开窗口。
//! - 字面量命中即规则命中；锚点命中只产生候选窗口，再对窗口内相关规则运行精准正则。
//! - 计划在编译期一次构建，扫描期只读，多个扫描器可并发共享。

use std::collections::HashMap;

use aho_corasick::{AhoCorasick, MatchKind};

use crate::compiler::CompiledRule;
use crate::rules::PatternSpec;

/// 窗口参数（以锚点命中位置为中心）。
/// 锚点规则的匹配必须落在 [命中位置 - WINDOW_BEFORE, 命中位置 + WINDOW_AFTER) 内。
pub(crate) const WINDOW_BEFORE: usize = 256;
pub(crate) const WINDOW_AFTER: usize = 2048;

/// 单个 AC 模式对应的规则
#[derive(Debug, Default, Clone)]
pub(crate) struct PatternTargets {
    /// 以该字面量为完整模式的规则（命中即匹配）
    pub(crate) literal_rules: Vec<usize>,
    /// 以该字面量为锚点的正则规则（需窗口内确认）
    pub(crate) anchored_rules: Vec<usize>,
}

/// 一个自动机及其模式表
#[derive(Default)]
pub(crate) struct PatternSet {
    /// 没有任何模式时为 None
    pub(crate) ac: Option<AhoCorasick>,
    /// AC 模式索引 -> 规则索引
    pub(crate) targets: Vec<PatternTargets>,
}

/// 预筛计划（线程安全，可跨线程共享）
pub(crate) struct PrefilterPlan {
    /// 字面量与大小写敏感锚点
    pub(crate) exact: PatternSet,
    /// `nocase` 规则的锚点（只有 anchored_rules）
    pub(crate) nocase: PatternSet,
    /// 无锚点正则规则（按声明顺序整段匹配）
    pub(crate) unanchored: Vec<usize>,
}

impl PrefilterPlan {
    pub(crate) fn pattern_count(&self) -> usize {
        self.exact.targets.len() + self.nocase.targets.len()
    }

    /// 按扫描顺序排列的模式集合
    pub(crate) fn sets(&self) -> [&PatternSet; 2] {
        [&self.exact, &self.nocase]
    }
}

/// 收集模式并去重
#[derive(Default)]
struct PatternSetBuilder {
    patterns: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, usize>,
    targets: Vec<PatternTargets>,
}

impl PatternSetBuilder {
    fn intern(&mut self, bytes: &[u8]) -> &mut PatternTargets {
        let id = match self.index.get(bytes) {
            Some(id) => *id,
            None => {
                let id = self.patterns.len();
                self.patterns.push(bytes.to_vec());
                self.targets.push(PatternTargets::default());
                self.index.insert(bytes.to_vec(), id);
                id
            }
        };
        &mut self.targets[id]
    }

    fn add_anchor(&mut self, anchor: &[u8], rule: usize) {
        let targets = self.intern(anchor);
        // 同一规则重复声明同一锚点时只登记一次
        if targets.anchored_rules.last() != Some(&rule) {
            targets.anchored_rules.push(rule);
        }
    }

    fn build(self, ascii_case_insensitive: bool) -> Result<PatternSet, aho_corasick::BuildError> {
        if self.patterns.is_empty() {
            return Ok(PatternSet::default());
        }
        // 重叠匹配要求 Standard 语义，保证互相包含的字面量都能被报告
        let ac = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .ascii_case_insensitive(ascii_case_insensitive)
            .build(&self.patterns)?;
        Ok(PatternSet { ac: Some(ac), targets: self.targets })
    }
}

/// 从已编译规则构建预筛计划
pub(crate) fn build_prefilter_plan(rules: &[CompiledRule]) -> Result<PrefilterPlan, aho_corasick::BuildError> {
    let mut exact = PatternSetBuilder::default();
    let mut nocase = PatternSetBuilder::default();
    let mut unanchored = Vec::new();

    for (idx, rule) in rules.iter().enumerate() {
        match &rule.spec.pattern {
            PatternSpec::Literal(lit) => exact.intern(lit).literal_rules.push(idx),
            PatternSpec::Regex { anchors, .. } if anchors.is_empty() => unanchored.push(idx),
            PatternSpec::Regex { anchors, nocase: ci, .. } => {
                let set = if *ci { &mut nocase } else { &mut exact };
                for a in anchors {
                    set.add_anchor(a, idx);
                }
            }
        }
    }

    Ok(PrefilterPlan { exact: exact.build(false)?, nocase: nocase.build(true)?, unanchored })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    fn plan_of(src: &str) -> crate::compiler::CompiledRules {
        let mut c = Compiler::new();
        c.add_source(src, "d").unwrap();
        c.build().unwrap()
    }

    #[test]
    fn test_plan_shares_patterns() {
        let src = r#"
            [[rules]]
            id = "lit"
            literal = "tok_"

            [[rules]]
            id = "anchored"
            regex = "tok_[0-9]+"
            anchors = ["tok_", "TOK_", "tok_"]

            [[rules]]
            id = "free"
            regex = "[a-z]+@[a-z]+"
        "#;
        let rules = plan_of(src);
        let plan = &rules.plan;

        assert_eq!(plan.pattern_count(), 2);
        assert_eq!(plan.exact.targets[0].literal_rules, vec![0]);
        assert_eq!(plan.exact.targets[0].anchored_rules, vec![1]);
        assert_eq!(plan.exact.targets[1].anchored_rules, vec![1]);
        assert_eq!(plan.unanchored, vec![2]);
        assert!(plan.exact.ac.is_some());
        assert!(plan.nocase.ac.is_none());
    }

    #[test]
    fn test_nocase_anchors_get_their_own_automaton() {
        let src = r#"
            [[rules]]
            id = "lit"
            literal = "tok_"

            [[rules]]
            id = "ci"
            regex = "tok_[0-9]{4}"
            anchors = ["tok_"]
            nocase = true
        "#;
        let rules = plan_of(src);
        let plan = &rules.plan;

        assert_eq!(plan.exact.targets.len(), 1);
        assert!(plan.exact.targets[0].anchored_rules.is_empty());
        assert_eq!(plan.nocase.targets.len(), 1);
        assert_eq!(plan.nocase.targets[0].anchored_rules, vec![1]);
        assert!(plan.nocase.targets[0].literal_rules.is_empty());

        let ac = plan.nocase.ac.as_ref().unwrap();
        assert!(ac.is_match("x TOK_1234"));
    }

    #[test]
    fn test_plan_without_patterns() {
        let rules = plan_of("[[rules]]\nid = \"r\"\nregex = \"a+b\"\n");
        assert!(rules.plan.exact.ac.is_none());
        assert!(rules.plan.nocase.ac.is_none());
        assert_eq!(rules.plan.unanchored, vec![0]);
    }
}
