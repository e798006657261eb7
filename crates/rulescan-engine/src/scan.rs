//! 字节级扫描引擎（AC 预筛 + 锚点窗口 + 整段正则）
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use regex_automata::Input;

use crate::compiler::{CompiledRule, CompiledRules, Matcher};
use crate::prefilter::{WINDOW_AFTER, WINDOW_BEFORE};

/// 每处理多少个 AC 命中检查一次截止时间
const DEADLINE_CHECK_EVERY: usize = 1024;

/// 扫描截止时间；None 表示不限时
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// 从现在起 `secs` 秒后截止；0 表示不限时
    pub(crate) fn after_secs(secs: u64) -> Self {
        if secs == 0 {
            return Self(None);
        }
        Self(Instant::now().checked_add(Duration::from_secs(secs)))
    }

    pub(crate) fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// 扫描被截止时间打断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimedOut;

/// 在缓冲区上运行全部规则，每条命中的规则最多回调一次（按发现顺序）。
/// 超时返回 `TimedOut`，此前已回调的规则仍然有效。
pub(crate) fn scan_buffer(
    rules: &CompiledRules,
    buf: &[u8],
    deadline: Deadline,
    mut on_match: impl FnMut(&CompiledRule),
) -> Result<(), TimedOut> {
    let mut matched = vec![false; rules.rules.len()];
    let mut report = |idx: usize, matched: &mut [bool]| -> Result<(), TimedOut> {
        if !matched[idx] {
            matched[idx] = true;
            on_match(&rules.rules[idx]);
            // 回调属于宿主代码，耗时不可控，返回后立即检查
            if deadline.expired() {
                return Err(TimedOut);
            }
        }
        Ok(())
    };

    // 1) AC 扫描：字面量直接命中，锚点收集位置与对应的规则
    let mut hits: Vec<(usize /*pos*/, &[usize] /*anchored rules*/)> = Vec::new();
    for set in rules.plan.sets() {
        let Some(ac) = &set.ac else { continue };
        for (n, m) in ac.find_overlapping_iter(buf).enumerate() {
            if n % DEADLINE_CHECK_EVERY == 0 && deadline.expired() {
                return Err(TimedOut);
            }
            let targets = &set.targets[m.pattern().as_usize()];
            for &ri in &targets.literal_rules {
                report(ri, &mut matched)?;
            }
            if targets.anchored_rules.iter().any(|&ri| !matched[ri]) {
                hits.push((m.start(), &targets.anchored_rules));
            }
        }
    }

    // 2) 生成窗口并合并，窗口内按规则顺序确认锚点规则。
    //    匹配必须完整落在窗口内，超出 WINDOW_AFTER 的长匹配不会被确认。
    if !hits.is_empty() {
        hits.sort_by_key(|h| h.0);
        let mut windows: Vec<(usize, usize, Vec<&[usize]>)> = Vec::new(); // (start,end, rules)
        for (pos, anchored) in hits.into_iter() {
            let s = pos.saturating_sub(WINDOW_BEFORE);
            let e = pos.saturating_add(WINDOW_AFTER).min(buf.len());
            if let Some(last) = windows.last_mut() {
                if s <= last.1 { // 重叠，合并
                    last.1 = last.1.max(e);
                    last.2.push(anchored);
                    continue;
                }
            }
            windows.push((s, e, vec![anchored]));
        }

        for (ws, we, groups) in windows.into_iter() {
            if deadline.expired() {
                return Err(TimedOut);
            }
            let candidates: BTreeSet<usize> = groups.into_iter().flatten().copied().collect();
            for ri in candidates {
                if matched[ri] { continue; }
                if let Matcher::Windowed(re) = &rules.rules[ri].matcher {
                    // 在完整 haystack 上限定 span，保证 \b、^ 等断言看到真实上下文
                    if re.is_match(Input::new(buf).span(ws..we)) {
                        report(ri, &mut matched)?;
                    }
                }
            }
        }
    }

    // 3) 无锚点规则：整段匹配
    for &ri in &rules.plan.unanchored {
        if deadline.expired() {
            return Err(TimedOut);
        }
        if let Matcher::Full(re) = &rules.rules[ri].matcher {
            if re.is_match(buf) {
                report(ri, &mut matched)?;
            }
        }
    }

    Ok(())
}
