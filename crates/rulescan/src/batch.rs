//! 批量扫描：一份规则、多个扫描器、多线程
//!
//! - 线程数为 1 或输入少于 2 个时，在调用线程上用单个扫描器串行扫描
//! - 否则在 Rayon 线程池中扫描，每个 worker 各自持有一个扫描器
//! - 结果经有界通道回到调用线程，按输入下标重排后依次交给 sink
use std::collections::BTreeMap;

use crossbeam_channel as channel;
use rayon::prelude::*;

use crate::error::{BatchError, ScanError};
use crate::matches::Match;
use crate::options::{ScanOptions, ScanStats};
use crate::rules::Rules;
use crate::scanner::Scanner;

/// 单个输入的扫描结果
pub type ScanResult = Result<Vec<Match>, ScanError>;

/// 扫描 `inputs` 中的每个缓冲区，按输入顺序回调 `sink(idx, result)`。
///
/// 单个输入的超时或失败只体现在它自己的结果和统计里，不会中断整个批次。
pub fn scan_batch<B, F>(rules: &Rules, inputs: &[B], opts: &ScanOptions, mut sink: F) -> Result<ScanStats, BatchError>
where
    B: AsRef<[u8]> + Sync,
    F: FnMut(usize, ScanResult),
{
    let threads = opts.threads.unwrap_or_else(num_cpus::get).max(1);
    let mut stats = ScanStats::default();

    if threads == 1 || inputs.len() < 2 {
        let mut scanner = Scanner::with_options(rules, opts);
        for (idx, input) in inputs.iter().enumerate() {
            let res = scanner.scan(input.as_ref());
            record(&mut stats, &res);
            sink(idx, res);
        }
        return Ok(stats);
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    tracing::debug!(threads, inputs = inputs.len(), "parallel batch scan");

    // worker → 调用线程
    let (tx, rx) = channel::bounded::<(usize, ScanResult)>(256);

    std::thread::scope(|s| {
        let worker = s.spawn(move || {
            pool.install(|| {
                // 接收端关闭（调用方 sink panic）后停止派发新的扫描
                let _ = inputs.par_iter().enumerate().try_for_each_init(
                    || Scanner::with_options(rules, opts),
                    |scanner, (idx, input)| tx.send((idx, scanner.scan(input.as_ref()))),
                );
            });
            // tx 在此释放，接收循环随之结束
        });

        // 维护 next_idx 与缓存，按序交付
        let mut next_idx = 0usize;
        let mut pending: BTreeMap<usize, ScanResult> = BTreeMap::new();
        // rx 按值移入循环：sink panic 展开时随之释放，worker 的 send 立即失败而不是阻塞
        for (idx, res) in rx {
            pending.insert(idx, res);
            while let Some(res) = pending.remove(&next_idx) {
                record(&mut stats, &res);
                sink(next_idx, res);
                next_idx += 1;
            }
        }

        worker.join().map_err(|_| BatchError::WorkerPanicked)
    })?;

    Ok(stats)
}

/// 扫描全部输入并按输入顺序收集结果
pub fn scan_batch_collect<B>(
    rules: &Rules,
    inputs: &[B],
    opts: &ScanOptions,
) -> Result<(Vec<ScanResult>, ScanStats), BatchError>
where
    B: AsRef<[u8]> + Sync,
{
    let mut results = Vec::with_capacity(inputs.len());
    let stats = scan_batch(rules, inputs, opts, |_, res| results.push(res))?;
    Ok((results, stats))
}

fn record(stats: &mut ScanStats, res: &ScanResult) {
    stats.buffers_scanned += 1;
    match res {
        Ok(matches) => stats.matches_total += matches.len(),
        Err(ScanError::Timeout { .. }) => stats.timeouts += 1,
        Err(_) => stats.failures += 1,
    }
}
