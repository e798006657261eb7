use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rulescan::{scan_batch, Rules, ScanOptions, Scanner};

fn rules_per_thread(n: usize) -> Result<Rules> {
    let mut src = String::new();
    for i in 0..n {
        src.push_str(&format!("[[rules]]\nid = \"r{i}\"\nliteral = \"needle-{i}-\"\n"));
    }
    Ok(Rules::compile(&src)?)
}

#[test]
fn scanners_on_threads_do_not_share_matches() -> Result<()> {
    const THREADS: usize = 8;
    let rules = rules_per_thread(THREADS)?;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let rules = rules.clone();
            thread::spawn(move || {
                let mut scanner = Scanner::new(&rules);
                let buf = format!("xx needle-{t}- yy");
                for _ in 0..500 {
                    let matches = scanner.scan(buf.as_bytes()).unwrap();
                    let got: Vec<&str> = matches.iter().map(|m| m.identifier()).collect();
                    assert_eq!(got, vec![format!("r{t}")]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    Ok(())
}

#[test]
fn scanner_can_move_between_threads() -> Result<()> {
    let rules = rules_per_thread(2)?;
    let mut scanner = Scanner::new(&rules);
    assert_eq!(scanner.scan(b"needle-0-")?.len(), 1);

    let mut scanner = thread::spawn(move || {
        assert_eq!(scanner.scan(b"needle-1-").unwrap().len(), 1);
        scanner
    })
    .join()
    .unwrap();
    assert_eq!(scanner.scan(b"needle-0- needle-1-")?.len(), 2);
    Ok(())
}

#[test]
fn rules_outlive_dropped_handles() -> Result<()> {
    let rules = Arc::new(rules_per_thread(1)?);
    let scanners: Vec<Scanner> = (0..4).map(|_| Scanner::new(&rules)).collect();
    drop(rules);
    for mut s in scanners {
        assert_eq!(s.scan(b"needle-0-")?.len(), 1);
    }
    Ok(())
}

#[test]
fn batch_results_stay_with_their_inputs() -> Result<()> {
    const N: usize = 16;
    let rules = rules_per_thread(N)?;
    let inputs: Vec<String> = (0..200).map(|i| format!("...needle-{}-...", i % N)).collect();
    let opts = ScanOptions { timeout_secs: Some(30.0), threads: Some(4) };

    let mut delivered = 0;
    let stats = scan_batch(&rules, &inputs, &opts, |idx, res| {
        let matches = res.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identifier(), format!("r{}", idx % N));
        delivered += 1;
    })?;

    assert_eq!(delivered, 200);
    assert_eq!(stats.buffers_scanned, 200);
    assert_eq!(stats.matches_total, 200);
    assert_eq!(stats.timeouts + stats.failures, 0);
    Ok(())
}
