//! Stress test: many no-op items through a small pool sharing one run log.

use std::sync::Arc;

use bulk::io::run_log::RunLog;
use bulk::pool::{Completion, WorkerPool};
use bulk::test_support::MemorySink;

#[test]
fn thousand_items_on_four_workers_log_intact_lines() {
    let sink = MemorySink::default();
    let log = Arc::new(RunLog::with_writers(vec![Box::new(sink.clone())]));
    let pool = WorkerPool::new("stress", 4).expect("pool");

    for i in 0..1000_usize {
        let log = Arc::clone(&log);
        pool.submit(move || {
            log.println(format_args!("-------Finished item {i:04} {}", "x".repeat(64)));
            i
        });
    }

    let completions = pool.wait();
    assert_eq!(completions.len(), 1000);
    assert!(completions.iter().all(|c| matches!(c, Completion::Finished(_))));

    let lines = sink.lines();
    assert_eq!(lines.len(), 1000);
    let expected_tail = "x".repeat(64);
    for line in &lines {
        assert!(line.starts_with("-------Finished item "), "torn line: {line}");
        assert!(line.ends_with(&expected_tail), "torn line: {line}");
        assert_eq!(line.len(), "-------Finished item 0000 ".len() + 64);
    }
}
