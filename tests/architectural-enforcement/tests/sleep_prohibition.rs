//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for something. The
//! client waits on socket readiness and channels.
//! **Exception**: operation poll timers, which are spawned tasks that sleep
//! once and report back over a channel.

use architectural_enforcement::{production_files, SourceFile};

/// Test that production code only sleeps in poll timer tasks
#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();
    for file in production_files() {
        check_file(&file, &mut violations);
    }

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - tokio::time::sleep inside a spawned poll timer task");
        eprintln!("  - Test code");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep anywhere");
        eprintln!("  - Sleep in polling loops or as synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for (idx, code) in file.production_code() {
        if code.contains("thread::sleep") {
            violations.push(file.violation(idx, "Blocking sleep"));
            continue;
        }

        if (code.contains("::sleep(") || code.contains(".sleep("))
            && !is_timer_task(&file.lines, idx)
        {
            violations.push(file.violation(idx, "Sleep"));
        }
    }
}

/// Whether a sleep is the body of a freshly spawned timer task
fn is_timer_task(lines: &[String], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(3);
    lines[start..current_idx]
        .iter()
        .any(|l| l.contains("tokio::spawn(async move"))
        && lines[current_idx].contains("tokio::time::sleep(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_task_allowed() {
        let file = SourceFile::from_text(
            "timer.rs",
            "fn arm_timer() {\n    let timer = tokio::spawn(async move {\n        tokio::time::sleep(after).await;\n        let _ = tx.send(id);\n    });\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn test_polling_loop_rejected() {
        let file = SourceFile::from_text(
            "poll.rs",
            "async fn wait() {\n    loop {\n        tokio::time::sleep(Duration::from_millis(10)).await;\n    }\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_thread_sleep_rejected() {
        let file = SourceFile::from_text(
            "block.rs",
            "fn block() {\n    std::thread::sleep(Duration::from_secs(1));\n}\n",
        );
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        assert_eq!(violations.len(), 1);
    }
}
