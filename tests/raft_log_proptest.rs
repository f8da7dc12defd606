use broker_raft::raft::{Log, LogEntry, LogInspector};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum LogOp {
    Append { term: i32, command: Vec<u8> },
    Reopen,
}

fn log_op_strategy() -> impl Strategy<Value = LogOp> {
    prop_oneof![
        4 => (0i32..10_000, proptest::collection::vec(any::<u8>(), 0..8))
            .prop_map(|(term, command)| LogOp::Append { term, command }),
        1 => Just(LogOp::Reopen),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn log_survives_reopen_and_reports_last_position(ops in proptest::collection::vec(log_op_strategy(), 1..40)) {
        let tmp = TempDir::new().expect("tempdir");
        let data_dir = tmp.path().to_str().expect("utf8");

        let mut log = Log::open(data_dir).expect("open");
        let mut shadow: Vec<i32> = vec![0];

        for op in ops {
            match op {
                LogOp::Append { term, command } => {
                    let index = log.append(LogEntry { term, command }).expect("append");
                    shadow.push(term);
                    prop_assert_eq!(index as usize, shadow.len() - 1);
                }
                LogOp::Reopen => {
                    drop(log);
                    log = Log::open(data_dir).expect("reopen");
                }
            }
        }

        let last = log.last_index();
        prop_assert_eq!(last as usize + 1, shadow.len());
        prop_assert_eq!(log.last_log_index(), last);
        prop_assert_eq!(log.last_log_term(), *shadow.last().expect("dummy entry"));

        for (idx, term) in shadow.iter().enumerate() {
            let idx = idx as i64;
            prop_assert_eq!(log.term_at(idx), Some(*term), "term mismatch at index {}", idx);
        }
        prop_assert!(log.term_at(last + 1).is_none());
    }
}
