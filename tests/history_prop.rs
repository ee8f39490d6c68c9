use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::{prelude::*, test_runner::FileFailurePersistence};
use renter::history::{DownloadHistory, DownloadOutcome, DownloadRecord};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
}

fn fill(starts: &[i64]) -> DownloadHistory {
    let history = DownloadHistory::new();
    for (i, secs) in starts.iter().enumerate() {
        history.push(DownloadRecord {
            path: format!("f{}", i),
            start_time: at(*secs),
            offset: 0,
            length: 1,
            outcome: DownloadOutcome::Completed,
        });
    }
    history
}

fn gen_bound() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        1 => Just(None),
        3 => (0..60i64).prop_map(Some),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: Some(Box::new(
            FileFailurePersistence::WithSource("regressions"),
        )),
        cases: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn history_stays_sorted(starts in prop::collection::vec(0..60i64, 0..40)) {
        let history = fill(&starts);
        let times: Vec<_> = history.list().into_iter().map(|r| r.start_time).collect();
        prop_assert!(times.windows(2).all(|w| w[0] >= w[1]));
        prop_assert_eq!(times.len(), starts.len());
    }

    #[test]
    fn clear_removes_exactly_the_selected_records(
        starts in prop::collection::vec(0..60i64, 0..40),
        after in gen_bound(),
        before in gen_bound(),
    ) {
        let history = fill(&starts);
        let selected = |s: i64| match (after, before) {
            (Some(a), Some(b)) if a == b => s == a,
            (Some(a), Some(b)) => a < s && s < b,
            (Some(a), None) => s > a,
            (None, Some(b)) => s < b,
            (None, None) => true,
        };

        let result = history.clear(after.map(at), before.map(at));
        if let (Some(a), Some(b)) = (after, before) {
            if a > b {
                prop_assert!(result.is_err());
                prop_assert_eq!(history.len(), starts.len());
                return Ok(());
            }
        }
        let expected_removed = starts.iter().filter(|s| selected(**s)).count();
        prop_assert_eq!(result.ok(), Some(expected_removed));

        let mut kept: Vec<_> = starts.iter().copied().filter(|s| !selected(*s)).map(at).collect();
        kept.sort();
        kept.reverse();
        let remaining: Vec<_> = history.list().into_iter().map(|r| r.start_time).collect();
        prop_assert_eq!(remaining, kept);
    }
}
