//! End-to-end scenarios against the public `Journal` API, each using a
//! temp directory and a real on-disk round trip.

use opj::{Format, Journal, Tuple, Value};
use rand::Rng;
use std::time::{Duration, Instant};

fn wait_for_quiescence<C: opj::Codec>(journal: &Journal<C>, max_segments: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if journal.segment_count() <= max_segments || Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn schema_iilf_roundtrips_within_float_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::<Format>::new(dir.path(), Format::parse("iiLf").unwrap()).unwrap();

    let a = Tuple::new(vec![
        Value::I32(2),
        Value::I32(3),
        Value::U64(5),
        Value::F32(-0.1),
    ]);
    let b = Tuple::new(vec![
        Value::I32(300),
        Value::I32(4000),
        Value::U64(0),
        Value::F32(100.222),
    ]);

    journal.append(a.clone()).unwrap();
    journal.append(b.clone()).unwrap();

    let got: Vec<_> = journal.iterate().unwrap().collect();
    assert_eq!(got.len(), 2);

    let close = |got: &Tuple, want: &Tuple| {
        for (g, w) in got.values().iter().zip(want.values()) {
            match (g, w) {
                (Value::F32(g), Value::F32(w)) => assert!((g - w).abs() < 1e-6),
                (g, w) => assert_eq!(g, w),
            }
        }
    };
    // a < b lexicographically (2 < 300 on the first field).
    close(&got[0], &a);
    close(&got[1], &b);
}

#[test]
fn schema_if_buffer_recovery_reproduces_sorted_multiset() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rand::rng();

    let mut appended = Vec::new();
    {
        let journal = Journal::new_with_max_buffer_size(
            dir.path(),
            Format::parse("If").unwrap(),
            10_000, // high enough that nothing flushes mid-test
        )
        .unwrap();

        for _ in 0..10 {
            let i: u32 = rng.random();
            let f: f32 = rng.random();
            let record = Tuple::new(vec![Value::U32(i), Value::F32(f)]);
            journal.append(record.clone()).unwrap();
            appended.push(record);
        }
        // Dropped without an explicit flush, leaving everything in the
        // crash log for the next open() to recover.
    }

    appended.sort();

    let reopened = Journal::<Format>::open(dir.path()).unwrap();
    let got: Vec<_> = reopened.iterate().unwrap().collect();
    assert_eq!(got, appended);
}

#[test]
fn schema_i_two_segment_compaction_merges_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let journal =
        Journal::new_with_max_buffer_size(dir.path(), Format::parse("i").unwrap(), 1_000_000)
            .unwrap();

    let mut a: Vec<i32> = (0..50).collect();
    a.extend([500, 510, 520, 990]);
    let b: Vec<i32> = (0..200).step_by(2).collect();

    for v in &a {
        journal.append(Tuple::new(vec![Value::I32(*v)])).unwrap();
    }
    journal.flush().unwrap();
    for v in &b {
        journal.append(Tuple::new(vec![Value::I32(*v)])).unwrap();
    }
    journal.flush().unwrap();

    assert_eq!(journal.segment_count(), 2);

    wait_for_quiescence(&journal, 1, Duration::from_secs(5));
    assert_eq!(journal.segment_count(), 1);

    let mut expected: Vec<i32> = a.iter().chain(b.iter()).copied().collect();
    expected.sort_unstable();

    let got: Vec<i32> = journal
        .iterate()
        .unwrap()
        .map(|t| match t.values()[0] {
            Value::I32(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn schema_i_random_stream_converges_to_one_segment_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rand::rng();

    let mut appended = Vec::new();
    {
        let journal =
            Journal::new_with_max_buffer_size(dir.path(), Format::parse("i").unwrap(), 64).unwrap();

        for _ in 0..2_000 {
            let v: i32 = rng.random_range(-1000..=1000);
            journal.append(Tuple::new(vec![Value::I32(v)])).unwrap();
            appended.push(v);
        }

        wait_for_quiescence(&journal, 1, Duration::from_secs(5));
        assert_eq!(journal.segment_count(), 1);

        appended.sort_unstable();
        let got: Vec<i32> = journal
            .iterate()
            .unwrap()
            .map(|t| match t.values()[0] {
                Value::I32(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(got, appended);
    }

    let reopened = Journal::<Format>::open(dir.path()).unwrap();
    let got: Vec<i32> = reopened
        .iterate()
        .unwrap()
        .map(|t| match t.values()[0] {
            Value::I32(v) => v,
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(got, appended);
}

#[test]
fn schema_di_large_random_stream_matches_sorted_reference() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rand::rng();

    let journal =
        Journal::new_with_max_buffer_size(dir.path(), Format::parse("dI").unwrap(), 256).unwrap();

    let mut appended = Vec::new();
    for _ in 0..20_000 {
        let d: f64 = rng.random_range(-1.0..1.0);
        let u: u32 = rng.random();
        let record = Tuple::new(vec![Value::F64(d), Value::U32(u)]);
        journal.append(record.clone()).unwrap();
        appended.push(record);
    }

    wait_for_quiescence(&journal, 1, Duration::from_secs(10));
    assert_eq!(journal.segment_count(), 1);

    appended.sort();
    let got: Vec<_> = journal.iterate().unwrap().collect();
    assert_eq!(got, appended);
}

#[test]
fn schema_di_contains() {
    let dir = tempfile::tempdir().unwrap();
    let journal =
        Journal::new_with_max_buffer_size(dir.path(), Format::parse("dI").unwrap(), 1_000_000)
            .unwrap();

    for (d, u) in [(1.0, 100), (2.0, 200), (3.0, 300), (4.0, 400), (5.0, 500)] {
        journal
            .append(Tuple::new(vec![Value::F64(d), Value::U32(u)]))
            .unwrap();
    }

    assert!(!journal
        .contains(&Tuple::new(vec![Value::F64(1.0), Value::U32(200)]))
        .unwrap());
    assert!(journal
        .contains(&Tuple::new(vec![Value::F64(4.0), Value::U32(400)]))
        .unwrap());
}

#[test]
fn schema_di_range_queries_match_sorted_reference() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = rand::rng();

    let journal =
        Journal::new_with_max_buffer_size(dir.path(), Format::parse("dI").unwrap(), 300).unwrap();

    let mut appended = Vec::new();
    for _ in 0..5_000 {
        let d: f64 = rng.random_range(-2.0..2.0);
        let u: u32 = rng.random();
        let record = Tuple::new(vec![Value::F64(d), Value::U32(u)]);
        journal.append(record.clone()).unwrap();
        appended.push(record);
    }
    appended.sort();

    let lo = Tuple::new(vec![Value::F64(0.5), Value::U32(1000)]);
    let hi = Tuple::new(vec![Value::F64(0.7), Value::U32(2000)]);

    let reference_le_hi: Vec<_> = appended.iter().filter(|r| **r <= hi).cloned().collect();
    let reference_ge_lo: Vec<_> = appended.iter().filter(|r| **r >= lo).cloned().collect();
    let reference_between: Vec<_> = appended
        .iter()
        .filter(|r| **r >= lo && **r <= hi)
        .cloned()
        .collect();

    let got_le_hi: Vec<_> = journal.select(None, Some(&hi)).unwrap().collect();
    let got_ge_lo: Vec<_> = journal.select(Some(&lo), None).unwrap().collect();
    let got_between: Vec<_> = journal.select(Some(&lo), Some(&hi)).unwrap().collect();

    assert_eq!(got_le_hi, reference_le_hi);
    assert_eq!(got_ge_lo, reference_ge_lo);
    assert_eq!(got_between, reference_between);
}
