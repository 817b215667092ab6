use std::thread;
use std::time::{Duration, Instant};

use karl::{EvalSettings, KnowledgeBase, WaitSettings};
use tracing_subscriber::EnvFilter;

// RUST_LOG=karl=debug shows wait iterations and timeouts
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_polling_wait_times_out_with_last_value() {
    init_logging();
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::default()
        .with_poll_frequency(0.05)
        .with_max_wait_time(0.2);

    let start = Instant::now();
    let result = kb.wait("x", &settings).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(result.to_integer(), 0);
    assert!(elapsed >= Duration::from_millis(200), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "returned after {elapsed:?}");
}

#[test]
fn test_change_notification_wakes_waiter() {
    init_logging();
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::default()
        .with_poll_frequency(0.0)
        .with_max_wait_time(5.0);

    let writer = {
        let kb = kb.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            kb.set("x", 1).unwrap();
        })
    };

    let start = Instant::now();
    let result = kb.wait("x == 1", &settings).unwrap();
    writer.join().unwrap();

    assert!(result.is_true());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_change_notification_wait_honours_deadline() {
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::default()
        .with_poll_frequency(0.0)
        .with_max_wait_time(0.1);

    let start = Instant::now();
    let result = kb.wait("never", &settings).unwrap();
    let elapsed = start.elapsed();

    assert!(result.is_false());
    assert!(elapsed >= Duration::from_millis(100), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "returned after {elapsed:?}");
}

#[test]
fn test_polling_wait_sees_other_threads() {
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::default()
        .with_poll_frequency(0.01)
        .with_max_wait_time(5.0);

    let writer = {
        let kb = kb.clone();
        thread::spawn(move || {
            for round in 1..=3 {
                thread::sleep(Duration::from_millis(20));
                kb.set("round", round).unwrap();
            }
        })
    };

    let result = kb.wait("round >= 3", &settings).unwrap();
    writer.join().unwrap();
    assert!(result.is_true());
}

#[test]
fn test_side_effects_run_on_every_evaluation() {
    let kb = KnowledgeBase::new();
    let settings = WaitSettings::default()
        .with_poll_frequency(0.001)
        .with_max_wait_time(5.0);

    let result = kb.wait("++attempts ;> attempts >= 5", &settings).unwrap();
    assert!(result.is_true());
    assert_eq!(kb.get("attempts").to_integer(), 5);
}

#[test]
fn test_print_statements_are_expanded_around_the_wait() {
    init_logging();
    let kb = KnowledgeBase::new();
    kb.set("agent", "a0").unwrap();
    let eval = EvalSettings::default()
        .with_pre_print("{agent} waiting")
        .with_post_print("{agent} done at {round}");
    let settings = WaitSettings::default().with_eval(eval).with_max_wait_time(1.0);

    let result = kb.wait("round = 2", &settings).unwrap();
    assert_eq!(result.to_integer(), 2);
    assert_eq!(kb.print("{agent} done at {round}"), "a0 done at 2");
}

#[test]
fn test_settings_load_from_json() {
    let settings = WaitSettings::from_json(r#"{"poll_frequency": 0.5, "max_wait_time": 3.0}"#).unwrap();
    assert!((settings.poll_frequency - 0.5).abs() < f64::EPSILON);
    assert!((settings.max_wait_time - 3.0).abs() < f64::EPSILON);
    assert!(!settings.eval.delay_sending_modifieds);

    assert!(WaitSettings::from_json("{not json").unwrap_err().is_config());
}
