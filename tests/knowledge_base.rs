use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use karl::{
    ChannelTransport, EvalSettings, KnowledgeBase, KnowledgeBaseConfig, ModifiedBatch, Record, WaitSettings,
};

fn wire(from: &KnowledgeBase, id: &str) -> Receiver<ModifiedBatch> {
    let (transport, rx) = ChannelTransport::new(id, 64);
    from.attach_transport(Arc::new(transport)).unwrap();
    rx
}

fn pump(rx: &Receiver<ModifiedBatch>, into: &KnowledgeBase) -> usize {
    rx.try_iter().map(|batch| into.apply_batch(&batch)).sum()
}

#[test]
fn test_two_knowledge_bases_replicate_through_channels() {
    let a = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id("agent.a"));
    let b = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id("agent.b"));
    let a_out = wire(&a, "a->b");
    let b_out = wire(&b, "b->a");

    a.evaluate("position = [1, 2] ;> .scratch = 9 ;> ready = 1", &EvalSettings::default())
        .unwrap();
    assert_eq!(pump(&a_out, &b), 2);
    assert_eq!(b.get("position").to_integers(), vec![1, 2]);
    assert!(!b.exists(".scratch"));

    // applied updates are not re-sent by the receiver
    assert!(b.get_modified().is_empty());
    b.send_modifieds().unwrap();
    assert!(b_out.try_recv().is_err());

    b.evaluate("ack = ready + 1", &EvalSettings::default()).unwrap();
    assert_eq!(pump(&b_out, &a), 1);
    assert_eq!(a.get("ack").to_integer(), 2);
}

#[test]
fn test_stale_updates_lose_arbitration() {
    let a = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id("a"));
    let b = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id("b"));
    let a_out = wire(&a, "a->b");

    a.set("x", 1).unwrap();
    let first = a_out.try_recv().unwrap();
    a.set("x", 2).unwrap();
    let second = a_out.try_recv().unwrap();

    assert_eq!(b.apply_batch(&second), 1);
    assert_eq!(b.apply_batch(&first), 0);
    assert_eq!(b.get("x").to_integer(), 2);
    assert_eq!(b.get("x").clock(), second.clock);
}

#[test]
fn test_higher_quality_writer_wins() {
    let kb = KnowledgeBase::new();
    kb.set_quality("heading", 3);
    kb.set("heading", 90).unwrap();

    let weak = ModifiedBatch {
        origin: "weak".to_string(),
        clock: 1000,
        updates: vec![("heading".to_string(), Record::integer(180).with_clock(1000).with_quality(1))],
    };
    assert_eq!(kb.apply_batch(&weak), 0);

    let strong = ModifiedBatch {
        origin: "strong".to_string(),
        clock: 1,
        updates: vec![("heading".to_string(), Record::integer(270).with_clock(1).with_quality(4))],
    };
    assert_eq!(kb.apply_batch(&strong), 1);
    assert_eq!(kb.get("heading").to_integer(), 270);
}

#[test]
fn test_batches_survive_serialization() {
    let a = KnowledgeBase::with_config(KnowledgeBaseConfig::default().with_id("a"));
    let b = KnowledgeBase::new();
    let a_out = wire(&a, "wire");

    a.evaluate("name = \"rover\" ;> speed = 1.5", &EvalSettings::default()).unwrap();
    let json = serde_json::to_string(&a_out.try_recv().unwrap()).unwrap();
    let batch: ModifiedBatch = serde_json::from_str(&json).unwrap();

    assert_eq!(b.apply_batch(&batch), 2);
    assert_eq!(b.get("name").to_string(), "rover");
    assert!((b.get("speed").to_double() - 1.5).abs() < f64::EPSILON);
}

#[test]
fn test_borrowed_facade_shares_store_and_wakes_waiters() {
    let owner = KnowledgeBase::new();
    let view = KnowledgeBase::facade_for(owner.context());
    assert!(view.is_borrowed());
    assert!(view.config().is_none());

    let waiter = {
        let owner = owner.clone();
        thread::spawn(move || {
            let settings = WaitSettings::default()
                .with_poll_frequency(0.0)
                .with_max_wait_time(5.0);
            owner.wait("go", &settings).unwrap()
        })
    };
    thread::sleep(Duration::from_millis(50));
    view.set("go", 1).unwrap();

    assert!(waiter.join().unwrap().is_true());
    // the facade has no transports, so the owner still holds the modification
    assert_eq!(owner.get_modified().len(), 1);
}

#[test]
fn test_owner_sends_what_the_facade_wrote() {
    let owner = KnowledgeBase::new();
    let out = wire(&owner, "out");
    let view = KnowledgeBase::facade_for(owner.context());

    view.evaluate("from_view = 5", &EvalSettings::default()).unwrap();
    assert!(out.try_recv().is_err());

    assert_eq!(owner.send_modifieds().unwrap(), 1);
    let batch = out.try_recv().unwrap();
    assert_eq!(batch.updates[0].0, "from_view");
}

#[test]
fn test_apply_modified_resends_everything() {
    let kb = KnowledgeBase::new();
    let out = wire(&kb, "out");
    kb.evaluate("a = 1 ;> b = 2 ;> .c = 3", &EvalSettings::default()).unwrap();
    out.try_recv().unwrap();

    kb.apply_modified();
    kb.send_modifieds().unwrap();
    let batch = out.try_recv().unwrap();
    let mut names: Vec<String> = batch.updates.into_iter().map(|(name, _)| name).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_config_loads_from_json() {
    let config =
        KnowledgeBaseConfig::from_json(r#"{"id": "agent.7", "change_feed_capacity": 16}"#).unwrap();
    assert_eq!(config.id.as_deref(), Some("agent.7"));
    assert_eq!(config.change_feed_capacity, 16);
    assert_eq!(config.max_call_depth, KnowledgeBaseConfig::default().max_call_depth);

    let kb = KnowledgeBase::with_config(config);
    assert_eq!(kb.id(), "agent.7");

    let eval = EvalSettings::from_json(r#"{"delay_sending_modifieds": true}"#).unwrap();
    assert!(eval.delay_sending_modifieds);
    assert!(KnowledgeBaseConfig::from_json("[]").unwrap_err().is_config());
}

#[test]
fn test_dropping_the_owner_closes_transports() {
    let (transport, rx) = ChannelTransport::new("t", 4);
    let transport = Arc::new(transport);
    {
        let kb = KnowledgeBase::new();
        kb.attach_transport(transport.clone()).unwrap();
        kb.set("x", 1).unwrap();
    }
    assert!(transport.is_closed());
    assert_eq!(rx.try_recv().unwrap().len(), 1);
}
