mod common;

use forum_world::{rebuild_feed, FeedReader, ScriptedRuntime};

use common::{open_engine, test_config};

#[test]
fn reopening_after_close_restores_clock_world_and_actors() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open_engine(test_config(dir.path()), ScriptedRuntime::new());
    engine.run_for(5);

    let clock = engine.clock();
    let forum = engine.world().forum().snapshot();
    let journal = engine.world().journal().snapshot();
    let digest = engine.world().digest().snapshot();
    let actor = engine.actor_snapshot("actor-001").unwrap();
    engine.close().unwrap();

    let reopened = open_engine(test_config(dir.path()), ScriptedRuntime::new());
    assert_eq!(reopened.clock(), clock);
    assert_eq!(reopened.world().forum().snapshot(), forum);
    assert_eq!(reopened.world().journal().snapshot(), journal);
    assert_eq!(reopened.world().digest().snapshot(), digest);

    let restored = reopened.actor_snapshot("actor-001").unwrap();
    assert_eq!(restored.memory, actor.memory);
    assert_eq!(restored.notes, actor.notes);
    assert_eq!(
        restored.relationships.keys().collect::<Vec<_>>(),
        actor.relationships.keys().collect::<Vec<_>>()
    );
    for (other, relationship) in &actor.relationships {
        let restored = restored.relationships[other];
        assert_eq!(restored.interactions, relationship.interactions);
        assert!((restored.affinity - relationship.affinity).abs() < 1e-9);
    }
    // Budgets start over with each process.
    assert_eq!(reopened.actor_turn_state("actor-001").unwrap().turns_taken, 0);
}

#[test]
fn crash_after_interval_checkpoint_resumes_from_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let feed_dir = config.feed_dir();
    let mut engine = open_engine(config, ScriptedRuntime::new());

    // Interval is 2, so tick 4 ends with a checkpoint and tick 5 does not.
    engine.run_for(4);
    let clock = engine.clock();
    assert_eq!(clock.tick, 4);
    let forum = engine.world().forum().snapshot();
    let journal = engine.world().journal().snapshot();
    let actor = engine.actor_snapshot("actor-001").unwrap();

    let after = engine.run_tick();
    assert!(after.turns > 0);
    let feed_total = engine.feed().total();
    drop(engine);

    let mut reopened = open_engine(test_config(dir.path()), ScriptedRuntime::new());
    assert_eq!(reopened.clock(), clock);
    assert_eq!(reopened.world().forum().snapshot(), forum);
    assert_eq!(reopened.world().journal().snapshot(), journal);
    assert_eq!(
        reopened.actor_snapshot("actor-001").unwrap().memory,
        actor.memory
    );
    for actor_id in reopened.actor_ids() {
        let state = reopened.actor_turn_state(&actor_id).unwrap();
        assert_eq!(state.turns_taken, 0);
        assert!(state.is_eligible());
    }
    // Records from the lost tick stay in the feed.
    assert_eq!(reopened.feed().total(), feed_total);

    let more = reopened.run_tick();
    assert_eq!(reopened.clock().tick, 5);
    assert_eq!(reopened.feed().total(), feed_total + more.turns);
    reopened.close().unwrap();

    let reader = FeedReader::open(&feed_dir).unwrap();
    assert_eq!(reader.index().total, feed_total + more.turns);
    assert_eq!(reader.records().unwrap().len() as u64, feed_total + more.turns);
}

#[test]
fn feed_totals_survive_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let feed_dir = config.feed_dir();

    let mut first = open_engine(config, ScriptedRuntime::new());
    let first_report = first.run_for(3);
    first.close().unwrap();

    let mut second = open_engine(test_config(dir.path()), ScriptedRuntime::new());
    let second_report = second.run_for(3);
    assert_eq!(second.clock().tick, 6);
    second.close().unwrap();

    let reader = FeedReader::open(&feed_dir).unwrap();
    let index = reader.index();
    let expected = first_report.turns + second_report.turns;
    assert_eq!(index.total, expected);
    assert_eq!(
        index.shards.iter().map(|shard| shard.count).sum::<u64>(),
        expected
    );
    assert!(index.shards.iter().all(|shard| shard.count <= 4));
    assert!(index.shards.len() >= 2);
    assert_eq!(reader.records().unwrap().len() as u64, expected);
}

#[test]
fn rebuilt_feed_is_ordered_and_complete() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let feed_dir = config.feed_dir();
    let mut engine = open_engine(config, ScriptedRuntime::new());
    let report = engine.run_for(6);
    engine.close().unwrap();

    let out = dir.path().join("rebuilt");
    let rebuilt = rebuild_feed(&[feed_dir.clone()], &out, 10).unwrap();
    assert_eq!(rebuilt.records, report.turns);
    assert_eq!(rebuilt.skipped, 0);

    let records = FeedReader::open(&out).unwrap().records().unwrap();
    assert_eq!(records.len() as u64, report.turns);
    assert!(records
        .windows(2)
        .all(|pair| pair[0].order_key() <= pair[1].order_key()));

    // Source feed is left untouched.
    let source = FeedReader::open(&feed_dir).unwrap();
    assert_eq!(source.index().total, report.turns);
    assert!(rebuild_feed(&[feed_dir], &out, 10).is_err());
}
