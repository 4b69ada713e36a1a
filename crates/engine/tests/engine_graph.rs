//! Scenario tests for the directory graph
//!
//! Covers the end-to-end behaviors the engine promises:
//!
//! 1. Counter: a per-key mapper plus a sum reducer tracks writes and removes
//! 2. Invalidation minimality: untouched derived entries keep identity
//! 3. Lazy memoisation: recursive fib is linear to force, free to re-force
//! 4. Cycle tolerance: mutually recursive lazy cells settle, no overflow
//! 5. Deleted entries and directories read as empty downstream
//! 6. Write/remove/rewrite leaves downstream output identical

use skfs_core::{BaseName, DirName, File, FileData, Interner};
use skfs_engine::{map_key_values, Context, EHandle, LHandle, MapperFn, Reducer};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn dir(name: &str) -> DirName {
    DirName::new(name).unwrap()
}

fn sid(key: &str) -> BaseName {
    BaseName::sid(key).unwrap()
}

/// Sum of all `Int` values; the aggregate is a single `Int`.
struct Sum;

impl Reducer for Sum {
    fn can_reset(&self) -> bool {
        true
    }

    fn init(&self, interner: &mut Interner, values: &[File]) -> Vec<File> {
        let total: i64 = values.iter().filter_map(File::as_int).sum();
        vec![interner.intern(FileData::Int(total))]
    }

    fn update(
        &self,
        interner: &mut Interner,
        state: &[File],
        removed: &[File],
        added: &[File],
    ) -> Option<Vec<File>> {
        let current = state.first().and_then(File::as_int)?;
        let gone: i64 = removed.iter().filter_map(File::as_int).sum();
        let new: i64 = added.iter().filter_map(File::as_int).sum();
        Some(vec![interner.intern(FileData::Int(current - gone + new))])
    }
}

/// Mapper: parse the source entry's strings and write their sum under IID 0.
fn sum_mapper() -> MapperFn {
    Arc::new(|ctx, writer, _key, values| {
        let total: i64 = values
            .iter()
            .filter_map(File::as_str)
            .filter_map(|s| s.parse::<i64>().ok())
            .sum();
        let file = ctx.intern(FileData::Int(total));
        writer.write_array(BaseName::iid(0), vec![file]);
        Ok(())
    })
}

/// Input dir of strings plus a summed output dir with a `Sum` reducer.
fn counter_setup(ctx: &mut Context) -> (EHandle<String>, EHandle<i64>) {
    let input: EHandle<String> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    let sums: EHandle<i64> =
        map_key_values(ctx, &input, &dir("/sum/"), sum_mapper(), Some(Arc::new(Sum))).unwrap();
    (input, sums)
}

fn aggregate_of(ctx: &Context, handle: &EHandle<i64>) -> i64 {
    handle
        .aggregate(ctx)
        .unwrap()
        .unwrap()
        .first()
        .and_then(File::as_int)
        .unwrap()
}

// ============================================================================
// Counter
// ============================================================================

#[test]
fn test_counter_tracks_writes_and_removes() {
    let mut ctx = Context::new();
    let (input, sums) = counter_setup(&mut ctx);

    input.write(&mut ctx, sid("x"), &"1".to_string()).unwrap();
    ctx.update().unwrap();
    assert_eq!(aggregate_of(&ctx, &sums), 1);

    input.write(&mut ctx, sid("x"), &"2".to_string()).unwrap();
    ctx.update().unwrap();
    assert_eq!(aggregate_of(&ctx, &sums), 2);

    input.write(&mut ctx, sid("y"), &"3".to_string()).unwrap();
    ctx.update().unwrap();
    assert_eq!(aggregate_of(&ctx, &sums), 5);

    input.remove(&mut ctx, sid("x")).unwrap();
    ctx.update().unwrap();
    assert_eq!(aggregate_of(&ctx, &sums), 3);
}

#[test]
fn test_counter_entry_merges_per_key_contributions() {
    let mut ctx = Context::new();
    let (input, sums) = counter_setup(&mut ctx);

    input.write(&mut ctx, sid("x"), &"2".to_string()).unwrap();
    input.write(&mut ctx, sid("y"), &"3".to_string()).unwrap();
    ctx.update().unwrap();

    // IID 0 holds one slice per source key, in producer order.
    let merged = sums.get_array(&mut ctx, &BaseName::iid(0)).unwrap();
    assert_eq!(merged, vec![2, 3]);
}

#[test]
fn test_batch_write_is_one_reducer_delta() {
    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/nums/"), true, Vec::new()).unwrap();
    let copy: MapperFn = Arc::new(|_ctx, writer, key, values| {
        writer.write_array(key.clone(), values.to_vec());
        Ok(())
    });
    let out: EHandle<i64> =
        map_key_values(&mut ctx, &input, &dir("/copy/"), copy, Some(Arc::new(Sum))).unwrap();

    let one = ctx.intern(FileData::Int(1));
    let two = ctx.intern(FileData::Int(2));
    ctx.write_array_many(
        &dir("/nums/"),
        vec![(sid("a"), vec![one]), (sid("b"), vec![two])],
    )
    .unwrap();
    ctx.update().unwrap();
    assert_eq!(aggregate_of(&ctx, &out), 3);
}

// ============================================================================
// Invalidation Minimality
// ============================================================================

#[test]
fn test_writing_one_key_recomputes_only_that_key() {
    let mut ctx = Context::new();
    let input: EHandle<String> = ctx.mkdir(&dir("/src/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("a"), &"1".to_string()).unwrap();
    input.write(&mut ctx, sid("b"), &"2".to_string()).unwrap();

    let double: MapperFn = Arc::new(|ctx, writer, key, values| {
        let n: i64 = values
            .iter()
            .filter_map(File::as_str)
            .filter_map(|s| s.parse::<i64>().ok())
            .sum();
        let file = ctx.intern(FileData::Int(n * 2));
        writer.write_array(key.clone(), vec![file]);
        Ok(())
    });
    let out: EHandle<i64> =
        map_key_values(&mut ctx, &input, &dir("/double/"), double, None).unwrap();
    ctx.update().unwrap();

    let b_before = out.get_array_raw(&ctx, &sid("b")).unwrap();
    let before = ctx.stats();

    input.write(&mut ctx, sid("a"), &"5".to_string()).unwrap();
    ctx.update().unwrap();

    // Exactly one mapper re-run, and b's derived entry kept its identity.
    assert_eq!(ctx.stats().since(&before).recomputes, 1);
    let b_after = out.get_array_raw(&ctx, &sid("b")).unwrap();
    assert!(b_before[0].same(&b_after[0]));
    assert_eq!(out.get(&mut ctx, &sid("a")).unwrap(), Some(10));
}

#[test]
fn test_identity_rewrite_recomputes_nothing() {
    let mut ctx = Context::new();
    let (input, _sums) = counter_setup(&mut ctx);
    input.write(&mut ctx, sid("x"), &"1".to_string()).unwrap();
    ctx.update().unwrap();

    let before = ctx.stats();
    input.write(&mut ctx, sid("x"), &"1".to_string()).unwrap();
    ctx.update().unwrap();
    assert_eq!(ctx.stats().since(&before).recomputes, 0);
    assert_eq!(ctx.stats().since(&before).writes, 0);
}

// ============================================================================
// Lazy Memoisation
// ============================================================================

fn fib_dir(ctx: &mut Context) -> LHandle<i64> {
    LHandle::create(ctx, &dir("/fib/"), |ctx, this, key| {
        let n = key.as_iid().unwrap_or(0);
        let value = if n < 2 {
            n
        } else {
            let a = this.get(ctx, &BaseName::iid(n - 1))?.unwrap_or(0);
            let b = this.get(ctx, &BaseName::iid(n - 2))?.unwrap_or(0);
            a + b
        };
        let file = ctx.intern(FileData::Int(value));
        Ok(vec![file])
    })
    .unwrap()
}

#[test]
fn test_fib_forces_each_cell_once() {
    let mut ctx = Context::new();
    let fib = fib_dir(&mut ctx);

    let before = ctx.stats();
    assert_eq!(fib.get(&mut ctx, &BaseName::iid(20)).unwrap(), Some(6765));
    // One computation per cell 0..=20, memoised across the recursion.
    assert_eq!(ctx.stats().since(&before).recomputes, 21);
}

#[test]
fn test_fib_reforce_is_a_cache_hit() {
    let mut ctx = Context::new();
    let fib = fib_dir(&mut ctx);
    fib.get(&mut ctx, &BaseName::iid(20)).unwrap();

    let before = ctx.stats();
    assert_eq!(fib.get(&mut ctx, &BaseName::iid(20)).unwrap(), Some(6765));
    let delta = ctx.stats().since(&before);
    assert_eq!(delta.recomputes, 0);
    assert_eq!(delta.cache_hits, 1);
}

#[test]
fn test_maybe_get_never_forces() {
    let mut ctx = Context::new();
    let fib = fib_dir(&mut ctx);

    assert_eq!(fib.maybe_get(&ctx, &BaseName::iid(5)).unwrap(), None);
    assert_eq!(ctx.stats().recomputes, 0);

    fib.get(&mut ctx, &BaseName::iid(5)).unwrap();
    assert_eq!(
        fib.maybe_get(&ctx, &BaseName::iid(5)).unwrap(),
        Some(vec![5])
    );
}

// ============================================================================
// Cycle Tolerance
// ============================================================================

#[test]
fn test_mutually_recursive_lazy_dirs_settle() {
    let mut ctx = Context::new();
    let b_name = dir("/b/");
    let a: LHandle<i64> = LHandle::create(&mut ctx, &dir("/a/"), move |ctx, _this, key| {
        let peer = ctx.force(&b_name, key)?;
        let value = peer.first().and_then(File::as_int).unwrap_or(42);
        let file = ctx.intern(FileData::Int(value));
        Ok(vec![file])
    })
    .unwrap();
    let a_name = dir("/a/");
    let _b: LHandle<i64> = LHandle::create(&mut ctx, &dir("/b/"), move |ctx, _this, key| {
        let peer = ctx.force(&a_name, key)?;
        let value = peer.first().and_then(File::as_int).unwrap_or(7);
        let file = ctx.intern(FileData::Int(value));
        Ok(vec![file])
    })
    .unwrap();

    // Forcing must terminate, tolerating the cycle via the stale value.
    let value = a.get(&mut ctx, &BaseName::iid(0)).unwrap();
    assert_eq!(value, Some(7));
    assert!(ctx.stats().cycles_tolerated >= 1);

    // A few updates drive the pair to a fixed point.
    for _ in 0..4 {
        if !ctx.has_dirty() {
            break;
        }
        ctx.update().unwrap();
    }
    assert!(!ctx.has_dirty());
    assert_eq!(a.get(&mut ctx, &BaseName::iid(0)).unwrap(), Some(7));
}

// ============================================================================
// Deleted Entries and Directories
// ============================================================================

#[test]
fn test_removed_source_entry_reads_empty_downstream() {
    let mut ctx = Context::new();
    let input: EHandle<String> = ctx.mkdir(&dir("/src/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("a"), &"1".to_string()).unwrap();

    let copy: MapperFn = Arc::new(|_ctx, writer, key, values| {
        if !values.is_empty() {
            writer.write_array(key.clone(), values.to_vec());
        }
        Ok(())
    });
    let out: EHandle<String> =
        map_key_values(&mut ctx, &input, &dir("/out/"), copy, None).unwrap();
    ctx.update().unwrap();
    assert_eq!(out.get(&mut ctx, &sid("a")).unwrap(), Some("1".to_string()));

    input.remove(&mut ctx, sid("a")).unwrap();
    ctx.update().unwrap();
    assert_eq!(out.get_array(&mut ctx, &sid("a")).unwrap(), Vec::<String>::new());
}

#[test]
fn test_deleted_dir_answers_empty() {
    let mut ctx = Context::new();
    let input: EHandle<String> = ctx.mkdir(&dir("/gone/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("k"), &"v".to_string()).unwrap();

    ctx.remove_dir(&dir("/gone/")).unwrap();
    assert_eq!(ctx.read_array(&dir("/gone/"), &sid("k")).unwrap(), Vec::new());

    // The name can be reborn.
    let reborn: EHandle<String> = ctx.mkdir(&dir("/gone/"), true, Vec::new()).unwrap();
    assert_eq!(reborn.keys(&ctx).unwrap(), Vec::<BaseName>::new());
}

#[test]
fn test_write_to_deleted_dir_is_fatal() {
    let mut ctx = Context::new();
    let _input: EHandle<String> = ctx.mkdir(&dir("/gone/"), true, Vec::new()).unwrap();
    ctx.remove_dir(&dir("/gone/")).unwrap();

    let file = ctx.intern(FileData::Int(1));
    let err = ctx.write_array(&dir("/gone/"), sid("k"), vec![file]).unwrap_err();
    assert_eq!(err.code(), skfs_core::ErrorCode::WriteToDeletedDir);
}

// ============================================================================
// Write / Remove / Rewrite
// ============================================================================

#[test]
fn test_write_remove_rewrite_restores_downstream_identically() {
    let mut ctx = Context::new();
    let input: EHandle<String> = ctx.mkdir(&dir("/src/"), true, Vec::new()).unwrap();
    let double: MapperFn = Arc::new(|ctx, writer, key, values| {
        let n: i64 = values
            .iter()
            .filter_map(File::as_str)
            .filter_map(|s| s.parse::<i64>().ok())
            .sum();
        if !values.is_empty() {
            let file = ctx.intern(FileData::Int(n * 2));
            writer.write_array(key.clone(), vec![file]);
        }
        Ok(())
    });
    let out: EHandle<i64> =
        map_key_values(&mut ctx, &input, &dir("/double/"), double, None).unwrap();

    input.write(&mut ctx, sid("k"), &"21".to_string()).unwrap();
    ctx.update().unwrap();
    let first = out.get_array_raw(&ctx, &sid("k")).unwrap();
    assert_eq!(first[0].as_int(), Some(42));

    input.remove(&mut ctx, sid("k")).unwrap();
    ctx.update().unwrap();
    assert!(out.get_array_raw(&ctx, &sid("k")).unwrap().is_empty());

    input.write(&mut ctx, sid("k"), &"21".to_string()).unwrap();
    ctx.update().unwrap();
    let third = out.get_array_raw(&ctx, &sid("k")).unwrap();
    assert_eq!(third.len(), first.len());
    // Interning makes the restored value identical, not merely equal.
    assert!(first[0].same(&third[0]));
}

// ============================================================================
// Globals and Scopes
// ============================================================================

#[test]
fn test_globals_roundtrip() {
    let mut ctx = Context::new();
    let file = ctx.intern(FileData::Int(9));
    ctx.set_global("counter", file.clone());
    assert!(ctx.get_global("counter").unwrap().same(&file));
    assert!(ctx.remove_global("counter").is_some());
    assert!(ctx.get_global("counter").is_none());
}

#[test]
fn test_mclone_commit_flows_writes_back() {
    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("k"), &1).unwrap();

    let mut child = ctx.mclone();
    input.write(&mut child, sid("k"), &2).unwrap();
    // Parent unaffected until commit.
    assert_eq!(input.get(&mut ctx, &sid("k")).unwrap(), Some(1));

    ctx.commit(child);
    assert_eq!(input.get(&mut ctx, &sid("k")).unwrap(), Some(2));
}

// ============================================================================
// Subscriptions
// ============================================================================

#[test]
fn test_subscription_sees_changed_keys_per_update() {
    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    let sub = ctx.subscribe(dir("/in/"));

    input.write(&mut ctx, sid("a"), &1).unwrap();
    input.write(&mut ctx, sid("b"), &2).unwrap();
    ctx.update().unwrap();

    let events = ctx.drain_events(sub);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].keys,
        std::collections::BTreeSet::from([sid("a"), sid("b")])
    );

    // No changes, no events.
    ctx.update().unwrap();
    assert!(ctx.drain_events(sub).is_empty());
}
