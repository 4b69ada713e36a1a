//! Snapshot round-trips and garbage collection
//!
//! A context written to disk and loaded back must show identical observable
//! state once the client re-attaches its code. Collection must be a no-op on
//! observable state and must finalise dropped external pointers exactly once.

use skfs_core::{BaseName, DirName, File, FileData};
use skfs_engine::persist::{load_context, save_context};
use skfs_engine::{map_key_values, Context, EHandle, LHandle, MapperFn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn dir(name: &str) -> DirName {
    DirName::new(name).unwrap()
}

fn sid(key: &str) -> BaseName {
    BaseName::sid(key).unwrap()
}

fn double_mapper() -> MapperFn {
    Arc::new(|ctx, writer, key, values| {
        if !values.is_empty() {
            let doubled: Vec<File> = values
                .iter()
                .filter_map(File::as_int)
                .map(|n| ctx.intern(FileData::Int(n * 2)))
                .collect();
            writer.write_array(key.clone(), doubled);
        }
        Ok(())
    })
}

/// Registration shared by the fresh and the reloaded session
fn register(ctx: &mut Context) -> (EHandle<i64>, EHandle<i64>, LHandle<i64>) {
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    let doubled: EHandle<i64> =
        map_key_values(ctx, &input, &dir("/double/"), double_mapper(), None).unwrap();
    let squares: LHandle<i64> = LHandle::create(ctx, &dir("/squares/"), |ctx, _this, key| {
        let n = key.as_iid().unwrap_or(0);
        let file = ctx.intern(FileData::Int(n * n));
        Ok(vec![file])
    })
    .unwrap();
    (input, doubled, squares)
}

// ============================================================================
// Snapshot Round-Trips
// ============================================================================

#[test]
fn test_context_survives_save_and_load() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.skfs");

    let mut ctx = Context::new();
    let (input, doubled, squares) = register(&mut ctx);
    input.write(&mut ctx, sid("a"), &21).unwrap();
    squares.get(&mut ctx, &BaseName::iid(9)).unwrap();
    let global = ctx.intern(FileData::Str(Arc::from("hello")));
    ctx.set_global("greeting", global);
    ctx.update().unwrap();
    assert_eq!(doubled.get(&mut ctx, &sid("a")).unwrap(), Some(42));

    save_context(&ctx, &path).unwrap();

    let mut loaded = load_context(&path).unwrap();
    let (input2, doubled2, squares2) = register(&mut loaded);

    // Materialised and memoised state came back.
    assert_eq!(loaded.time(), ctx.time());
    assert_eq!(doubled2.get(&mut loaded, &sid("a")).unwrap(), Some(42));
    assert_eq!(
        squares2.maybe_get(&loaded, &BaseName::iid(9)).unwrap(),
        Some(vec![81])
    );
    assert_eq!(
        loaded.get_global("greeting").unwrap().as_str(),
        Some("hello")
    );

    // The reloaded graph stays incremental.
    input2.write(&mut loaded, sid("a"), &5).unwrap();
    loaded.update().unwrap();
    assert_eq!(doubled2.get(&mut loaded, &sid("a")).unwrap(), Some(10));
}

#[test]
fn test_loaded_files_are_reinterned() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.skfs");

    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("a"), &7).unwrap();
    input.write(&mut ctx, sid("b"), &7).unwrap();
    save_context(&ctx, &path).unwrap();

    let loaded = load_context(&path).unwrap();
    let a = loaded.read_array_raw(&dir("/in/"), &sid("a")).unwrap();
    let b = loaded.read_array_raw(&dir("/in/"), &sid("b")).unwrap();
    // Equal values share identity after the load's re-interning pass.
    assert!(a[0].same(&b[0]));
}

#[test]
fn test_update_after_load_without_reattach_keeps_stale_value() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.skfs");

    let mut ctx = Context::new();
    let (input, _doubled, _squares) = register(&mut ctx);
    input.write(&mut ctx, sid("a"), &21).unwrap();
    ctx.update().unwrap();
    save_context(&ctx, &path).unwrap();

    // No re-registration: the mapper's code is missing, so a new write keeps
    // the stale derived value and the path stays dirty for retry.
    let mut loaded = load_context(&path).unwrap();
    let input2: EHandle<i64> = loaded.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    input2.write(&mut loaded, sid("a"), &5).unwrap();
    loaded.update().unwrap();

    let stale = loaded.read_array_raw(&dir("/double/"), &sid("a")).unwrap();
    assert_eq!(stale[0].as_int(), Some(42));
    assert!(loaded.has_dirty());
}

// ============================================================================
// Garbage Collection
// ============================================================================

#[test]
fn test_collect_is_noop_on_observable_state() {
    let mut ctx = Context::new();
    let (input, doubled, squares) = register(&mut ctx);
    input.write(&mut ctx, sid("a"), &3).unwrap();
    input.write(&mut ctx, sid("b"), &4).unwrap();
    squares.get(&mut ctx, &BaseName::iid(5)).unwrap();
    ctx.update().unwrap();

    let doubled_before = doubled.get_array(&mut ctx, &sid("a")).unwrap();
    let time_before = ctx.time();

    let report = ctx.collect();
    assert_eq!(report.dirs_dropped, 0);

    assert_eq!(ctx.time(), time_before);
    assert_eq!(doubled.get_array(&mut ctx, &sid("a")).unwrap(), doubled_before);
    assert_eq!(doubled.get(&mut ctx, &sid("b")).unwrap(), Some(8));
    assert_eq!(
        squares.maybe_get(&ctx, &BaseName::iid(5)).unwrap(),
        Some(vec![25])
    );
    assert!(!ctx.has_dirty());

    // Interning identity still holds after evacuation.
    let x = ctx.intern(FileData::Int(6));
    let y = ctx.intern(FileData::Int(6));
    assert!(x.same(&y));
}

#[test]
fn test_collect_drops_deleted_dirs_and_dead_tombstones() {
    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    input.write(&mut ctx, sid("a"), &1).unwrap();
    input.remove(&mut ctx, sid("a")).unwrap();

    let gone: EHandle<i64> = ctx.mkdir(&dir("/gone/"), true, Vec::new()).unwrap();
    gone.write(&mut ctx, sid("x"), &9).unwrap();
    ctx.remove_dir(&dir("/gone/")).unwrap();
    ctx.update().unwrap();

    let report = ctx.collect();
    assert_eq!(report.dirs_dropped, 1);
    assert!(report.entries_dropped >= 1);

    // The dropped tombstone now reads as an unknown directory.
    assert!(ctx.read_array_raw(&dir("/gone/"), &sid("x")).is_err());
}

#[test]
fn test_dropped_external_pointer_finalised_exactly_once() {
    let calls = Arc::new(AtomicU64::new(0));
    let calls2 = Arc::clone(&calls);

    let mut ctx = Context::new();
    let input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    let pointer = ctx.external_file(
        42,
        Some(Arc::new(move |value| {
            assert_eq!(value, 42);
            calls2.fetch_add(1, Ordering::SeqCst);
        })),
    );
    ctx.write_array(&dir("/in/"), sid("res"), vec![pointer]).unwrap();

    // Still referenced: survives collection.
    ctx.collect();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Replace the entry; the pointer no longer survives the copy.
    input.write(&mut ctx, sid("res"), &0).unwrap();
    ctx.update().unwrap();
    ctx.collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    ctx.collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_collect_preserves_externals_reachable_through_records() {
    let mut ctx = Context::new();
    let _input: EHandle<i64> = ctx.mkdir(&dir("/in/"), true, Vec::new()).unwrap();
    let pointer = ctx.external_file(7, None);
    let record = ctx.intern(FileData::Record {
        tag: 1,
        fields: vec![pointer.clone()],
    });
    ctx.write_array(&dir("/in/"), sid("wrapped"), vec![record]).unwrap();

    ctx.collect();
    let id = pointer.as_external().unwrap();
    assert_eq!(ctx.externals().get(id).unwrap(), 7);
}
